// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Tuner process lifecycle.
//!
//! The supervisor owns at most one live process. Launching, readiness and
//! exit detection are behind the [`Launcher`] trait; the production
//! [`CommandLauncher`] runs the tuner binary with `tokio::process` and
//! reports back through the controller event queue.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use tuner_core::{DeviceIdentity, TunerError, TunerResult};

use crate::event::{ControllerEvent, EventSink, Generation};

/// Everything needed to start one tuner process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub binary: PathBuf,
    pub endpoint: PathBuf,
    pub device: DeviceIdentity,
    pub effective_rate: u32,
}

impl LaunchSpec {
    /// Positional arguments: control endpoint, device identity, sample rate.
    pub fn args(&self) -> Vec<String> {
        vec![
            self.endpoint.display().to_string(),
            self.device.to_string(),
            self.effective_rate.to_string(),
        ]
    }
}

/// Control over a launched process.
pub trait ProcessControl: Send {
    /// OS process id, if known.
    fn id(&self) -> Option<u32>;

    /// Forcibly terminate the process. The exit is still reported through
    /// the event queue.
    fn kill(&mut self);
}

/// Starts tuner processes.
///
/// Implementations must post exactly one [`ControllerEvent::ProcessExited`]
/// per launched process, and [`ControllerEvent::ProcessReady`] at most once
/// when the process first writes to stdout.
pub trait Launcher: Send {
    fn launch(
        &mut self,
        spec: &LaunchSpec,
        generation: Generation,
        events: EventSink,
    ) -> TunerResult<Box<dyn ProcessControl>>;
}

/// Launches the tuner binary as a child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandLauncher;

impl Launcher for CommandLauncher {
    fn launch(
        &mut self,
        spec: &LaunchSpec,
        generation: Generation,
        events: EventSink,
    ) -> TunerResult<Box<dyn ProcessControl>> {
        let mut child = Command::new(&spec.binary)
            .args(spec.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TunerError::ProcessLaunch {
                binary: spec.binary.display().to_string(),
                reason: e.to_string(),
            })?;

        let pid = child.id();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(watch_ready(stdout, generation, events.clone()));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(wait_exit(child, kill_rx, generation, events));

        Ok(Box::new(ChildControl {
            pid,
            kill_tx: Some(kill_tx),
        }))
    }
}

struct ChildControl {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ProcessControl for ChildControl {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    fn kill(&mut self) {
        // Dropping the sender also wakes the waiter.
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Report readiness on the first stdout bytes, then keep draining so the
/// process never blocks on a full pipe.
async fn watch_ready(mut stdout: ChildStdout, generation: Generation, events: EventSink) {
    let mut buf = [0u8; 512];
    let mut reported = false;
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if !reported {
                    reported = true;
                    debug!(
                        "tuner process {} ready: {}",
                        generation,
                        String::from_utf8_lossy(&buf[..n]).trim_end()
                    );
                    let _ = events.send(ControllerEvent::ProcessReady { generation });
                }
            }
            Err(e) => {
                debug!("tuner process {} stdout closed: {}", generation, e);
                break;
            }
        }
    }
}

async fn wait_exit(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    generation: Generation,
    events: EventSink,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill_rx => None,
    };
    let status = match exited {
        Some(status) => status,
        None => {
            if let Err(e) = child.start_kill() {
                warn!("failed to kill tuner process {}: {}", generation, e);
            }
            child.wait().await
        }
    };

    let (code, signal) = match status {
        Ok(status) => (status.code(), exit_signal(&status)),
        Err(e) => {
            warn!("failed to wait for tuner process {}: {}", generation, e);
            (None, None)
        }
    };
    let _ = events.send(ControllerEvent::ProcessExited {
        generation,
        code,
        signal,
    });
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

struct ProcessHandle {
    generation: Generation,
    control: Box<dyn ProcessControl>,
    ready: bool,
}

/// Owns the single live tuner process.
pub struct ProcessSupervisor {
    launcher: Box<dyn Launcher>,
    spec: LaunchSpec,
    handle: Option<ProcessHandle>,
    generation: Generation,
}

impl ProcessSupervisor {
    pub fn new(launcher: Box<dyn Launcher>, spec: LaunchSpec) -> Self {
        Self {
            launcher,
            spec,
            handle: None,
            generation: 0,
        }
    }

    /// Generation of the most recent launch attempt.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().and_then(|h| h.control.id())
    }

    /// Kill any live process and launch a new one.
    pub fn spawn(&mut self, events: &EventSink) -> TunerResult<Generation> {
        self.kill();
        self.generation += 1;
        let control = self
            .launcher
            .launch(&self.spec, self.generation, events.clone())?;
        self.handle = Some(ProcessHandle {
            generation: self.generation,
            control,
            ready: false,
        });
        Ok(self.generation)
    }

    /// Record readiness. Only the first signal of the live process counts.
    pub fn mark_ready(&mut self, generation: Generation) -> bool {
        match self.handle.as_mut() {
            Some(handle) if handle.generation == generation && !handle.ready => {
                handle.ready = true;
                true
            }
            _ => false,
        }
    }

    /// Record an exit. Returns true if it was the live process; exits of
    /// killed or superseded processes return false.
    pub fn on_exit(&mut self, generation: Generation) -> bool {
        if self
            .handle
            .as_ref()
            .is_some_and(|h| h.generation == generation)
        {
            self.handle = None;
            true
        } else {
            false
        }
    }

    /// Forcibly terminate the live process, if any, and forget it.
    pub fn kill(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            debug!(
                "killing tuner process {} (pid {:?})",
                handle.generation,
                handle.control.id()
            );
            handle.control.kill();
        }
    }
}
