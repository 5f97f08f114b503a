// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Control channel to the tuner process.
//!
//! The channel connects only after the live process reported readiness,
//! keeps at most one open link, and remembers the last value written for
//! every parameter so a restarted process can be brought back to the same
//! configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time;
use tracing::{debug, info};

use tuner_core::{CommandFrame, TunerParam, TunerResult};

use crate::event::{ControllerEvent, EventSink, Generation};

/// Outcome of a parameter change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the open control socket
    Sent,
    /// Not connected; will be written once the channel connects
    Queued,
}

/// An open control connection.
///
/// Frames are handed to a writer task; dropping the link aborts its tasks
/// and closes the socket.
#[derive(Debug)]
pub struct ControlLink {
    generation: Generation,
    frames: mpsc::UnboundedSender<CommandFrame>,
    tasks: Vec<AbortHandle>,
}

impl ControlLink {
    pub fn new(generation: Generation, frames: mpsc::UnboundedSender<CommandFrame>) -> Self {
        Self {
            generation,
            frames,
            tasks: Vec::new(),
        }
    }

    pub fn with_tasks(
        generation: Generation,
        frames: mpsc::UnboundedSender<CommandFrame>,
        tasks: Vec<AbortHandle>,
    ) -> Self {
        Self {
            generation,
            frames,
            tasks,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Queue a frame on the socket writer. Returns false if the writer is
    /// gone.
    pub fn write(&self, frame: CommandFrame) -> bool {
        self.frames.send(frame).is_ok()
    }
}

impl Drop for ControlLink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Opens control connections.
///
/// Implementations report the result as [`ControllerEvent::SocketConnected`]
/// or [`ControllerEvent::SocketError`], and report later failures of the
/// link as [`ControllerEvent::SocketError`].
pub trait Connector: Send {
    fn connect(
        &mut self,
        endpoint: &Path,
        timeout: Duration,
        generation: Generation,
        events: EventSink,
    ) -> Option<AbortHandle>;
}

/// Connects to the tuner over its Unix domain socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixConnector;

impl Connector for UnixConnector {
    fn connect(
        &mut self,
        endpoint: &Path,
        timeout: Duration,
        generation: Generation,
        events: EventSink,
    ) -> Option<AbortHandle> {
        let endpoint = endpoint.to_path_buf();
        let task = tokio::spawn(async move {
            let error = match time::timeout(timeout, UnixStream::connect(&endpoint)).await {
                Ok(Ok(stream)) => {
                    let (reader, writer) = stream.into_split();
                    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
                    let writer_task =
                        tokio::spawn(write_frames(writer, frames_rx, generation, events.clone()));
                    let reader_task = tokio::spawn(watch_peer(reader, generation, events.clone()));
                    let link = ControlLink::with_tasks(
                        generation,
                        frames_tx,
                        vec![writer_task.abort_handle(), reader_task.abort_handle()],
                    );
                    let _ = events.send(ControllerEvent::SocketConnected { generation, link });
                    return;
                }
                Ok(Err(e)) => format!("connect to {} failed: {}", endpoint.display(), e),
                Err(_) => format!(
                    "connect to {} timed out after {:?}",
                    endpoint.display(),
                    timeout
                ),
            };
            let _ = events.send(ControllerEvent::SocketError { generation, error });
        });
        Some(task.abort_handle())
    }
}

async fn write_frames(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<CommandFrame>,
    generation: Generation,
    events: EventSink,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(frame.as_bytes()).await {
            let _ = events.send(ControllerEvent::SocketError {
                generation,
                error: format!("write failed: {}", e),
            });
            return;
        }
    }
}

/// Discard anything the tuner sends on the control socket and report when
/// it goes away.
async fn watch_peer(mut reader: OwnedReadHalf, generation: Generation, events: EventSink) {
    let mut buf = [0u8; 256];
    let error = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break "closed by peer".to_string(),
            Ok(n) => debug!("control socket {}: ignoring {} bytes", generation, n),
            Err(e) => break format!("read failed: {}", e),
        }
    };
    let _ = events.send(ControllerEvent::SocketError { generation, error });
}

/// Last commanded value per parameter, in the order they were last set.
#[derive(Debug, Clone, Default)]
pub struct ParameterCache {
    entries: Vec<(TunerParam, i64)>,
}

impl ParameterCache {
    pub fn record(&mut self, param: TunerParam, value: i64) {
        self.entries.retain(|(p, _)| *p != param);
        self.entries.push((param, value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn frames(&self) -> impl Iterator<Item = CommandFrame> + '_ {
        self.entries
            .iter()
            .map(|(param, value)| CommandFrame::new(*param, *value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Disconnected,
    Connecting(Generation),
    Connected(Generation),
}

/// Owns the single control socket.
pub struct ControlChannel {
    connector: Box<dyn Connector>,
    endpoint: PathBuf,
    connect_timeout: Duration,
    state: LinkState,
    ready: Option<Generation>,
    link: Option<ControlLink>,
    connect_task: Option<AbortHandle>,
    cache: ParameterCache,
}

impl ControlChannel {
    pub fn new(connector: Box<dyn Connector>, endpoint: PathBuf, connect_timeout: Duration) -> Self {
        Self {
            connector,
            endpoint,
            connect_timeout,
            state: LinkState::Disconnected,
            ready: None,
            link: None,
            connect_task: None,
            cache: ParameterCache::default(),
        }
    }

    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, LinkState::Connected(_)) && self.link.is_some()
    }

    pub fn cache(&self) -> &ParameterCache {
        &self.cache
    }

    /// Mark the endpoint of process `generation` as listening.
    pub fn endpoint_ready(&mut self, generation: Generation) {
        self.ready = Some(generation);
    }

    /// Start connecting. No-op while connected or connecting, or when no
    /// process endpoint is ready.
    pub fn connect(&mut self, events: &EventSink) -> bool {
        if self.state != LinkState::Disconnected {
            return false;
        }
        let Some(generation) = self.ready else {
            return false;
        };
        info!("Connecting control socket {}", self.endpoint.display());
        self.state = LinkState::Connecting(generation);
        self.connect_task = self.connector.connect(
            &self.endpoint,
            self.connect_timeout,
            generation,
            events.clone(),
        );
        true
    }

    /// Whether events tagged `generation` concern the current socket.
    pub fn owns(&self, generation: Generation) -> bool {
        match self.state {
            LinkState::Connecting(g) | LinkState::Connected(g) => g == generation,
            LinkState::Disconnected => false,
        }
    }

    /// Adopt a freshly connected link. Stale links are dropped and false is
    /// returned.
    pub fn on_connected(&mut self, link: ControlLink) -> bool {
        let generation = link.generation();
        if self.state != LinkState::Connecting(generation) {
            debug!("dropping stale control link {}", generation);
            return false;
        }
        self.connect_task = None;
        self.link = Some(link);
        self.state = LinkState::Connected(generation);
        true
    }

    /// Write every remembered parameter to the open link.
    pub fn replay(&mut self) -> usize {
        let Some(link) = self.link.as_ref() else {
            return 0;
        };
        if self.cache.is_empty() {
            return 0;
        }
        let mut sent = 0;
        for frame in self.cache.frames() {
            if !link.write(frame) {
                break;
            }
            sent += 1;
        }
        if sent > 0 {
            debug!("re-applied {} tuner parameters", sent);
        }
        sent
    }

    /// Encode and write a parameter change.
    ///
    /// The value is remembered either way; when disconnected it is written
    /// on the next connect.
    pub fn send(&mut self, name: &str, value: i64) -> TunerResult<Delivery> {
        let param = name.parse::<TunerParam>()?;
        self.cache.record(param, value);
        let frame = CommandFrame::new(param, value);
        match self.link.as_ref() {
            Some(link) if self.is_connected() && link.write(frame) => Ok(Delivery::Sent),
            _ => Ok(Delivery::Queued),
        }
    }

    /// Force-close the socket and forget the ready endpoint. Returns true
    /// if a socket or connect attempt was open.
    pub fn teardown(&mut self) -> bool {
        let was_open = self.state != LinkState::Disconnected;
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if self.link.take().is_some() {
            debug!("control socket {} closed", self.endpoint.display());
        }
        self.state = LinkState::Disconnected;
        self.ready = None;
        was_open
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.teardown();
    }
}
