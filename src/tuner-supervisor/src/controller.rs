// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device controller: composition root of one supervised tuner.
//!
//! The controller owns the process supervisor, the control channel, the
//! supervision state machine and the recovery timers. It consumes one event
//! queue and handles one event at a time, so no locking is needed; the two
//! re-entrant paths (death handling and socket teardown) are guarded by
//! explicit flags.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use tuner_core::rate::select_rate;
use tuner_core::supervisor::{
    SupervisionMachine, SupervisionState, SupervisorEvent, SupervisorEventEmitter,
    SupervisorListener, SupervisorTimings,
};
use tuner_core::{DeviceIdentity, TunerError, TunerResult};

use crate::channel::{ControlChannel, ControlLink, Connector, Delivery, UnixConnector};
use crate::event::{ControllerEvent, EventSink, EventSource, Generation, InitCallback};
use crate::handle::DeviceHandle;
use crate::process::{CommandLauncher, LaunchSpec, Launcher, ProcessSupervisor};
use crate::timer::TimerSlot;

const DEFAULT_ENDPOINT_PREFIX: &str = "tuner";

/// How long a stopping controller waits for the killed process to report
/// its exit.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Static configuration of one supervised device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub device: DeviceIdentity,
    /// Requested sample rate; mapped to a hardware rate at construction.
    pub requested_rate: i64,
    /// Tuner server binary.
    pub binary: PathBuf,
    /// Directory holding the control socket.
    pub runtime_dir: PathBuf,
    pub endpoint_prefix: String,
    pub timings: SupervisorTimings,
}

impl DeviceConfig {
    pub fn new(device: DeviceIdentity, requested_rate: i64, binary: impl Into<PathBuf>) -> Self {
        Self {
            device,
            requested_rate,
            binary: binary.into(),
            runtime_dir: std::env::temp_dir(),
            endpoint_prefix: DEFAULT_ENDPOINT_PREFIX.to_string(),
            timings: SupervisorTimings::default(),
        }
    }

    pub fn endpoint(&self) -> PathBuf {
        self.device
            .endpoint_path(&self.runtime_dir, &self.endpoint_prefix)
    }
}

pub struct DeviceController {
    device: DeviceIdentity,
    effective_rate: u32,
    timings: SupervisorTimings,
    machine: SupervisionMachine,
    process: ProcessSupervisor,
    channel: ControlChannel,
    pending_init: Option<InitCallback>,
    respawn_timer: TimerSlot,
    stall_timer: TimerSlot,
    handling_death: bool,
    /// Process killed by teardown whose exit is still outstanding
    awaiting_exit: Option<Generation>,
    teardown_waiters: Vec<oneshot::Sender<()>>,
    emitter: SupervisorEventEmitter,
    events_tx: EventSink,
    state_tx: watch::Sender<SupervisionState>,
}

impl DeviceController {
    /// Build a controller and the receiving end of its event queue.
    pub fn new(
        config: DeviceConfig,
        launcher: Box<dyn Launcher>,
        connector: Box<dyn Connector>,
    ) -> (Self, EventSource) {
        let endpoint = config.endpoint();
        let effective_rate = select_rate(config.requested_rate);
        let spec = LaunchSpec {
            binary: config.binary.clone(),
            endpoint: endpoint.clone(),
            device: config.device.clone(),
            effective_rate,
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SupervisionState::Idle);

        let controller = Self {
            device: config.device,
            effective_rate,
            timings: config.timings,
            machine: SupervisionMachine::new(),
            process: ProcessSupervisor::new(launcher, spec),
            channel: ControlChannel::new(connector, endpoint, config.timings.connect_timeout),
            pending_init: None,
            respawn_timer: TimerSlot::new(),
            stall_timer: TimerSlot::new(),
            handling_death: false,
            awaiting_exit: None,
            teardown_waiters: Vec::new(),
            emitter: SupervisorEventEmitter::new(),
            events_tx,
            state_tx,
        };
        (controller, events_rx)
    }

    pub fn subscribe(&mut self, listener: Arc<dyn SupervisorListener>) {
        self.emitter.register(listener);
    }

    pub fn handle(&self) -> DeviceHandle {
        DeviceHandle::new(
            self.device.clone(),
            self.channel.endpoint().to_path_buf(),
            self.events_tx.clone(),
            self.state_tx.subscribe(),
        )
    }

    pub fn effective_rate(&self) -> u32 {
        self.effective_rate
    }

    /// Control endpoint descriptor for the data-streaming consumer.
    pub fn device_endpoint(&self) -> String {
        self.channel.endpoint().display().to_string()
    }

    pub fn state(&self) -> SupervisionState {
        self.machine.state()
    }

    /// Process events until teardown and the exit of the last process.
    pub async fn run(mut self, mut events: EventSource) {
        info!(
            "Supervising tuner {} (rate {} Hz, endpoint {}, {} listeners)",
            self.device,
            self.effective_rate,
            self.device_endpoint(),
            self.emitter.listener_count()
        );
        while let Some(event) = events.recv().await {
            self.handle_event(event);
            if self.machine.state().is_quitting() {
                break;
            }
        }
        self.await_final_exit(&mut events).await;
        self.release_teardown_waiters();
        info!("Supervisor for tuner {} stopped", self.device);
    }

    async fn await_final_exit(&mut self, events: &mut EventSource) {
        while let Some(generation) = self.awaiting_exit {
            match time::timeout(EXIT_GRACE, events.recv()).await {
                Ok(Some(event)) => self.handle_event(event),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "tuner process {} did not report its exit within {:?}",
                        generation, EXIT_GRACE
                    );
                    break;
                }
            }
        }
    }

    fn release_teardown_waiters(&mut self) {
        for tx in self.teardown_waiters.drain(..) {
            let _ = tx.send(());
        }
    }

    /// Apply one event. Public so the event loop can be driven step by
    /// step.
    pub fn handle_event(&mut self, event: ControllerEvent) {
        debug!("tuner {} event {:?}", self.device, event);
        match event {
            ControllerEvent::ProcessReady { generation } => self.on_ready(generation),
            ControllerEvent::ProcessExited {
                generation,
                code,
                signal,
            } => {
                if self.process.on_exit(generation) {
                    self.on_death(code, signal);
                } else {
                    debug!("tuner process {} was superseded", generation);
                    self.emitter.notify_process_died(&self.device, code, signal);
                }
                if self.awaiting_exit == Some(generation) {
                    self.awaiting_exit = None;
                    self.release_teardown_waiters();
                }
            }
            ControllerEvent::SocketConnected { link, .. } => self.on_connected(link),
            ControllerEvent::SocketError { generation, error } => {
                if self.channel.owns(generation) {
                    self.on_socket_error(TunerError::ControlSocket(error));
                }
            }
            ControllerEvent::RespawnDue { ticket } => {
                if self.respawn_timer.fire(ticket) {
                    self.spawn();
                }
            }
            ControllerEvent::StallRecoveryDue { ticket } => {
                if self.stall_timer.fire(ticket) {
                    self.handle_stall();
                }
            }
            ControllerEvent::Initialize { on_ready } => self.initialize(on_ready),
            ControllerEvent::SetParameter {
                name,
                value,
                respond_to,
            } => {
                let result = self.set_parameter(&name, value);
                if let Some(tx) = respond_to {
                    let _ = tx.send(result);
                }
            }
            ControllerEvent::Stalled => self.handle_stall(),
            ControllerEvent::DeviceRemoved => self.handle_device_removed(),
            ControllerEvent::Teardown { respond_to } => {
                self.teardown();
                if let Some(tx) = respond_to {
                    self.teardown_waiters.push(tx);
                }
                if self.awaiting_exit.is_none() {
                    self.release_teardown_waiters();
                }
            }
        }
    }

    /// Register the ready callback and start the process.
    ///
    /// A second call before the first connect replaces the pending
    /// callback; only the last one runs.
    pub fn initialize(&mut self, on_ready: InitCallback) {
        if self.machine.state().is_quitting() {
            warn!("ignoring initialize for tuner {} after teardown", self.device);
            return;
        }
        if self.pending_init.replace(on_ready).is_some() {
            warn!("replacing pending initialize callback for tuner {}", self.device);
        }
        self.spawn();
    }

    pub fn set_parameter(&mut self, name: &str, value: i64) -> TunerResult<Delivery> {
        if self.machine.state().is_quitting() {
            return Err(TunerError::ControllerClosed);
        }
        match self.channel.send(name, value) {
            Ok(delivery) => {
                debug!("tuner {} {}={} ({:?})", self.device, name, value, delivery);
                Ok(delivery)
            }
            Err(e) => {
                warn!("tuner {}: dropping command: {}", self.device, e);
                Err(e)
            }
        }
    }

    pub fn set_streaming(&mut self, on: bool) -> TunerResult<Delivery> {
        self.set_parameter("streaming", i64::from(on))
    }

    /// Kill the current process, if any, and start a fresh one.
    pub fn handle_stall(&mut self) {
        if self.machine.state().is_quitting() {
            return;
        }
        warn!("Tuner {} stalled, restarting process", self.device);
        self.process.kill();
        self.spawn();
    }

    pub fn handle_device_removed(&mut self) {
        info!("Tuner {} removed", self.device);
        self.teardown();
    }

    /// Stop supervising. Irreversible and idempotent.
    ///
    /// The killed process still reports its exit, which listeners see as a
    /// death without a respawn.
    pub fn teardown(&mut self) {
        if self.machine.state().is_quitting() {
            return;
        }
        info!("Tearing down tuner {}", self.device);
        self.transition(SupervisorEvent::Quit);
        self.respawn_timer.cancel();
        self.stall_timer.cancel();
        self.pending_init = None;
        self.channel.teardown();
        if self.process.is_running() {
            self.awaiting_exit = Some(self.process.generation());
        }
        self.process.kill();
    }

    fn spawn(&mut self) {
        if self.machine.state().is_quitting() {
            return;
        }
        self.respawn_timer.cancel();
        self.stall_timer.cancel();
        self.channel.teardown();
        self.transition(SupervisorEvent::SpawnRequested);

        match self.process.spawn(&self.events_tx) {
            Ok(generation) => {
                info!(
                    "Started tuner process {} for {} (pid {:?})",
                    generation,
                    self.device,
                    self.process.pid()
                );
                self.transition(SupervisorEvent::Launched);
            }
            Err(e) => {
                error!("{}", e);
                self.on_death(None, None);
            }
        }
    }

    fn on_ready(&mut self, generation: Generation) {
        if !self.process.mark_ready(generation) {
            debug!("ignoring repeated readiness of tuner process {}", generation);
            return;
        }
        self.transition(SupervisorEvent::Ready);
        self.channel.endpoint_ready(generation);
        self.channel.connect(&self.events_tx);
    }

    fn on_connected(&mut self, link: ControlLink) {
        if self.machine.state().is_quitting() || !self.channel.on_connected(link) {
            return;
        }
        info!("Control channel to tuner {} connected", self.device);
        self.transition(SupervisorEvent::Connected);
        self.emitter.notify_connected(&self.device);

        if let Some(on_ready) = self.pending_init.take() {
            on_ready();
        }
        self.channel.replay();
    }

    fn on_socket_error(&mut self, error: TunerError) {
        warn!("Tuner {}: {}", self.device, error);
        self.channel.teardown();
        if self.machine.state().is_quitting() || self.handling_death {
            return;
        }
        self.transition(SupervisorEvent::SocketLost);
        info!(
            "Scheduling stall recovery for tuner {} in {:?}",
            self.device, self.timings.stall_recovery_delay
        );
        self.stall_timer
            .schedule(self.timings.stall_recovery_delay, &self.events_tx, |ticket| {
                ControllerEvent::StallRecoveryDue { ticket }
            });
    }

    fn on_death(&mut self, code: Option<i32>, signal: Option<i32>) {
        if self.handling_death {
            return;
        }
        self.handling_death = true;

        warn!(
            "Tuner process for {} died (code: {:?}, signal: {:?})",
            self.device, code, signal
        );
        if self.channel.is_connected() {
            self.on_socket_error(TunerError::ProcessExit { code, signal });
        } else {
            self.channel.teardown();
        }
        self.respawn_timer.cancel();
        self.stall_timer.cancel();
        self.transition(SupervisorEvent::ProcessDied);
        self.emitter.notify_process_died(&self.device, code, signal);

        if !self.machine.state().is_quitting() {
            info!(
                "Respawning tuner {} in {:?}",
                self.device, self.timings.respawn_delay
            );
            self.respawn_timer
                .schedule(self.timings.respawn_delay, &self.events_tx, |ticket| {
                    ControllerEvent::RespawnDue { ticket }
                });
        }
        self.handling_death = false;
    }

    fn transition(&mut self, event: SupervisorEvent) {
        let old = self.machine.state();
        if self.machine.process_event(event) {
            let new = self.machine.state();
            debug!(
                "tuner {} state {} -> {} (transition {})",
                self.device,
                old,
                new,
                self.machine.transition_count()
            );
            self.state_tx.send_replace(new);
            self.emitter.notify_state_change(&self.device, old, new);
        }
    }
}

/// Start a controller for `config` using the real tuner binary and Unix
/// control socket.
pub fn spawn_controller(
    config: DeviceConfig,
    listeners: Vec<Arc<dyn SupervisorListener>>,
) -> (DeviceHandle, JoinHandle<()>) {
    let (mut controller, events) =
        DeviceController::new(config, Box::new(CommandLauncher), Box::new(UnixConnector));
    for listener in listeners {
        controller.subscribe(listener);
    }
    let handle = controller.handle();
    let task = tokio::spawn(controller.run(events));
    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::task::AbortHandle;
    use tokio::time;

    use tuner_core::{CommandFrame, TunerParam};

    use crate::process::ProcessControl;

    #[derive(Clone, Default)]
    struct Probe {
        launches: Arc<Mutex<Vec<Vec<String>>>>,
        kills: Arc<AtomicUsize>,
        connects: Arc<Mutex<Vec<Generation>>>,
        fail_launch: Arc<Mutex<bool>>,
        exit_on_kill: Arc<Mutex<bool>>,
    }

    impl Probe {
        fn launch_count(&self) -> usize {
            self.launches.lock().unwrap().len()
        }

        fn connect_count(&self) -> usize {
            self.connects.lock().unwrap().len()
        }
    }

    struct FakeControl {
        kills: Arc<AtomicUsize>,
        /// Where to report the exit once killed
        exit: Option<(EventSink, Generation)>,
    }

    impl ProcessControl for FakeControl {
        fn id(&self) -> Option<u32> {
            Some(4242)
        }

        fn kill(&mut self) {
            self.kills.fetch_add(1, Ordering::SeqCst);
            if let Some((events, generation)) = self.exit.take() {
                let _ = events.send(ControllerEvent::ProcessExited {
                    generation,
                    code: None,
                    signal: Some(9),
                });
            }
        }
    }

    struct FakeLauncher(Probe);

    impl Launcher for FakeLauncher {
        fn launch(
            &mut self,
            spec: &LaunchSpec,
            generation: Generation,
            events: EventSink,
        ) -> TunerResult<Box<dyn ProcessControl>> {
            if *self.0.fail_launch.lock().unwrap() {
                return Err(TunerError::ProcessLaunch {
                    binary: spec.binary.display().to_string(),
                    reason: "not found".to_string(),
                });
            }
            self.0.launches.lock().unwrap().push(spec.args());
            let exit = (*self.0.exit_on_kill.lock().unwrap()).then_some((events, generation));
            Ok(Box::new(FakeControl {
                kills: self.0.kills.clone(),
                exit,
            }))
        }
    }

    struct FakeConnector(Probe);

    impl Connector for FakeConnector {
        fn connect(
            &mut self,
            _endpoint: &std::path::Path,
            _timeout: Duration,
            generation: Generation,
            _events: EventSink,
        ) -> Option<AbortHandle> {
            self.0.connects.lock().unwrap().push(generation);
            None
        }
    }

    #[derive(Default)]
    struct DeathCounter(AtomicUsize);

    impl SupervisorListener for DeathCounter {
        fn on_process_died(&self, _device: &DeviceIdentity, _code: Option<i32>, _signal: Option<i32>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn timings() -> SupervisorTimings {
        SupervisorTimings::new(
            Duration::from_millis(500),
            Duration::from_millis(501),
            Duration::from_millis(100),
        )
    }

    fn controller_with(device: &str, rate: i64) -> (DeviceController, EventSource, Probe) {
        let probe = Probe::default();
        let mut config = DeviceConfig::new(DeviceIdentity::new(device), rate, "tuner-server");
        config.runtime_dir = PathBuf::from("/tmp");
        config.timings = timings();
        let (controller, events) = DeviceController::new(
            config,
            Box::new(FakeLauncher(probe.clone())),
            Box::new(FakeConnector(probe.clone())),
        );
        (controller, events, probe)
    }

    fn controller() -> (DeviceController, EventSource, Probe) {
        controller_with("1:4", 250_000)
    }

    fn link(generation: Generation) -> (ControlLink, mpsc::UnboundedReceiver<CommandFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ControlLink::new(generation, tx), rx)
    }

    /// Let pending timers fire and feed every queued event to the
    /// controller.
    async fn pump(controller: &mut DeviceController, events: &mut EventSource, wait: Duration) {
        time::sleep(wait).await;
        while let Ok(event) = events.try_recv() {
            controller.handle_event(event);
        }
    }

    fn connect(controller: &mut DeviceController) -> mpsc::UnboundedReceiver<CommandFrame> {
        let generation = controller.process.generation();
        controller.handle_event(ControllerEvent::ProcessReady { generation });
        let (link, frames) = link(generation);
        controller.handle_event(ControllerEvent::SocketConnected { generation, link });
        frames
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_passes_endpoint_identity_and_rate() {
        let (mut controller, _events, probe) = controller();
        assert_eq!(controller.effective_rate(), 250_000);
        assert!(controller.device_endpoint().contains("1:4"));

        controller.initialize(Box::new(|| {}));
        assert_eq!(controller.state(), SupervisionState::AwaitingReady);
        let launches = probe.launches.lock().unwrap();
        assert_eq!(
            launches[0],
            vec!["/tmp/tuner-1:4.sock".to_string(), "1:4".to_string(), "250000".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_band_rate_is_multiplied() {
        let (mut controller, _events, probe) = controller_with("2:7", 100_000);
        assert_eq!(controller.effective_rate(), 1_000_000);
        controller.initialize(Box::new(|| {}));
        assert_eq!(probe.launches.lock().unwrap()[0][2], "1000000");
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_readiness_connects_once() {
        let (mut controller, _events, probe) = controller();
        controller.initialize(Box::new(|| {}));
        let generation = controller.process.generation();

        controller.handle_event(ControllerEvent::ProcessReady { generation });
        controller.handle_event(ControllerEvent::ProcessReady { generation });
        assert_eq!(probe.connect_count(), 1);
        assert_eq!(controller.state(), SupervisionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_suppresses_respawn() {
        let (mut controller, mut events, probe) = controller();
        controller.initialize(Box::new(|| {}));
        let generation = controller.process.generation();

        controller.teardown();
        assert_eq!(controller.state(), SupervisionState::Quitting);
        assert_eq!(probe.kills.load(Ordering::SeqCst), 1);

        controller.handle_event(ControllerEvent::ProcessExited {
            generation,
            code: None,
            signal: Some(9),
        });
        controller.handle_event(ControllerEvent::SocketError {
            generation,
            error: "reset".to_string(),
        });
        pump(&mut controller, &mut events, Duration::from_secs(2)).await;

        assert_eq!(probe.launch_count(), 1);
        assert!(!controller.process.is_running());
        assert_eq!(controller.state(), SupervisionState::Quitting);

        // Idempotent
        controller.teardown();
        controller.handle_device_removed();
        assert_eq!(probe.kills.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn death_respawns_after_delay() {
        let (mut controller, mut events, probe) = controller();
        let deaths = Arc::new(DeathCounter::default());
        controller.subscribe(deaths.clone());
        controller.initialize(Box::new(|| {}));
        let _frames = connect(&mut controller);
        let generation = controller.process.generation();

        controller.handle_event(ControllerEvent::ProcessExited {
            generation,
            code: Some(1),
            signal: None,
        });
        assert_eq!(controller.state(), SupervisionState::Restarting);
        assert_eq!(deaths.0.load(Ordering::SeqCst), 1);
        assert!(controller.respawn_timer.is_pending());
        // Death handling never schedules stall recovery
        assert!(!controller.stall_timer.is_pending());

        pump(&mut controller, &mut events, Duration::from_millis(100)).await;
        assert_eq!(probe.launch_count(), 1);

        pump(&mut controller, &mut events, Duration::from_millis(500)).await;
        assert_eq!(probe.launch_count(), 2);
        assert_eq!(controller.state(), SupervisionState::AwaitingReady);
    }

    #[tokio::test(start_paused = true)]
    async fn launch_failure_is_treated_as_death() {
        let (mut controller, mut events, probe) = controller();
        let deaths = Arc::new(DeathCounter::default());
        controller.subscribe(deaths.clone());
        *probe.fail_launch.lock().unwrap() = true;

        controller.initialize(Box::new(|| {}));
        assert_eq!(controller.state(), SupervisionState::Restarting);
        assert_eq!(deaths.0.load(Ordering::SeqCst), 1);

        *probe.fail_launch.lock().unwrap() = false;
        pump(&mut controller, &mut events, Duration::from_millis(600)).await;
        assert_eq!(probe.launch_count(), 1);
        assert_eq!(controller.state(), SupervisionState::AwaitingReady);
    }

    #[tokio::test(start_paused = true)]
    async fn init_callback_runs_once_across_reconnect() {
        let (mut controller, mut events, probe) = controller();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        controller.initialize(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let _frames = connect(&mut controller);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.state(), SupervisionState::Connected);

        let generation = controller.process.generation();
        controller.handle_event(ControllerEvent::SocketError {
            generation,
            error: "closed by peer".to_string(),
        });
        assert_eq!(controller.state(), SupervisionState::Restarting);
        assert!(controller.stall_timer.is_pending());

        // Stall recovery kills the old process and starts a new one
        pump(&mut controller, &mut events, Duration::from_millis(600)).await;
        assert_eq!(probe.launch_count(), 2);
        assert_eq!(probe.kills.load(Ordering::SeqCst), 1);

        let _frames = connect(&mut controller);
        assert_eq!(controller.state(), SupervisionState::Connected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_exit_does_not_respawn() {
        let (mut controller, mut events, probe) = controller();
        let deaths = Arc::new(DeathCounter::default());
        controller.subscribe(deaths.clone());
        controller.initialize(Box::new(|| {}));
        let first = controller.process.generation();

        controller.handle_stall();
        assert_eq!(probe.launch_count(), 2);
        controller.handle_event(ControllerEvent::ProcessExited {
            generation: first,
            code: None,
            signal: Some(9),
        });
        assert_eq!(deaths.0.load(Ordering::SeqCst), 1);
        assert!(!controller.respawn_timer.is_pending());

        pump(&mut controller, &mut events, Duration::from_secs(2)).await;
        assert_eq!(probe.launch_count(), 2);
        assert_eq!(controller.state(), SupervisionState::AwaitingReady);
    }

    #[tokio::test(start_paused = true)]
    async fn parameters_are_flushed_and_reapplied() {
        let (mut controller, mut events, _probe) = controller();
        controller.initialize(Box::new(|| {}));

        assert_eq!(
            controller.set_parameter("frequency", 99_000_000),
            Ok(Delivery::Queued)
        );
        assert_eq!(
            controller.set_parameter("bogus", 5),
            Err(TunerError::UnknownParameter("bogus".to_string()))
        );

        let mut frames = connect(&mut controller);
        let frame = frames.try_recv().unwrap();
        assert_eq!(frame.param(), Some(TunerParam::Frequency));
        assert_eq!(frame.value(), 99_000_000);

        assert_eq!(controller.set_streaming(true), Ok(Delivery::Sent));
        assert_eq!(frames.try_recv().unwrap().param(), Some(TunerParam::Streaming));

        // Process dies, respawns and gets the same configuration back
        let generation = controller.process.generation();
        controller.handle_event(ControllerEvent::ProcessExited {
            generation,
            code: Some(1),
            signal: None,
        });
        pump(&mut controller, &mut events, Duration::from_millis(600)).await;
        let mut frames = connect(&mut controller);
        let replayed: Vec<_> = std::iter::from_fn(|| frames.try_recv().ok())
            .map(|f| (f.param(), f.value()))
            .collect();
        assert_eq!(
            replayed,
            vec![
                (Some(TunerParam::Frequency), 99_000_000),
                (Some(TunerParam::Streaming), 1),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_socket_events_are_ignored() {
        let (mut controller, _events, _probe) = controller();
        controller.initialize(Box::new(|| {}));
        let _frames = connect(&mut controller);
        let generation = controller.process.generation();

        controller.handle_event(ControllerEvent::SocketError {
            generation: generation + 5,
            error: "old".to_string(),
        });
        assert_eq!(controller.state(), SupervisionState::Connected);
        assert!(!controller.stall_timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_stops_on_device_removed() {
        let (controller, events, probe) = controller();
        let handle = controller.handle();
        let task = tokio::spawn(controller.run(events));

        handle.initialize(|| {}).expect("initialize");
        handle.handle_device_removed().expect("device removed");
        task.await.expect("controller task");

        assert_eq!(handle.state(), SupervisionState::Quitting);
        assert_eq!(probe.launch_count(), 1);
        assert_eq!(probe.kills.load(Ordering::SeqCst), 1);
        assert!(matches!(
            handle.set_parameter("frequency", 1).await,
            Err(TunerError::ControllerClosed)
        ));
        assert!(handle.teardown().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn death_cancels_pending_stall_recovery() {
        let (mut controller, mut events, probe) = controller();
        let deaths = Arc::new(DeathCounter::default());
        controller.subscribe(deaths.clone());
        controller.initialize(Box::new(|| {}));
        let _frames = connect(&mut controller);
        let generation = controller.process.generation();

        controller.handle_event(ControllerEvent::SocketError {
            generation,
            error: "closed by peer".to_string(),
        });
        assert!(controller.stall_timer.is_pending());

        controller.handle_event(ControllerEvent::ProcessExited {
            generation,
            code: Some(1),
            signal: None,
        });
        assert!(!controller.stall_timer.is_pending());
        assert!(controller.respawn_timer.is_pending());

        pump(&mut controller, &mut events, Duration::from_secs(2)).await;

        // Only the respawn ran; a stall recovery would have killed the new
        // process and launched a third one
        assert_eq!(probe.launch_count(), 2);
        assert_eq!(probe.kills.load(Ordering::SeqCst), 0);
        assert_eq!(deaths.0.load(Ordering::SeqCst), 1);
        assert!(!controller.stall_timer.is_pending());
        assert_eq!(controller.state(), SupervisionState::AwaitingReady);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_reports_death_of_killed_process() {
        let (mut controller, events, probe) = controller();
        *probe.exit_on_kill.lock().unwrap() = true;
        let deaths = Arc::new(DeathCounter::default());
        controller.subscribe(deaths.clone());
        let handle = controller.handle();
        let task = tokio::spawn(controller.run(events));

        handle.initialize(|| {}).expect("initialize");
        handle.teardown().await.expect("teardown");
        assert_eq!(deaths.0.load(Ordering::SeqCst), 1);

        task.await.expect("controller task");
        assert_eq!(deaths.0.load(Ordering::SeqCst), 1);
        assert_eq!(probe.launch_count(), 1);
        assert_eq!(probe.kills.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), SupervisionState::Quitting);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn teardown_reports_death_of_real_process() {
        use std::os::unix::fs::PermissionsExt;

        let script =
            std::env::temp_dir().join(format!("tuner-teardown-{}.sh", std::process::id()));
        std::fs::write(&script, "#!/bin/sh\necho ready\nexec sleep 30\n").expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");

        let probe = Probe::default();
        let mut config = DeviceConfig::new(DeviceIdentity::new("3:9"), 250_000, script.clone());
        config.timings = timings();
        let (mut controller, events) = DeviceController::new(
            config,
            Box::new(CommandLauncher),
            Box::new(FakeConnector(probe.clone())),
        );
        let deaths = Arc::new(DeathCounter::default());
        controller.subscribe(deaths.clone());
        let handle = controller.handle();
        let task = tokio::spawn(controller.run(events));

        handle.initialize(|| {}).expect("initialize");
        time::timeout(Duration::from_secs(5), async {
            while handle.state() != SupervisionState::Connecting {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("tuner process never became ready");

        handle.teardown().await.expect("teardown");
        task.await.expect("controller task");
        let _ = std::fs::remove_file(&script);

        assert_eq!(deaths.0.load(Ordering::SeqCst), 1);
        assert_eq!(probe.connect_count(), 1);
    }
}
