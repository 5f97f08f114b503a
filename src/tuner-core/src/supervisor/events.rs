// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Lifecycle notifications.
//!
//! The device inventory / event bus registers a [`SupervisorListener`] to
//! learn about process deaths and supervision state changes.

use std::sync::Arc;

use crate::device::DeviceIdentity;

use super::machine::SupervisionState;

/// Trait for components that want to receive supervision events.
///
/// All methods have default no-op implementations, so listeners can
/// selectively override only the events they care about.
pub trait SupervisorListener: Send + Sync {
    /// Called on every tuner process exit or launch failure, whether or not
    /// a respawn gets scheduled.
    fn on_process_died(
        &self,
        _device: &DeviceIdentity,
        _code: Option<i32>,
        _signal: Option<i32>,
    ) {
    }

    /// Called when the supervision state machine transitions.
    fn on_state_change(
        &self,
        _device: &DeviceIdentity,
        _old: SupervisionState,
        _new: SupervisionState,
    ) {
    }

    /// Called when the control channel is (re)connected.
    fn on_connected(&self, _device: &DeviceIdentity) {}
}

/// Manages registered listeners and dispatches events.
pub struct SupervisorEventEmitter {
    listeners: Vec<Arc<dyn SupervisorListener>>,
}

impl Default for SupervisorEventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl SupervisorEventEmitter {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Register a listener to receive events.
    pub fn register(&mut self, listener: Arc<dyn SupervisorListener>) {
        self.listeners.push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn notify_process_died(
        &self,
        device: &DeviceIdentity,
        code: Option<i32>,
        signal: Option<i32>,
    ) {
        for listener in &self.listeners {
            listener.on_process_died(device, code, signal);
        }
    }

    pub fn notify_state_change(
        &self,
        device: &DeviceIdentity,
        old: SupervisionState,
        new: SupervisionState,
    ) {
        for listener in &self.listeners {
            listener.on_state_change(device, old, new);
        }
    }

    pub fn notify_connected(&self, device: &DeviceIdentity) {
        for listener in &self.listeners {
            listener.on_connected(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestListener {
        deaths: AtomicUsize,
        connects: AtomicUsize,
    }

    impl TestListener {
        fn new() -> Self {
            Self {
                deaths: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
            }
        }
    }

    impl SupervisorListener for TestListener {
        fn on_process_died(&self, _device: &DeviceIdentity, _code: Option<i32>, _signal: Option<i32>) {
            self.deaths.fetch_add(1, Ordering::Relaxed);
        }

        fn on_connected(&self, _device: &DeviceIdentity) {
            self.connects.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_register_and_notify() {
        let device = DeviceIdentity::new("1:4");
        let mut emitter = SupervisorEventEmitter::new();
        let listener = Arc::new(TestListener::new());
        assert_eq!(emitter.listener_count(), 0);
        emitter.register(listener.clone());
        emitter.register(Arc::new(TestListener::new()));
        assert_eq!(emitter.listener_count(), 2);

        emitter.notify_process_died(&device, Some(1), None);
        assert_eq!(listener.deaths.load(Ordering::Relaxed), 1);
        assert_eq!(listener.connects.load(Ordering::Relaxed), 0);

        emitter.notify_connected(&device);
        assert_eq!(listener.connects.load(Ordering::Relaxed), 1);
    }
}
