// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::path::{Path, PathBuf};

use tokio::sync::{oneshot, watch};

use tuner_core::supervisor::SupervisionState;
use tuner_core::{DeviceIdentity, TunerError, TunerResult};

use crate::channel::Delivery;
use crate::event::{ControllerEvent, EventSink};

/// Cloneable front end of a running [`DeviceController`].
///
/// Every call is posted to the controller's event queue. Once the
/// controller has stopped, calls fail with [`TunerError::ControllerClosed`].
///
/// [`DeviceController`]: crate::DeviceController
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    device: DeviceIdentity,
    endpoint: PathBuf,
    events: EventSink,
    state_rx: watch::Receiver<SupervisionState>,
}

impl DeviceHandle {
    pub(crate) fn new(
        device: DeviceIdentity,
        endpoint: PathBuf,
        events: EventSink,
        state_rx: watch::Receiver<SupervisionState>,
    ) -> Self {
        Self {
            device,
            endpoint,
            events,
            state_rx,
        }
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Control endpoint descriptor for the data-streaming consumer.
    pub fn device_endpoint(&self) -> String {
        self.endpoint.display().to_string()
    }

    pub fn state(&self) -> SupervisionState {
        *self.state_rx.borrow()
    }

    /// Start the tuner process. `on_ready` runs once, when the control
    /// channel first connects.
    pub fn initialize<F>(&self, on_ready: F) -> TunerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(ControllerEvent::Initialize {
            on_ready: Box::new(on_ready),
        })
    }

    /// Set a named tuner parameter and report whether it was written or
    /// queued for the next connect.
    pub async fn set_parameter(&self, name: &str, value: i64) -> TunerResult<Delivery> {
        let (tx, rx) = oneshot::channel();
        self.post(ControllerEvent::SetParameter {
            name: name.to_string(),
            value,
            respond_to: Some(tx),
        })?;
        rx.await.map_err(|_| TunerError::ControllerClosed)?
    }

    /// Fire-and-forget variant of [`DeviceHandle::set_parameter`].
    pub fn send_parameter(&self, name: &str, value: i64) -> TunerResult<()> {
        self.post(ControllerEvent::SetParameter {
            name: name.to_string(),
            value,
            respond_to: None,
        })
    }

    pub async fn set_streaming(&self, on: bool) -> TunerResult<Delivery> {
        self.set_parameter("streaming", i64::from(on)).await
    }

    pub fn handle_stall(&self) -> TunerResult<()> {
        self.post(ControllerEvent::Stalled)
    }

    pub fn handle_device_removed(&self) -> TunerResult<()> {
        self.post(ControllerEvent::DeviceRemoved)
    }

    /// Stop supervision and wait for the controller to acknowledge. A
    /// controller that already stopped counts as torn down.
    pub async fn teardown(&self) -> TunerResult<()> {
        let (tx, rx) = oneshot::channel();
        match self.post(ControllerEvent::Teardown {
            respond_to: Some(tx),
        }) {
            Ok(()) | Err(TunerError::ControllerClosed) => {}
            Err(e) => return Err(e),
        }
        let _ = rx.await;
        Ok(())
    }

    fn post(&self, event: ControllerEvent) -> TunerResult<()> {
        self.events
            .send(event)
            .map_err(|_| TunerError::ControllerClosed)
    }
}
