// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Inbound events of a device controller.
//!
//! Process watchers, socket tasks, timers and the public handle all post
//! into a single queue per controller, so every state change happens on one
//! logical execution context in arrival order.

use std::fmt;

use tokio::sync::{mpsc, oneshot};

use tuner_core::TunerResult;

use crate::channel::{ControlLink, Delivery};

/// Spawn counter. Events tagged with an older generation belong to a
/// process that has since been replaced and are ignored.
pub type Generation = u64;

/// Callback run once the control channel first connects after `initialize`.
pub type InitCallback = Box<dyn FnOnce() + Send + 'static>;

pub type EventSink = mpsc::UnboundedSender<ControllerEvent>;
pub type EventSource = mpsc::UnboundedReceiver<ControllerEvent>;

pub enum ControllerEvent {
    /// First output seen on the process stdout
    ProcessReady { generation: Generation },
    /// Process exited or was killed
    ProcessExited {
        generation: Generation,
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// Control socket connected
    SocketConnected {
        generation: Generation,
        link: ControlLink,
    },
    /// Control socket failed to connect, failed a write or was closed
    SocketError {
        generation: Generation,
        error: String,
    },
    RespawnDue { ticket: u64 },
    StallRecoveryDue { ticket: u64 },
    Initialize { on_ready: InitCallback },
    SetParameter {
        name: String,
        value: i64,
        respond_to: Option<oneshot::Sender<TunerResult<Delivery>>>,
    },
    /// Externally detected stall
    Stalled,
    DeviceRemoved,
    Teardown {
        respond_to: Option<oneshot::Sender<()>>,
    },
}

impl fmt::Debug for ControllerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessReady { generation } => write!(f, "ProcessReady({})", generation),
            Self::ProcessExited {
                generation,
                code,
                signal,
            } => write!(
                f,
                "ProcessExited({}, code={:?}, signal={:?})",
                generation, code, signal
            ),
            Self::SocketConnected { generation, .. } => {
                write!(f, "SocketConnected({})", generation)
            }
            Self::SocketError { generation, error } => {
                write!(f, "SocketError({}, {})", generation, error)
            }
            Self::RespawnDue { ticket } => write!(f, "RespawnDue({})", ticket),
            Self::StallRecoveryDue { ticket } => write!(f, "StallRecoveryDue({})", ticket),
            Self::Initialize { .. } => write!(f, "Initialize"),
            Self::SetParameter { name, value, .. } => {
                write!(f, "SetParameter({}={})", name, value)
            }
            Self::Stalled => write!(f, "Stalled"),
            Self::DeviceRemoved => write!(f, "DeviceRemoved"),
            Self::Teardown { .. } => write!(f, "Teardown"),
        }
    }
}
