// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Supervision of one tuner process and its control channel.

pub mod channel;
pub mod controller;
pub mod event;
pub mod handle;
pub mod process;
pub mod timer;

pub use channel::{ControlChannel, ControlLink, Connector, Delivery, UnixConnector};
pub use controller::{spawn_controller, DeviceConfig, DeviceController};
pub use event::{ControllerEvent, EventSink, EventSource, Generation, InitCallback};
pub use handle::DeviceHandle;
pub use process::{CommandLauncher, LaunchSpec, Launcher, ProcessControl, ProcessSupervisor};
