// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod command;
pub mod device;
pub mod error;
pub mod rate;
pub mod supervisor;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use command::{encode, CommandFrame, TunerParam};
pub use device::DeviceIdentity;
pub use error::{TunerError, TunerResult};
pub use rate::select_rate;
pub use supervisor::machine::{SupervisionMachine, SupervisionState, SupervisorEvent};
