// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Supervision components.
//!
//! This module contains the lifecycle state machine shared by the process
//! supervisor and control channel, the lifecycle notification listeners,
//! and the timing policy for respawn and stall recovery.

pub mod events;
pub mod machine;
pub mod policies;

pub use events::{SupervisorEventEmitter, SupervisorListener};
pub use machine::{SupervisionMachine, SupervisionState, SupervisorEvent};
pub use policies::SupervisorTimings;
