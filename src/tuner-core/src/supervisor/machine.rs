// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Supervision state machine for the tuner process lifecycle.
//!
//! All transitions go through [`SupervisionMachine::process_event`], which
//! makes the lifecycle auditable and keeps `Quitting` terminal.

use std::fmt;

/// Events that can trigger state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A new tuner process is about to be launched
    SpawnRequested,
    /// The process was launched and is starting up
    Launched,
    /// The process reported that its control endpoint is listening
    Ready,
    /// Control socket connection established
    Connected,
    /// Control socket failed or closed while the process is alive
    SocketLost,
    /// The process exited or could not be launched
    ProcessDied,
    /// Teardown requested or device removed
    Quit,
}

/// The current supervision state of one tuner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SupervisionState {
    /// Nothing launched yet
    #[default]
    Idle,
    /// Launch in progress
    Spawning,
    /// Process running, waiting for its readiness signal
    AwaitingReady,
    /// Connecting to the control endpoint
    Connecting,
    /// Control channel open
    Connected,
    /// Waiting for a scheduled respawn or stall recovery
    Restarting,
    /// Torn down; nothing will be scheduled again
    Quitting,
}

impl fmt::Display for SupervisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Spawning => write!(f, "Spawning"),
            Self::AwaitingReady => write!(f, "AwaitingReady"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Restarting => write!(f, "Restarting"),
            Self::Quitting => write!(f, "Quitting"),
        }
    }
}

impl SupervisionState {
    pub fn is_quitting(&self) -> bool {
        matches!(self, Self::Quitting)
    }
}

/// State machine that owns the [`SupervisionState`] of one controller.
#[derive(Debug, Clone)]
pub struct SupervisionMachine {
    state: SupervisionState,
    transition_count: u64,
}

impl Default for SupervisionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SupervisionMachine {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self {
            state: SupervisionState::Idle,
            transition_count: 0,
        }
    }

    pub fn state(&self) -> SupervisionState {
        self.state
    }

    /// Get the number of state transitions that have occurred.
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Process an event and potentially transition to a new state.
    /// Returns true if a transition occurred.
    pub fn process_event(&mut self, event: SupervisorEvent) -> bool {
        match self.next_state(event) {
            Some(state) if state != self.state => {
                self.state = state;
                self.transition_count += 1;
                true
            }
            _ => false,
        }
    }

    fn next_state(&self, event: SupervisorEvent) -> Option<SupervisionState> {
        use SupervisionState as S;
        use SupervisorEvent as E;

        match (self.state, event) {
            // Terminal
            (S::Quitting, _) => None,
            (_, E::Quit) => Some(S::Quitting),

            // Respawn is allowed from any live state (stall recovery kills first)
            (_, E::SpawnRequested) => Some(S::Spawning),
            (S::Spawning, E::Launched) => Some(S::AwaitingReady),
            (S::AwaitingReady, E::Ready) => Some(S::Connecting),
            (S::Connecting, E::Connected) => Some(S::Connected),

            (S::Connecting | S::Connected, E::SocketLost) => Some(S::Restarting),
            (S::Idle, E::ProcessDied) => None,
            (_, E::ProcessDied) => Some(S::Restarting),

            // Invalid transition - stay in current state
            _ => None,
        }
    }
}
