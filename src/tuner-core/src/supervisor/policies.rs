// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Timing policy for respawn and stall recovery.

use std::time::Duration;

/// Delay before a dead tuner process is respawned.
pub const DEFAULT_RESPAWN_DELAY: Duration = Duration::from_millis(5000);
/// Delay before a lost control socket triggers stall recovery. One
/// millisecond longer than the respawn delay so a pending respawn wins.
pub const DEFAULT_STALL_RECOVERY_DELAY: Duration = Duration::from_millis(5001);
/// Upper bound on a single control socket connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Fixed delays used by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorTimings {
    pub respawn_delay: Duration,
    pub stall_recovery_delay: Duration,
    pub connect_timeout: Duration,
}

impl SupervisorTimings {
    pub fn new(
        respawn_delay: Duration,
        stall_recovery_delay: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            respawn_delay,
            stall_recovery_delay,
            connect_timeout,
        }
    }

    /// Whether a respawn scheduled together with a stall recovery fires
    /// first.
    pub fn respawn_preempts_stall(&self) -> bool {
        self.respawn_delay < self.stall_recovery_delay
    }
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            respawn_delay: DEFAULT_RESPAWN_DELAY,
            stall_recovery_delay: DEFAULT_STALL_RECOVERY_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let timings = SupervisorTimings::default();
        assert_eq!(timings.respawn_delay, Duration::from_millis(5000));
        assert_eq!(timings.stall_recovery_delay, Duration::from_millis(5001));
        assert!(timings.respawn_preempts_stall());
    }

    #[test]
    fn test_custom_timings() {
        let timings = SupervisorTimings::new(
            Duration::from_millis(200),
            Duration::from_millis(100),
            Duration::from_millis(50),
        );
        assert!(!timings.respawn_preempts_stall());
    }
}
