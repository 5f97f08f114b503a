// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{info, warn};

use tuner_core::supervisor::{SupervisionState, SupervisorListener};
use tuner_core::DeviceIdentity;

/// Logs lifecycle notifications of the supervised tuner.
#[derive(Debug, Default)]
pub struct StatusLogger {
    deaths: AtomicU64,
}

impl StatusLogger {
    pub fn deaths(&self) -> u64 {
        self.deaths.load(Ordering::Relaxed)
    }
}

impl SupervisorListener for StatusLogger {
    fn on_process_died(&self, device: &DeviceIdentity, code: Option<i32>, signal: Option<i32>) {
        let total = self.deaths.fetch_add(1, Ordering::Relaxed) + 1;
        match (code, signal) {
            (Some(code), _) => warn!("[{}] tuner process exited with code {} ({} total)", device, code, total),
            (None, Some(signal)) => warn!("[{}] tuner process killed by signal {} ({} total)", device, signal, total),
            (None, None) => warn!("[{}] tuner process could not be started ({} total)", device, total),
        }
    }

    fn on_state_change(&self, device: &DeviceIdentity, old: SupervisionState, new: SupervisionState) {
        info!("[{}] {} -> {}", device, old, new);
    }

    fn on_connected(&self, device: &DeviceIdentity) {
        info!("[{}] control channel up", device);
    }
}
