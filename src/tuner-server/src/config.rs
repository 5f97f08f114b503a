// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for tuner-server.
//!
//! Config is loaded from the `[tuner-server]` section of `tuner.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./tuner.toml`
//! 3. `~/.config/tuner/tuner.toml`
//! 4. `/etc/tuner/tuner.toml`

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tuner_app::ConfigFile;

use tuner_core::rate::DEFAULT_SAMPLE_RATE;
use tuner_core::supervisor::SupervisorTimings;
use tuner_core::{DeviceIdentity, TunerParam};

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Supervised tuner device
    pub device: DeviceSection,
    /// Recovery delays
    pub supervisor: SupervisorConfig,
    /// Parameters applied once the control channel is up
    pub params: ParamsConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    /// Bus address token of the tuner, e.g. "1:4"
    pub identity: DeviceIdentity,
    /// Requested sample rate in Hz; mapped to a supported hardware rate
    pub sample_rate: i64,
    /// Tuner server executable
    pub binary: PathBuf,
    /// Directory for control sockets
    pub runtime_dir: PathBuf,
    /// File name prefix of control sockets
    pub endpoint_prefix: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            identity: DeviceIdentity::new(""),
            sample_rate: i64::from(DEFAULT_SAMPLE_RATE),
            binary: PathBuf::from("rtl_tuner_server"),
            runtime_dir: std::env::temp_dir(),
            endpoint_prefix: "tuner".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Delay before relaunching a dead process
    pub respawn_delay_ms: u64,
    /// Delay before restarting after the control socket is lost
    pub stall_recovery_delay_ms: u64,
    /// Control socket connect timeout
    pub connect_timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let timings = SupervisorTimings::default();
        Self {
            respawn_delay_ms: timings.respawn_delay.as_millis() as u64,
            stall_recovery_delay_ms: timings.stall_recovery_delay.as_millis() as u64,
            connect_timeout_ms: timings.connect_timeout.as_millis() as u64,
        }
    }
}

impl SupervisorConfig {
    pub fn timings(&self) -> SupervisorTimings {
        SupervisorTimings::new(
            Duration::from_millis(self.respawn_delay_ms),
            Duration::from_millis(self.stall_recovery_delay_ms),
            Duration::from_millis(self.connect_timeout_ms),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamsConfig {
    /// Turn sample streaming on after the first connect
    pub stream_on_ready: bool,
    /// Parameter name to value, e.g. `frequency = 99000000`
    #[serde(flatten)]
    pub values: BTreeMap<TunerParam, i64>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if self.device.identity.as_str().trim().is_empty() {
            return Err("[device].identity must not be empty".to_string());
        }
        if self.device.endpoint_prefix.is_empty() {
            return Err("[device].endpoint_prefix must not be empty".to_string());
        }

        if self.supervisor.respawn_delay_ms == 0 {
            return Err("[supervisor].respawn_delay_ms must be > 0".to_string());
        }
        if self.supervisor.connect_timeout_ms == 0 {
            return Err("[supervisor].connect_timeout_ms must be > 0".to_string());
        }
        if !self.supervisor.timings().respawn_preempts_stall() {
            return Err(
                "[supervisor].stall_recovery_delay_ms must be greater than respawn_delay_ms"
                    .to_string(),
            );
        }
        Ok(())
    }

    /// Generate an example configuration wrapped under the
    /// `[tuner-server]` section header.
    pub fn example_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "tuner-server")]
            inner: ServerConfig,
        }
        let example = ServerConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            device: DeviceSection {
                identity: DeviceIdentity::new("1:4"),
                sample_rate: 250_000,
                runtime_dir: PathBuf::from("/run/tuner"),
                ..DeviceSection::default()
            },
            supervisor: SupervisorConfig::default(),
            params: ParamsConfig {
                stream_on_ready: true,
                values: BTreeMap::from([
                    (TunerParam::Frequency, 99_000_000),
                    (TunerParam::GainMode, 1),
                    (TunerParam::TunerGain, 280),
                ]),
            },
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "tuner-server"
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}
