// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;
mod status;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use tuner_app::{init_logging, ConfigFile};
use tuner_core::supervisor::SupervisorListener;
use tuner_core::{DeviceIdentity, DynResult};
use tuner_supervisor::{spawn_controller, DeviceConfig, DeviceHandle};

use config::ServerConfig;
use status::StatusLogger;

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - tuner process supervisor");

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Tuner bus address (e.g. 1:4)
    #[arg(short = 'd', long = "device")]
    device: Option<String>,
    /// Requested sample rate in Hz
    #[arg(short = 'r', long = "rate", allow_negative_numbers = true)]
    rate: Option<i64>,
    /// Tuner server executable
    #[arg(short = 'b', long = "binary", value_name = "PATH")]
    binary: Option<PathBuf>,
}

/// Apply CLI overrides on top of the loaded configuration.
fn resolve_config(cli: &Cli, mut cfg: ServerConfig) -> ServerConfig {
    if let Some(device) = &cli.device {
        cfg.device.identity = DeviceIdentity::new(device.trim());
    }
    if let Some(rate) = cli.rate {
        cfg.device.sample_rate = rate;
    }
    if let Some(binary) = &cli.binary {
        cfg.device.binary = binary.clone();
    }
    cfg
}

fn build_device_config(cfg: &ServerConfig) -> DeviceConfig {
    let mut device = DeviceConfig::new(
        cfg.device.identity.clone(),
        cfg.device.sample_rate,
        cfg.device.binary.clone(),
    );
    device.runtime_dir = cfg.device.runtime_dir.clone();
    device.endpoint_prefix = cfg.device.endpoint_prefix.clone();
    device.timings = cfg.supervisor.timings();
    device
}

/// Queue the configured parameters; they are written once the control
/// channel connects and again after every reconnect.
async fn apply_params(handle: &DeviceHandle, cfg: &ServerConfig) {
    for (param, value) in &cfg.params.values {
        match handle.set_parameter(param.name(), *value).await {
            Ok(delivery) => info!("{} = {} ({:?})", param, value, delivery),
            Err(e) => warn!("Failed to set {}: {}", param, e),
        }
    }
}

/// SIGUSR1 requests stall recovery of the supervised tuner.
struct StallRequests {
    #[cfg(unix)]
    usr1: signal::unix::Signal,
}

impl StallRequests {
    fn register() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            usr1: signal::unix::signal(signal::unix::SignalKind::user_defined1())?,
        })
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        if self.usr1.recv().await.is_some() {
            return;
        }
        std::future::pending::<()>().await
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_toml());
        return Ok(());
    }

    let (cfg, config_path) = if let Some(ref path) = cli.config {
        let cfg = ServerConfig::load_from_file(path)?;
        (cfg, Some(path.clone()))
    } else {
        ServerConfig::load_from_default_paths()?
    };
    let cfg = resolve_config(&cli, cfg);
    cfg.validate()
        .map_err(|e| format!("Invalid server configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let device_cfg = build_device_config(&cfg);
    info!(
        "Starting tuner {} with {} (requested rate {} Hz)",
        device_cfg.device,
        device_cfg.binary.display(),
        device_cfg.requested_rate
    );

    let status: Arc<dyn SupervisorListener> = Arc::new(StatusLogger::default());
    let (handle, controller_task) = spawn_controller(device_cfg, vec![status]);
    info!("Data consumers connect via {}", handle.device_endpoint());

    apply_params(&handle, &cfg).await;

    let ready_handle = handle.clone();
    let stream_on_ready = cfg.params.stream_on_ready;
    handle.initialize(move || {
        info!("Tuner {} ready", ready_handle.device());
        if stream_on_ready {
            if let Err(e) = ready_handle.send_parameter("streaming", 1) {
                warn!("Failed to start streaming: {}", e);
            }
        }
    })?;

    let mut stall_requests = StallRequests::register()?;
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res?;
                info!("Ctrl+C received, shutting down");
                break;
            }
            _ = stall_requests.recv() => {
                info!("Stall recovery requested");
                handle.handle_stall()?;
            }
        }
    }

    handle.teardown().await?;
    if let Err(e) = controller_task.await {
        error!("Supervisor task error: {:?}", e);
    }
    Ok(())
}
