// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! pi-remote daemon.
//!
//! ```bash
//! # Bluetooth RFCOMM with the pairing agent (normal use, needs root)
//! sudo pi-remote
//!
//! # Same protocol over TCP, no radio and no agent
//! pi-remote --tcp 127.0.0.1:5000 --no-agent
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pi_remote::hardware::{ActuatorBank, DisplayNotifier};
use pi_remote::{Config, Controller, Endpoint};

/// Bluetooth remote control for Raspberry Pi servos and OLED
#[derive(Parser, Debug)]
#[command(name = "pi-remote")]
#[command(version)]
struct Args {
    /// Path to config.toml (default: platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serve the command protocol over TCP on this address instead of RFCOMM
    #[arg(long)]
    tcp: Option<String>,

    /// Do not start the pairing agent
    #[arg(long)]
    no_agent: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("🚀 pi-remote starting");

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load_default()?,
    };

    let endpoint = match args.tcp {
        Some(addr) => Endpoint::Tcp(addr),
        None => Endpoint::Rfcomm,
    };

    let display = DisplayNotifier::from_config(&config.display);
    let actuators = ActuatorBank::from_config(&config.servo);
    let controller = Controller::new(config, endpoint, display, actuators, !args.no_agent);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("🛑 Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let result = controller.run(shutdown_rx).await;
    if let Err(e) = &result {
        error!("Server failed: {:#}", e);
    }
    controller.cleanup().await;
    result
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            error!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
