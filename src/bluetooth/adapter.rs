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

//! Bluetooth adapter bootstrap.
//!
//! Power, alias, pairable and discoverable are all idempotent. Each step is
//! tried on its own and a failing step never stops the others.

use anyhow::Result;
use bluer::Adapter;
use std::future::Future;
use tracing::{info, warn};

use crate::config::BluetoothConfig;

/// Outcome of [`prepare_adapter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterSetup {
    pub succeeded: usize,
    pub failed: usize,
}

impl AdapterSetup {
    /// No step succeeded at all.
    pub fn is_failure(&self) -> bool {
        self.succeeded == 0
    }
}

/// Make the default adapter visible and pairable under `config.device_name`.
pub async fn prepare_adapter(config: &BluetoothConfig) -> Result<AdapterSetup> {
    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    info!("Using Bluetooth adapter: {}", adapter.name());

    let setup = configure(&adapter, config).await;
    if setup.failed > 0 {
        warn!("Adapter setup finished with {} failed step(s)", setup.failed);
    } else {
        info!("Bluetooth adapter ready as '{}'", config.device_name);
    }
    Ok(setup)
}

async fn configure(adapter: &Adapter, config: &BluetoothConfig) -> AdapterSetup {
    let mut setup = AdapterSetup::default();

    step(&mut setup, "power on", adapter.set_powered(true)).await;
    step(&mut setup, "alias", adapter.set_alias(config.device_name.clone())).await;
    step(&mut setup, "pairable timeout", adapter.set_pairable_timeout(0)).await;
    step(&mut setup, "pairable on", adapter.set_pairable(true)).await;
    step(&mut setup, "discoverable timeout", adapter.set_discoverable_timeout(0)).await;
    step(&mut setup, "discoverable on", adapter.set_discoverable(true)).await;

    setup
}

async fn step(
    setup: &mut AdapterSetup,
    name: &str,
    fut: impl Future<Output = bluer::Result<()>>,
) {
    match fut.await {
        Ok(()) => setup.succeeded += 1,
        Err(e) => {
            warn!("Adapter step '{}' failed: {}", name, e);
            setup.failed += 1;
        }
    }
}
