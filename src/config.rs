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

//! Device configuration.
//!
//! Loaded once at startup from `config.toml` and never renegotiated at
//! runtime. Every field has a default so partial files work.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Errors raised while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("config validation error: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bluetooth: BluetoothConfig,
    pub agent: AgentConfig,
    pub server: ServerConfig,
    pub servo: ServoConfig,
    pub display: DisplayConfig,
}

/// Advertised identity and pairing secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Name shown to phones while scanning.
    pub device_name: String,
    /// Service class advertised over SDP (Serial Port Profile by default).
    pub service_uuid: String,
    /// RFCOMM channel to listen on.
    pub channel: u8,
    /// Fixed 4-digit legacy pairing PIN.
    pub pin: String,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            device_name: "RaspberryPi-BT".to_string(),
            service_uuid: "00001101-0000-1000-8000-00805F9B34FB".to_string(),
            channel: 1,
            pin: "0000".to_string(),
        }
    }
}

impl BluetoothConfig {
    /// Parsed service UUID. Only valid after [`Config::validate`] succeeded.
    pub fn service_uuid(&self) -> Result<Uuid, ConfigError> {
        Uuid::parse_str(&self.service_uuid)
            .map_err(|e| ConfigError::Validation(format!("invalid service_uuid: {e}")))
    }
}

/// Pairing agent (control-plane process) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub program: String,
    pub args: Vec<String>,
    pub setup_delay_ms: u64,
    pub success_dwell_ms: u64,
    pub stop_grace_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "bluetoothctl".to_string(),
            args: Vec::new(),
            setup_delay_ms: 500,
            success_dwell_ms: 2000,
            stop_grace_ms: 5000,
        }
    }
}

impl AgentConfig {
    pub fn setup_delay(&self) -> Duration {
        Duration::from_millis(self.setup_delay_ms)
    }

    pub fn success_dwell(&self) -> Duration {
        Duration::from_millis(self.success_dwell_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Command server timing and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub handshake_timeout_ms: u64,
    pub recv_timeout_ms: u64,
    pub max_message_len: usize,
    pub retry_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 5000,
            recv_timeout_ms: 30000,
            max_message_len: 1024,
            retry_delay_ms: 2000,
        }
    }
}

impl ServerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Which servo driver to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServoBackend {
    /// Log positions only (no hardware).
    Log,
    /// Linux sysfs PWM.
    Pwm,
}

/// Servo hardware settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    pub backend: ServoBackend,
    pub pwm_chip: u32,
    /// PWM channels for servo 1 and servo 2.
    pub channels: [u32; 2],
    pub period_ns: u64,
    pub min_pulse_ns: u64,
    pub max_pulse_ns: u64,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            backend: ServoBackend::Log,
            pwm_chip: 0,
            channels: [0, 1],
            period_ns: 20_000_000,
            min_pulse_ns: 1_000_000,
            max_pulse_ns: 2_000_000,
        }
    }
}

/// Which status display driver to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayBackend {
    /// Log frames only (no hardware).
    Log,
    /// 128x64 SSD1306 OLED on an I2C bus.
    Ssd1306,
}

/// Status display settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub backend: DisplayBackend,
    /// I2C character device the panel is wired to.
    pub i2c_bus: String,
    /// 7-bit I2C address of the panel.
    pub address: u8,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            backend: DisplayBackend::Log,
            i2c_bus: "/dev/i2c-1".to_string(),
            address: 0x3C,
        }
    }
}

impl Config {
    /// Load from an explicit path. The file must exist.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("failed to read {}: {e}", path.display())))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("failed to parse TOML: {e}")))?;

        config.validate()?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from the platform config directory, writing a commented default
    /// file on first run.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path()?;

        if !path.exists() {
            info!("No config found at {}, creating default", path.display());
            create_default_config(&path)?;
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pin = &self.bluetooth.pin;
        if pin.len() != 4 || !pin.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConfigError::Validation(format!(
                "pin must be exactly 4 digits, got {:?}",
                pin
            )));
        }

        if self.bluetooth.device_name.is_empty() {
            return Err(ConfigError::Validation("device_name is empty".into()));
        }

        self.bluetooth.service_uuid()?;

        if self.server.handshake_timeout_ms == 0 || self.server.recv_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "server timeouts must be non-zero".into(),
            ));
        }

        if self.server.max_message_len == 0 {
            return Err(ConfigError::Validation(
                "max_message_len must be non-zero".into(),
            ));
        }

        let servo = &self.servo;
        if servo.min_pulse_ns >= servo.max_pulse_ns || servo.max_pulse_ns > servo.period_ns {
            return Err(ConfigError::Validation(format!(
                "servo pulse range {}..{} does not fit period {}",
                servo.min_pulse_ns, servo.max_pulse_ns, servo.period_ns
            )));
        }

        if self.display.address > 0x7F {
            return Err(ConfigError::Validation(format!(
                "display address {:#04x} is not a 7-bit I2C address",
                self.display.address
            )));
        }

        Ok(())
    }
}

/// `~/.config/pi-remote/config.toml` on Linux.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::Parse("could not determine config directory".into()))?;
    Ok(config_dir.join("pi-remote").join("config.toml"))
}

fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            ConfigError::Parse(format!(
                "failed to create config directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    std::fs::write(path, DEFAULT_CONFIG_TOML).map_err(|e| {
        ConfigError::Parse(format!(
            "failed to write default config to {}: {e}",
            path.display()
        ))
    })?;

    info!("Created default config at {}", path.display());
    Ok(())
}

const DEFAULT_CONFIG_TOML: &str = r##"# pi-remote configuration
# Only override what you want to change -- missing fields use defaults.

[bluetooth]
# device_name = "RaspberryPi-BT"
# service_uuid = "00001101-0000-1000-8000-00805F9B34FB"
# channel = 1
# pin = "0000"

[agent]
# program = "bluetoothctl"
# args = []
# setup_delay_ms = 500
# success_dwell_ms = 2000
# stop_grace_ms = 5000

[server]
# handshake_timeout_ms = 5000
# recv_timeout_ms = 30000
# max_message_len = 1024
# retry_delay_ms = 2000

[servo]
# backend = "log"        # "log" or "pwm"
# pwm_chip = 0
# channels = [0, 1]
# period_ns = 20000000
# min_pulse_ns = 1000000
# max_pulse_ns = 2000000

[display]
# backend = "log"        # "log" or "ssd1306"
# i2c_bus = "/dev/i2c-1"
# address = 0x3C
"##;
