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

//! Servo actuators.
//!
//! Positions are normalized to `[-1.0, 1.0]` where `0.0` is centered.
//! Out-of-range input is clamped, never rejected.

use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ServoBackend, ServoConfig};

/// Root of the Linux PWM class in sysfs.
pub const SYSFS_PWM_ROOT: &str = "/sys/class/pwm";

/// Errors reported by an actuator backend.
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("actuator unavailable: {0}")]
    Unavailable(String),
}

/// One of the two servos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoId {
    One,
    Two,
}

impl ServoId {
    /// 1-based servo number as used on the wire.
    pub fn number(self) -> u8 {
        match self {
            ServoId::One => 1,
            ServoId::Two => 2,
        }
    }

    fn index(self) -> usize {
        usize::from(self.number() - 1)
    }
}

impl fmt::Display for ServoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Map an angle in degrees onto the normalized servo domain.
///
/// `normalized = (angle - 90) / 90`, clamped to `[-1, 1]`.
pub fn angle_to_position(angle: i64) -> f64 {
    ((angle - 90) as f64 / 90.0).clamp(-1.0, 1.0)
}

/// A single positionable actuator.
pub trait Actuator: Send {
    /// Move to `value`, already clamped to `[-1, 1]`.
    fn set_position(&mut self, value: f64) -> Result<(), ActuatorError>;
}

/// Actuator that only logs, for running without servo hardware.
#[derive(Debug)]
pub struct LogServo {
    id: ServoId,
}

impl LogServo {
    pub fn new(id: ServoId) -> Self {
        Self { id }
    }
}

impl Actuator for LogServo {
    fn set_position(&mut self, value: f64) -> Result<(), ActuatorError> {
        info!("Servo{} -> {:.3}", self.id, value);
        Ok(())
    }
}

/// Servo driven through the Linux sysfs PWM interface.
#[derive(Debug)]
pub struct PwmServo {
    dir: PathBuf,
    min_pulse_ns: u64,
    max_pulse_ns: u64,
    enabled: bool,
}

impl PwmServo {
    /// Export `channel` on `pwmchip{chip}` under `root` and set the frame period.
    pub fn open(
        root: &Path,
        chip: u32,
        channel: u32,
        config: &ServoConfig,
    ) -> Result<Self, ActuatorError> {
        let chip_dir = root.join(format!("pwmchip{chip}"));
        let dir = chip_dir.join(format!("pwm{channel}"));

        if !dir.exists() {
            debug!("Exporting PWM channel {} on {:?}", channel, chip_dir);
            write_attr(&chip_dir.join("export"), &channel.to_string())?;
        }
        if !dir.exists() {
            return Err(ActuatorError::Unavailable(format!(
                "{:?} did not appear after export",
                dir
            )));
        }

        let servo = Self {
            dir,
            min_pulse_ns: config.min_pulse_ns,
            max_pulse_ns: config.max_pulse_ns,
            enabled: false,
        };
        servo.write("period", config.period_ns)?;
        Ok(servo)
    }

    /// Pulse width for a normalized position.
    pub fn pulse_ns(&self, value: f64) -> u64 {
        let span = (self.max_pulse_ns - self.min_pulse_ns) as f64;
        let fraction = (value.clamp(-1.0, 1.0) + 1.0) / 2.0;
        self.min_pulse_ns + (fraction * span).round() as u64
    }

    fn write(&self, attr: &str, value: u64) -> Result<(), ActuatorError> {
        write_attr(&self.dir.join(attr), &value.to_string())
    }
}

impl Actuator for PwmServo {
    fn set_position(&mut self, value: f64) -> Result<(), ActuatorError> {
        self.write("duty_cycle", self.pulse_ns(value))?;
        if !self.enabled {
            self.write("enable", 1)?;
            self.enabled = true;
        }
        Ok(())
    }
}

fn write_attr(path: &Path, value: &str) -> Result<(), ActuatorError> {
    std::fs::write(path, value).map_err(|source| ActuatorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

type SharedActuator = Arc<Mutex<Box<dyn Actuator>>>;

/// The two independently addressable servos.
#[derive(Clone)]
pub struct ActuatorBank {
    servos: [SharedActuator; 2],
}

impl ActuatorBank {
    pub fn new(servo1: impl Actuator + 'static, servo2: impl Actuator + 'static) -> Self {
        Self {
            servos: [
                Arc::new(Mutex::new(Box::new(servo1))),
                Arc::new(Mutex::new(Box::new(servo2))),
            ],
        }
    }

    /// Build the bank described by `config`.
    ///
    /// If the PWM channels cannot be opened the bank falls back to logging
    /// servos so the rest of the device stays usable.
    pub fn from_config(config: &ServoConfig) -> Self {
        match config.backend {
            ServoBackend::Log => Self::new(LogServo::new(ServoId::One), LogServo::new(ServoId::Two)),
            ServoBackend::Pwm => {
                let root = Path::new(SYSFS_PWM_ROOT);
                let opened = PwmServo::open(root, config.pwm_chip, config.channels[0], config)
                    .and_then(|one| {
                        PwmServo::open(root, config.pwm_chip, config.channels[1], config)
                            .map(|two| (one, two))
                    });
                match opened {
                    Ok((one, two)) => {
                        info!("PWM servos ready on pwmchip{}", config.pwm_chip);
                        Self::new(one, two)
                    }
                    Err(e) => {
                        warn!("PWM servos unavailable ({}), using log backend", e);
                        Self::new(LogServo::new(ServoId::One), LogServo::new(ServoId::Two))
                    }
                }
            }
        }
    }

    /// Move `id` to `value`, clamped to `[-1, 1]`.
    pub fn set(&self, id: ServoId, value: f64) -> Result<(), ActuatorError> {
        let value = value.clamp(-1.0, 1.0);
        self.servos[id.index()].lock().set_position(value)
    }

    /// Center both servos. Errors are logged.
    pub fn neutralize(&self) {
        for id in [ServoId::One, ServoId::Two] {
            if let Err(e) = self.set(id, 0.0) {
                warn!("Failed to center servo{}: {}", id, e);
            }
        }
    }
}

impl fmt::Debug for ActuatorBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActuatorBank").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingServo;
    use tempfile::TempDir;

    #[test]
    fn test_angle_mapping() {
        assert_eq!(angle_to_position(0), -1.0);
        assert_eq!(angle_to_position(90), 0.0);
        assert_eq!(angle_to_position(180), 1.0);
        assert_eq!(angle_to_position(45), -0.5);
        assert_eq!(angle_to_position(-90), -1.0);
        assert_eq!(angle_to_position(400), 1.0);
    }

    #[test]
    fn test_bank_clamps_and_routes() {
        let one = RecordingServo::default();
        let two = RecordingServo::default();
        let bank = ActuatorBank::new(one.clone(), two.clone());

        bank.set(ServoId::One, 3.0).unwrap();
        bank.set(ServoId::Two, -0.25).unwrap();

        assert_eq!(one.positions(), vec![1.0]);
        assert_eq!(two.positions(), vec![-0.25]);
    }

    #[test]
    fn test_neutralize_centers_both() {
        let one = RecordingServo::default();
        let two = RecordingServo::failing();
        let bank = ActuatorBank::new(one.clone(), two.clone());

        bank.neutralize();
        assert_eq!(one.positions(), vec![0.0]);
        assert!(two.positions().is_empty());
    }

    #[test]
    fn test_pwm_servo_writes_sysfs() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let channel_dir = root.path().join("pwmchip0").join("pwm1");
        std::fs::create_dir_all(&channel_dir)?;

        let config = ServoConfig::default();
        let mut servo = PwmServo::open(root.path(), 0, 1, &config)?;
        assert_eq!(std::fs::read_to_string(channel_dir.join("period"))?, "20000000");

        servo.set_position(0.0)?;
        assert_eq!(std::fs::read_to_string(channel_dir.join("duty_cycle"))?, "1500000");
        assert_eq!(std::fs::read_to_string(channel_dir.join("enable"))?, "1");

        servo.set_position(1.0)?;
        assert_eq!(std::fs::read_to_string(channel_dir.join("duty_cycle"))?, "2000000");
        Ok(())
    }

    #[test]
    fn test_pwm_servo_missing_channel() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        std::fs::create_dir_all(root.path().join("pwmchip0"))?;

        let err = PwmServo::open(root.path(), 0, 0, &ServoConfig::default()).unwrap_err();
        assert!(matches!(err, ActuatorError::Unavailable(_)));
        Ok(())
    }
}
