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

//! In-memory hardware doubles shared by unit tests.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::hardware::{Actuator, ActuatorError, Frame, StatusDisplay};

#[derive(Debug, Default)]
struct DisplayLog {
    current: Option<Frame>,
    history: Vec<Frame>,
    clears: usize,
}

/// Display that records every frame.
#[derive(Debug, Clone, Default)]
pub struct RecordingDisplay {
    log: Arc<Mutex<DisplayLog>>,
    fail: bool,
}

impl RecordingDisplay {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Frame currently on the panel, `None` when blank.
    pub fn current(&self) -> Option<Frame> {
        self.log.lock().current.clone()
    }

    pub fn history(&self) -> Vec<Frame> {
        self.log.lock().history.clone()
    }

    /// Every rendered frame as `\n`-joined text.
    pub fn texts(&self) -> Vec<String> {
        self.log.lock().history.iter().map(Frame::text).collect()
    }

    pub fn clears(&self) -> usize {
        self.log.lock().clears
    }
}

impl StatusDisplay for RecordingDisplay {
    fn render(&mut self, frame: &Frame) -> Result<()> {
        if self.fail {
            return Err(anyhow!("i2c bus not present"));
        }
        let mut log = self.log.lock();
        log.current = Some(frame.clone());
        log.history.push(frame.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        if self.fail {
            return Err(anyhow!("i2c bus not present"));
        }
        let mut log = self.log.lock();
        log.current = None;
        log.clears += 1;
        Ok(())
    }
}

/// Servo that records every position it was sent.
#[derive(Debug, Clone, Default)]
pub struct RecordingServo {
    positions: Arc<Mutex<Vec<f64>>>,
    fail: bool,
}

impl RecordingServo {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn positions(&self) -> Vec<f64> {
        self.positions.lock().clone()
    }
}

impl Actuator for RecordingServo {
    fn set_position(&mut self, value: f64) -> Result<(), ActuatorError> {
        if self.fail {
            return Err(ActuatorError::Unavailable("servo unplugged".into()));
        }
        self.positions.lock().push(value);
        Ok(())
    }
}

/// Servo whose driver panics on every write.
#[derive(Debug, Default)]
pub struct PanickingServo;

impl Actuator for PanickingServo {
    fn set_position(&mut self, _value: f64) -> Result<(), ActuatorError> {
        panic!("pwm driver crashed");
    }
}

/// Display whose driver panics on every call.
#[derive(Debug, Default)]
pub struct PanickingDisplay;

impl StatusDisplay for PanickingDisplay {
    fn render(&mut self, _frame: &Frame) -> Result<()> {
        panic!("i2c driver crashed");
    }

    fn clear(&mut self) -> Result<()> {
        panic!("i2c driver crashed");
    }
}
