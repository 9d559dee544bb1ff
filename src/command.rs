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

//! Command parsing and dispatch.
//!
//! One received text line becomes one [`Command`], and every command
//! produces exactly one [`Response`]. Nothing in here can fail the
//! connection: unexpected errors become `ERROR:COMMAND_PROCESSING:<message>`.

use anyhow::{anyhow, Result};
use std::num::IntErrorKind;
use tracing::{debug, error, warn};

use crate::bluetooth::protocol::{ErrorCode, Response};
use crate::hardware::{angle_to_position, ActuatorBank, DisplayNotifier, ServoId};

/// Inclusive servo angle range in degrees.
pub const ANGLE_RANGE: std::ops::RangeInclusive<i64> = 0..=180;

/// Leading token of a command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Connect,
    Disconnect,
    Servo(ServoId),
    Oled,
    OledClear,
    Unknown,
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: Verb,
    argument: Option<String>,
}

impl Command {
    /// Parse a single line. Matching is case-sensitive.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();

        let (verb, argument) = match line {
            "CONNECT" => (Verb::Connect, None),
            "DISCONNECT" => (Verb::Disconnect, None),
            "OLED_CLEAR" => (Verb::OledClear, None),
            _ if line.starts_with("SERVO1:") => (Verb::Servo(ServoId::One), servo_segment(line)),
            _ if line.starts_with("SERVO2:") => (Verb::Servo(ServoId::Two), servo_segment(line)),
            _ => match line.strip_prefix("OLED:") {
                Some(text) => (Verb::Oled, Some(text.to_string())),
                None => (Verb::Unknown, None),
            },
        };

        Self { verb, argument }
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }
}

/// The segment between the first and second colon.
fn servo_segment(line: &str) -> Option<String> {
    line.split(':').nth(1).map(str::to_string)
}

#[derive(Debug, PartialEq, Eq)]
enum AngleError {
    Parse,
    OutOfRange,
}

fn parse_angle(segment: Option<&str>) -> Result<i64, AngleError> {
    let segment = segment.ok_or(AngleError::Parse)?.trim();
    let angle = segment.parse::<i64>().map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => AngleError::OutOfRange,
        _ => AngleError::Parse,
    })?;

    if ANGLE_RANGE.contains(&angle) {
        Ok(angle)
    } else {
        Err(AngleError::OutOfRange)
    }
}

/// Executes commands against the servos and the display.
#[derive(Debug, Clone)]
pub struct CommandProcessor {
    actuators: ActuatorBank,
    display: DisplayNotifier,
}

impl CommandProcessor {
    pub fn new(actuators: ActuatorBank, display: DisplayNotifier) -> Self {
        Self { actuators, display }
    }

    /// Handle one received line and produce its response.
    pub async fn process(&self, line: &str) -> Response {
        self.dispatch(&Command::parse(line)).await
    }

    /// Execute an already parsed command.
    pub async fn dispatch(&self, command: &Command) -> Response {
        debug!("Received command: {:?}", command);

        match self.execute(command).await {
            Ok(response) => response,
            Err(e) => {
                error!("Command processing failed: {:#}", e);
                ErrorCode::CommandProcessing(e.to_string()).into()
            }
        }
    }

    async fn execute(&self, command: &Command) -> Result<Response> {
        let response = match command.verb() {
            Verb::Connect => {
                self.display.notify("BT Connected");
                Response::connected()
            }
            Verb::Disconnect => {
                self.display.notify("BT Disconnected");
                Response::disconnected()
            }
            Verb::Servo(id) => return self.move_servo(id, command.argument()).await,
            Verb::Oled => {
                self.display.notify(command.argument().unwrap_or_default());
                Response::oled_display()
            }
            Verb::OledClear => {
                self.display.clear();
                Response::oled_cleared()
            }
            Verb::Unknown => ErrorCode::UnknownCommand.into(),
        };
        Ok(response)
    }

    async fn move_servo(&self, id: ServoId, segment: Option<&str>) -> Result<Response> {
        let angle = match parse_angle(segment) {
            Ok(angle) => angle,
            Err(AngleError::Parse) => return Ok(ErrorCode::ServoParse(id).into()),
            Err(AngleError::OutOfRange) => return Ok(ErrorCode::InvalidAngle.into()),
        };

        // Sysfs writes block; keep them off the async workers.
        let actuators = self.actuators.clone();
        let position = angle_to_position(angle);
        let result = tokio::task::spawn_blocking(move || actuators.set(id, position))
            .await
            .map_err(|e| anyhow!("servo{} driver failed: {}", id, e))?;

        match result {
            Ok(()) => {
                debug!("Servo{} set to {} ({:.3})", id, angle, position);
                self.display.notify(&format!("Servo{}: {}", id, angle));
                Ok(Response::servo(id, angle))
            }
            Err(e) => {
                warn!("Servo{} control failed: {}", id, e);
                Ok(ErrorCode::ServoControl(id).into())
            }
        }
    }
}
