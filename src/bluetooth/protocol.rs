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

//! Wire tokens of the command connection.
//!
//! Every message is plain UTF-8 text. Responses always start with `OK:` or
//! `ERROR:` and are written with a trailing newline.

use std::fmt;

use crate::hardware::ServoId;

/// Sent by the server as soon as a client is accepted.
pub const WELCOME: &str = "WELCOME_RPi";

/// Sent back when the client answers the welcome with a known token.
pub const HANDSHAKE_OK: &str = "HANDSHAKE_OK";

/// Client tokens accepted during the handshake.
pub const HANDSHAKE_TOKENS: [&str; 3] = ["PING", "HELLO", "CONNECT"];

pub fn is_handshake_token(token: &str) -> bool {
    HANDSHAKE_TOKENS.contains(&token)
}

/// Error codes carried after `ERROR:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidAngle,
    ServoParse(ServoId),
    ServoControl(ServoId),
    UnknownCommand,
    Decode,
    CommandProcessing(String),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::InvalidAngle => f.write_str("INVALID_ANGLE"),
            ErrorCode::ServoParse(id) => write!(f, "SERVO{}_PARSE_ERROR", id),
            ErrorCode::ServoControl(id) => write!(f, "SERVO{}_CONTROL_FAILED", id),
            ErrorCode::UnknownCommand => f.write_str("UNKNOWN_COMMAND"),
            ErrorCode::Decode => f.write_str("DECODE_ERROR"),
            ErrorCode::CommandProcessing(message) => write!(f, "COMMAND_PROCESSING:{}", message),
        }
    }
}

/// The single response line sent for each request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(String),
    Error(ErrorCode),
}

impl Response {
    pub fn connected() -> Self {
        Response::Ok("CONNECTED".to_string())
    }

    pub fn disconnected() -> Self {
        Response::Ok("DISCONNECTED".to_string())
    }

    pub fn servo(id: ServoId, angle: i64) -> Self {
        Response::Ok(format!("SERVO{}:{}", id, angle))
    }

    pub fn oled_display() -> Self {
        Response::Ok("OLED_DISPLAY".to_string())
    }

    pub fn oled_cleared() -> Self {
        Response::Ok("OLED_CLEARED".to_string())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok(_))
    }
}

impl From<ErrorCode> for Response {
    fn from(code: ErrorCode) -> Self {
        Response::Error(code)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok(body) => write!(f, "OK:{}", body),
            Response::Error(code) => write!(f, "ERROR:{}", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_rendering() {
        assert_eq!(Response::connected().to_string(), "OK:CONNECTED");
        assert_eq!(Response::servo(ServoId::Two, 45).to_string(), "OK:SERVO2:45");
        assert_eq!(
            Response::from(ErrorCode::ServoParse(ServoId::One)).to_string(),
            "ERROR:SERVO1_PARSE_ERROR"
        );
        assert_eq!(
            Response::from(ErrorCode::ServoControl(ServoId::Two)).to_string(),
            "ERROR:SERVO2_CONTROL_FAILED"
        );
        assert_eq!(
            Response::from(ErrorCode::CommandProcessing("boom".into())).to_string(),
            "ERROR:COMMAND_PROCESSING:boom"
        );
        assert_eq!(Response::from(ErrorCode::Decode).to_string(), "ERROR:DECODE_ERROR");
    }

    #[test]
    fn test_handshake_tokens() {
        assert!(is_handshake_token("PING"));
        assert!(is_handshake_token("HELLO"));
        assert!(is_handshake_token("CONNECT"));
        assert!(!is_handshake_token("ping"));
        assert!(!is_handshake_token("SERVO1:90"));
    }
}
