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

//! Classification of control-plane output lines.
//!
//! The pairing stack prints free text with no grammar. Each line is mapped
//! on its own to one [`PairingEvent`]; deciding what to do about it is the
//! agent's job.

use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

/// A recognized control-plane prompt or notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    /// Legacy pairing wants the PIN.
    PinRequested,
    /// SSP numeric comparison. `passkey` is `None` if no digits were found.
    PasskeyConfirm { passkey: Option<String> },
    ConfirmationRequested,
    AuthorizationRequested,
    Succeeded,
    Failed,
    Canceled,
    /// A new remote device showed up.
    DeviceDiscovered { address: Option<String> },
    Unrecognized,
}

fn ansi_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // CSI sequences plus the readline prompt markers \x01 / \x02
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|[\x01\x02]").expect("valid regex"))
}

fn passkey_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Confirm passkey (\d+)").expect("valid regex"))
}

fn address_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Device ([0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5})").expect("valid regex")
    })
}

/// Remove terminal colour codes from a raw line.
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    ansi_regex().replace_all(line, "")
}

/// Map one raw line to an event.
pub fn classify(line: &str) -> PairingEvent {
    let line = strip_ansi(line);
    let line = line.trim();

    if line.contains("Request PIN code") {
        PairingEvent::PinRequested
    } else if line.contains("Confirm passkey") {
        let passkey = passkey_regex()
            .captures(line)
            .map(|caps| caps[1].to_string());
        PairingEvent::PasskeyConfirm { passkey }
    } else if line.contains("Request confirmation") {
        PairingEvent::ConfirmationRequested
    } else if line.contains("Authorize service") {
        PairingEvent::AuthorizationRequested
    } else if line.contains("Pairing successful") {
        PairingEvent::Succeeded
    } else if line.contains("Failed to pair") {
        PairingEvent::Failed
    } else if line.contains("Request canceled") {
        PairingEvent::Canceled
    } else if line.contains("NEW") && line.contains("Device") {
        let address = address_regex()
            .captures(line)
            .map(|caps| caps[1].to_uppercase());
        PairingEvent::DeviceDiscovered { address }
    } else {
        PairingEvent::Unrecognized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_request() {
        assert_eq!(
            classify("[agent] Request PIN code (7C:2A:31:00:11:22)"),
            PairingEvent::PinRequested
        );
    }

    #[test]
    fn test_passkey_with_and_without_prefix() {
        let expected = PairingEvent::PasskeyConfirm {
            passkey: Some("123456".to_string()),
        };
        assert_eq!(classify("Confirm passkey 123456"), expected);
        assert_eq!(classify("[agent] Confirm passkey 123456 (yes/no): "), expected);
    }

    #[test]
    fn test_passkey_without_digits() {
        assert_eq!(
            classify("[agent] Confirm passkey ?????? (yes/no)"),
            PairingEvent::PasskeyConfirm { passkey: None }
        );
    }

    #[test]
    fn test_notices() {
        assert_eq!(
            classify("[agent] Request confirmation"),
            PairingEvent::ConfirmationRequested
        );
        assert_eq!(
            classify("[agent] Authorize service 0000110e-0000-1000-8000-00805f9b34fb (yes/no):"),
            PairingEvent::AuthorizationRequested
        );
        assert_eq!(classify("Pairing successful"), PairingEvent::Succeeded);
        assert_eq!(
            classify("Failed to pair: org.bluez.Error.AuthenticationFailed"),
            PairingEvent::Failed
        );
        assert_eq!(classify("[agent] Request canceled"), PairingEvent::Canceled);
    }

    #[test]
    fn test_device_discovered() {
        assert_eq!(
            classify("[NEW] Device 7c:2a:31:00:11:22 Pixel 7"),
            PairingEvent::DeviceDiscovered {
                address: Some("7C:2A:31:00:11:22".to_string())
            }
        );
        assert_eq!(
            classify("[NEW] Device"),
            PairingEvent::DeviceDiscovered { address: None }
        );
    }

    #[test]
    fn test_ansi_codes_are_ignored() {
        let line = "\x1b[0;94m[agent]\x1b[0m Request PIN code (AA:BB:CC:DD:EE:FF)";
        assert_eq!(classify(line), PairingEvent::PinRequested);
        assert_eq!(strip_ansi("\x01\x1b[0;94m\x02[bluetooth]\x01\x1b[0m\x02# "), "[bluetooth]# ");
    }

    #[test]
    fn test_unrecognized() {
        assert_eq!(classify("Agent registered"), PairingEvent::Unrecognized);
        assert_eq!(classify(""), PairingEvent::Unrecognized);
        assert_eq!(
            classify("[CHG] Controller B8:27:EB:00:00:01 Discoverable: yes"),
            PairingEvent::Unrecognized
        );
    }
}
