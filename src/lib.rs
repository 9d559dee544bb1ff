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

//! Bluetooth remote control for a Raspberry Pi with two servos and an OLED.
//!
//! A phone pairs with the Pi (PIN or passkey confirmation, answered by the
//! [`bluetooth::agent`]) and then drives the hardware through a small text
//! protocol served by [`bluetooth::server`].

pub mod app;
pub mod bluetooth;
pub mod command;
pub mod config;
pub mod hardware;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{Controller, Endpoint};
pub use config::Config;
