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

//! Bluetooth side of the device.
//!
//! Two independent halves share nothing but the status display: the
//! [`agent`] answers pairing prompts of the stack's control-plane process,
//! the [`server`] serves one RFCOMM client at a time.

pub mod adapter;
pub mod agent;
pub mod classifier;
pub mod protocol;
pub mod server;
pub mod transport;

pub use agent::{PairingAgent, PairingState};
pub use classifier::{classify, PairingEvent};
pub use protocol::{ErrorCode, Response};
pub use server::{ConnectionServer, ConnectionSession, ServerState};
pub use transport::{Acceptor, RfcommAcceptor, TcpAcceptor};
