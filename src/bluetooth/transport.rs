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

//! Listening endpoints for the command server.
//!
//! The server only needs "give me the next client and its address". RFCOMM
//! is the production transport; TCP is there for bench testing without a
//! radio.

use anyhow::{Context, Result};
use bluer::rfcomm::{Listener, Profile, ProfileHandle, Role, SocketAddr};
use bluer::{Address, Session};
use futures::StreamExt;
use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::config::BluetoothConfig;

/// Source of client connections.
pub trait Acceptor: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next client. Returns the stream and the peer address.
    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, String)>> + Send;

    /// Short description of the endpoint for the status display.
    fn describe(&self) -> String;
}

/// RFCOMM endpoint, advertised through an SDP profile when possible.
pub enum RfcommAcceptor {
    Profile {
        // Keeps the D-Bus connection (and the profile registration) alive.
        _session: Session,
        handle: ProfileHandle,
        channel: u8,
    },
    Listener {
        listener: Listener,
        channel: u8,
    },
}

impl RfcommAcceptor {
    /// Register the serial port profile, or fall back to a plain listener on
    /// the configured channel if advertisement is not possible.
    pub async fn bind(config: &BluetoothConfig) -> Result<Self> {
        match Self::register_profile(config).await {
            Ok(acceptor) => {
                info!("Service advertisement successful");
                Ok(acceptor)
            }
            Err(e) => {
                warn!("Service advertisement failed: {:#}", e);
                warn!("Continuing without service advertisement...");
                Self::listen(config.channel).await
            }
        }
    }

    async fn register_profile(config: &BluetoothConfig) -> Result<Self> {
        let session = Session::new().await.context("BlueZ session")?;
        let profile = Profile {
            uuid: config.service_uuid()?,
            name: Some(config.device_name.clone()),
            channel: Some(u16::from(config.channel)),
            role: Some(Role::Server),
            require_authentication: Some(false),
            require_authorization: Some(false),
            ..Default::default()
        };
        let handle = session
            .register_profile(profile)
            .await
            .context("register RFCOMM profile")?;

        Ok(Self::Profile {
            _session: session,
            handle,
            channel: config.channel,
        })
    }

    async fn listen(channel: u8) -> Result<Self> {
        let listener = Listener::bind(SocketAddr::new(Address::any(), channel))
            .await
            .with_context(|| format!("bind RFCOMM channel {}", channel))?;
        info!("RFCOMM listener bound to channel {}", channel);
        Ok(Self::Listener { listener, channel })
    }

    /// Whether clients can discover the service through SDP.
    pub fn is_advertised(&self) -> bool {
        matches!(self, Self::Profile { .. })
    }

    pub fn channel(&self) -> u8 {
        match self {
            Self::Profile { channel, .. } | Self::Listener { channel, .. } => *channel,
        }
    }
}

impl Acceptor for RfcommAcceptor {
    type Stream = bluer::rfcomm::Stream;

    async fn accept(&mut self) -> io::Result<(Self::Stream, String)> {
        match self {
            Self::Profile { handle, .. } => {
                let request = handle.next().await.ok_or_else(|| {
                    io::Error::new(io::ErrorKind::BrokenPipe, "RFCOMM profile was unregistered")
                })?;
                let peer = request.device().to_string();
                let stream = request.accept()?;
                Ok((stream, peer))
            }
            Self::Listener { listener, .. } => {
                let (stream, addr) = listener.accept().await?;
                Ok((stream, addr.addr.to_string()))
            }
        }
    }

    fn describe(&self) -> String {
        format!("Port: {}", self.channel())
    }
}

/// Plain TCP endpoint.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind TCP {}", addr))?;
        info!("TCP listener bound to {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

impl Acceptor for TcpAcceptor {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(Self::Stream, String)> {
        let (stream, addr) = self.listener.accept().await?;
        Ok((stream, addr.to_string()))
    }

    fn describe(&self) -> String {
        match self.listener.local_addr() {
            Ok(addr) => format!("Port: {}", addr.port()),
            Err(_) => "Port: ?".to_string(),
        }
    }
}
