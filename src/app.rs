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

//! Process wiring: pairing agent, command server and cleanup.

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::bluetooth::adapter::prepare_adapter;
use crate::bluetooth::{Acceptor, ConnectionServer, PairingAgent, RfcommAcceptor, TcpAcceptor};
use crate::command::CommandProcessor;
use crate::config::Config;
use crate::hardware::{ActuatorBank, DisplayNotifier};

/// Where the command server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Bluetooth RFCOMM on the configured channel.
    Rfcomm,
    /// TCP on the given address, for testing without a radio.
    Tcp(String),
}

/// Owns the long-lived pieces of the device.
pub struct Controller {
    config: Config,
    endpoint: Endpoint,
    display: DisplayNotifier,
    actuators: ActuatorBank,
    agent: Option<PairingAgent>,
}

impl Controller {
    pub fn new(
        config: Config,
        endpoint: Endpoint,
        display: DisplayNotifier,
        actuators: ActuatorBank,
        with_agent: bool,
    ) -> Self {
        let agent = with_agent.then(|| {
            PairingAgent::new(config.agent.clone(), &config.bluetooth.pin, display.clone())
        });
        Self {
            config,
            endpoint,
            display,
            actuators,
            agent,
        }
    }

    pub fn agent(&self) -> Option<&PairingAgent> {
        self.agent.as_ref()
    }

    /// Run until `shutdown` fires. Only failing to open the endpoint is an
    /// error; call [`cleanup`](Self::cleanup) afterwards either way.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.display.clear();
        self.display.notify("Waiting...");

        if let Some(agent) = &self.agent {
            agent.start();
        }

        match &self.endpoint {
            Endpoint::Rfcomm => {
                self.bootstrap_adapter().await;
                let acceptor = match RfcommAcceptor::bind(&self.config.bluetooth).await {
                    Ok(acceptor) => acceptor,
                    Err(e) => return Err(self.report_bind_error(e)),
                };
                let label = if acceptor.is_advertised() {
                    "BT Ready"
                } else {
                    // No SDP record: make sure phones can still find us.
                    self.bootstrap_adapter().await;
                    "BT Simple"
                };
                self.serve(acceptor, label, shutdown).await;
            }
            Endpoint::Tcp(addr) => {
                let acceptor = match TcpAcceptor::bind(addr).await {
                    Ok(acceptor) => acceptor,
                    Err(e) => return Err(self.report_bind_error(e)),
                };
                self.serve(acceptor, "TCP Ready", shutdown).await;
            }
        }
        Ok(())
    }

    async fn bootstrap_adapter(&self) {
        match prepare_adapter(&self.config.bluetooth).await {
            Ok(setup) if setup.is_failure() => {
                self.display.notify("BT Setup\nFailed");
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Bluetooth adapter unavailable: {:#}", e);
                self.display.notify("BT Setup\nFailed");
            }
        }
    }

    fn report_bind_error(&self, e: anyhow::Error) -> anyhow::Error {
        error!("All bluetooth setup methods failed: {:#}", e);
        let short: String = e.to_string().chars().take(20).collect();
        self.display.notify(&format!("BT Error:\n{}", short));
        e
    }

    async fn serve<A: Acceptor>(&self, acceptor: A, label: &str, shutdown: watch::Receiver<bool>) {
        info!("📋 Device name: {}", self.config.bluetooth.device_name);
        info!("📋 Endpoint: {}", acceptor.describe());
        if self.agent.is_some() {
            info!("📋 Pairing PIN: {}", self.config.bluetooth.pin);
        }
        self.display
            .notify(&format!("{}\n{}", label, acceptor.describe()));

        let processor = CommandProcessor::new(self.actuators.clone(), self.display.clone());
        let server = ConnectionServer::new(
            acceptor,
            self.config.server.clone(),
            processor,
            self.display.clone(),
        );
        server.run(shutdown).await;
    }

    /// Release everything: stop the agent, center the servos and leave a
    /// final message on the display.
    pub async fn cleanup(&self) {
        if let Some(agent) = &self.agent {
            agent.stop().await;
        }
        self.actuators.neutralize();
        self.display.clear();
        self.display.notify("Server Closed");
        info!("🧹 Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingDisplay, RecordingServo};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    fn controller(endpoint: Endpoint) -> (Controller, RecordingDisplay, RecordingServo) {
        let display = RecordingDisplay::default();
        let servo = RecordingServo::default();
        let controller = Controller::new(
            Config::default(),
            endpoint,
            DisplayNotifier::new(display.clone()),
            ActuatorBank::new(servo.clone(), RecordingServo::default()),
            false,
        );
        (controller, display, servo)
    }

    #[tokio::test]
    async fn test_cleanup_neutralizes_and_clears() {
        let (controller, display, servo) = controller(Endpoint::Tcp("127.0.0.1:0".into()));
        controller.cleanup().await;

        assert_eq!(servo.positions(), vec![0.0]);
        assert_eq!(display.clears(), 1);
        assert_eq!(display.current().unwrap().text(), "Server Closed");
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() -> anyhow::Result<()> {
        let taken = TcpListener::bind("127.0.0.1:0").await?;
        let addr = taken.local_addr()?.to_string();
        let (controller, display, _) = controller(Endpoint::Tcp(addr));

        let (_tx, rx) = watch::channel(false);
        assert!(controller.run(rx).await.is_err());
        assert!(display.texts().iter().any(|t| t.starts_with("BT Error:\n")));
        Ok(())
    }

    #[tokio::test]
    async fn test_tcp_round_trip_and_shutdown() -> anyhow::Result<()> {
        // Reserve a free port, then hand it to the controller.
        let addr = {
            let probe = TcpListener::bind("127.0.0.1:0").await?;
            probe.local_addr()?
        };
        let (controller, display, servo) = controller(Endpoint::Tcp(addr.to_string()));
        let (tx, rx) = watch::channel(false);

        let run = tokio::spawn(async move {
            let result = controller.run(rx).await;
            controller.cleanup().await;
            result
        });

        let mut stream = None;
        for _ in 0..100 {
            if let Ok(s) = TcpStream::connect(addr).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stream = stream.expect("controller never started listening");
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        assert_eq!(lines.next_line().await?.as_deref(), Some("WELCOME_RPi"));
        writer.write_all(b"HELLO").await?;
        assert_eq!(lines.next_line().await?.as_deref(), Some("HANDSHAKE_OK"));
        writer.write_all(b"SERVO1:180").await?;
        assert_eq!(lines.next_line().await?.as_deref(), Some("OK:SERVO1:180"));

        tx.send(true)?;
        tokio::time::timeout(Duration::from_secs(2), run).await???;

        assert_eq!(servo.positions(), vec![1.0, 0.0]);
        assert_eq!(display.current().unwrap().text(), "Server Closed");
        Ok(())
    }
}
