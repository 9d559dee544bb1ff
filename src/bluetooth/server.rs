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

//! Single-client command server.
//!
//! One client at a time: accept, send the welcome token, try a handshake
//! (advisory only), then serve strict request/response until the peer goes
//! away. Afterwards the server goes back to accepting.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, trace, warn};

use super::protocol::{is_handshake_token, ErrorCode, Response, HANDSHAKE_OK, WELCOME};
use super::transport::Acceptor;
use crate::command::{Command, CommandProcessor, Verb};
use crate::config::ServerConfig;
use crate::hardware::DisplayNotifier;

/// Where the server is in its accept/serve cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    AwaitingAccept,
    Handshaking,
    Active,
    Closed,
    /// The server loop has exited.
    Stopped,
}

/// Details of the currently connected client.
#[derive(Debug, Clone)]
pub struct ConnectionSession {
    pub peer: String,
    pub handshake_completed: bool,
    pub connected_at: DateTime<Utc>,
    pub last_activity: Instant,
}

impl ConnectionSession {
    fn new(peer: String) -> Self {
        Self {
            peer,
            handshake_completed: false,
            connected_at: Utc::now(),
            last_activity: Instant::now(),
        }
    }
}

/// Result of one read from the client.
enum Inbound {
    Data(Vec<u8>),
    Closed,
    TimedOut,
}

/// Why a session ended.
#[derive(Debug, PartialEq, Eq)]
enum CloseReason {
    PeerClosed,
    Disconnect,
    IdleTimeout,
    Transport,
    Shutdown,
}

struct Connection<S> {
    stream: S,
    buf: Vec<u8>,
}

impl<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin> Connection<S> {
    fn new(stream: S, max_message_len: usize) -> Self {
        Self {
            stream,
            buf: vec![0; max_message_len],
        }
    }

    async fn send(&mut self, message: &str) -> io::Result<()> {
        trace!("Sending: {}", message);
        self.stream.write_all(message.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await
    }

    async fn recv(&mut self, timeout: Duration) -> io::Result<Inbound> {
        match tokio::time::timeout(timeout, self.stream.read(&mut self.buf)).await {
            Err(_) => Ok(Inbound::TimedOut),
            Ok(Ok(0)) => Ok(Inbound::Closed),
            Ok(Ok(n)) => {
                trace!("Received {} bytes: {:02x?}", n, &self.buf[..n]);
                Ok(Inbound::Data(self.buf[..n].to_vec()))
            }
            Ok(Err(e)) => Err(e),
        }
    }

    async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Error closing client stream: {}", e);
        }
    }
}

/// Accepts clients one at a time and runs their command loop.
pub struct ConnectionServer<A: Acceptor> {
    acceptor: A,
    config: ServerConfig,
    processor: CommandProcessor,
    display: DisplayNotifier,
    slot: Arc<Semaphore>,
    session: Arc<Mutex<Option<ConnectionSession>>>,
    state: watch::Sender<ServerState>,
}

impl<A: Acceptor> ConnectionServer<A> {
    pub fn new(
        acceptor: A,
        config: ServerConfig,
        processor: CommandProcessor,
        display: DisplayNotifier,
    ) -> Self {
        let (state, _) = watch::channel(ServerState::AwaitingAccept);
        Self {
            acceptor,
            config,
            processor,
            display,
            slot: Arc::new(Semaphore::new(1)),
            session: Arc::new(Mutex::new(None)),
            state,
        }
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Shared view of the connected client, `None` while nobody is connected.
    pub fn session_view(&self) -> Arc<Mutex<Option<ConnectionSession>>> {
        self.session.clone()
    }

    fn set_state(&self, state: ServerState) {
        debug!("Server state -> {:?}", state);
        self.state.send_replace(state);
    }

    /// Serve clients until `shutdown` flips to `true` (or its sender is
    /// dropped). The endpoint is closed when this returns.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Waiting for connections ({})", self.acceptor.describe());

        while !*shutdown.borrow() {
            self.set_state(ServerState::AwaitingAccept);

            // Never attempt a second accept while a session holds the slot.
            let permit = match self.slot.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Session slot closed: {}", e);
                    break;
                }
            };

            let accepted = tokio::select! {
                accepted = self.acceptor.accept() => accepted,
                _ = shutdown.changed() => break,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.retry_delay()) => continue,
                        _ = shutdown.changed() => break,
                    }
                }
            };

            info!("✅ Accepted connection from {}", peer);
            *self.session.lock() = Some(ConnectionSession::new(peer.clone()));

            let connection = Connection::new(stream, self.config.max_message_len);
            let reason = self.serve(connection, &peer, &mut shutdown).await;
            info!("Connection with {} closed ({:?})", peer, reason);

            *self.session.lock() = None;
            drop(permit);
            self.set_state(ServerState::Closed);
            if reason != CloseReason::Shutdown {
                self.display.notify("Disconnected\nWaiting...");
            }
        }

        self.set_state(ServerState::Stopped);
        info!("Connection server stopped");
    }

    async fn serve<S>(
        &self,
        mut connection: Connection<S>,
        peer: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> CloseReason
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        self.set_state(ServerState::Handshaking);
        let handshake = tokio::select! {
            result = self.handshake(&mut connection) => result,
            _ = shutdown.changed() => {
                connection.close().await;
                return CloseReason::Shutdown;
            }
        };
        if let Err(e) = handshake {
            warn!("Handshake transport error: {}", e);
            connection.close().await;
            return CloseReason::Transport;
        }

        let short_peer: String = peer.chars().take(12).collect();
        self.display.notify(&format!("Connected:\n{}", short_peer));
        self.set_state(ServerState::Active);
        self.display.notify("Connected!\nReady");

        let reason = tokio::select! {
            reason = self.command_loop(&mut connection) => reason,
            _ = shutdown.changed() => CloseReason::Shutdown,
        };
        connection.close().await;
        reason
    }

    /// Send the welcome token and try to read a handshake token.
    ///
    /// Only errors writing to the client are returned; a missing, late or
    /// unknown token is logged and the session carries on.
    async fn handshake<S>(&self, connection: &mut Connection<S>) -> io::Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        connection.send(WELCOME).await?;
        debug!("📤 Sent welcome: {}", WELCOME);

        let timeout = self.config.handshake_timeout();
        match connection.recv(timeout).await {
            Ok(Inbound::Data(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    let token = text.trim();
                    if is_handshake_token(token) {
                        connection.send(HANDSHAKE_OK).await?;
                        self.mark_handshake();
                        info!("🤝 Handshake completed ({})", token);
                    } else {
                        warn!("Unknown handshake message '{}', continuing anyway", token);
                    }
                }
                Err(e) => warn!("Undecodable handshake message ({}), continuing anyway", e),
            },
            Ok(Inbound::Closed) => warn!("Handshake data empty, continuing anyway"),
            Ok(Inbound::TimedOut) => {
                warn!("No handshake within {:?}, continuing anyway", timeout)
            }
            Err(e) => warn!("Handshake read failed ({}), continuing anyway", e),
        }
        Ok(())
    }

    fn mark_handshake(&self) {
        if let Some(session) = self.session.lock().as_mut() {
            session.handshake_completed = true;
        }
    }

    fn touch(&self) {
        if let Some(session) = self.session.lock().as_mut() {
            session.last_activity = Instant::now();
        }
    }

    async fn command_loop<S>(&self, connection: &mut Connection<S>) -> CloseReason
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let timeout = self.config.recv_timeout();
        loop {
            let bytes = match connection.recv(timeout).await {
                Ok(Inbound::Data(bytes)) => bytes,
                Ok(Inbound::Closed) => {
                    info!("📱 Client closed the connection");
                    return CloseReason::PeerClosed;
                }
                Ok(Inbound::TimedOut) => {
                    warn!("No command received within {:?}", timeout);
                    return CloseReason::IdleTimeout;
                }
                Err(e) => {
                    warn!("Communication error: {}", e);
                    return CloseReason::Transport;
                }
            };
            self.touch();

            let (response, verb) = match String::from_utf8(bytes) {
                Ok(text) => {
                    let command = Command::parse(&text);
                    let response = self.processor.dispatch(&command).await;
                    (response, command.verb())
                }
                Err(e) => {
                    warn!("Failed to decode command: {}", e);
                    (Response::from(ErrorCode::Decode), Verb::Unknown)
                }
            };

            debug!("📤 Response: {}", response);
            if let Err(e) = connection.send(&response.to_string()).await {
                warn!("Failed to send response: {}", e);
                return CloseReason::Transport;
            }

            if verb == Verb::Disconnect {
                return CloseReason::Disconnect;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::ActuatorBank;
    use crate::testing::{RecordingDisplay, RecordingServo};
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    /// Hands out in-memory client streams pushed by the test.
    struct PipeAcceptor {
        incoming: mpsc::UnboundedReceiver<DuplexStream>,
        accepted: usize,
    }

    impl Acceptor for PipeAcceptor {
        type Stream = DuplexStream;

        async fn accept(&mut self) -> io::Result<(DuplexStream, String)> {
            let stream = self.incoming.recv().await.ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "no more clients")
            })?;
            self.accepted += 1;
            Ok((stream, format!("AA:BB:CC:DD:EE:{:02X}", self.accepted)))
        }

        fn describe(&self) -> String {
            "Port: pipe".to_string()
        }
    }

    struct Client {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Client {
        async fn send(&mut self, data: &[u8]) {
            self.writer.write_all(data).await.unwrap();
            self.writer.flush().await.unwrap();
        }

        async fn line(&mut self) -> Option<String> {
            let mut line = String::new();
            let n = tokio::time::timeout(Duration::from_secs(2), self.reader.read_line(&mut line))
                .await
                .expect("timed out waiting for server")
                .unwrap();
            (n > 0).then(|| line.trim_end().to_string())
        }

        async fn request(&mut self, command: &str) -> Option<String> {
            self.send(command.as_bytes()).await;
            self.line().await
        }
    }

    struct Harness {
        clients: mpsc::UnboundedSender<DuplexStream>,
        state: watch::Receiver<ServerState>,
        session: Arc<Mutex<Option<ConnectionSession>>>,
        shutdown: watch::Sender<bool>,
        server: JoinHandle<()>,
        servo2: RecordingServo,
        display: RecordingDisplay,
    }

    impl Harness {
        fn new(config: ServerConfig) -> Self {
            let (clients, incoming) = mpsc::unbounded_channel();
            let servo2 = RecordingServo::default();
            let display = RecordingDisplay::default();
            let notifier = DisplayNotifier::new(display.clone());
            let processor = CommandProcessor::new(
                ActuatorBank::new(RecordingServo::default(), servo2.clone()),
                notifier.clone(),
            );
            let server = ConnectionServer::new(
                PipeAcceptor {
                    incoming,
                    accepted: 0,
                },
                config,
                processor,
                notifier,
            );
            let state = server.subscribe();
            let session = server.session_view();
            let (shutdown, shutdown_rx) = watch::channel(false);
            let server = tokio::spawn(server.run(shutdown_rx));

            Self {
                clients,
                state,
                session,
                shutdown,
                server,
                servo2,
                display,
            }
        }

        fn connect(&self) -> Client {
            let (client, server_side) = duplex(4096);
            self.clients.send(server_side).unwrap();
            let (reader, writer) = tokio::io::split(client);
            Client {
                reader: BufReader::new(reader),
                writer,
            }
        }

        async fn wait_for(&mut self, state: ServerState) {
            tokio::time::timeout(Duration::from_secs(2), self.state.wait_for(|s| *s == state))
                .await
                .expect("timed out waiting for server state")
                .unwrap();
        }
    }

    fn fast_config() -> ServerConfig {
        ServerConfig {
            handshake_timeout_ms: 100,
            recv_timeout_ms: 2000,
            retry_delay_ms: 10,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_handshake_hello() {
        let mut h = Harness::new(fast_config());
        let mut client = h.connect();

        assert_eq!(client.line().await.as_deref(), Some("WELCOME_RPi"));
        assert_eq!(client.request("HELLO").await.as_deref(), Some("HANDSHAKE_OK"));
        h.wait_for(ServerState::Active).await;
        assert!(h.session.lock().as_ref().unwrap().handshake_completed);

        assert_eq!(client.request("CONNECT").await.as_deref(), Some("OK:CONNECTED"));
    }

    #[tokio::test]
    async fn test_silent_client_still_becomes_active() {
        let mut h = Harness::new(fast_config());
        let mut client = h.connect();

        assert_eq!(client.line().await.as_deref(), Some("WELCOME_RPi"));
        h.wait_for(ServerState::Active).await;
        assert!(!h.session.lock().as_ref().unwrap().handshake_completed);

        assert_eq!(client.request("SERVO2:45").await.as_deref(), Some("OK:SERVO2:45"));
        assert_eq!(h.servo2.positions(), vec![-0.5]);
    }

    #[tokio::test]
    async fn test_unknown_handshake_token_is_tolerated() {
        let mut h = Harness::new(fast_config());
        let mut client = h.connect();

        assert_eq!(client.line().await.as_deref(), Some("WELCOME_RPi"));
        client.send(b"YO").await;
        h.wait_for(ServerState::Active).await;

        // No HANDSHAKE_OK was queued: the next line is the command response.
        assert_eq!(client.request("CONNECT").await.as_deref(), Some("OK:CONNECTED"));
    }

    #[tokio::test]
    async fn test_decode_error_keeps_session() {
        let h = Harness::new(fast_config());
        let mut client = h.connect();

        assert_eq!(client.line().await.as_deref(), Some("WELCOME_RPi"));
        assert_eq!(client.request("PING").await.as_deref(), Some("HANDSHAKE_OK"));

        client.send(&[0xff, 0xfe, 0x41]).await;
        assert_eq!(client.line().await.as_deref(), Some("ERROR:DECODE_ERROR"));
        assert_eq!(client.request("OLED:still here").await.as_deref(), Some("OK:OLED_DISPLAY"));
        assert_eq!(*h.state.borrow(), ServerState::Active);
    }

    #[tokio::test]
    async fn test_peer_close_returns_to_accept() {
        let mut h = Harness::new(fast_config());
        let mut client = h.connect();

        assert_eq!(client.line().await.as_deref(), Some("WELCOME_RPi"));
        assert_eq!(client.request("CONNECT").await.as_deref(), Some("HANDSHAKE_OK"));
        assert_eq!(client.request("CONNECT").await.as_deref(), Some("OK:CONNECTED"));
        assert_eq!(client.request("SERVO2:45").await.as_deref(), Some("OK:SERVO2:45"));

        drop(client);
        h.wait_for(ServerState::AwaitingAccept).await;
        assert!(h.session.lock().is_none());
        assert!(h.display.texts().contains(&"Disconnected\nWaiting...".to_string()));

        let mut again = h.connect();
        assert_eq!(again.line().await.as_deref(), Some("WELCOME_RPi"));
    }

    #[tokio::test]
    async fn test_disconnect_command_closes_session() {
        let mut h = Harness::new(fast_config());
        let mut client = h.connect();

        assert_eq!(client.line().await.as_deref(), Some("WELCOME_RPi"));
        assert_eq!(client.request("HELLO").await.as_deref(), Some("HANDSHAKE_OK"));
        assert_eq!(client.request("DISCONNECT").await.as_deref(), Some("OK:DISCONNECTED"));
        assert_eq!(client.line().await, None);
        h.wait_for(ServerState::AwaitingAccept).await;
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_session() {
        let mut h = Harness::new(ServerConfig {
            recv_timeout_ms: 100,
            ..fast_config()
        });
        let mut client = h.connect();

        assert_eq!(client.line().await.as_deref(), Some("WELCOME_RPi"));
        assert_eq!(client.request("PING").await.as_deref(), Some("HANDSHAKE_OK"));
        assert_eq!(client.line().await, None);
        h.wait_for(ServerState::AwaitingAccept).await;
    }

    #[tokio::test]
    async fn test_second_client_waits_for_first() {
        let mut h = Harness::new(fast_config());
        let mut first = h.connect();
        assert_eq!(first.line().await.as_deref(), Some("WELCOME_RPi"));
        h.wait_for(ServerState::Active).await;

        let mut second = h.connect();
        let early = tokio::time::timeout(Duration::from_millis(200), second.reader.fill_buf()).await;
        assert!(early.is_err(), "second client was served while the first was active");

        drop(first);
        assert_eq!(second.line().await.as_deref(), Some("WELCOME_RPi"));
    }

    #[tokio::test]
    async fn test_shutdown_closes_active_session() {
        let mut h = Harness::new(fast_config());
        let mut client = h.connect();
        assert_eq!(client.line().await.as_deref(), Some("WELCOME_RPi"));
        h.wait_for(ServerState::Active).await;

        h.shutdown.send(true).unwrap();
        assert_eq!(client.line().await, None);
        tokio::time::timeout(Duration::from_secs(2), h.server)
            .await
            .expect("server did not stop")
            .unwrap();
        assert_eq!(*h.state.borrow(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_while_awaiting_accept() {
        let mut h = Harness::new(fast_config());
        h.wait_for(ServerState::AwaitingAccept).await;

        h.shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), h.server)
            .await
            .expect("server did not stop")
            .unwrap();
    }
}
