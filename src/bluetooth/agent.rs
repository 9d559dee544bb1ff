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

//! Pairing agent.
//!
//! Runs the stack's interactive control-plane process in the background,
//! feeds it the agent setup directives and answers every pairing prompt it
//! prints. Prompts are answered unconditionally: the only real check is the
//! human comparing the passkey on the OLED with the one on the phone.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::classifier::{classify, PairingEvent};
use crate::config::AgentConfig;
use crate::hardware::DisplayNotifier;

/// Directives sent once after the process starts, in order.
pub const SETUP_DIRECTIVES: [&str; 4] = ["agent on", "default-agent", "pairable on", "discoverable on"];

/// Answer sent to every confirmation and authorization prompt.
pub const CONFIRM_DIRECTIVE: &str = "yes";

/// Agent lifecycle and pairing progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    Starting,
    Listening,
    AwaitingPin,
    AwaitingPasskeyConfirm,
    AwaitingConfirmation,
    AwaitingAuthorization,
    Success,
    Failed,
    Canceled,
    Stopped,
}

impl PairingState {
    /// Whether a monitor task owns this session.
    pub fn is_running(self) -> bool {
        !matches!(self, PairingState::Idle | PairingState::Stopped)
    }
}

/// What the agent does about one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    /// State visited while handling the event.
    pub state: PairingState,
    /// Line written back to the control plane.
    pub directive: Option<String>,
    /// Text shown on the display.
    pub display: Option<String>,
    /// Minimum time the display text stays up before the next line is read.
    pub dwell: Option<Duration>,
}

impl Reaction {
    fn new(state: PairingState) -> Self {
        Self {
            state,
            directive: None,
            display: None,
            dwell: None,
        }
    }

    fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directive = Some(directive.into());
        self
    }

    fn display(mut self, text: impl Into<String>) -> Self {
        self.display = Some(text.into());
        self
    }
}

/// State of one control-plane process lifetime.
#[derive(Debug)]
pub struct PairingSession {
    state: PairingState,
    pending_passkey: Option<String>,
    pin: String,
    success_dwell: Duration,
}

impl PairingSession {
    pub fn new(pin: impl Into<String>, success_dwell: Duration) -> Self {
        Self {
            state: PairingState::Idle,
            pending_passkey: None,
            pin: pin.into(),
            success_dwell,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    /// Passkey shown to the user while a confirmation is in flight.
    pub fn pending_passkey(&self) -> Option<&str> {
        self.pending_passkey.as_deref()
    }

    fn enter(&mut self, state: PairingState) {
        if self.state == PairingState::AwaitingPasskeyConfirm && state != self.state {
            self.pending_passkey = None;
        }
        self.state = state;
    }

    /// Apply `event` and return what to do about it.
    ///
    /// `None` means the line is only logged. After the reaction has been
    /// carried out call [`settle`](Self::settle).
    pub fn react(&mut self, event: &PairingEvent) -> Option<Reaction> {
        let reaction = match event {
            PairingEvent::PinRequested => Reaction::new(PairingState::AwaitingPin)
                .directive(self.pin.clone())
                .display(format!("PIN: {}\nSent", self.pin)),
            PairingEvent::PasskeyConfirm { passkey } => {
                let reaction = Reaction::new(PairingState::AwaitingPasskeyConfirm)
                    .directive(CONFIRM_DIRECTIVE);
                match passkey {
                    Some(passkey) => reaction.display(format!("Confirm:\n{}", passkey)),
                    None => reaction,
                }
            }
            PairingEvent::ConfirmationRequested => {
                Reaction::new(PairingState::AwaitingConfirmation)
                    .directive(CONFIRM_DIRECTIVE)
                    .display("Confirming\nPairing...")
            }
            PairingEvent::AuthorizationRequested => {
                Reaction::new(PairingState::AwaitingAuthorization)
                    .directive(CONFIRM_DIRECTIVE)
                    .display("Service\nAuthorized")
            }
            PairingEvent::Succeeded => {
                let mut reaction = Reaction::new(PairingState::Success).display("Pairing\nSuccess!");
                reaction.dwell = Some(self.success_dwell);
                reaction
            }
            PairingEvent::Failed => Reaction::new(PairingState::Failed).display("Pairing\nFailed"),
            PairingEvent::Canceled => {
                Reaction::new(PairingState::Canceled).display("Pairing\nCanceled")
            }
            PairingEvent::DeviceDiscovered { .. } => {
                Reaction::new(self.state).display("Device Found\nPairing...")
            }
            PairingEvent::Unrecognized => return None,
        };

        self.enter(reaction.state);
        if let PairingEvent::PasskeyConfirm {
            passkey: Some(passkey),
        } = event
        {
            self.pending_passkey = Some(passkey.clone());
        }
        Some(reaction)
    }

    /// Return to `Listening` once a reaction has been carried out.
    pub fn settle(&mut self) {
        if self.state.is_running() {
            self.enter(PairingState::Listening);
        }
    }
}

/// Line-oriented duplex stream to the control-plane process.
pub struct ControlPlane {
    lines: Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    child: Option<Child>,
}

impl ControlPlane {
    /// Spawn `program` with piped stdin/stdout.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow!("failed to spawn {}: {}", program, e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("{} has no stdin", program))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("{} has no stdout", program))?;

        info!("Started control-plane process {} (pid {:?})", program, child.id());

        let mut plane = Self::from_streams(stdout, stdin);
        plane.child = Some(child);
        Ok(plane)
    }

    /// Wrap an arbitrary reader/writer pair.
    pub fn from_streams(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            lines: BufReader::new(reader).lines(),
            writer: Box::new(writer),
            child: None,
        }
    }

    /// Next output line, `None` at end of stream.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.lines.next_line().await
    }

    /// Write one directive line.
    pub async fn send(&mut self, directive: &str) -> std::io::Result<()> {
        self.writer.write_all(directive.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    /// Close stdin, give the process `grace` to exit, then kill it.
    pub async fn close(mut self, grace: Duration) {
        match tokio::time::timeout(grace, self.writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Control-plane stdin already closed: {}", e),
            Err(_) => debug!("Control-plane stdin did not close within {:?}", grace),
        }
        drop(self.writer);

        let Some(mut child) = self.child.take() else {
            return;
        };

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => info!("Control-plane process exited: {}", status),
            Ok(Err(e)) => warn!("Failed to wait for control-plane process: {}", e),
            Err(_) => {
                warn!("Control-plane process did not exit within {:?}, killing", grace);
                if let Err(e) = child.kill().await {
                    error!("Failed to kill control-plane process: {}", e);
                }
            }
        }
    }
}

/// Something that can start a fresh control-plane process.
pub trait ControlPlaneLauncher: Send + Sync {
    fn launch(&self) -> Result<ControlPlane>;
}

/// Launches the configured program as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: String,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }
}

impl ControlPlaneLauncher for ProcessLauncher {
    fn launch(&self) -> Result<ControlPlane> {
        ControlPlane::spawn(&self.program, &self.args)
    }
}

struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Background pairing agent.
pub struct PairingAgent {
    config: AgentConfig,
    launcher: Arc<dyn ControlPlaneLauncher>,
    display: DisplayNotifier,
    session: Arc<Mutex<PairingSession>>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl PairingAgent {
    /// Agent driving the configured control-plane program.
    pub fn new(config: AgentConfig, pin: &str, display: DisplayNotifier) -> Self {
        let launcher = Arc::new(ProcessLauncher::new(&config));
        Self::with_launcher(config, pin, display, launcher)
    }

    pub fn with_launcher(
        config: AgentConfig,
        pin: &str,
        display: DisplayNotifier,
        launcher: Arc<dyn ControlPlaneLauncher>,
    ) -> Self {
        let session = PairingSession::new(pin, config.success_dwell());
        Self {
            config,
            launcher,
            display,
            session: Arc::new(Mutex::new(session)),
            monitor: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PairingState {
        self.session.lock().state()
    }

    /// Start the monitor task. No-op while a previous one is still running.
    pub fn start(&self) {
        let mut monitor = self.monitor.lock();
        {
            let mut session = self.session.lock();
            if session.state().is_running() {
                debug!("Pairing agent already running ({:?})", session.state());
                return;
            }
            session.enter(PairingState::Starting);
        }

        info!("Starting pairing agent");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = Monitor {
            config: self.config.clone(),
            launcher: self.launcher.clone(),
            display: self.display.clone(),
            session: self.session.clone(),
            shutdown: shutdown_rx,
        };
        let join = tokio::spawn(task.run());

        *monitor = Some(MonitorHandle {
            shutdown: shutdown_tx,
            join,
        });
    }

    /// Stop the monitor and the control-plane process. Safe to call at any
    /// time, including concurrently with an in-flight read or write.
    pub async fn stop(&self) {
        let handle = self.monitor.lock().take();
        if let Some(mut handle) = handle {
            let _ = handle.shutdown.send(true);
            // The monitor closes the process within two grace periods.
            let limit = self.config.stop_grace() * 2 + Duration::from_secs(1);
            match tokio::time::timeout(limit, &mut handle.join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Pairing monitor task failed: {}", e),
                Err(_) => {
                    // Dropping the process handle kills the child.
                    warn!("Pairing monitor did not stop within {:?}, aborting", limit);
                    handle.join.abort();
                    let _ = handle.join.await;
                }
            }
        }
        self.session.lock().enter(PairingState::Stopped);
        info!("Pairing agent stopped");
    }
}

impl Drop for PairingAgent {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor.get_mut().take() {
            let _ = handle.shutdown.send(true);
        }
    }
}

struct Monitor {
    config: AgentConfig,
    launcher: Arc<dyn ControlPlaneLauncher>,
    display: DisplayNotifier,
    session: Arc<Mutex<PairingSession>>,
    shutdown: watch::Receiver<bool>,
}

impl Monitor {
    async fn run(mut self) {
        let mut plane = match self.launcher.launch() {
            Ok(plane) => plane,
            Err(e) => {
                error!("Pairing agent failed to start: {}", e);
                self.display.notify("Pairing Agent\nError");
                self.session.lock().enter(PairingState::Stopped);
                return;
            }
        };

        if self.setup(&mut plane).await {
            self.session.lock().enter(PairingState::Listening);
            info!("Pairing agent listening for pairing requests");

            if let Err(e) = self.listen(&mut plane).await {
                error!("Pairing agent stream error: {}", e);
            }
        }

        plane.close(self.config.stop_grace()).await;
        self.session.lock().enter(PairingState::Stopped);
    }

    /// Send the setup directives. Returns `false` if shutdown was requested.
    async fn setup(&mut self, plane: &mut ControlPlane) -> bool {
        let mut failures = 0;
        for directive in SETUP_DIRECTIVES {
            debug!("Setup directive: {}", directive);
            match self.send(plane, directive).await {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    warn!("Setup directive '{}' failed: {}", directive, e);
                    failures += 1;
                }
            }
            if !self.pause(self.config.setup_delay()).await {
                return false;
            }
        }

        if failures == SETUP_DIRECTIVES.len() {
            self.display.notify("Pairing Setup\nFailed");
        } else {
            self.display.notify("Pairing Ready\nWaiting...");
        }
        true
    }

    async fn listen(&mut self, plane: &mut ControlPlane) -> std::io::Result<()> {
        loop {
            let line = tokio::select! {
                line = plane.next_line() => line?,
                _ = self.shutdown.changed() => return Ok(()),
            };

            let Some(line) = line else {
                info!("Control-plane process closed its output");
                return Ok(());
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            debug!("📟 {}", line);

            let event = classify(line);
            let Some(reaction) = self.session.lock().react(&event) else {
                continue;
            };
            debug!("Pairing event {:?} -> {:?}", event, reaction.state);

            if let Some(directive) = &reaction.directive {
                if !self.send(plane, directive).await? {
                    return Ok(());
                }
            }
            if let Some(text) = &reaction.display {
                self.display.notify(text);
            }
            if let Some(dwell) = reaction.dwell {
                if !self.pause(dwell).await {
                    return Ok(());
                }
            }

            self.session.lock().settle();
        }
    }

    /// Write one directive. Returns `Ok(false)` if shutdown was requested
    /// while the process was not draining its input.
    async fn send(&mut self, plane: &mut ControlPlane, directive: &str) -> std::io::Result<bool> {
        tokio::select! {
            result = plane.send(directive) => result.map(|()| true),
            _ = self.shutdown.changed() => Ok(false),
        }
    }

    /// Sleep for `duration`. Returns `false` if shutdown was requested.
    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.shutdown.changed() => false,
        }
    }
}
