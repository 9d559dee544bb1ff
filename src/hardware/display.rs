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

//! Status display (128x64 OLED) notifications.
//!
//! The pairing agent and the command server both write here. Writes are
//! serialized behind one lock so the panel only ever shows a whole frame
//! from the most recent caller.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{info, warn};

use super::oled::Ssd1306Display;
use crate::config::{DisplayBackend, DisplayConfig};

/// Lines that fit on the panel (64 px tall, 12 px per line).
pub const MAX_LINES: usize = 5;

/// A rendered, ASCII-only block of text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    lines: Vec<String>,
}

impl Frame {
    /// Build a frame from free text.
    ///
    /// The two-character escape `\n` is treated as a line break, non-ASCII
    /// and control characters are dropped, and overflow lines are cut.
    pub fn from_text(text: &str) -> Self {
        let lines = text
            .replace("\\n", "\n")
            .split('\n')
            .take(MAX_LINES)
            .map(|line| {
                line.chars()
                    .filter(|c| c.is_ascii() && !c.is_ascii_control())
                    .collect()
            })
            .collect();
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Lines joined back with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Hardware side of the display.
pub trait StatusDisplay: Send {
    /// Replace the panel contents with `frame`.
    fn render(&mut self, frame: &Frame) -> Result<()>;
    /// Blank the panel.
    fn clear(&mut self) -> Result<()>;
}

/// Display backend that only writes frames to the log.
#[derive(Debug, Default)]
pub struct LogDisplay;

impl StatusDisplay for LogDisplay {
    fn render(&mut self, frame: &Frame) -> Result<()> {
        info!("Display: {}", frame.lines().join(" | "));
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        info!("Display cleared");
        Ok(())
    }
}

/// Shared, best-effort handle to the status display.
///
/// Cloning is cheap; all clones drive the same backend.
#[derive(Clone)]
pub struct DisplayNotifier {
    backend: Arc<Mutex<Box<dyn StatusDisplay>>>,
}

impl DisplayNotifier {
    pub fn new(backend: impl StatusDisplay + 'static) -> Self {
        Self {
            backend: Arc::new(Mutex::new(Box::new(backend))),
        }
    }

    /// Build the notifier described by `config`.
    ///
    /// A panel that cannot be opened falls back to the log backend so
    /// status messages are still recorded.
    pub fn from_config(config: &DisplayConfig) -> Self {
        match config.backend {
            DisplayBackend::Log => Self::new(LogDisplay),
            DisplayBackend::Ssd1306 => match Ssd1306Display::open(config) {
                Ok(panel) => Self::new(panel),
                Err(e) => {
                    warn!("OLED unavailable ({:#}), using log backend", e);
                    Self::new(LogDisplay)
                }
            },
        }
    }

    /// Show `text`. Failures, panics included, are logged and swallowed.
    pub fn notify(&self, text: &str) {
        let frame = Frame::from_text(text);
        if let Err(e) = self.with_backend(|backend| backend.render(&frame)) {
            warn!("Display render failed: {}", e);
        }
    }

    /// Blank the panel. Failures, panics included, are logged and swallowed.
    pub fn clear(&self) {
        if let Err(e) = self.with_backend(|backend| backend.clear()) {
            warn!("Display clear failed: {}", e);
        }
    }

    fn with_backend(
        &self,
        op: impl FnOnce(&mut Box<dyn StatusDisplay>) -> Result<()>,
    ) -> Result<()> {
        let mut backend = self.backend.lock();
        panic::catch_unwind(AssertUnwindSafe(|| op(&mut *backend)))
            .unwrap_or_else(|_| Err(anyhow!("display backend panicked")))
    }
}

impl std::fmt::Debug for DisplayNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayNotifier").finish_non_exhaustive()
    }
}
