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

//! SSD1306 128x64 OLED over Linux I2C.

use anyhow::{anyhow, Context, Result};
use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Baseline, Text};
use linux_embedded_hal::I2cdev;
use ssd1306::mode::BufferedGraphicsMode;
use ssd1306::mode::DisplayConfig as _;
use ssd1306::prelude::*;
use ssd1306::{I2CDisplayInterface, Ssd1306};
use tracing::info;

use super::display::{Frame, StatusDisplay, MAX_LINES};
use crate::config::DisplayConfig;

/// Panel height in pixels.
pub const PANEL_HEIGHT: i32 = 64;

/// Vertical distance between text lines.
pub const LINE_HEIGHT: i32 = 12;

type Panel = Ssd1306<
    I2CInterface<I2cdev>,
    DisplaySize128x64,
    BufferedGraphicsMode<DisplaySize128x64>,
>;

/// Top edge of text line `index`.
pub fn line_top(index: usize) -> i32 {
    index as i32 * LINE_HEIGHT
}

/// Status display on a real SSD1306 panel.
pub struct Ssd1306Display {
    panel: Panel,
}

impl Ssd1306Display {
    /// Open and initialize the panel described by `config`.
    pub fn open(config: &DisplayConfig) -> Result<Self> {
        let i2c = I2cdev::new(&config.i2c_bus)
            .with_context(|| format!("open I2C bus {}", config.i2c_bus))?;
        let interface = I2CDisplayInterface::new_custom_address(i2c, config.address);
        let mut panel = Ssd1306::new(interface, DisplaySize128x64, DisplayRotation::Rotate0)
            .into_buffered_graphics_mode();
        panel
            .init()
            .map_err(|e| anyhow!("SSD1306 init failed: {:?}", e))?;

        let mut display = Self { panel };
        display.clear()?;
        info!(
            "SSD1306 ready on {} at {:#04x}",
            config.i2c_bus, config.address
        );
        Ok(display)
    }
}

impl StatusDisplay for Ssd1306Display {
    fn render(&mut self, frame: &Frame) -> Result<()> {
        self.panel.clear_buffer();
        let style = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);
        for (index, line) in frame.lines().iter().enumerate().take(MAX_LINES) {
            Text::with_baseline(line, Point::new(0, line_top(index)), style, Baseline::Top)
                .draw(&mut self.panel)
                .map_err(|e| anyhow!("SSD1306 draw failed: {:?}", e))?;
        }
        self.panel
            .flush()
            .map_err(|e| anyhow!("SSD1306 flush failed: {:?}", e))
    }

    fn clear(&mut self) -> Result<()> {
        self.panel.clear_buffer();
        self.panel
            .flush()
            .map_err(|e| anyhow!("SSD1306 flush failed: {:?}", e))
    }
}
