//! Pixel clock PLL solver and sensor timing model
//!
//! Everything here is pure integer math over the sensor's clock tree and
//! readout timing, kept separate from the register layer so the mode
//! configurator can search settings without touching the bus.
//!
//! Clock tree:
//!
//! ```text
//!     MCLK pin
//!         |
//!  DIV2 (optional)        - divide input MCLK by 2 when 0xf7[1] == 1
//!         |
//!        PLL              - multiplies by 0xf8[5:0]+1 when 0xf8[7] == 1
//!         |
//!     pclk_div             - 0xfa[7:4]+1
//!         |
//!       2pclk
//! ```

use crate::error::ConfigError;
use crate::gc2145::registers::*;

/// Upper limit for the PLL VCO (pll_mult * 4 stage), in Hz
const PLL_VCO_MAX: u32 = 768_000_000;

/// Minimum horizontal blanking, in double-pixel periods
pub const HBLANK_MIN: u32 = 0x1f0;

/// Maximum vertical blanking the register field can hold
pub const VBLANK_MAX: u32 = 4095;

/// A solved PLL setting for the double pixel clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllConfig {
    /// Divide the input MCLK by two before the PLL
    pub mclk_div2: bool,
    /// PLL multiplier, 2..=32
    pub pll_mult: u32,
    /// Post-PLL pixel clock divider, 1..=8
    pub pclk_div: u32,
    /// The double pixel clock this setting actually produces, in Hz
    pub pclk2: u32,
}

impl PllConfig {
    /// Value for the PLL mode 1 register (`0xf7`)
    pub fn pll_mode1(&self) -> u8 {
        (((self.pclk_div - 1) as u8) << 4) | ((self.mclk_div2 as u8) << 1) | 0x01
    }

    /// Value for the PLL mode 2 register (`0xf8`)
    pub fn pll_mode2(&self) -> u8 {
        0x80 | (self.pll_mult - 1) as u8
    }

    /// Value for the clock divider register (`0xfa`)
    pub fn clk_div_mode(&self) -> u8 {
        let div = (self.pclk_div - 1) as u8;
        (div << 4) | ((div / 2) & 0xf)
    }
}

/// Find the PLL setting producing the highest double pixel clock that does
/// not exceed `target` Hz.
///
/// The search is exhaustive over the divider/multiplier space and
/// short-circuits on an exact hit. Returns `NoFeasibleClock` when every
/// candidate overshoots the target.
pub fn solve_pclk2(mclk: u32, target: u32) -> Result<PllConfig, ConfigError> {
    if mclk == 0 {
        return Err(ConfigError::InvalidParameter);
    }

    let mut best: Option<PllConfig> = None;
    let mut diff_best = u32::MAX;

    for mclk_div2 in [false, true] {
        let input = mclk / if mclk_div2 { 2 } else { 1 };
        let pll_mult_max = (PLL_VCO_MAX / 4 / input).min(32);

        for pll_mult in 2..=pll_mult_max {
            for pclk_div in 1..=8 {
                let pclk2 = input * pll_mult / pclk_div;
                if pclk2 > target {
                    continue;
                }

                let candidate = PllConfig {
                    mclk_div2,
                    pll_mult,
                    pclk_div,
                    pclk2,
                };

                if pclk2 == target {
                    return Ok(candidate);
                }

                let diff = target - pclk2;
                if diff < diff_best {
                    diff_best = diff;
                    best = Some(candidate);
                }
            }
        }
    }

    best.ok_or(ConfigError::NoFeasibleClock)
}

/// Readout timing parameters for one sensor mode
///
/// Blanking and delays are in double-pixel periods; the frame rate equations
/// are:
///
/// ```text
/// row_period   = 2 * (win_width / 2 / (col_skip + 1) + sh_delay + hblank + 4)
/// frame_period = row_period * (vblank + win_height) / (row_skip + 1)
/// framerate    = pclk2 / 2 / frame_period
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorParams {
    pub enable_scaler: bool,
    pub col_scaler_only: bool,
    pub row_skip: bool,
    pub col_skip: bool,
    pub sh_delay: u32,
    pub hblank: u32,
    pub vblank: u32,
    pub start_time: u8,
    pub end_time: u8,
    pub win_width: u32,
    pub win_height: u32,
    pub width: u32,
    pub height: u32,
}

impl SensorParams {
    /// Base timing for a capture window sized for the given output
    pub fn new(width: u32, height: u32) -> Self {
        SensorParams {
            enable_scaler: false,
            col_scaler_only: false,
            row_skip: false,
            col_skip: false,
            sh_delay: 30,
            hblank: HBLANK_MIN,
            vblank: 8,
            start_time: 2,
            end_time: 2,
            win_width: width + 16,
            win_height: height + 32,
            width,
            height,
        }
    }

    /// Row readout period in pixel clock periods
    pub fn row_period(&self) -> u32 {
        let col_div = if self.col_skip { 2 } else { 1 };
        2 * (self.win_width / 2 / col_div + self.sh_delay + self.hblank + 4)
    }

    /// Frame readout period in pixel clock periods
    pub fn frame_period(&self) -> u32 {
        let row_div = if self.row_skip { 2 } else { 1 };
        self.row_period() * (self.vblank + self.win_height) / row_div
    }

    /// Pick the lowest hblank that makes the row period an integer fraction
    /// of the power line period, to keep flicker bands stationary.
    ///
    /// Falls back to the minimum when no alignment exists in range; finding
    /// the optimal hblank is not critical.
    pub fn fit_hblank_to_power_line(&mut self, power_line_freq: u32, pclk: u32) {
        self.hblank = HBLANK_MIN;
        while self.hblank < 2047 {
            let rt = self.row_period();

            // row_freq / power_line_freq * 1000
            let power_line_ratio = pclk / power_line_freq * 1000 / rt;
            if power_line_ratio % 1000 < 50 {
                return;
            }

            self.hblank += 1;
        }

        self.hblank = HBLANK_MIN;
    }

    /// Raise vblank so the frame period reaches `frame_period` pixel clock
    /// periods, clamped to the register range.
    pub fn fit_vblank_to_frame_period(&mut self, frame_period: u32) {
        self.vblank = 8;
        let rt = self.row_period();
        let fp = self.frame_period();

        if frame_period > fp {
            let row_div = if self.row_skip { 2 } else { 1 };
            self.vblank = frame_period * row_div / rt - self.win_height;
        }

        if self.vblank > VBLANK_MAX {
            self.vblank = VBLANK_MAX;
        }
    }

    /// Value for the scaler mode register (`0xfd`)
    pub fn scaler_mode(&self) -> u8 {
        (self.enable_scaler as u8) | ((self.col_scaler_only as u8) << 1)
    }

    /// Value for the analog mode 2 register (`0x18`)
    pub fn analog_mode2(&self) -> u8 {
        0x0a | ((self.col_skip as u8) << 7) | ((self.row_skip as u8) << 6)
    }

    /// Capture window offset that centers the window on the pixel array
    pub fn window_offset(&self) -> (u32, u32) {
        let off_x = (GC2145_SENSOR_WIDTH_MAX - self.width) / 2;
        let off_y = (GC2145_SENSOR_HEIGHT_MAX - self.height) / 2;
        (off_x, off_y)
    }
}
