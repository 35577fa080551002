//! GC2145 2MP camera sensor driver
//!
//! Control-plane driver for the GalaxyCore GC2145 on the PinePhone: power
//! and clock sequencing, banked register access, batched mode programming
//! and the exposure/flip/test-pattern controls. The pixel data path (CSI /
//! parallel capture) is the host's concern.
//!
//! Register programming that must land together goes through a bounded
//! transaction queue (`tx_begin` .. `tx_commit`); the queue executes in
//! order and aborts on the first bus error.

mod registers;
mod timing;

pub use registers::*;
pub use timing::{PllConfig, SensorParams, HBLANK_MIN, VBLANK_MAX};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::I2c;
use heapless::Vec;

use crate::error::{ConfigError, Error, ProtocolError};
use crate::hal::{ClockSource, Regulator};

/// Mains frequency assumed by the flicker-avoidance fit
const POWER_LINE_FREQ_HZ: u32 = 50;

/// Supply rails in power-on order
const SUPPLY_NAMES: [&str; 3] = ["IOVDD", "AVDD", "DVDD"];

/// Output pixel formats, with their ISP output-format setup byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Uyvy,
    Vyuy,
    Yuyv,
    Yvyu,
    Rgb565,
    /// Raw 8-bit Bayer (BGGR)
    Bayer8,
}

impl PixelFormat {
    fn setup_byte(self) -> u8 {
        match self {
            PixelFormat::Uyvy => 0x00,
            PixelFormat::Vyuy => 0x01,
            PixelFormat::Yuyv => 0x02,
            PixelFormat::Yvyu => 0x03,
            PixelFormat::Rgb565 => 0x06,
            PixelFormat::Bayer8 => 0x17,
        }
    }
}

/// Output frame format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

/// Parallel bus synchronization polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncConfig {
    pub vsync_active_low: bool,
    pub hsync_active_low: bool,
    pub pclk_sample_falling: bool,
}

impl SyncConfig {
    fn sync_mode(self) -> u8 {
        (self.vsync_active_low as u8)
            | ((self.hsync_active_low as u8) << 1)
            | ((self.pclk_sample_falling as u8) << 2)
    }
}

/// Test pattern generator selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    Disabled,
    VgaColorBars,
    UxgaColorBars,
    SkinMap,
    /// Solid color by shade index, 0 (black) ..= 10 (magenta)
    SolidColor(u8),
}

/// AE target register values for exposure bias steps of -4 EV/1000 ..= 4 EV/1000
pub const AE_BIAS_LEVELS: [u8; 9] = [0x55, 0x60, 0x65, 0x70, 0x7b, 0x85, 0x90, 0x95, 0xa0];

/// Default AE bias index (0 EV)
pub const AE_BIAS_DEFAULT_INDEX: usize = 4;

#[derive(Debug, Clone, Copy)]
enum TxOp {
    Write8 { reg: u16, val: u8 },
    Write16 { reg: u16, val: u16 },
    UpdateBits { reg: u16, mask: u8, val: u8 },
}

/// GC2145 sensor driver
pub struct Gc2145<I2C, D, CLK, REG, RST, EN> {
    i2c: I2C,
    delay: D,
    addr: u8,
    xclk: CLK,
    supplies: [REG; 3],
    reset_gpio: RST,
    enable_gpio: EN,
    sync: SyncConfig,

    bank: Option<u8>,
    ops: Vec<TxOp, GC2145_MAX_OPS>,
    tx_open: bool,

    format: FrameFormat,
    framerate: u32,
    pending_mode_change: bool,
    powered: bool,
    streaming: bool,
    ae_enabled: bool,
}

impl<I2C, D, CLK, REG, RST, EN> Gc2145<I2C, D, CLK, REG, RST, EN>
where
    I2C: I2c,
    D: DelayNs,
    CLK: ClockSource,
    REG: Regulator,
    RST: OutputPin,
    EN: OutputPin,
{
    /// Create a new GC2145 driver instance
    ///
    /// `supplies` are the IOVDD, AVDD and DVDD rails in that order. The
    /// sensor starts unpowered with a 1600x1200 UYVY mode at 10 fps pending.
    pub fn new(
        i2c: I2C,
        delay: D,
        xclk: CLK,
        supplies: [REG; 3],
        reset_gpio: RST,
        enable_gpio: EN,
        sync: SyncConfig,
    ) -> Self {
        Self {
            i2c,
            delay,
            addr: GC2145_SLAVE_ADDRESS,
            xclk,
            supplies,
            reset_gpio,
            enable_gpio,
            sync,
            bank: None,
            ops: Vec::new(),
            tx_open: false,
            format: FrameFormat {
                format: PixelFormat::Uyvy,
                width: GC2145_SENSOR_WIDTH_MAX,
                height: GC2145_SENSOR_HEIGHT_MAX,
            },
            framerate: 10,
            pending_mode_change: true,
            powered: false,
            streaming: false,
            ae_enabled: true,
        }
    }

    // ========================================
    // Banked register access
    // ========================================

    /// Burst-write consecutive registers starting at `offset` in the current
    /// bank, using the chip's address auto-increment.
    fn write_regs(&mut self, offset: u8, data: &[u8]) -> Result<(), Error<I2C::Error>> {
        let mut buf = [0u8; GC2145_MAX_XFER + 1];
        if data.len() > GC2145_MAX_XFER {
            log::error!("oversized transfer (size={})", data.len());
            return Err(Error::Protocol(ProtocolError::OversizedTransfer));
        }

        buf[0] = offset;
        buf[1..=data.len()].copy_from_slice(data);

        log::trace!("[wr {:02x}] <= {:02x?}", offset, data);

        self.i2c
            .write(self.addr, &buf[..=data.len()])
            .map_err(|e| {
                log::error!("write failed: offset={:02x} len={}", offset, data.len());
                Error::Bus(e)
            })
    }

    fn read_regs(&mut self, offset: u8, data: &mut [u8]) -> Result<(), Error<I2C::Error>> {
        self.i2c
            .write_read(self.addr, &[offset], data)
            .map_err(|e| {
                log::error!("read failed: offset={:02x} len={}", offset, data.len());
                Error::Bus(e)
            })?;

        log::trace!("[rd {:02x}] => {:02x?}", offset, data);
        Ok(())
    }

    fn switch_bank(&mut self, reg: u16) -> Result<(), Error<I2C::Error>> {
        let bank = (reg >> 8) as u8;
        if bank & !3 != 0 {
            return Err(Error::Config(ConfigError::BankOutOfRange));
        }

        if self.bank != Some(bank) {
            self.write_regs(GC2145_BANK_SELECT_OFFSET, &[bank])?;
            self.bank = Some(bank);
            log::debug!("bank switch: {:02x}", bank);
        }

        Ok(())
    }

    /// Read a register by its 10-bit logical address
    pub fn read_register(&mut self, reg: u16) -> Result<u8, Error<I2C::Error>> {
        self.switch_bank(reg)?;
        let mut buf = [0u8];
        self.read_regs(reg as u8, &mut buf)?;
        Ok(buf[0])
    }

    /// Write a register by its 10-bit logical address
    ///
    /// Writing the bank-select offset through here keeps the bank cache
    /// coherent.
    pub fn write_register(&mut self, reg: u16, val: u8) -> Result<(), Error<I2C::Error>> {
        self.switch_bank(reg)?;

        if (reg & 0xff) as u8 == GC2145_BANK_SELECT_OFFSET {
            self.bank = Some(val & 3);
        }

        self.write_regs(reg as u8, &[val])
    }

    fn update_bits(&mut self, reg: u16, mask: u8, val: u8) -> Result<(), Error<I2C::Error>> {
        let mut tmp = self.read_register(reg)?;
        tmp &= !mask;
        tmp |= val & mask;
        self.write_register(reg, tmp)
    }

    /// Read a big-endian 16-bit register pair
    fn read_register16(&mut self, reg: u16) -> Result<u16, Error<I2C::Error>> {
        self.switch_bank(reg)?;
        let mut buf = [0u8; 2];
        self.read_regs(reg as u8, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Write a big-endian 16-bit register pair
    fn write_register16(&mut self, reg: u16, val: u16) -> Result<(), Error<I2C::Error>> {
        self.switch_bank(reg)?;
        self.write_regs(reg as u8, &val.to_be_bytes())
    }

    /// Load a flat `(offset, value)` register parameter stream, using
    /// auto-increment burst writes for runs of consecutive offsets.
    ///
    /// The stream addresses raw per-bank offsets; to switch banks it must
    /// contain its own `0xfe, bank` pairs. The bank cache is invalid
    /// afterwards.
    pub fn load_parameters(&mut self, data: &[u8]) -> Result<(), Error<I2C::Error>> {
        if data.len() % 2 != 0 {
            log::error!("register parameter stream has invalid size");
            return Err(Error::Protocol(ProtocolError::InvalidRegisterMap));
        }

        let mut buf = [0u8; GC2145_MAX_XFER];
        let mut i = 0;
        while i < data.len() {
            let start = data[i];
            let mut len = 0usize;

            while i < data.len() && (data[i] as usize) == start as usize + len && len < buf.len() {
                buf[len] = data[i + 1];
                len += 1;
                i += 2;
            }

            self.write_regs(start, &buf[..len])?;
        }

        self.bank = None;
        Ok(())
    }

    // ========================================
    // Register transactions
    // ========================================

    /// Open a register transaction, discarding any queued ops
    fn tx_begin(&mut self) {
        if self.tx_open {
            log::error!("transaction opened while another is open");
        }

        self.tx_open = true;
        self.ops.clear();
    }

    fn tx_add(&mut self, op: TxOp) {
        if !self.tx_open {
            log::error!("op queued without an open transaction");
            return;
        }

        if self.ops.push(op).is_err() {
            log::error!("transaction queue overflow, op dropped");
        }
    }

    fn tx_write8(&mut self, reg: u16, val: u8) {
        self.tx_add(TxOp::Write8 { reg, val });
    }

    fn tx_write16(&mut self, reg: u16, val: u16) {
        self.tx_add(TxOp::Write16 { reg, val });
    }

    fn tx_update_bits(&mut self, reg: u16, mask: u8, val: u8) {
        self.tx_add(TxOp::UpdateBits { reg, mask, val });
    }

    /// Execute the queued ops in order, stopping at the first failure.
    ///
    /// The queue is emptied and the transaction closed either way; ops after
    /// a failed one are not retried.
    fn tx_commit(&mut self) -> Result<(), Error<I2C::Error>> {
        if !self.tx_open {
            log::error!("commit without an open transaction");
            return Ok(());
        }

        self.tx_open = false;
        let ops = core::mem::take(&mut self.ops);

        for op in &ops {
            match *op {
                TxOp::Write8 { reg, val } => self.write_register(reg, val)?,
                TxOp::Write16 { reg, val } => self.write_register16(reg, val)?,
                TxOp::UpdateBits { reg, mask, val } => self.update_bits(reg, mask, val)?,
            }
        }

        Ok(())
    }

    // ========================================
    // Mode programming
    // ========================================

    fn apply_pll(&mut self, pll: &PllConfig) -> Result<(), Error<I2C::Error>> {
        self.tx_begin();
        self.tx_write8(GC2145_REG_PLL_MODE1, pll.pll_mode1());
        self.tx_write8(GC2145_REG_PLL_MODE2, pll.pll_mode2());
        self.tx_write8(GC2145_REG_CLK_DIV_MODE, pll.clk_div_mode());
        self.tx_commit()
    }

    fn apply_params(&mut self, p: &SensorParams) -> Result<(), Error<I2C::Error>> {
        let (off_x, off_y) = p.window_offset();

        self.tx_begin();

        self.tx_write8(GC2145_REG_SCALER_MODE, p.scaler_mode());
        self.tx_write8(GC2145_P0_ANALOG_MODE2, p.analog_mode2());

        self.tx_write16(GC2145_P0_ROW_START, off_y as u16);
        self.tx_write16(GC2145_P0_COL_START, off_x as u16);
        self.tx_write16(GC2145_P0_WIN_HEIGHT, p.win_height as u16);
        self.tx_write16(GC2145_P0_WIN_WIDTH, p.win_width as u16);
        self.tx_write16(GC2145_P0_HBLANK_DELAY, p.hblank as u16);
        self.tx_write16(GC2145_P0_VBLANK_DELAY, p.vblank as u16);
        self.tx_write16(GC2145_P0_SH_DELAY, p.sh_delay as u16);

        self.tx_write8(GC2145_P0_START_TIME, p.start_time);
        self.tx_write8(GC2145_P0_END_TIME, p.end_time);

        self.tx_commit()
    }

    fn setup_awb(&mut self, x1: u32, y1: u32, x2: u32, y2: u32) -> Result<(), Error<I2C::Error>> {
        let ratio = 8;

        self.tx_begin();

        // disable awb
        self.tx_update_bits(GC2145_P0_ISP_BLK_ENABLE3, 1 << 1, 0);

        // reset white balance RGB gains
        self.tx_write8(GC2145_P0_WB_R_GAIN, 0x40);
        self.tx_write8(GC2145_P0_WB_G_GAIN, 0x40);
        self.tx_write8(GC2145_P0_WB_B_GAIN, 0x40);

        // awb measurement window
        self.tx_write8(GC2145_P1_AWB_X1, (x1 / ratio) as u8);
        self.tx_write8(GC2145_P1_AWB_Y1, (y1 / ratio) as u8);
        self.tx_write8(GC2145_P1_AWB_X2, (x2 / ratio) as u8);
        self.tx_write8(GC2145_P1_AWB_Y2, (y2 / ratio) as u8);

        // enable awb
        self.tx_update_bits(GC2145_P0_ISP_BLK_ENABLE3, 1 << 1, 1 << 1);

        self.tx_commit()
    }

    fn setup_aec(
        &mut self,
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        cx1: u32,
        cy1: u32,
        cx2: u32,
        cy2: u32,
    ) -> Result<(), Error<I2C::Error>> {
        let x_ratio = 8;

        self.tx_begin();

        // disable AEC
        self.tx_write8(GC2145_P0_AEC_ENABLE, 0);

        // set reasonable initial exposure and gains
        self.tx_write16(GC2145_P0_EXPOSURE, 1200);
        self.tx_write8(GC2145_P0_ANALOG_GAIN, 0x20);
        self.tx_write8(GC2145_P0_DIGITAL_GAIN, 0xe0);

        // measurement window
        self.tx_write8(GC2145_P1_AEC_X1, (x1 / x_ratio) as u8);
        self.tx_write8(GC2145_P1_AEC_X2, (x2 / x_ratio) as u8);
        self.tx_write8(GC2145_P1_AEC_Y1, (y1 / 8) as u8);
        self.tx_write8(GC2145_P1_AEC_Y2, (y2 / 8) as u8);

        // center weight
        self.tx_write8(GC2145_P1_AEC_CENTER_X1, (cx1 / x_ratio) as u8);
        self.tx_write8(GC2145_P1_AEC_CENTER_X2, (cx2 / x_ratio) as u8);
        self.tx_write8(GC2145_P1_AEC_CENTER_Y1, (cy1 / 8) as u8);
        self.tx_write8(GC2145_P1_AEC_CENTER_Y2, (cy2 / 8) as u8);

        // enable AEC again
        self.tx_write8(GC2145_P0_AEC_ENABLE, 1);

        self.tx_commit()
    }

    /// Solve and program the full mode: capture window, scaling/skipping
    /// tier, blanking, PLL, AWB/AEC windows, exposure levels and pad drive.
    ///
    /// Tier selection: a target at or below half the pixel array runs the
    /// full scaler from a doubled window at doubled pixel clock; if the
    /// requested frame rate is still out of reach, the column-only scaler
    /// plus row skipping halves the frame period. Vertical blanking then
    /// stretches the frame to the exact requested rate.
    fn setup_mode(&mut self) -> Result<(), Error<I2C::Error>> {
        let width = self.format.width;
        let height = self.format.height;
        let framerate = self.framerate;
        let fmt_setup = self.format.format.setup_byte();
        let mclk = self.xclk.rate();

        let scaling_desired =
            width <= GC2145_SENSOR_WIDTH_MAX / 2 && height <= GC2145_SENSOR_HEIGHT_MAX / 2;

        let mut pclk2 = timing::solve_pclk2(mclk, 60_000_000)
            .map_err(Error::Config)?
            .pclk2;

        let mut params = SensorParams::new(width, height);

        // a smaller target lets the scaler cover more of the pixel array
        if scaling_desired {
            params = SensorParams::new(width * 2, height * 2);
            params.enable_scaler = true;
            pclk2 *= 2;
        }

        // refit whenever pclk changes
        params.fit_hblank_to_power_line(POWER_LINE_FREQ_HZ, pclk2 / 2);

        let frame_period = params.frame_period();
        if framerate > pclk2 / 2 / frame_period && scaling_desired {
            // column scaler + row skip halves the frame period while still
            // covering the doubled window
            params.col_scaler_only = true;
            params.row_skip = true;
            params.fit_hblank_to_power_line(POWER_LINE_FREQ_HZ, pclk2 / 2);

            // a skip-only tier without the scaler would go here; it trades
            // too much quality to enable by default
        }

        params.fit_vblank_to_frame_period(pclk2 / 2 / framerate);

        self.apply_params(&params)?;

        let pll = timing::solve_pclk2(mclk, pclk2).map_err(Error::Config)?;
        self.apply_pll(&pll)?;
        pclk2 = pll.pclk2;

        let pad = if width > 256 && height > 256 { 32 } else { 16 };

        self.setup_awb(pad, pad, width - pad * 2, height - pad * 2)?;
        self.setup_aec(
            pad,
            pad,
            width - pad * 2,
            height - pad * 2,
            2 * pad,
            2 * pad,
            width - pad * 4,
            height - pad * 4,
        )?;

        // per-level exposure targets are in quarter frame periods, measured
        // in row periods
        let rt = params.row_period();
        let ft = params.frame_period();
        let ft_rt = ft / rt / 4;

        self.tx_begin();

        for i in 0..7u16 {
            self.tx_write16(GC2145_P1_AEC_EXP_LEVEL1 + 2 * i, (ft_rt * (i as u32 + 1)) as u16);
            self.tx_write8(GC2145_P1_AEC_MAX_POST_GAIN1 + i, 0x50);
        }

        // max analog and digital gain
        self.tx_write8(GC2145_P1_AEC_MAX_AGAIN, 0x50);
        self.tx_write8(GC2145_P1_AEC_MAX_DGAIN, 0xe0);

        self.tx_write8(GC2145_P0_ISP_OUT_FORMAT, fmt_setup);

        // gamma curve on, denoising off
        self.tx_update_bits(GC2145_P0_ISP_BLK_ENABLE1, 1 << 6, 1 << 6);
        self.tx_update_bits(GC2145_P0_ISP_BLK_ENABLE1, 1 << 2, 0);

        let pixclk = pclk2 / if params.enable_scaler { 2 } else { 1 };
        self.tx_write8(
            GC2145_P0_DRIVE_STRENGTH,
            if pixclk > 40_000_000 { 0xff } else { 0x55 },
        );

        let ret = self.tx_commit();
        if ret.is_ok() {
            self.pending_mode_change = false;
        }
        ret
    }

    // ========================================
    // Format and frame interval
    // ========================================

    /// Request an output format; dimensions are clamped to the sensor
    /// limits and the adjusted format is returned. Takes effect at the next
    /// stream start.
    pub fn set_format(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<FrameFormat, Error<I2C::Error>> {
        if self.streaming {
            return Err(Error::Config(ConfigError::Streaming));
        }

        let fmt = FrameFormat {
            format,
            width: width.clamp(GC2145_SENSOR_WIDTH_MIN, GC2145_SENSOR_WIDTH_MAX),
            height: height.clamp(GC2145_SENSOR_HEIGHT_MIN, GC2145_SENSOR_HEIGHT_MAX),
        };

        self.format = fmt;
        self.pending_mode_change = true;
        Ok(fmt)
    }

    /// Current output format
    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Request a frame rate; 0 means "as fast as possible". Returns the
    /// clamped rate. Takes effect at the next stream start.
    pub fn set_frame_rate(&mut self, fps: u32) -> u32 {
        let fps = if fps == 0 { 60 } else { fps.clamp(1, 60) };
        self.framerate = fps;
        self.pending_mode_change = true;
        fps
    }

    /// Current frame rate in fps
    pub fn frame_rate(&self) -> u32 {
        self.framerate
    }

    // ========================================
    // Power and streaming
    // ========================================

    /// Base register configuration after power-on: chip ID check, soft
    /// reset, safe PLL bring-up, bus sync polarity and ISP defaults,
    /// followed by the optional tuning parameter stream.
    fn configure(&mut self, init_params: Option<&[u8]>) -> Result<(), Error<I2C::Error>> {
        let chip_id = self.read_register16(GC2145_REG_CHIP_ID)?;
        log::info!("device id: {:04x}", chip_id);
        if chip_id != GC2145_CHIP_ID_VALUE {
            log::error!("unsupported device id: {:04x}", chip_id);
            return Err(Error::DeviceNotFound);
        }

        let sync_mode = self.sync.sync_mode();

        self.tx_begin();

        // soft reset
        self.tx_write8(GC2145_REG_RESET, 0xf0);

        // enable analog/digital parts
        self.tx_write8(GC2145_REG_ANALOG_PWC, 0x06);

        // safe initial PLL setting
        self.tx_write8(GC2145_REG_PLL_MODE1, 0x1d);
        self.tx_write8(GC2145_REG_PLL_MODE2, 0x84);
        self.tx_write8(GC2145_REG_CLK_DIV_MODE, 0x00);

        self.tx_write8(GC2145_REG_CM_MODE, 0xfe);

        // disable pads
        self.tx_write8(GC2145_REG_PAD_IO, 0);

        self.tx_write8(GC2145_P0_AD_PIPE, 0x0c);
        self.tx_write8(GC2145_P0_AD_CLK_MODE, 0x01);

        // enable defect correction, etc.
        self.tx_write8(GC2145_P0_ISP_BLK_ENABLE1, 0x0b);

        self.tx_write8(GC2145_P0_SYNC_MODE, sync_mode);

        self.tx_commit()?;

        if let Some(params) = init_params {
            self.load_parameters(params)?;
        }

        Ok(())
    }

    /// Power the sensor up, verify it and program the current mode.
    ///
    /// `init_params` is an optional tuning register stream applied after the
    /// base configuration. Any failure powers the sensor back down.
    pub fn power_on(&mut self, init_params: Option<&[u8]>) -> Result<(), Error<I2C::Error>> {
        if self.powered {
            return Ok(());
        }

        for (i, supply) in self.supplies.iter_mut().enumerate() {
            if let Err(e) = supply.enable() {
                log::error!("failed to enable {}: {:?}", SUPPLY_NAMES[i], e);
                return Err(Error::Supply);
            }
        }

        let ret = self.power_on_inner(init_params);
        if ret.is_err() {
            self.power_down();
        } else {
            self.powered = true;
        }
        ret
    }

    fn power_on_inner(&mut self, init_params: Option<&[u8]>) -> Result<(), Error<I2C::Error>> {
        self.xclk.set_rate(GC2145_XCLK_RATE).map_err(|e| {
            log::error!("failed to set xclk rate: {:?}", e);
            Error::Clock
        })?;
        self.xclk.enable().map_err(|e| {
            log::error!("failed to enable xclk: {:?}", e);
            Error::Clock
        })?;

        self.bank = None;

        self.delay.delay_ms(10);
        self.reset_gpio.set_high().ok();
        self.delay.delay_ms(10);
        self.enable_gpio.set_high().ok();
        self.delay.delay_ms(10);
        self.reset_gpio.set_low().ok();
        self.delay.delay_ms(40);

        self.configure(init_params)?;
        self.setup_mode()
    }

    /// Power the sensor down
    pub fn power_off(&mut self) {
        if !self.powered {
            return;
        }
        self.power_down();
        self.powered = false;
    }

    fn power_down(&mut self) {
        self.xclk.disable();
        self.reset_gpio.set_low().ok();
        self.enable_gpio.set_low().ok();

        for (i, supply) in self.supplies.iter_mut().enumerate() {
            if let Err(e) = supply.disable() {
                log::warn!("failed to disable {}: {:?}", SUPPLY_NAMES[i], e);
            }
        }

        self.streaming = false;
        self.bank = None;
        self.delay.delay_ms(100);
    }

    /// Whether the sensor is powered
    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Start or stop the output pads, applying a pending mode change first
    pub fn set_stream(&mut self, enable: bool) -> Result<(), Error<I2C::Error>> {
        if self.streaming == enable {
            return Ok(());
        }

        if enable && self.pending_mode_change {
            self.setup_mode()?;
        }

        self.tx_begin();
        self.tx_write8(GC2145_REG_PAD_IO, if enable { 0x0f } else { 0 });
        self.tx_commit()?;

        self.streaming = enable;
        Ok(())
    }

    // ========================================
    // Controls
    // ========================================

    /// Enable or disable automatic exposure control
    pub fn set_auto_exposure(&mut self, enable: bool) -> Result<(), Error<I2C::Error>> {
        self.tx_begin();
        self.tx_write8(GC2145_P0_AEC_ENABLE, enable as u8);
        let ret = self.tx_commit();
        if ret.is_ok() {
            self.ae_enabled = enable;
        }
        ret
    }

    /// Set manual exposure time (13-bit, row periods) and gains.
    ///
    /// Ignored while automatic exposure is enabled; the AEC owns these
    /// registers then.
    pub fn set_exposure(
        &mut self,
        exposure: u16,
        analog_gain: u8,
        digital_gain: u8,
    ) -> Result<(), Error<I2C::Error>> {
        if exposure > 0x1fff {
            return Err(Error::Config(ConfigError::InvalidParameter));
        }

        if self.ae_enabled {
            log::debug!("manual exposure ignored while AE is enabled");
            return Ok(());
        }

        self.tx_begin();
        self.tx_write16(GC2145_P0_EXPOSURE, exposure);
        self.tx_write8(GC2145_P0_DIGITAL_GAIN, digital_gain);
        self.tx_write8(GC2145_P0_ANALOG_GAIN, analog_gain);
        self.tx_commit()
    }

    /// Read back the exposure time and gains currently in effect
    pub fn exposure(&mut self) -> Result<(u16, u8, u8), Error<I2C::Error>> {
        let again = self.read_register(GC2145_P0_ANALOG_GAIN)?;
        let dgain = self.read_register(GC2145_P0_DIGITAL_GAIN)?;
        let exp = self.read_register16(GC2145_P0_EXPOSURE)?;
        Ok((exp, again, dgain))
    }

    /// Set the auto-exposure bias by index into [`AE_BIAS_LEVELS`]
    pub fn set_exposure_bias(&mut self, index: usize) -> Result<(), Error<I2C::Error>> {
        let val = *AE_BIAS_LEVELS
            .get(index)
            .ok_or(Error::Config(ConfigError::InvalidParameter))?;
        self.write_register(GC2145_P1_AE_TARGET, val)
    }

    /// Mirror the image horizontally
    pub fn set_hflip(&mut self, enable: bool) -> Result<(), Error<I2C::Error>> {
        self.update_bits(GC2145_P0_ANALOG_MODE1, 1 << 0, if enable { 1 << 0 } else { 0 })
    }

    /// Mirror the image vertically
    pub fn set_vflip(&mut self, enable: bool) -> Result<(), Error<I2C::Error>> {
        self.update_bits(GC2145_P0_ANALOG_MODE1, 1 << 1, if enable { 1 << 1 } else { 0 })
    }

    /// Select a test pattern in place of sensor data
    pub fn set_test_pattern(&mut self, pattern: TestPattern) -> Result<(), Error<I2C::Error>> {
        let (test1, test2) = match pattern {
            TestPattern::Disabled => (0x00, 0x01),
            TestPattern::VgaColorBars => (0x04, 0x01),
            TestPattern::UxgaColorBars => (0x44, 0x01),
            TestPattern::SkinMap => (0x10, 0x01),
            TestPattern::SolidColor(shade) => {
                if shade > 10 {
                    return Err(Error::Config(ConfigError::InvalidParameter));
                }
                (0x04, (shade << 4) | 0x8)
            }
        };

        self.write_register(GC2145_P0_DEBUG_MODE2, test1)?;
        self.write_register(GC2145_P0_DEBUG_MODE3, test2)
    }
}
