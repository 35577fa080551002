//! Register addresses and constants for the GC2145 sensor
//!
//! Logical register addresses are 10 bits wide: bits 9:8 select the register
//! bank, bits 7:0 are the offset within the bank. Registers above the bank
//! boundary (`0xf0..`) and the bank-select register itself are visible from
//! every bank.

/// I2C slave address
pub const GC2145_SLAVE_ADDRESS: u8 = 0x3c;

/// Chip ID register (16-bit, big-endian)
pub const GC2145_REG_CHIP_ID: u16 = 0xf0;

/// Expected chip ID value
pub const GC2145_CHIP_ID_VALUE: u16 = 0x2145;

/// Output pad enable
pub const GC2145_REG_PAD_IO: u16 = 0xf2;
/// PLL mode 1 - pclk divider, mclk/2 enable, PLL enable
pub const GC2145_REG_PLL_MODE1: u16 = 0xf7;
/// PLL mode 2 - PLL mux select and multiplier
pub const GC2145_REG_PLL_MODE2: u16 = 0xf8;
/// CM mode
pub const GC2145_REG_CM_MODE: u16 = 0xf9;
/// Clock divider mode
pub const GC2145_REG_CLK_DIV_MODE: u16 = 0xfa;
/// Analog power control
pub const GC2145_REG_ANALOG_PWC: u16 = 0xfc;
/// Scaler mode - full scaler / column-only scaler enables
pub const GC2145_REG_SCALER_MODE: u16 = 0xfd;
/// Soft reset and register bank select (bits 1:0)
pub const GC2145_REG_RESET: u16 = 0xfe;

/// Offset of the bank-select register, reachable from any bank
pub const GC2145_BANK_SELECT_OFFSET: u8 = 0xfe;

// Bank 0 (P0) sensor core registers
pub const GC2145_P0_EXPOSURE: u16 = 0x03;
pub const GC2145_P0_HBLANK_DELAY: u16 = 0x05;
pub const GC2145_P0_VBLANK_DELAY: u16 = 0x07;
pub const GC2145_P0_ROW_START: u16 = 0x09;
pub const GC2145_P0_COL_START: u16 = 0x0b;
pub const GC2145_P0_WIN_HEIGHT: u16 = 0x0d;
pub const GC2145_P0_WIN_WIDTH: u16 = 0x0f;
pub const GC2145_P0_SH_DELAY: u16 = 0x11;
pub const GC2145_P0_START_TIME: u16 = 0x13;
pub const GC2145_P0_END_TIME: u16 = 0x14;
/// Analog mode 1 - bit 0 hflip, bit 1 vflip
pub const GC2145_P0_ANALOG_MODE1: u16 = 0x17;
/// Analog mode 2 - 0x0a base, bit 7 column skip, bit 6 row skip
pub const GC2145_P0_ANALOG_MODE2: u16 = 0x18;
/// AD pipe number
pub const GC2145_P0_AD_PIPE: u16 = 0x19;
/// AD clock mode
pub const GC2145_P0_AD_CLK_MODE: u16 = 0x20;
/// Pad drive strength
pub const GC2145_P0_DRIVE_STRENGTH: u16 = 0x24;

pub const GC2145_P0_ISP_BLK_ENABLE1: u16 = 0x80;
pub const GC2145_P0_ISP_BLK_ENABLE2: u16 = 0x81;
pub const GC2145_P0_ISP_BLK_ENABLE3: u16 = 0x82;
pub const GC2145_P0_ISP_OUT_FORMAT: u16 = 0x84;
pub const GC2145_P0_SYNC_MODE: u16 = 0x86;
/// Test pattern selector
pub const GC2145_P0_DEBUG_MODE2: u16 = 0x8c;
/// Test pattern solid color / enable
pub const GC2145_P0_DEBUG_MODE3: u16 = 0x8d;

// Bank 0 exposure/gain core registers
pub const GC2145_P0_ANALOG_GAIN: u16 = 0xb1;
pub const GC2145_P0_DIGITAL_GAIN: u16 = 0xb2;
pub const GC2145_P0_WB_R_GAIN: u16 = 0xb3;
pub const GC2145_P0_WB_G_GAIN: u16 = 0xb4;
pub const GC2145_P0_WB_B_GAIN: u16 = 0xb5;
/// AEC enable
pub const GC2145_P0_AEC_ENABLE: u16 = 0xb6;

// Bank 1 AEC measurement window
pub const GC2145_P1_AEC_X1: u16 = 0x101;
pub const GC2145_P1_AEC_X2: u16 = 0x102;
pub const GC2145_P1_AEC_Y1: u16 = 0x103;
pub const GC2145_P1_AEC_Y2: u16 = 0x104;
pub const GC2145_P1_AEC_CENTER_X1: u16 = 0x105;
pub const GC2145_P1_AEC_CENTER_X2: u16 = 0x106;
pub const GC2145_P1_AEC_CENTER_Y1: u16 = 0x107;
pub const GC2145_P1_AEC_CENTER_Y2: u16 = 0x108;
/// AE target luminance bias
pub const GC2145_P1_AE_TARGET: u16 = 0x113;
/// Maximum analog gain used by AEC
pub const GC2145_P1_AEC_MAX_AGAIN: u16 = 0x11f;
/// Maximum digital gain used by AEC
pub const GC2145_P1_AEC_MAX_DGAIN: u16 = 0x120;
/// First of 7 consecutive 16-bit per-level exposure targets
pub const GC2145_P1_AEC_EXP_LEVEL1: u16 = 0x127;
/// First of 7 per-level max post gains
pub const GC2145_P1_AEC_MAX_POST_GAIN1: u16 = 0x135;

// Bank 1 AWB measurement window
pub const GC2145_P1_AWB_X1: u16 = 0x1ec;
pub const GC2145_P1_AWB_Y1: u16 = 0x1ed;
pub const GC2145_P1_AWB_X2: u16 = 0x1ee;
pub const GC2145_P1_AWB_Y2: u16 = 0x1ef;

/// Smallest output the ISP can produce
pub const GC2145_SENSOR_WIDTH_MIN: u32 = 88;
pub const GC2145_SENSOR_HEIGHT_MIN: u32 = 72;

/// Native pixel array size
pub const GC2145_SENSOR_WIDTH_MAX: u32 = 1600;
pub const GC2145_SENSOR_HEIGHT_MAX: u32 = 1200;

/// External clock rate the sensor is driven at
pub const GC2145_XCLK_RATE: u32 = 24_000_000;

/// Largest raw burst write (data bytes, excluding the start offset); also
/// the longest auto-increment run the bulk parameter loader emits
pub const GC2145_MAX_XFER: usize = 128;

/// Capacity of the register transaction queue
pub const GC2145_MAX_OPS: usize = 64;
