#![no_std]
//! # PinePhone Peripheral Drivers
//!
//! Control-plane drivers for peripherals found on PinePhone boards:
//! - [`gc2145`]: GalaxyCore GC2145 2MP camera sensor (banked register access,
//!   pixel clock PLL solver, mode and exposure control)
//! - [`anx7688`]: Analogix ANX7688 USB-C bridge (connection state machine,
//!   message protocol of the on-chip controller, EEPROM firmware programming)
//! - [`modem`]: cellular modem power sequencing (Quectel EG25, Fibocom MG2723)
//!
//! Bus access goes through `embedded-hal` 1.0 traits; platform resources
//! the HAL does not model (regulators, clocks, the Type-C port and charger
//! glue) go through the traits in [`hal`].
//!
//! The drivers never block on wall-clock time beyond short bounded register
//! polls. Anything slower is driven by the caller: interrupt lines are
//! forwarded to the `*_irq` methods and a periodic `tick(now_ms)` supplies
//! the time base for debouncing and safety polls.
//!
//! ## Example
//!
//! ```no_run
//! use pinephone_drivers::gc2145::{Gc2145, PixelFormat, SyncConfig};
//! use pinephone_drivers::hal::{ClockSource, Regulator};
//! use pinephone_drivers::Error;
//! # use embedded_hal::{delay::DelayNs, digital::OutputPin, i2c::I2c};
//! # fn example<I, D, CLK, REG, RST, EN>(
//! #     i2c: I,
//! #     delay: D,
//! #     xclk: CLK,
//! #     supplies: [REG; 3],
//! #     reset: RST,
//! #     enable: EN,
//! # ) -> Result<(), Error<I::Error>>
//! # where
//! #     I: I2c,
//! #     D: DelayNs,
//! #     CLK: ClockSource,
//! #     REG: Regulator,
//! #     RST: OutputPin,
//! #     EN: OutputPin,
//! # {
//! let mut sensor = Gc2145::new(i2c, delay, xclk, supplies, reset, enable, SyncConfig::default());
//!
//! // Power up and verify the chip
//! sensor.power_on(None)?;
//!
//! // 720p preview at 30fps
//! sensor.set_format(PixelFormat::Uyvy, 1280, 720)?;
//! sensor.set_frame_rate(30);
//! sensor.set_stream(true)?;
//! # Ok(())
//! # }
//! ```

pub mod anx7688;
mod error;
pub mod gc2145;
pub mod hal;
pub mod modem;

// Re-export main types
pub use anx7688::{Anx7688, ConnectionState};
pub use error::{ConfigError, Error, ProtocolError, TimeoutError};
pub use gc2145::Gc2145;
pub use modem::{AnyVariant, ModemConfig, ModemPower};
