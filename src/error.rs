//! Error types shared by all drivers in this crate
//!
//! Every fallible driver operation returns `Result<_, Error<E>>` where `E`
//! is the I2C bus error of the host HAL. Protocol, timeout and configuration
//! failures are grouped so callers can match on the failure class without
//! enumerating every cause.

/// Driver error, generic over the bus error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// I2C communication error
    Bus(E),
    /// The peripheral violated its wire protocol
    Protocol(ProtocolError),
    /// A bounded wait expired
    Timeout(TimeoutError),
    /// The request cannot be satisfied by the hardware
    Config(ConfigError),
    /// Chip ID readback did not match the expected part
    DeviceNotFound,
    /// A supply rail operation failed (details already logged)
    Supply,
    /// A clock source operation failed (details already logged)
    Clock,
    /// A Type-C port operation failed (details already logged)
    Port,
}

/// Wire-protocol violations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Burst transfer longer than the device access window
    OversizedTransfer,
    /// Received frame failed its length or checksum validation
    CorruptFrame,
    /// A required AT command was rejected or never answered
    AtCommand,
    /// Outgoing message payload exceeds the frame capacity
    MessageTooLong,
    /// Register parameter stream is not a whole number of (reg, value) pairs
    InvalidRegisterMap,
}

/// Expired bounded waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutError {
    /// On-chip controller never reported its firmware as loaded
    FirmwareLoad,
    /// Outgoing message window never drained
    SendWindow,
    /// EEPROM controller never became ready
    EepromReady,
    /// EEPROM access never reported completion
    EepromDone,
    /// Modem never raised its wakeup line, it looks kill-switched
    ModemWakeup,
    /// Modem never reported power-up success on its status line
    ModemStatus,
}

/// Requests the hardware cannot satisfy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No PLL setting reaches the requested pixel clock
    NoFeasibleClock,
    /// Logical register address names a bank the chip does not have
    BankOutOfRange,
    /// Parameter outside the range the hardware accepts
    InvalidParameter,
    /// Firmware image does not fit the EEPROM capacity
    ImageTooLarge,
    /// Mode change rejected while the sensor is streaming
    Streaming,
    /// Operation not available on this device or in this power state
    Unsupported,
}

impl<E> From<E> for Error<E> {
    fn from(error: E) -> Self {
        Error::Bus(error)
    }
}
