//! Register addresses and constants for the ANX7688 bridge
//!
//! The chip answers on two I2C addresses: the firmware interface (status,
//! interrupt and policy registers maintained by the on-chip controller) and
//! the TCPC-style interface (vendor ID, alert and message windows).

/// I2C address of the firmware register interface
pub const ANX7688_I2C_ADDRESS: u8 = 0x28;

/// I2C address of the TCPC register interface
pub const ANX7688_TCPC_I2C_ADDRESS: u8 = 0x2c;

// ========================================================================
// Firmware interface registers
// ========================================================================

/// On-chip controller reset control (bit 4 resets the controller)
pub const ANX7688_REG_USBC_RESET_CTRL: u8 = 0x05;
pub const ANX7688_USBC_RESET_CTRL_OCM_RESET: u8 = 1 << 4;

/// EEPROM/firmware load status, bit 0 set once firmware is running
pub const ANX7688_REG_EEPROM_LOAD_STATUS0: u8 = 0x12;
pub const ANX7688_EEPROM_FW_LOADED: u8 = 1 << 0;

/// Firmware version, big-endian 16-bit
pub const ANX7688_REG_FW_VERSION1: u8 = 0x15;
pub const ANX7688_REG_FW_VERSION0: u8 = 0x16;

/// Mask for the status interrupt sources (active low)
pub const ANX7688_REG_STATUS_INT_MASK: u8 = 0x17;

/// Maximum voltage the sink requests, in 100mV units
pub const ANX7688_REG_MAX_VOLTAGE: u8 = 0x1b;
/// Maximum sink power, in 500mW units
pub const ANX7688_REG_MAX_POWER: u8 = 0x1c;
/// Minimum sink power, in 500mW units
pub const ANX7688_REG_MIN_POWER: u8 = 0x1d;

/// Delay before VBUS is turned off on disconnect, in 4ms units
pub const ANX7688_REG_VBUS_OFF_DELAY_TIME: u8 = 0x22;
/// Try.SNK wait time, in 2ms units
pub const ANX7688_REG_TRY_UFP_TIMER: u8 = 0x23;

/// Feature enables forwarded to the on-chip controller
pub const ANX7688_REG_FEATURE_CTRL: u8 = 0x27;

/// Latched status interrupt sources
pub const ANX7688_REG_STATUS_INT: u8 = 0x28;
pub const ANX7688_SOFT_INT_RECEIVED_MSG: u8 = 1 << 0;
pub const ANX7688_SOFT_INT_RECEIVED_ACK: u8 = 1 << 1;
pub const ANX7688_SOFT_INT_VCONN_CHANGE: u8 = 1 << 2;
pub const ANX7688_SOFT_INT_VBUS_CHANGE: u8 = 1 << 3;
pub const ANX7688_SOFT_INT_CC_STATUS_CHANGE: u8 = 1 << 4;
pub const ANX7688_SOFT_INT_DATA_ROLE_CHANGE: u8 = 1 << 5;

/// Interrupt sources the status interrupt register can latch
pub const ANX7688_SOFT_INT_MASK: u8 = 0x7f;

/// Connection status maintained by the on-chip controller
pub const ANX7688_REG_STATUS: u8 = 0x29;
pub const ANX7688_STATUS_VCONN_ON: u8 = 1 << 2;
pub const ANX7688_STATUS_VBUS_ON: u8 = 1 << 3;
pub const ANX7688_STATUS_DATA_ROLE_DFP: u8 = 1 << 5;

/// CC pin termination status, one nibble per CC pin
pub const ANX7688_REG_CC_STATUS: u8 = 0x2a;

/// External interrupt mask 2 (active low)
pub const ANX7688_REG_IRQ_EXT_MASK2: u8 = 0x3d;
/// External interrupt source 2, write one to clear
pub const ANX7688_REG_IRQ_EXT_SOURCE2: u8 = 0x4f;
pub const ANX7688_IRQ2_SOFT_INT: u8 = 1 << 2;

/// Chip/EEPROM access control, read back to verify controller readiness
pub const ANX7688_REG_EEPROM_ACCESS_STATUS: u8 = 0x7f;
pub const ANX7688_EEPROM_ACCESS_READY: u8 = 0x07;

// EEPROM write protection, all three bits must be set to program
pub const ANX7688_REG_EEPROM_UNLOCK0: u8 = 0x3f;
pub const ANX7688_EEPROM_UNLOCK0_BITS: u8 = 1 << 5;
pub const ANX7688_REG_EEPROM_UNLOCK1: u8 = 0x44;
pub const ANX7688_EEPROM_UNLOCK1_BITS: u8 = (1 << 0) | (1 << 7);
pub const ANX7688_REG_EEPROM_UNLOCK2: u8 = 0x66;
pub const ANX7688_EEPROM_UNLOCK2_BITS: u8 = 1 << 3;

// EEPROM direct access window
pub const ANX7688_REG_EEPROM_DATA0: u8 = 0xd0;
pub const ANX7688_REG_EEPROM_ADDR_HIGH: u8 = 0xe0;
pub const ANX7688_REG_EEPROM_ADDR_LOW: u8 = 0xe1;
pub const ANX7688_REG_EEPROM_CTRL: u8 = 0xe2;
pub const ANX7688_EEPROM_CTRL_READ: u8 = 0x06;
pub const ANX7688_EEPROM_CTRL_WRITE: u8 = 0x01;
pub const ANX7688_EEPROM_CTRL_DONE: u8 = 1 << 3;

// ========================================================================
// TCPC interface registers
// ========================================================================

pub const ANX7688_TCPC_REG_VENDOR_ID0: u8 = 0x00;
pub const ANX7688_TCPC_REG_VENDOR_ID1: u8 = 0x01;

/// TCPC alert status, write one to clear
pub const ANX7688_TCPC_REG_ALERT0: u8 = 0x10;

/// Outgoing message window, reads zero once the controller has consumed it
pub const ANX7688_TCPC_REG_INTERFACE_SEND: u8 = 0x30;
/// Incoming message window, written zero to release it
pub const ANX7688_TCPC_REG_INTERFACE_RECV: u8 = 0x51;

/// DisplayPort alternate mode state maintained by the controller
pub const ANX7688_TCPC_REG_DP_STATE: u8 = 0x87;

// ========================================================================
// On-chip controller message codes
// ========================================================================

pub const OCM_MSG_PWR_SRC_CAP: u8 = 0x00;
pub const OCM_MSG_PWR_SNK_CAP: u8 = 0x01;
pub const OCM_MSG_DP_SNK_IDENTITY: u8 = 0x02;
pub const OCM_MSG_SVID: u8 = 0x03;
pub const OCM_MSG_GET_DP_SNK_CAP: u8 = 0x04;
pub const OCM_MSG_ACCEPT: u8 = 0x05;
pub const OCM_MSG_REJECT: u8 = 0x06;
pub const OCM_MSG_PSWAP_REQ: u8 = 0x10;
pub const OCM_MSG_DSWAP_REQ: u8 = 0x11;
pub const OCM_MSG_GOTO_MIN_REQ: u8 = 0x12;
pub const OCM_MSG_VCONN_SWAP_REQ: u8 = 0x13;
pub const OCM_MSG_VDM: u8 = 0x14;
pub const OCM_MSG_DP_SNK_CFG: u8 = 0x15;
pub const OCM_MSG_PWR_OBJ_REQ: u8 = 0x16;
pub const OCM_MSG_PD_STATUS_REQ: u8 = 0x17;
pub const OCM_MSG_DP_ALT_ENTER: u8 = 0x19;
pub const OCM_MSG_DP_ALT_EXIT: u8 = 0x1a;
pub const OCM_MSG_RESPONSE_TO_REQ: u8 = 0xf0;
pub const OCM_MSG_SOFT_RST: u8 = 0xf1;
pub const OCM_MSG_HARD_RST: u8 = 0xf2;
pub const OCM_MSG_RESTART: u8 = 0xf3;

// ========================================================================
// Timing and capacity constants
// ========================================================================

/// Cable detect debounce delay, in ms
pub const ANX7688_CABLE_DEBOUNCE_MS: u64 = 10;

/// Safety-net status poll interval while powered, in ms
pub const ANX7688_POLL_INTERVAL_MS: u64 = 1000;

/// Delay before re-evaluating the cable after a reset or flash, in ms
pub const ANX7688_RECONNECT_DELAY_MS: u64 = 20;

/// Firmware load wait: attempts and per-attempt sleep
pub const ANX7688_FW_LOAD_TRIES: u32 = 100;
pub const ANX7688_FW_LOAD_POLL_MS: u32 = 5;

/// Send window drain wait: attempts and per-attempt sleep
pub const ANX7688_OCM_SEND_TRIES: u32 = 100;
pub const ANX7688_OCM_SEND_POLL_US: u32 = 100;

/// EEPROM access completion wait: attempts and per-attempt sleep
pub const ANX7688_EEPROM_DONE_TRIES: u32 = 100;
pub const ANX7688_EEPROM_DONE_POLL_US: u32 = 100;

/// EEPROM controller readiness wait: attempts and per-attempt sleep
pub const ANX7688_EEPROM_READY_TRIES: u32 = 200;
pub const ANX7688_EEPROM_READY_POLL_MS: u32 = 5;

/// EEPROM access granularity
pub const ANX7688_EEPROM_BLOCK_SIZE: usize = 16;

/// Offset of the firmware image in the EEPROM
pub const ANX7688_EEPROM_FW_OFFSET: u16 = 0x10;

/// Largest firmware image that fits behind the bootblock
pub const ANX7688_EEPROM_FW_CAPACITY: usize = 0x10000 - ANX7688_EEPROM_BLOCK_SIZE;

/// Default sink current limit before CC advertisement is known, in uA
pub const ANX7688_DEFAULT_CURRENT_LIMIT_UA: u32 = 500_000;
