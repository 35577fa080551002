//! Message framing for the on-chip controller
//!
//! Messages cross the send and receive windows as fixed 32-byte frames:
//!
//! ```text
//! [0] length    - command byte plus payload, 1..=30
//! [1] command
//! [2..] payload
//! [2 + payload] checksum - two's complement of the byte sum of the frame
//! ```
//!
//! The byte sum of a valid frame, checksum included, is zero modulo 256.
//! Framing is pure so it can be tested without a bus.

use crate::error::ProtocolError;

/// Size of the message windows
pub const OCM_FRAME_SIZE: usize = 32;

/// Largest payload a frame can carry alongside command and checksum
pub const OCM_MAX_PAYLOAD: usize = OCM_FRAME_SIZE - 3;

/// Encode a message into `frame` and return the number of bytes to send.
pub fn encode_frame(
    cmd: u8,
    payload: &[u8],
    frame: &mut [u8; OCM_FRAME_SIZE],
) -> Result<usize, ProtocolError> {
    if payload.is_empty() || payload.len() > OCM_MAX_PAYLOAD {
        return Err(ProtocolError::MessageTooLong);
    }

    frame[0] = (payload.len() + 1) as u8;
    frame[1] = cmd;
    frame[2..2 + payload.len()].copy_from_slice(payload);

    let mut sum: u8 = 0;
    for byte in &frame[..2 + payload.len()] {
        sum = sum.wrapping_add(*byte);
    }
    frame[2 + payload.len()] = sum.wrapping_neg();

    Ok(payload.len() + 3)
}

/// Validate a received frame and return its command and payload.
pub fn parse_frame(frame: &[u8; OCM_FRAME_SIZE]) -> Result<(u8, &[u8]), ProtocolError> {
    let len = frame[0] as usize;
    if len == 0 || len > OCM_FRAME_SIZE - 2 {
        return Err(ProtocolError::CorruptFrame);
    }

    let mut sum: u8 = 0;
    for byte in &frame[..len + 2] {
        sum = sum.wrapping_add(*byte);
    }
    if sum != 0 {
        return Err(ProtocolError::CorruptFrame);
    }

    Ok((frame[1], &frame[2..len + 1]))
}

// ========================================================================
// Fixed supply power data objects
// ========================================================================

/// Dual-role power
pub const PDO_FIXED_DUAL_ROLE: u32 = 1 << 29;
/// USB communications capable
pub const PDO_FIXED_USB_COMM: u32 = 1 << 26;
/// Data role swap supported
pub const PDO_FIXED_DATA_SWAP: u32 = 1 << 25;

/// Encode a fixed supply PDO from millivolts and milliamps.
pub const fn pdo_fixed(mv: u32, ma: u32, flags: u32) -> u32 {
    flags | ((mv / 50) << 10) | (ma / 10)
}
