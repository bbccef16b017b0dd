//! Supported-PID bitmap resolution.
//!
//! A `xx00`, `xx20`, ... request answers with a 32-bit mask. Bit 1 (the most
//! significant) stands for PID `offset + 1`, bit 32 for `offset + 0x20`.

use crate::error::ObdError;

/// Offsets of the chained mode 01/02 bitmap requests
pub const BITMAP_OFFSETS: [u8; 7] = [0x00, 0x20, 0x40, 0x60, 0x80, 0xA0, 0xC0];

const BITMAP_DIGITS: usize = 8;

/// PIDs flagged as supported by a bitmap payload.
///
/// Only the first eight hex digits are read, so every returned PID lies in
/// `offset + 1 ..= offset + 0x20`. The result is in ascending order.
pub fn resolve_pid_data(bitmap: &str, offset: u8) -> Result<Vec<u8>, ObdError> {
    let digits = bitmap.trim();
    let digits = digits.get(..BITMAP_DIGITS.min(digits.len())).unwrap_or("");
    if digits.is_empty() {
        return Err(ObdError::Decode("empty supported-PID bitmap".to_string()));
    }
    let mask = u32::from_str_radix(digits, 16)
        .map_err(|e| ObdError::Decode(format!("bitmap {:?}: {}", digits, e)))?;

    let width = digits.len() as u32 * 4;
    let pids = (1..=width)
        .filter(|bit| mask & (1 << (width - bit)) != 0)
        .map(|bit| u16::from(offset) + bit as u16)
        .filter(|pid| *pid <= 0xFF)
        .map(|pid| pid as u8)
        .collect();
    Ok(pids)
}

/// Whether `pid` is one of the bitmap request PIDs
pub fn is_bitmap_pid(pid: u8) -> bool {
    BITMAP_OFFSETS.contains(&pid)
}
