//! Single-byte bitfield extraction
//!
//! Bit 0 is the least significant bit of a byte. Fields never cross a byte
//! boundary; the extracted value is masked to exactly `bit_width` bits and is
//! always unsigned.

use crate::types::{DecoderError, Result};

/// Number of bits in one payload byte
pub const BITS_PER_BYTE: u8 = 8;

/// Check that a field of `bit_width` bits starting at `bit_offset` fits in one byte
pub fn validate_layout(bit_offset: u8, bit_width: u8) -> Result<()> {
    if bit_width == 0 {
        return Err(DecoderError::SchemaError(
            "bit width must be at least 1".to_string(),
        ));
    }
    if u16::from(bit_offset) + u16::from(bit_width) > u16::from(BITS_PER_BYTE) {
        return Err(DecoderError::SchemaError(format!(
            "bit offset {} + width {} exceeds one byte",
            bit_offset, bit_width
        )));
    }
    Ok(())
}

/// Mask covering the lowest `bit_width` bits
fn mask(bit_width: u8) -> u8 {
    ((1u16 << bit_width) - 1) as u8
}

/// Extract an unsigned field from one byte of the payload
///
/// # Errors
/// * `SchemaError` if `bit_offset + bit_width > 8` or the width is zero
/// * `IndexError` if `byte_index` is outside the payload
pub fn extract(payload: &[u8], byte_index: usize, bit_offset: u8, bit_width: u8) -> Result<u64> {
    validate_layout(bit_offset, bit_width)?;

    let byte = payload.get(byte_index).copied().ok_or(DecoderError::IndexError {
        index: byte_index,
        len: payload.len(),
    })?;

    Ok(u64::from((byte >> bit_offset) & mask(bit_width)))
}

/// Extract a single bit as a boolean
pub fn extract_bit(payload: &[u8], byte_index: usize, bit_index: u8) -> Result<bool> {
    Ok(extract(payload, byte_index, bit_index, 1)? != 0)
}

/// Largest raw value a field of `bit_width` bits can hold
pub fn max_value(bit_width: u8) -> u64 {
    if bit_width >= BITS_PER_BYTE {
        u64::from(u8::MAX)
    } else {
        (1u64 << bit_width) - 1
    }
}
