//! CRC-8 packet checksum
//!
//! Covers bytes `[1 ..= len-2]` of a buffer: the start marker and the trailing
//! checksum slot are excluded, so the same call works when framing (slot still
//! zero) and when validating a received packet.
//!
//! Polynomial 0x07, init 0x00, no reflection, no final xor (CRC-8/SMBUS),
//! evaluated through the `crc` crate's byte-wise lookup table.

use crc::{Crc, CRC_8_SMBUS};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Bytes of `buf` the checksum is computed over
fn covered(buf: &[u8]) -> &[u8] {
    if buf.len() < 3 {
        &[]
    } else {
        &buf[1..buf.len() - 1]
    }
}

/// Checksum of a packet buffer (start marker and last byte excluded)
///
/// Buffers shorter than three bytes have nothing to cover and yield `0x00`.
///
/// # Example
/// ```
/// use sensornode_core::protocol::checksum::checksum;
///
/// // Covered bytes are "123456789": the CRC-8/SMBUS check value.
/// assert_eq!(checksum(b"S123456789\0"), 0xF4);
/// ```
pub fn checksum(buf: &[u8]) -> u8 {
    CRC8.checksum(covered(buf))
}

/// True when the last byte of `buf` matches the checksum of the covered range
pub fn verify(buf: &[u8]) -> bool {
    match buf.last() {
        Some(&stored) if buf.len() >= 3 => checksum(buf) == stored,
        _ => false,
    }
}
