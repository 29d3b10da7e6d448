//! Wire packet framing
//!
//! ## Layout
//!
//! ```text
//! raw:        [0x53][len][node][ctr][ch0 lo][ch0 hi] ... [chN hi][crc]
//! threshold:  [0x53][ 2 ][node][ctr][mask][crc]
//! ```
//!
//! `len` counts the counter byte plus the channel data (9 for four raw
//! channels, 2 for the bitmask), so a packet is always `len + 4` bytes long.
//! Multi-byte values are little-endian. The checksum is computed last, over
//! bytes `[1 ..= len+2]`.

use super::checksum;
use crate::processing::frame::{SampleFrame, ThresholdFrame};
use crate::CHANNEL_COUNT;
use thiserror::Error;

/// First byte of every packet
pub const START_MARKER: u8 = 0x53;

/// Bytes framing the payload: start marker, length, node id, checksum
pub const FRAME_OVERHEAD: usize = 4;

/// Length field of a threshold packet
pub const THRESHOLD_PAYLOAD_LEN: u8 = 2;

/// Length field of a raw packet
pub const RAW_PAYLOAD_LEN: u8 = (1 + 2 * CHANNEL_COUNT) as u8;

/// Errors raised while validating a received packet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Packet too short: {0} bytes")]
    Truncated(usize),

    #[error("Bad start marker: 0x{0:02X}")]
    BadStartMarker(u8),

    #[error("Length mismatch: header says {declared} payload bytes, packet is {actual} bytes")]
    LengthMismatch { declared: u8, actual: usize },

    #[error("Unknown payload length: {0}")]
    UnknownPayload(u8),

    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

/// A framed packet ready for the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirePacket {
    bytes: Vec<u8>,
}

/// Payload recovered from a validated packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Raw([u16; CHANNEL_COUNT]),
    Threshold(u8),
}

/// Header fields and payload of a validated packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedPacket {
    pub node_id: u8,
    pub counter: u8,
    pub payload: Payload,
}

impl WirePacket {
    /// Assemble header, payload and checksum
    fn assemble(node_id: u8, counter: u8, data: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(data.len() + FRAME_OVERHEAD + 1);
        bytes.push(START_MARKER);
        bytes.push((data.len() + 1) as u8);
        bytes.push(node_id);
        bytes.push(counter);
        bytes.extend_from_slice(data);
        bytes.push(0);
        let crc = checksum::checksum(&bytes);
        if let Some(last) = bytes.last_mut() {
            *last = crc;
        }
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Trailing checksum byte
    pub fn checksum(&self) -> u8 {
        self.bytes.last().copied().unwrap_or(0)
    }

    /// Validate a received buffer and decode it
    ///
    /// Checks the start marker, the declared length against the buffer size
    /// and the checksum, in that order.
    pub fn parse(buf: &[u8]) -> Result<DecodedPacket, PacketError> {
        if buf.len() < FRAME_OVERHEAD + 2 {
            return Err(PacketError::Truncated(buf.len()));
        }
        if buf[0] != START_MARKER {
            return Err(PacketError::BadStartMarker(buf[0]));
        }
        let declared = buf[1];
        if declared as usize + FRAME_OVERHEAD != buf.len() {
            return Err(PacketError::LengthMismatch {
                declared,
                actual: buf.len(),
            });
        }
        let expected = checksum::checksum(buf);
        let actual = buf[buf.len() - 1];
        if expected != actual {
            return Err(PacketError::ChecksumMismatch { expected, actual });
        }

        let node_id = buf[2];
        let counter = buf[3];
        let data = &buf[4..buf.len() - 1];
        let payload = match declared {
            THRESHOLD_PAYLOAD_LEN => Payload::Threshold(data[0]),
            RAW_PAYLOAD_LEN => {
                let mut values = [0u16; CHANNEL_COUNT];
                for (value, chunk) in values.iter_mut().zip(data.chunks_exact(2)) {
                    *value = u16::from_le_bytes([chunk[0], chunk[1]]);
                }
                Payload::Raw(values)
            }
            other => return Err(PacketError::UnknownPayload(other)),
        };

        Ok(DecodedPacket {
            node_id,
            counter,
            payload,
        })
    }
}

/// Frame a raw-mode sample: every channel as a little-endian word
pub fn frame_raw(sample: &SampleFrame) -> WirePacket {
    let mut data = [0u8; 2 * CHANNEL_COUNT];
    for (chunk, value) in data.chunks_exact_mut(2).zip(sample.data.iter()) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
    WirePacket::assemble(sample.node_id, sample.counter as u8, &data)
}

/// Frame a thresholded sample: a single bitmask byte
pub fn frame_threshold(frame: &ThresholdFrame) -> WirePacket {
    WirePacket::assemble(frame.node_id, frame.counter, &[frame.bitmask])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SampleFrame {
        SampleFrame {
            node_id: 10,
            counter: 0x0102,
            data: [0x0FFF, 0x0800, 0x0001, 0x0000],
        }
    }

    #[test]
    fn test_raw_layout() {
        let packet = frame_raw(&sample());
        let bytes = packet.as_bytes();
        assert_eq!(bytes.len(), 13);
        assert_eq!(bytes[0], START_MARKER);
        assert_eq!(bytes[1], 9);
        assert_eq!(bytes[2], 10);
        assert_eq!(bytes[3], 0x02, "counter low byte only");
        assert_eq!(&bytes[4..12], &[0xFF, 0x0F, 0x00, 0x08, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(bytes[12], checksum::checksum(bytes));
    }

    #[test]
    fn test_threshold_layout() {
        let frame = ThresholdFrame {
            node_id: 5,
            counter: 7,
            bitmask: 0x0A,
        };
        let packet = frame_threshold(&frame);
        assert_eq!(&packet.as_bytes()[..5], &[0x53, 0x02, 0x05, 0x07, 0x0A]);
        assert_eq!(packet.len(), 6);
        assert!(checksum::verify(packet.as_bytes()));
    }

    #[test]
    fn test_parse_raw() {
        let packet = frame_raw(&sample());
        let decoded = WirePacket::parse(packet.as_bytes()).unwrap();
        assert_eq!(decoded.node_id, 10);
        assert_eq!(decoded.counter, 0x02);
        assert_eq!(decoded.payload, Payload::Raw([0x0FFF, 0x0800, 0x0001, 0x0000]));
    }

    #[test]
    fn test_parse_rejects_bad_marker() {
        let mut bytes = frame_raw(&sample()).into_bytes();
        bytes[0] = 0x00;
        assert_eq!(
            WirePacket::parse(&bytes),
            Err(PacketError::BadStartMarker(0x00))
        );
    }

    #[test]
    fn test_parse_rejects_truncated() {
        assert_eq!(
            WirePacket::parse(&[0x53, 0x02, 0x05]),
            Err(PacketError::Truncated(3))
        );
    }

    #[test]
    fn test_parse_rejects_length_mismatch() {
        let mut bytes = frame_raw(&sample()).into_bytes();
        bytes.pop();
        assert!(matches!(
            WirePacket::parse(&bytes),
            Err(PacketError::LengthMismatch { declared: 9, actual: 12 })
        ));
    }

    #[test]
    fn test_parse_rejects_corruption() {
        let mut bytes = frame_raw(&sample()).into_bytes();
        bytes[5] ^= 0x40;
        assert!(matches!(
            WirePacket::parse(&bytes),
            Err(PacketError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_payload() {
        let mut bytes = vec![0x53, 0x03, 0x01, 0x02, 0x03, 0x04, 0x00];
        let crc = checksum::checksum(&bytes);
        *bytes.last_mut().unwrap() = crc;
        assert_eq!(WirePacket::parse(&bytes), Err(PacketError::UnknownPayload(3)));
    }
}
