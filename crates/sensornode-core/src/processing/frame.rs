//! Frames passed between the interrupt handler, the calibration engine and
//! the framer

use crate::protocol::packet::{self, WirePacket};
use crate::CHANNEL_COUNT;

/// One filtered multi-channel reading
///
/// Built by the interrupt handler once per tick and moved by value through
/// the sample queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleFrame {
    /// Node identifier at the time of sampling
    pub node_id: u8,
    /// Free-running tick counter (wraps)
    pub counter: u32,
    /// Median-filtered value per channel
    pub data: [u16; CHANNEL_COUNT],
}

/// Thresholded reading: one bit per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdFrame {
    pub node_id: u8,
    /// Low byte of the sample counter
    pub counter: u8,
    /// Bit `c` set when channel `c` was above its threshold
    pub bitmask: u8,
}

impl ThresholdFrame {
    pub fn new(sample: &SampleFrame, bitmask: u8) -> Self {
        Self {
            node_id: sample.node_id,
            counter: sample.counter as u8,
            bitmask,
        }
    }
}

/// What the calibration engine emits for one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFrame {
    /// Raw-mode passthrough of the filtered sample
    Raw(SampleFrame),
    /// Thresholded bitmask
    Threshold(ThresholdFrame),
}

impl OutputFrame {
    /// Frame this output for the wire
    pub fn to_packet(&self) -> WirePacket {
        match self {
            OutputFrame::Raw(sample) => packet::frame_raw(sample),
            OutputFrame::Threshold(frame) => packet::frame_threshold(frame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_frame_truncates_counter() {
        let sample = SampleFrame {
            node_id: 3,
            counter: 0x1234_5678,
            data: [0; CHANNEL_COUNT],
        };
        let frame = ThresholdFrame::new(&sample, 0b0101);
        assert_eq!(frame.counter, 0x78);
        assert_eq!(frame.node_id, 3);
        assert_eq!(frame.bitmask, 0b0101);
    }

    #[test]
    fn test_output_frame_packet_kind() {
        let sample = SampleFrame {
            node_id: 1,
            counter: 2,
            data: [10, 20, 30, 40],
        };
        let raw = OutputFrame::Raw(sample).to_packet();
        let thresh = OutputFrame::Threshold(ThresholdFrame::new(&sample, 1)).to_packet();
        assert_eq!(raw.len(), 4 + 2 * CHANNEL_COUNT + 1);
        assert_eq!(thresh.len(), 6);
    }
}
