//! Sample processing
//!
//! - Frame types exchanged between the stages ([`frame`])
//! - Raw / calibrating / thresholding state machine ([`calibration`])

pub mod calibration;
pub mod frame;
