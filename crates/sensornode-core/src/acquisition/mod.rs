//! Sample acquisition
//!
//! This module contains:
//! - Sliding-window median filter ([`filter`])
//! - Alarm timer peripheral abstraction and its host simulation ([`timer`])
//! - Analog input abstraction and a simulated ADC ([`adc`])
//! - The timer interrupt handler ([`isr`])
//! - Deferred work posted from interrupt context ([`deferred`])

pub mod adc;
pub mod deferred;
pub mod filter;
pub mod isr;
pub mod timer;
