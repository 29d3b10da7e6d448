//! Network transmission
//!
//! - Datagram link abstraction and the UDP implementation ([`link`])
//! - Transmit task with idle keep-alive ([`transmit`])

pub mod link;
pub mod transmit;
