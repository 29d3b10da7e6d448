//! Wire protocol
//!
//! - Table-driven CRC-8 over the covered packet bytes ([`checksum`])
//! - Packet framing and validation ([`packet`])

pub mod checksum;
pub mod packet;
