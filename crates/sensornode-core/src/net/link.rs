//! Datagram links
//!
//! The transmit task only needs a connectionless "send these bytes to the
//! configured remote" primitive. [`UdpLink`] provides it over a bound UDP
//! socket with an OS-level write timeout.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Payload sent to keep an idle association open
pub const KEEPALIVE_PAYLOAD: [u8; 4] = [0; 4];

/// Upper bound on a single blocking send
pub const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Connectionless send to a single configured remote
pub trait DatagramLink: Send {
    /// Send one datagram, returning the number of bytes written
    fn send(&mut self, payload: &[u8]) -> io::Result<usize>;

    /// Human-readable destination, for logs
    fn describe(&self) -> String;
}

/// UDP socket bound locally and aimed at one remote
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
    remote: SocketAddr,
}

impl UdpLink {
    /// Bind `local` and target `remote`
    ///
    /// # Arguments
    /// * `local` - Local address to bind, e.g. `0.0.0.0:16500`
    /// * `remote` - Primary remote that receives every packet
    pub fn bind(local: SocketAddr, remote: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        socket.set_write_timeout(Some(SEND_TIMEOUT))?;
        tracing::info!(local = %socket.local_addr()?, remote = %remote, "UDP link bound");
        Ok(Self { socket, remote })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }
}

impl DatagramLink for UdpLink {
    fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, self.remote)
    }

    fn describe(&self) -> String {
        format!("udp://{}", self.remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_link_delivers() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let remote = receiver.local_addr().unwrap();

        let mut link = UdpLink::bind("127.0.0.1:0".parse().unwrap(), remote).unwrap();
        assert_eq!(link.send(&[0x53, 0x02, 0x05, 0x07, 0x0A, 0x00]).unwrap(), 6);

        let mut buf = [0u8; 64];
        let (len, from) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[0x53, 0x02, 0x05, 0x07, 0x0A, 0x00]);
        assert_eq!(from, link.local_addr().unwrap());
        assert_eq!(link.describe(), format!("udp://{}", remote));
    }

    #[test]
    fn test_keepalive_payload() {
        assert_eq!(KEEPALIVE_PAYLOAD.len(), 4);
        assert!(KEEPALIVE_PAYLOAD.iter().all(|&b| b == 0));
    }
}
