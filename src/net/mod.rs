//! Network types and the datagram transport seam.
//!
//! The stack never opens sockets itself. Callers hand a [`transport::AsyncTransport`]
//! to the connection; tests use [`mock_transport::MockTransport`].

pub mod mock_transport;
pub mod transport;

use crate::error::{KnxError, Result};
use core::fmt;
pub use core::net::Ipv4Addr;

/// IPv4 address plus UDP port.
///
/// # Examples
///
/// ```
/// use knx_tunnel::net::{IpEndpoint, Ipv4Addr};
///
/// let gateway: IpEndpoint = "192.168.1.10:3671".parse().unwrap();
/// assert_eq!(gateway, IpEndpoint::new(Ipv4Addr::new(192, 168, 1, 10), 3671));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IpEndpoint {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl IpEndpoint {
    /// `0.0.0.0:0`, asks the gateway to answer to the datagram's source (NAT mode)
    pub const UNSPECIFIED: Self = Self::new(Ipv4Addr::UNSPECIFIED, 0);

    pub const fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn is_unspecified(&self) -> bool {
        self.ip.is_unspecified() && self.port == 0
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for IpEndpoint {
    fn format(&self, f: defmt::Formatter<'_>) {
        let [a, b, c, d] = self.ip.octets();
        defmt::write!(f, "{}.{}.{}.{}:{}", a, b, c, d, self.port);
    }
}

impl fmt::Display for IpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<(Ipv4Addr, u16)> for IpEndpoint {
    fn from((ip, port): (Ipv4Addr, u16)) -> Self {
        Self { ip, port }
    }
}

impl From<core::net::SocketAddrV4> for IpEndpoint {
    fn from(addr: core::net::SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl From<IpEndpoint> for core::net::SocketAddrV4 {
    fn from(ep: IpEndpoint) -> Self {
        core::net::SocketAddrV4::new(ep.ip, ep.port)
    }
}

impl core::str::FromStr for IpEndpoint {
    type Err = KnxError;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<core::net::SocketAddrV4>()
            .map(Self::from)
            .map_err(|_| KnxError::invalid_ip_address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse_and_display() {
        let ep: IpEndpoint = "192.168.2.120:57846".parse().unwrap();
        assert_eq!(ep.ip.octets(), [192, 168, 2, 120]);
        assert_eq!(ep.port, 57846);
        assert_eq!(format!("{ep}"), "192.168.2.120:57846");
        assert!("192.168.2.120".parse::<IpEndpoint>().is_err());
    }

    #[test]
    fn test_unspecified() {
        assert!(IpEndpoint::UNSPECIFIED.is_unspecified());
        assert!(!IpEndpoint::new(Ipv4Addr::UNSPECIFIED, 3671).is_unspecified());
    }
}
