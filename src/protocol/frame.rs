//! KNXnet/IP frame header, HPAI and the decoded [`Frame`].
//!
//! ## Frame Structure
//!
//! All KNXnet/IP frames follow this structure:
//!
//! ```text
//! ┌─────────────────────────────┐
//! │  Header (6 bytes)           │
//! │  - Header Length: 0x06      │
//! │  - Protocol Version: 0x10   │
//! │  - Service Type: 2 bytes    │
//! │  - Total Length: 2 bytes    │
//! ├─────────────────────────────┤
//! │  Body (variable)            │
//! │  - Service-specific data    │
//! └─────────────────────────────┘
//! ```
//!
//! Bodies are decoded by the [`ServiceRegistry`]; a [`Frame`] is the
//! validated pair of header and [`Service`].
//!
//! ## Example
//!
//! ```rust
//! use knx_tunnel::protocol::frame::FrameHeader;
//! use knx_tunnel::protocol::constants::ServiceType;
//!
//! let header = FrameHeader::new(ServiceType::ConnectRequest, 18).unwrap();
//! assert_eq!(header.encode(), [0x06, 0x10, 0x02, 0x05, 0x00, 0x18]);
//! ```

use crate::error::{KnxError, Result};
use crate::net::{IpEndpoint, Ipv4Addr};
use crate::protocol::codec::{FrameReader, FrameWriter};
use crate::protocol::constants::{ServiceType, HEADER_SIZE_10, IPV4_TCP, IPV4_UDP, KNXNETIP_VERSION_10};
use crate::protocol::registry::ServiceRegistry;
use crate::protocol::services::Service;
use alloc::vec::Vec;

/// KNXnet/IP frame header (6 bytes)
///
/// ```text
/// ┌──────────────┬──────────────┬─────────────────────┐
/// │ Header Len   │ Protocol Ver │  Service Type ID    │
/// │   (1 byte)   │   (1 byte)   │     (2 bytes)       │
/// ├──────────────┴──────────────┴─────────────────────┤
/// │           Total Length (2 bytes)                   │
/// └────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameHeader {
    /// Header length (always 0x06)
    pub header_length: u8,
    /// Protocol version (0x10 for v1.0)
    pub protocol_version: u8,
    pub service_type: ServiceType,
    /// Total length of frame (header + body)
    pub total_length: u16,
}

impl FrameHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = 6;

    /// Header for a body of `body_size` bytes.
    ///
    /// # Errors
    ///
    /// Fails if the frame would not fit the 16-bit total length.
    pub fn new(service_type: ServiceType, body_size: usize) -> Result<Self> {
        let total_length = u16::try_from(body_size + Self::SIZE)
            .map_err(|_| KnxError::payload_too_large())?;
        Ok(Self {
            header_length: HEADER_SIZE_10,
            protocol_version: KNXNETIP_VERSION_10,
            service_type,
            total_length,
        })
    }

    pub fn encode(&self) -> [u8; 6] {
        let st = self.service_type.to_u16().to_be_bytes();
        let len = self.total_length.to_be_bytes();
        [self.header_length, self.protocol_version, st[0], st[1], len[0], len[1]]
    }

    /// Parse the six header bytes without checking the total length.
    pub fn parse(r: &mut FrameReader<'_>) -> Result<Self> {
        let header_length = r.read_u8()?;
        let protocol_version = r.read_u8()?;
        let service_type_raw = r.read_u16()?;
        let total_length = r.read_u16()?;

        if header_length != HEADER_SIZE_10 {
            return Err(KnxError::invalid_header_length());
        }
        if protocol_version != KNXNETIP_VERSION_10 {
            return Err(KnxError::unsupported_version());
        }
        let service_type =
            ServiceType::from_u16(service_type_raw).ok_or_else(KnxError::unknown_service_type)?;

        Ok(Self {
            header_length,
            protocol_version,
            service_type,
            total_length,
        })
    }

    /// Decode the header of a complete datagram, which must be exactly
    /// `total_length` bytes long.
    pub fn decode(datagram: &[u8]) -> Result<Self> {
        let header = Self::parse(&mut FrameReader::new(datagram))?;
        if usize::from(header.total_length) != datagram.len() {
            return Err(KnxError::length_mismatch());
        }
        Ok(header)
    }

    /// Body length announced by the header
    pub const fn body_length(&self) -> usize {
        (self.total_length as usize).saturating_sub(Self::SIZE)
    }
}

/// A validated KNXnet/IP frame: header plus decoded service body.
///
/// `header.total_length` always equals the encoded size and
/// `header.service_type` always equals `service.service_type()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: FrameHeader,
    service: Service,
}

impl Frame {
    /// Build a frame around `service`, computing the header from the
    /// encoded body.
    pub fn new(registry: &ServiceRegistry, service: Service) -> Result<Self> {
        let mut body = FrameWriter::new();
        registry.encode_body(&service, &mut body)?;
        let header = FrameHeader::new(service.service_type(), body.len())?;
        Ok(Self { header, service })
    }

    /// Assemble from parts the registry already validated.
    pub(crate) fn from_parts(header: FrameHeader, service: Service) -> Result<Self> {
        if header.service_type != service.service_type() {
            return Err(KnxError::invalid_structure());
        }
        Ok(Self { header, service })
    }

    /// Decode a complete datagram. See [`ServiceRegistry::decode`].
    pub fn decode(registry: &ServiceRegistry, datagram: &[u8]) -> Result<Self> {
        registry.decode(datagram)
    }

    /// Decode, returning `None` instead of an error.
    pub fn try_decode(registry: &ServiceRegistry, datagram: &[u8]) -> Option<Self> {
        registry.decode(datagram).ok()
    }

    pub fn encode(&self, registry: &ServiceRegistry) -> Result<Vec<u8>> {
        let mut w = FrameWriter::with_capacity(self.size());
        w.write_bytes(&self.header.encode());
        registry.encode_body(&self.service, &mut w)?;
        if w.len() != self.size() {
            return Err(KnxError::length_mismatch());
        }
        Ok(w.into_vec())
    }

    #[inline]
    pub const fn header(&self) -> &FrameHeader {
        &self.header
    }

    #[inline]
    pub const fn service(&self) -> &Service {
        &self.service
    }

    #[inline]
    pub const fn service_type(&self) -> ServiceType {
        self.header.service_type
    }

    pub fn into_service(self) -> Service {
        self.service
    }

    /// Encoded size in bytes
    #[inline]
    pub const fn size(&self) -> usize {
        self.header.total_length as usize
    }
}

/// Host Protocol Address Information (HPAI)
///
/// ```text
/// ┌──────────────┬──────────────┬─────────────────────┐
/// │ Structure Len│ Host Protocol│   IP Address        │
/// │   (1 byte)   │   (1 byte)   │   (4 bytes IPv4)    │
/// ├──────────────┴──────────────┴─────────────────────┤
/// │                Port (2 bytes)                      │
/// └────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Hpai {
    /// Host protocol code (`IPV4_UDP` or `IPV4_TCP`)
    pub host_protocol: u8,
    pub endpoint: IpEndpoint,
}

impl Hpai {
    /// Size of HPAI structure for IPv4
    pub const SIZE: usize = 8;

    /// `0.0.0.0:0` over UDP: the gateway answers to the datagram source
    pub const NAT: Self = Self::udp(IpEndpoint::UNSPECIFIED);

    pub const fn udp(endpoint: IpEndpoint) -> Self {
        Self {
            host_protocol: IPV4_UDP,
            endpoint,
        }
    }

    pub const fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self::udp(IpEndpoint::new(ip, port))
    }

    pub fn is_nat(&self) -> bool {
        self.endpoint.is_unspecified()
    }

    pub fn decode(r: &mut FrameReader<'_>) -> Result<Self> {
        let structure_length = r.read_u8()?;
        if usize::from(structure_length) != Self::SIZE {
            return Err(KnxError::length_mismatch());
        }
        let host_protocol = r.read_u8()?;
        if host_protocol != IPV4_UDP && host_protocol != IPV4_TCP {
            return Err(KnxError::invalid_value());
        }
        let ip = Ipv4Addr::from(r.read_array::<4>()?);
        let port = r.read_u16()?;
        Ok(Self {
            host_protocol,
            endpoint: IpEndpoint::new(ip, port),
        })
    }

    pub fn encode(&self, w: &mut FrameWriter) {
        w.write_u8(Self::SIZE as u8);
        w.write_u8(self.host_protocol);
        w.write_bytes(&self.endpoint.ip.octets());
        w.write_u16(self.endpoint.port);
    }
}

impl From<IpEndpoint> for Hpai {
    fn from(endpoint: IpEndpoint) -> Self {
        Self::udp(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode() {
        let header = FrameHeader::new(ServiceType::SearchRequest, 8).unwrap();
        assert_eq!(header.encode(), [0x06, 0x10, 0x02, 0x01, 0x00, 0x0E]);
        assert_eq!(header.body_length(), 8);
    }

    #[test]
    fn test_header_parse() {
        let data = [0x06, 0x10, 0x02, 0x01, 0x00, 0x0E];
        let header = FrameHeader::parse(&mut FrameReader::new(&data)).unwrap();
        assert_eq!(header.service_type, ServiceType::SearchRequest);
        assert_eq!(header.total_length, 14);
    }

    #[test]
    fn test_header_decode_failures() {
        let mut body = [0u8; 8];
        body[..6].copy_from_slice(&[0x07, 0x10, 0x02, 0x01, 0x00, 0x08]);
        let err = FrameHeader::decode(&body).unwrap_err();
        assert!(matches!(&err, KnxError::Protocol(e) if e.is_invalid_header_length()));

        body[..6].copy_from_slice(&[0x06, 0x20, 0x02, 0x01, 0x00, 0x08]);
        let err = FrameHeader::decode(&body).unwrap_err();
        assert!(matches!(&err, KnxError::Protocol(e) if e.is_unsupported_version()));

        body[..6].copy_from_slice(&[0x06, 0x10, 0x12, 0x34, 0x00, 0x08]);
        let err = FrameHeader::decode(&body).unwrap_err();
        assert!(matches!(&err, KnxError::Protocol(e) if e.is_unknown_service_type()));

        // declares 9 bytes, datagram has 8
        body[..6].copy_from_slice(&[0x06, 0x10, 0x02, 0x01, 0x00, 0x09]);
        let err = FrameHeader::decode(&body).unwrap_err();
        assert!(matches!(&err, KnxError::Protocol(e) if e.is_length_mismatch()));

        // shorter than a header
        assert!(FrameHeader::decode(&[0x06, 0x10]).unwrap_err().is_format_error());
    }

    #[test]
    fn test_header_too_large() {
        assert!(FrameHeader::new(ServiceType::TunnellingRequest, 65_530).is_err());
    }

    #[test]
    fn test_hpai_wire_format() {
        let hpai = Hpai::new(Ipv4Addr::new(192, 168, 1, 100), 3671);
        let mut w = FrameWriter::new();
        hpai.encode(&mut w);
        assert_eq!(w.as_slice(), &[0x08, 0x01, 192, 168, 1, 100, 0x0E, 0x57]);
        assert_eq!(Hpai::decode(&mut FrameReader::new(w.as_slice())).unwrap(), hpai);
    }

    #[test]
    fn test_hpai_rejects_bad_length_and_protocol() {
        let bad_len = [0x07, 0x01, 192, 168, 1, 100, 0x0E, 0x57];
        assert!(Hpai::decode(&mut FrameReader::new(&bad_len)).is_err());
        let bad_proto = [0x08, 0x03, 192, 168, 1, 100, 0x0E, 0x57];
        assert!(Hpai::decode(&mut FrameReader::new(&bad_proto)).is_err());
    }

    #[test]
    fn test_hpai_nat() {
        assert!(Hpai::NAT.is_nat());
        let mut w = FrameWriter::new();
        Hpai::NAT.encode(&mut w);
        assert_eq!(w.as_slice(), &[0x08, 0x01, 0, 0, 0, 0, 0, 0]);
    }
}
