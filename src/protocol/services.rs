//! KNXnet/IP service bodies.
//!
//! One type per service; [`Service`] is the closed sum of all of them plus
//! a [`Service::Raw`] fallback for recognized services without a dedicated
//! codec. Every type implements [`ServiceBody`], which is how the
//! [`ServiceRegistry`] encodes and decodes it.
//!
//! ## Protocol Flow
//!
//! ```text
//! Client                          Gateway
//!   |                                |
//!   |------- CONNECT_REQUEST ------->|
//!   |<------ CONNECT_RESPONSE -------|
//!   |                                |
//!   |------ TUNNELING_REQUEST ------>|
//!   |<------ TUNNELING_ACK ----------|
//!   |                                |
//!   |--- CONNECTIONSTATE_REQUEST --->|  (every 60s)
//!   |<-- CONNECTIONSTATE_RESPONSE ---|
//!   |                                |
//!   |------ DISCONNECT_REQUEST ----->|
//!   |<----- DISCONNECT_RESPONSE -----|
//! ```

use crate::addressing::IndividualAddress;
use crate::error::{KnxError, Result};
use crate::objserver::ObjectServerRequest;
use crate::protocol::cemi::CemiMessage;
use crate::protocol::codec::{FrameReader, FrameWriter};
use crate::protocol::constants::{
    ConnectionType, KnxLayer, ServiceType, CONNECTION_HEADER_SIZE, E_NO_ERROR,
};
use crate::protocol::dib::{Dib, SearchParameter};
use crate::protocol::frame::Hpai;
use crate::protocol::registry::{ServiceBody, ServiceRegistry};
use alloc::vec::Vec;

/// Generates the `Service` conversions of a [`ServiceBody`] impl.
macro_rules! service_variant {
    ($variant:ident) => {
        fn from_service(service: &Service) -> Option<&Self> {
            match service {
                Service::$variant(body) => Some(body),
                _ => None,
            }
        }

        fn into_service(self) -> Service {
            Service::$variant(self)
        }
    };
}

// =============================================================================
// Shared structures
// =============================================================================

/// Connection header of every channel-scoped request and ack.
///
/// ```text
/// ┌──────────┬────────────┬──────────────┬────────────────────┐
/// │ size (4) │ channel id │ sequence     │ reserved / status  │
/// └──────────┴────────────┴──────────────┴────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionHeader {
    pub channel_id: u8,
    pub sequence_counter: u8,
    /// Reserved (0) in requests, status code in acks
    pub status: u8,
}

impl ConnectionHeader {
    pub const SIZE: usize = CONNECTION_HEADER_SIZE as usize;

    pub const fn new(channel_id: u8, sequence_counter: u8) -> Self {
        Self {
            channel_id,
            sequence_counter,
            status: E_NO_ERROR,
        }
    }

    pub const fn with_status(mut self, status: u8) -> Self {
        self.status = status;
        self
    }

    pub fn decode(r: &mut FrameReader<'_>) -> Result<Self> {
        if r.read_u8()? != CONNECTION_HEADER_SIZE {
            return Err(KnxError::length_mismatch());
        }
        Ok(Self {
            channel_id: r.read_u8()?,
            sequence_counter: r.read_u8()?,
            status: r.read_u8()?,
        })
    }

    pub fn encode(&self, w: &mut FrameWriter) {
        w.write_u8(CONNECTION_HEADER_SIZE);
        w.write_u8(self.channel_id);
        w.write_u8(self.sequence_counter);
        w.write_u8(self.status);
    }
}

/// Connection Request Information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionRequestInfo {
    Tunnel { layer: KnxLayer },
    DeviceManagement,
}

impl ConnectionRequestInfo {
    /// Tunnel on the link layer, the usual client connection
    pub const fn tunnel_link_layer() -> Self {
        Self::Tunnel {
            layer: KnxLayer::LinkLayer,
        }
    }

    pub const fn connection_type(&self) -> ConnectionType {
        match self {
            Self::Tunnel { .. } => ConnectionType::Tunnel,
            Self::DeviceManagement => ConnectionType::DeviceManagement,
        }
    }

    pub fn decode(r: &mut FrameReader<'_>) -> Result<Self> {
        let length = r.read_u8()?;
        let connection_type = r.read_u8()?;
        match (ConnectionType::from_u8(connection_type), length) {
            (Some(ConnectionType::Tunnel), 4) => {
                let layer = KnxLayer::from_u8(r.read_u8()?).ok_or_else(KnxError::invalid_value)?;
                r.read_u8()?; // reserved
                Ok(Self::Tunnel { layer })
            }
            (Some(ConnectionType::DeviceManagement), 2) => Ok(Self::DeviceManagement),
            (Some(ConnectionType::Tunnel | ConnectionType::DeviceManagement), _) => {
                Err(KnxError::length_mismatch())
            }
            _ => Err(KnxError::invalid_value()),
        }
    }

    pub fn encode(&self, w: &mut FrameWriter) {
        match self {
            Self::Tunnel { layer } => {
                w.write_bytes(&[4, ConnectionType::Tunnel as u8, *layer as u8, 0x00]);
            }
            Self::DeviceManagement => {
                w.write_bytes(&[2, ConnectionType::DeviceManagement as u8]);
            }
        }
    }
}

/// Connection Response Data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionResponseData {
    /// Tunnel connection with the individual address assigned to the client
    Tunnel { address: IndividualAddress },
    DeviceManagement,
}

impl ConnectionResponseData {
    pub fn decode(r: &mut FrameReader<'_>) -> Result<Self> {
        let length = r.read_u8()?;
        let connection_type = r.read_u8()?;
        match (ConnectionType::from_u8(connection_type), length) {
            (Some(ConnectionType::Tunnel), 4) => Ok(Self::Tunnel {
                address: IndividualAddress::decode(r)?,
            }),
            (Some(ConnectionType::DeviceManagement), 2) => Ok(Self::DeviceManagement),
            (Some(ConnectionType::Tunnel | ConnectionType::DeviceManagement), _) => {
                Err(KnxError::length_mismatch())
            }
            _ => Err(KnxError::invalid_value()),
        }
    }

    pub fn encode(&self, w: &mut FrameWriter) {
        match self {
            Self::Tunnel { address } => {
                w.write_u8(4);
                w.write_u8(ConnectionType::Tunnel as u8);
                address.encode(w);
            }
            Self::DeviceManagement => {
                w.write_bytes(&[2, ConnectionType::DeviceManagement as u8]);
            }
        }
    }
}

// =============================================================================
// Discovery and description
// =============================================================================

/// `SEARCH_REQUEST` (0x0201)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchRequest {
    pub discovery_endpoint: Hpai,
}

impl ServiceBody for SearchRequest {
    const SERVICE_TYPE: ServiceType = ServiceType::SearchRequest;

    fn decode_body(r: &mut FrameReader<'_>, _: &ServiceRegistry) -> Result<Self> {
        Ok(Self {
            discovery_endpoint: Hpai::decode(r)?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, _: &ServiceRegistry) -> Result<()> {
        self.discovery_endpoint.encode(w);
        Ok(())
    }

    service_variant!(SearchRequest);
}

/// `SEARCH_REQUEST_EXTENDED` (0x020B)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequestExtended {
    pub discovery_endpoint: Hpai,
    pub parameters: Vec<SearchParameter>,
}

impl ServiceBody for SearchRequestExtended {
    const SERVICE_TYPE: ServiceType = ServiceType::SearchRequestExtended;

    fn decode_body(r: &mut FrameReader<'_>, _: &ServiceRegistry) -> Result<Self> {
        let discovery_endpoint = Hpai::decode(r)?;
        let mut parameters = Vec::new();
        while r.remaining() > 0 {
            parameters.push(SearchParameter::decode(r)?);
        }
        Ok(Self {
            discovery_endpoint,
            parameters,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, _: &ServiceRegistry) -> Result<()> {
        self.discovery_endpoint.encode(w);
        self.parameters.iter().try_for_each(|p| p.encode(w))
    }

    service_variant!(SearchRequestExtended);
}

fn encode_dibs(dibs: &[Dib], w: &mut FrameWriter) -> Result<()> {
    dibs.iter().try_for_each(|d| d.encode(w))
}

/// `SEARCH_RESPONSE` (0x0202)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResponse {
    pub control_endpoint: Hpai,
    pub dibs: Vec<Dib>,
}

impl ServiceBody for SearchResponse {
    const SERVICE_TYPE: ServiceType = ServiceType::SearchResponse;

    fn decode_body(r: &mut FrameReader<'_>, _: &ServiceRegistry) -> Result<Self> {
        Ok(Self {
            control_endpoint: Hpai::decode(r)?,
            dibs: Dib::decode_all(r)?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, _: &ServiceRegistry) -> Result<()> {
        self.control_endpoint.encode(w);
        encode_dibs(&self.dibs, w)
    }

    service_variant!(SearchResponse);
}

/// `SEARCH_RESPONSE_EXTENDED` (0x020C)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResponseExtended {
    pub control_endpoint: Hpai,
    pub dibs: Vec<Dib>,
}

impl ServiceBody for SearchResponseExtended {
    const SERVICE_TYPE: ServiceType = ServiceType::SearchResponseExtended;

    fn decode_body(r: &mut FrameReader<'_>, _: &ServiceRegistry) -> Result<Self> {
        Ok(Self {
            control_endpoint: Hpai::decode(r)?,
            dibs: Dib::decode_all(r)?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, _: &ServiceRegistry) -> Result<()> {
        self.control_endpoint.encode(w);
        encode_dibs(&self.dibs, w)
    }

    service_variant!(SearchResponseExtended);
}

/// `DESCRIPTION_REQUEST` (0x0203)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptionRequest {
    pub control_endpoint: Hpai,
}

impl ServiceBody for DescriptionRequest {
    const SERVICE_TYPE: ServiceType = ServiceType::DescriptionRequest;

    fn decode_body(r: &mut FrameReader<'_>, _: &ServiceRegistry) -> Result<Self> {
        Ok(Self {
            control_endpoint: Hpai::decode(r)?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, _: &ServiceRegistry) -> Result<()> {
        self.control_endpoint.encode(w);
        Ok(())
    }

    service_variant!(DescriptionRequest);
}

/// `DESCRIPTION_RESPONSE` (0x0204)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionResponse {
    pub dibs: Vec<Dib>,
}

impl ServiceBody for DescriptionResponse {
    const SERVICE_TYPE: ServiceType = ServiceType::DescriptionResponse;

    fn decode_body(r: &mut FrameReader<'_>, _: &ServiceRegistry) -> Result<Self> {
        Ok(Self {
            dibs: Dib::decode_all(r)?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, _: &ServiceRegistry) -> Result<()> {
        encode_dibs(&self.dibs, w)
    }

    service_variant!(DescriptionResponse);
}

// =============================================================================
// Connection management
// =============================================================================

/// `CONNECT_REQUEST` (0x0205)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Control endpoint (for connection management)
    pub control_endpoint: Hpai,
    /// Data endpoint (for tunneling data)
    pub data_endpoint: Hpai,
    pub cri: ConnectionRequestInfo,
}

impl ConnectRequest {
    /// Tunnel link-layer request with the given endpoints
    pub const fn new(control_endpoint: Hpai, data_endpoint: Hpai) -> Self {
        Self {
            control_endpoint,
            data_endpoint,
            cri: ConnectionRequestInfo::tunnel_link_layer(),
        }
    }
}

impl ServiceBody for ConnectRequest {
    const SERVICE_TYPE: ServiceType = ServiceType::ConnectRequest;

    fn decode_body(r: &mut FrameReader<'_>, _: &ServiceRegistry) -> Result<Self> {
        Ok(Self {
            control_endpoint: Hpai::decode(r)?,
            data_endpoint: Hpai::decode(r)?,
            cri: ConnectionRequestInfo::decode(r)?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, _: &ServiceRegistry) -> Result<()> {
        self.control_endpoint.encode(w);
        self.data_endpoint.encode(w);
        self.cri.encode(w);
        Ok(())
    }

    service_variant!(ConnectRequest);
}

/// `CONNECT_RESPONSE` (0x0206)
///
/// Error responses may end after the status byte, so the data endpoint and
/// CRD are optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectResponse {
    pub channel_id: u8,
    pub status: u8,
    pub data_endpoint: Option<Hpai>,
    pub crd: Option<ConnectionResponseData>,
}

impl ConnectResponse {
    pub const fn accepted(channel_id: u8, data_endpoint: Hpai, crd: ConnectionResponseData) -> Self {
        Self {
            channel_id,
            status: E_NO_ERROR,
            data_endpoint: Some(data_endpoint),
            crd: Some(crd),
        }
    }

    pub const fn refused(status: u8) -> Self {
        Self {
            channel_id: 0,
            status,
            data_endpoint: None,
            crd: None,
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status == E_NO_ERROR
    }
}

impl ServiceBody for ConnectResponse {
    const SERVICE_TYPE: ServiceType = ServiceType::ConnectResponse;

    fn decode_body(r: &mut FrameReader<'_>, _: &ServiceRegistry) -> Result<Self> {
        let channel_id = r.read_u8()?;
        let status = r.read_u8()?;
        if r.remaining() == 0 && status != E_NO_ERROR {
            return Ok(Self {
                channel_id,
                ..Self::refused(status)
            });
        }
        Ok(Self {
            channel_id,
            status,
            data_endpoint: Some(Hpai::decode(r)?),
            crd: Some(ConnectionResponseData::decode(r)?),
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, _: &ServiceRegistry) -> Result<()> {
        w.write_u8(self.channel_id);
        w.write_u8(self.status);
        match (&self.data_endpoint, &self.crd) {
            (Some(hpai), Some(crd)) => {
                hpai.encode(w);
                crd.encode(w);
                Ok(())
            }
            (None, None) if self.status != E_NO_ERROR => Ok(()),
            _ => Err(KnxError::invalid_structure()),
        }
    }

    service_variant!(ConnectResponse);
}

/// `CONNECTIONSTATE_REQUEST` (0x0207), the heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStateRequest {
    pub channel_id: u8,
    pub control_endpoint: Hpai,
}

impl ServiceBody for ConnectionStateRequest {
    const SERVICE_TYPE: ServiceType = ServiceType::ConnectionstateRequest;

    fn decode_body(r: &mut FrameReader<'_>, _: &ServiceRegistry) -> Result<Self> {
        let channel_id = r.read_u8()?;
        r.read_u8()?; // reserved
        Ok(Self {
            channel_id,
            control_endpoint: Hpai::decode(r)?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, _: &ServiceRegistry) -> Result<()> {
        w.write_u8(self.channel_id);
        w.write_u8(0x00);
        self.control_endpoint.encode(w);
        Ok(())
    }

    service_variant!(ConnectionStateRequest);
}

/// `CONNECTIONSTATE_RESPONSE` (0x0208)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStateResponse {
    pub channel_id: u8,
    pub status: u8,
}

impl ServiceBody for ConnectionStateResponse {
    const SERVICE_TYPE: ServiceType = ServiceType::ConnectionstateResponse;

    fn decode_body(r: &mut FrameReader<'_>, _: &ServiceRegistry) -> Result<Self> {
        Ok(Self {
            channel_id: r.read_u8()?,
            status: r.read_u8()?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, _: &ServiceRegistry) -> Result<()> {
        w.write_u8(self.channel_id);
        w.write_u8(self.status);
        Ok(())
    }

    service_variant!(ConnectionStateResponse);
}

/// `DISCONNECT_REQUEST` (0x0209)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectRequest {
    pub channel_id: u8,
    pub control_endpoint: Hpai,
}

impl ServiceBody for DisconnectRequest {
    const SERVICE_TYPE: ServiceType = ServiceType::DisconnectRequest;

    fn decode_body(r: &mut FrameReader<'_>, _: &ServiceRegistry) -> Result<Self> {
        let channel_id = r.read_u8()?;
        r.read_u8()?; // reserved
        Ok(Self {
            channel_id,
            control_endpoint: Hpai::decode(r)?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, _: &ServiceRegistry) -> Result<()> {
        w.write_u8(self.channel_id);
        w.write_u8(0x00);
        self.control_endpoint.encode(w);
        Ok(())
    }

    service_variant!(DisconnectRequest);
}

/// `DISCONNECT_RESPONSE` (0x020A)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectResponse {
    pub channel_id: u8,
    pub status: u8,
}

impl ServiceBody for DisconnectResponse {
    const SERVICE_TYPE: ServiceType = ServiceType::DisconnectResponse;

    fn decode_body(r: &mut FrameReader<'_>, _: &ServiceRegistry) -> Result<Self> {
        Ok(Self {
            channel_id: r.read_u8()?,
            status: r.read_u8()?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, _: &ServiceRegistry) -> Result<()> {
        w.write_u8(self.channel_id);
        w.write_u8(self.status);
        Ok(())
    }

    service_variant!(DisconnectResponse);
}

// =============================================================================
// Channel requests and acks
// =============================================================================

/// `TUNNELING_REQUEST` (0x0420)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelingRequest {
    pub header: ConnectionHeader,
    pub cemi: CemiMessage,
}

impl ServiceBody for TunnelingRequest {
    const SERVICE_TYPE: ServiceType = ServiceType::TunnellingRequest;

    fn decode_body(r: &mut FrameReader<'_>, registry: &ServiceRegistry) -> Result<Self> {
        Ok(Self {
            header: ConnectionHeader::decode(r)?,
            cemi: registry.cemi().decode(r)?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, registry: &ServiceRegistry) -> Result<()> {
        self.header.encode(w);
        registry.cemi().encode(&self.cemi, w)
    }

    service_variant!(TunnelingRequest);
}

/// `TUNNELING_ACK` (0x0421); the status travels in the header's last byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelingAck {
    pub header: ConnectionHeader,
}

impl ServiceBody for TunnelingAck {
    const SERVICE_TYPE: ServiceType = ServiceType::TunnellingAck;

    fn decode_body(r: &mut FrameReader<'_>, _: &ServiceRegistry) -> Result<Self> {
        Ok(Self {
            header: ConnectionHeader::decode(r)?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, _: &ServiceRegistry) -> Result<()> {
        self.header.encode(w);
        Ok(())
    }

    service_variant!(TunnelingAck);
}

/// `DEVICE_CONFIGURATION_REQUEST` (0x0310)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfigurationRequest {
    pub header: ConnectionHeader,
    pub cemi: CemiMessage,
}

impl ServiceBody for DeviceConfigurationRequest {
    const SERVICE_TYPE: ServiceType = ServiceType::DeviceConfigurationRequest;

    fn decode_body(r: &mut FrameReader<'_>, registry: &ServiceRegistry) -> Result<Self> {
        Ok(Self {
            header: ConnectionHeader::decode(r)?,
            cemi: registry.cemi().decode(r)?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, registry: &ServiceRegistry) -> Result<()> {
        self.header.encode(w);
        registry.cemi().encode(&self.cemi, w)
    }

    service_variant!(DeviceConfigurationRequest);
}

/// `DEVICE_CONFIGURATION_ACK` (0x0311)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfigurationAck {
    pub header: ConnectionHeader,
}

impl ServiceBody for DeviceConfigurationAck {
    const SERVICE_TYPE: ServiceType = ServiceType::DeviceConfigurationAck;

    fn decode_body(r: &mut FrameReader<'_>, _: &ServiceRegistry) -> Result<Self> {
        Ok(Self {
            header: ConnectionHeader::decode(r)?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, _: &ServiceRegistry) -> Result<()> {
        self.header.encode(w);
        Ok(())
    }

    service_variant!(DeviceConfigurationAck);
}

/// `ROUTING_INDICATION` (0x0530)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingIndication {
    pub cemi: CemiMessage,
}

impl ServiceBody for RoutingIndication {
    const SERVICE_TYPE: ServiceType = ServiceType::RoutingIndication;

    fn decode_body(r: &mut FrameReader<'_>, registry: &ServiceRegistry) -> Result<Self> {
        Ok(Self {
            cemi: registry.cemi().decode(r)?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, registry: &ServiceRegistry) -> Result<()> {
        registry.cemi().encode(&self.cemi, w)
    }

    service_variant!(RoutingIndication);
}

// =============================================================================
// Service
// =============================================================================

/// A decoded KNXnet/IP service body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Service {
    SearchRequest(SearchRequest),
    SearchRequestExtended(SearchRequestExtended),
    SearchResponse(SearchResponse),
    SearchResponseExtended(SearchResponseExtended),
    DescriptionRequest(DescriptionRequest),
    DescriptionResponse(DescriptionResponse),
    ConnectRequest(ConnectRequest),
    ConnectResponse(ConnectResponse),
    ConnectionStateRequest(ConnectionStateRequest),
    ConnectionStateResponse(ConnectionStateResponse),
    DisconnectRequest(DisconnectRequest),
    DisconnectResponse(DisconnectResponse),
    TunnelingRequest(TunnelingRequest),
    TunnelingAck(TunnelingAck),
    DeviceConfigurationRequest(DeviceConfigurationRequest),
    DeviceConfigurationAck(DeviceConfigurationAck),
    RoutingIndication(RoutingIndication),
    ObjectServerRequest(ObjectServerRequest),
    /// Recognized service without a dedicated codec, body kept verbatim
    Raw {
        service_type: ServiceType,
        payload: Vec<u8>,
    },
}

impl Service {
    pub const fn service_type(&self) -> ServiceType {
        match self {
            Self::SearchRequest(_) => SearchRequest::SERVICE_TYPE,
            Self::SearchRequestExtended(_) => SearchRequestExtended::SERVICE_TYPE,
            Self::SearchResponse(_) => SearchResponse::SERVICE_TYPE,
            Self::SearchResponseExtended(_) => SearchResponseExtended::SERVICE_TYPE,
            Self::DescriptionRequest(_) => DescriptionRequest::SERVICE_TYPE,
            Self::DescriptionResponse(_) => DescriptionResponse::SERVICE_TYPE,
            Self::ConnectRequest(_) => ConnectRequest::SERVICE_TYPE,
            Self::ConnectResponse(_) => ConnectResponse::SERVICE_TYPE,
            Self::ConnectionStateRequest(_) => ConnectionStateRequest::SERVICE_TYPE,
            Self::ConnectionStateResponse(_) => ConnectionStateResponse::SERVICE_TYPE,
            Self::DisconnectRequest(_) => DisconnectRequest::SERVICE_TYPE,
            Self::DisconnectResponse(_) => DisconnectResponse::SERVICE_TYPE,
            Self::TunnelingRequest(_) => TunnelingRequest::SERVICE_TYPE,
            Self::TunnelingAck(_) => TunnelingAck::SERVICE_TYPE,
            Self::DeviceConfigurationRequest(_) => DeviceConfigurationRequest::SERVICE_TYPE,
            Self::DeviceConfigurationAck(_) => DeviceConfigurationAck::SERVICE_TYPE,
            Self::RoutingIndication(_) => RoutingIndication::SERVICE_TYPE,
            Self::ObjectServerRequest(_) => ObjectServerRequest::SERVICE_TYPE,
            Self::Raw { service_type, .. } => *service_type,
        }
    }

    /// Connection header of channel-scoped requests and acks
    pub const fn connection_header(&self) -> Option<&ConnectionHeader> {
        match self {
            Self::TunnelingRequest(s) => Some(&s.header),
            Self::TunnelingAck(s) => Some(&s.header),
            Self::DeviceConfigurationRequest(s) => Some(&s.header),
            Self::DeviceConfigurationAck(s) => Some(&s.header),
            Self::ObjectServerRequest(s) => Some(&s.header),
            _ => None,
        }
    }

    /// Nested cEMI message, if the service carries one
    pub const fn cemi(&self) -> Option<&CemiMessage> {
        match self {
            Self::TunnelingRequest(s) => Some(&s.cemi),
            Self::DeviceConfigurationRequest(s) => Some(&s.cemi),
            Self::RoutingIndication(s) => Some(&s.cemi),
            _ => None,
        }
    }
}

impl<S: ServiceBody> From<S> for Service {
    fn from(body: S) -> Self {
        body.into_service()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::GroupAddress;
    use crate::net::Ipv4Addr;
    use crate::protocol::cemi::LData;
    use crate::protocol::dib::{DeviceInformation, ServiceFamily};
    use crate::addressing::SerialNumber;
    use alloc::vec;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::knxnet_ip()
    }

    fn round_trip(service: Service) -> Vec<u8> {
        let registry = registry();
        let bytes = registry.encode(service.clone()).unwrap();
        let frame = registry.decode(&bytes).unwrap();
        assert_eq!(frame.service(), &service);
        assert_eq!(frame.size(), bytes.len());
        bytes
    }

    fn endpoint() -> Hpai {
        Hpai::new(Ipv4Addr::new(192, 168, 2, 120), 57846)
    }

    #[test]
    fn test_connect_request_wire_format() {
        let bytes = round_trip(ConnectRequest::new(endpoint(), endpoint()).into());
        assert_eq!(
            bytes,
            vec![
                0x06, 0x10, 0x02, 0x05, 0x00, 0x1A, // header
                0x08, 0x01, 0xC0, 0xA8, 0x02, 0x78, 0xE1, 0xF6, // control HPAI
                0x08, 0x01, 0xC0, 0xA8, 0x02, 0x78, 0xE1, 0xF6, // data HPAI
                0x04, 0x04, 0x02, 0x00, // CRI
            ]
        );
    }

    #[test]
    fn test_connect_response_variants() {
        let ok = ConnectResponse::accepted(
            0x15,
            endpoint(),
            ConnectionResponseData::Tunnel {
                address: IndividualAddress::new(1, 1, 250).unwrap(),
            },
        );
        let bytes = round_trip(ok.into());
        assert_eq!(bytes.len(), 6 + 2 + 8 + 4);

        // a refusal may stop after the status
        let bytes = round_trip(ConnectResponse::refused(0x24).into());
        assert_eq!(bytes, vec![0x06, 0x10, 0x02, 0x06, 0x00, 0x08, 0x00, 0x24]);

        let dev_mgmt = ConnectResponse::accepted(7, Hpai::NAT, ConnectionResponseData::DeviceManagement);
        round_trip(dev_mgmt.into());
    }

    #[test]
    fn test_heartbeat_and_disconnect() {
        let bytes = round_trip(
            ConnectionStateRequest {
                channel_id: 0x15,
                control_endpoint: Hpai::NAT,
            }
            .into(),
        );
        assert_eq!(&bytes[6..8], &[0x15, 0x00]);
        round_trip(ConnectionStateResponse { channel_id: 0x15, status: 0x21 }.into());
        round_trip(
            DisconnectRequest {
                channel_id: 1,
                control_endpoint: endpoint(),
            }
            .into(),
        );
        round_trip(DisconnectResponse { channel_id: 1, status: 0 }.into());
    }

    #[test]
    fn test_tunneling_ack_is_four_bytes() {
        let ack = TunnelingAck {
            header: ConnectionHeader::new(0x15, 7).with_status(0x04),
        };
        let bytes = round_trip(ack.into());
        assert_eq!(bytes, vec![0x06, 0x10, 0x04, 0x21, 0x00, 0x0A, 0x04, 0x15, 0x07, 0x04]);
    }

    #[test]
    fn test_channel_requests_carry_cemi() {
        let ldata = LData::group_value_write(
            IndividualAddress::UNSET,
            GroupAddress::new(1, 2, 3).unwrap(),
            vec![0x01],
        )
        .unwrap();
        let tunneling = TunnelingRequest {
            header: ConnectionHeader::new(0x15, 0),
            cemi: ldata.clone().into(),
        };
        let bytes = round_trip(tunneling.into());
        assert_eq!(&bytes[6..10], &[0x04, 0x15, 0x00, 0x00]);
        assert_eq!(bytes.len(), 6 + 4 + 11);

        round_trip(
            DeviceConfigurationRequest {
                header: ConnectionHeader::new(3, 9),
                cemi: CemiMessage::Raw {
                    message_code: 0xFC,
                    payload: vec![0x00, 0x00, 0x01, 0x01, 0x01],
                },
            }
            .into(),
        );
        round_trip(DeviceConfigurationAck { header: ConnectionHeader::new(3, 9) }.into());
        round_trip(RoutingIndication { cemi: ldata.into() }.into());
    }

    #[test]
    fn test_search_and_description() {
        round_trip(SearchRequest { discovery_endpoint: endpoint() }.into());
        round_trip(DescriptionRequest { control_endpoint: endpoint() }.into());

        let info = DeviceInformation::new(
            crate::protocol::dib::medium::TP1,
            IndividualAddress::new(1, 1, 0).unwrap(),
            SerialNumber::from_parts(0x00C5, 1),
            "gateway",
        );
        let dibs = vec![
            Dib::DeviceInfo(info),
            Dib::SupportedServiceFamilies(vec![
                ServiceFamily { family: 0x02, version: 1 },
                ServiceFamily { family: 0x04, version: 1 },
            ]),
        ];
        round_trip(
            SearchResponse {
                control_endpoint: endpoint(),
                dibs: dibs.clone(),
            }
            .into(),
        );
        round_trip(
            SearchResponseExtended {
                control_endpoint: endpoint(),
                dibs: dibs.clone(),
            }
            .into(),
        );
        round_trip(DescriptionResponse { dibs }.into());
        round_trip(
            SearchRequestExtended {
                discovery_endpoint: endpoint(),
                parameters: vec![SearchParameter::new(
                    crate::protocol::dib::SearchParameterKind::ProgrammingMode,
                )],
            }
            .into(),
        );
    }

    #[test]
    fn test_cri_rejects_unknown_connection_type() {
        let bytes = [0x04, 0x09, 0x02, 0x00];
        assert!(ConnectionRequestInfo::decode(&mut FrameReader::new(&bytes)).is_err());
        let bytes = [0x02, 0x03];
        assert_eq!(
            ConnectionRequestInfo::decode(&mut FrameReader::new(&bytes)).unwrap(),
            ConnectionRequestInfo::DeviceManagement
        );
    }

    #[test]
    fn test_connection_header_size_checked() {
        let bytes = [0x05, 0x01, 0x02, 0x00];
        assert!(ConnectionHeader::decode(&mut FrameReader::new(&bytes)).is_err());
    }
}
