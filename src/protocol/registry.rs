//! Service-type keyed body codecs.
//!
//! A [`ServiceRegistry`] is built once with an explicit constructor and then
//! shared read-only (usually behind an `Arc`). Decoding a datagram:
//!
//! 1. parse and validate the 6-byte header
//! 2. look up the codec for the service type
//! 3. decode the body from a reader bounded to exactly `total_length - 6` bytes
//! 4. check that the body was consumed completely
//!
//! Errors from steps 3 and 4 are wrapped in one frame-decode error that
//! carries the service type and the cause.

use crate::error::{KnxError, Result};
use crate::objserver::{ObjectServerRegistry, ObjectServerRequest};
use crate::protocol::cemi::CemiRegistry;
use crate::protocol::codec::{FrameReader, FrameWriter};
use crate::protocol::constants::ServiceType;
use crate::protocol::frame::{Frame, FrameHeader};
use crate::protocol::services::{
    ConnectRequest, ConnectResponse, ConnectionStateRequest, ConnectionStateResponse,
    DescriptionRequest, DescriptionResponse, DeviceConfigurationAck, DeviceConfigurationRequest,
    DisconnectRequest, DisconnectResponse, RoutingIndication, SearchRequest,
    SearchRequestExtended, SearchResponse, SearchResponseExtended, Service, TunnelingAck,
    TunnelingRequest,
};
use alloc::collections::BTreeMap;
use core::marker::PhantomData;

/// A statically typed service body.
pub trait ServiceBody: Sized + Send + Sync + 'static {
    const SERVICE_TYPE: ServiceType;

    /// Decode from a reader bounded to the body.
    fn decode_body(r: &mut FrameReader<'_>, registry: &ServiceRegistry) -> Result<Self>;

    fn encode_body(&self, w: &mut FrameWriter, registry: &ServiceRegistry) -> Result<()>;

    fn from_service(service: &Service) -> Option<&Self>;

    fn into_service(self) -> Service;
}

/// Object-safe codec stored in the registry.
pub trait ServiceCodec: Send + Sync {
    fn decode(&self, r: &mut FrameReader<'_>, registry: &ServiceRegistry) -> Result<Service>;

    fn encode(&self, service: &Service, w: &mut FrameWriter, registry: &ServiceRegistry) -> Result<()>;
}

/// Adapts a [`ServiceBody`] to [`ServiceCodec`].
struct BodyCodec<S>(PhantomData<fn() -> S>);

impl<S: ServiceBody> ServiceCodec for BodyCodec<S> {
    fn decode(&self, r: &mut FrameReader<'_>, registry: &ServiceRegistry) -> Result<Service> {
        S::decode_body(r, registry).map(S::into_service)
    }

    fn encode(&self, service: &Service, w: &mut FrameWriter, registry: &ServiceRegistry) -> Result<()> {
        match S::from_service(service) {
            Some(body) => body.encode_body(w, registry),
            None => encode_raw(S::SERVICE_TYPE, service, w),
        }
    }
}

/// Keeps the body bytes of a recognized service verbatim.
struct RawCodec(ServiceType);

impl ServiceCodec for RawCodec {
    fn decode(&self, r: &mut FrameReader<'_>, _: &ServiceRegistry) -> Result<Service> {
        Ok(Service::Raw {
            service_type: self.0,
            payload: r.read_rest().to_vec(),
        })
    }

    fn encode(&self, service: &Service, w: &mut FrameWriter, _: &ServiceRegistry) -> Result<()> {
        encode_raw(self.0, service, w)
    }
}

fn encode_raw(expected: ServiceType, service: &Service, w: &mut FrameWriter) -> Result<()> {
    match service {
        Service::Raw {
            service_type,
            payload,
        } if *service_type == expected => {
            w.write_bytes(payload);
            Ok(())
        }
        _ => Err(KnxError::invalid_structure()),
    }
}

/// Recognized services that only travel as [`Service::Raw`].
const RAW_SERVICES: [ServiceType; 9] = [
    ServiceType::RoutingLostMessage,
    ServiceType::RoutingBusy,
    ServiceType::RemoteDiagnosticRequest,
    ServiceType::RemoteDiagnosticResponse,
    ServiceType::SecureWrapper,
    ServiceType::SessionRequest,
    ServiceType::SessionResponse,
    ServiceType::SessionAuthenticate,
    ServiceType::SessionStatus,
];

/// Service codecs plus the nested cEMI and object-server registries.
pub struct ServiceRegistry {
    codecs: BTreeMap<ServiceType, alloc::boxed::Box<dyn ServiceCodec>>,
    cemi: CemiRegistry,
    object_server: ObjectServerRegistry,
}

impl core::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.codecs.len())
            .field("cemi", &self.cemi)
            .field("object_server", &self.object_server)
            .finish()
    }
}

impl ServiceRegistry {
    /// Registry without service codecs; every recognized service type is
    /// reported as unsupported.
    pub fn empty() -> Self {
        Self {
            codecs: BTreeMap::new(),
            cemi: CemiRegistry::standard(),
            object_server: ObjectServerRegistry::standard(),
        }
    }

    /// Every core, discovery, tunneling, device-management, routing and
    /// object-server service, with a raw codec for the rest.
    pub fn knxnet_ip() -> Self {
        let mut registry = Self::empty();
        registry.register::<SearchRequest>();
        registry.register::<SearchRequestExtended>();
        registry.register::<SearchResponse>();
        registry.register::<SearchResponseExtended>();
        registry.register::<DescriptionRequest>();
        registry.register::<DescriptionResponse>();
        registry.register::<ConnectRequest>();
        registry.register::<ConnectResponse>();
        registry.register::<ConnectionStateRequest>();
        registry.register::<ConnectionStateResponse>();
        registry.register::<DisconnectRequest>();
        registry.register::<DisconnectResponse>();
        registry.register::<TunnelingRequest>();
        registry.register::<TunnelingAck>();
        registry.register::<DeviceConfigurationRequest>();
        registry.register::<DeviceConfigurationAck>();
        registry.register::<RoutingIndication>();
        registry.register::<ObjectServerRequest>();
        for service_type in RAW_SERVICES {
            registry.register_raw(service_type);
        }
        registry
    }

    pub fn register<S: ServiceBody>(&mut self) {
        self.codecs
            .insert(S::SERVICE_TYPE, alloc::boxed::Box::new(BodyCodec::<S>(PhantomData)));
    }

    /// Decode bodies of `service_type` into [`Service::Raw`].
    pub fn register_raw(&mut self, service_type: ServiceType) {
        self.codecs.insert(service_type, alloc::boxed::Box::new(RawCodec(service_type)));
    }

    pub fn supports(&self, service_type: ServiceType) -> bool {
        self.codecs.contains_key(&service_type)
    }

    #[inline]
    pub fn cemi(&self) -> &CemiRegistry {
        &self.cemi
    }

    pub fn cemi_mut(&mut self) -> &mut CemiRegistry {
        &mut self.cemi
    }

    #[inline]
    pub fn object_server(&self) -> &ObjectServerRegistry {
        &self.object_server
    }

    pub fn object_server_mut(&mut self) -> &mut ObjectServerRegistry {
        &mut self.object_server
    }

    /// Decode one complete datagram.
    ///
    /// # Errors
    ///
    /// - format error for a bad header or a length mismatch
    /// - unsupported-service error for a recognized type without codec
    /// - frame-decode error wrapping whatever went wrong in the body
    pub fn decode(&self, datagram: &[u8]) -> Result<Frame> {
        let header = FrameHeader::decode(datagram)?;
        let service_type = header.service_type;
        let codec = self
            .codecs
            .get(&service_type)
            .ok_or_else(|| KnxError::unsupported_service(service_type.to_u16()))?;

        let mut r = FrameReader::new(&datagram[FrameHeader::SIZE..]);
        let service = codec
            .decode(&mut r, self)
            .and_then(|service| r.expect_end().map(|()| service))
            .map_err(|e| KnxError::frame_decode(service_type.to_u16(), e))?;

        Frame::from_parts(header, service)
    }

    /// [`decode`](Self::decode) that yields `None` on any error.
    pub fn try_decode(&self, datagram: &[u8]) -> Option<Frame> {
        match self.decode(datagram) {
            Ok(frame) => Some(frame),
            Err(_) => {
                knx_log!(trace, "{} byte datagram not decodable", datagram.len());
                None
            }
        }
    }

    /// Append the body of `service` to `w`.
    pub fn encode_body(&self, service: &Service, w: &mut FrameWriter) -> Result<()> {
        let service_type = service.service_type();
        self.codecs
            .get(&service_type)
            .ok_or_else(|| KnxError::unsupported_service(service_type.to_u16()))?
            .encode(service, w, self)
    }

    /// Encode `service` as a complete datagram, header included.
    pub fn encode(&self, service: impl Into<Service>) -> Result<alloc::vec::Vec<u8>> {
        let service = service.into();
        let mut w = FrameWriter::with_capacity(64);
        w.write_bytes(&[0; FrameHeader::SIZE]);
        self.encode_body(&service, &mut w)?;
        let header = FrameHeader::new(service.service_type(), w.len() - FrameHeader::SIZE)?;
        let mut bytes = w.into_vec();
        bytes[..FrameHeader::SIZE].copy_from_slice(&header.encode());
        Ok(bytes)
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::knxnet_ip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::Hpai;
    use alloc::vec;

    #[test]
    fn test_scenario_header_only_connect_request() {
        let header = FrameHeader::new(ServiceType::ConnectRequest, 18).unwrap();
        assert_eq!(header.encode(), [0x06, 0x10, 0x02, 0x05, 0x00, 0x18]);
    }

    #[test]
    fn test_header_failures_are_format_errors() {
        let registry = ServiceRegistry::knxnet_ip();
        let good = registry
            .encode(DescriptionRequest {
                control_endpoint: Hpai::NAT,
            })
            .unwrap();

        let mut bad_len = good.clone();
        bad_len[0] = 0x05;
        let err = registry.decode(&bad_len).unwrap_err();
        assert!(err.is_format_error());

        let mut bad_version = good.clone();
        bad_version[1] = 0x20;
        assert!(registry.decode(&bad_version).unwrap_err().is_format_error());

        let mut bad_type = good.clone();
        bad_type[2] = 0x7F;
        assert!(registry.decode(&bad_type).unwrap_err().is_format_error());

        let mut bad_total = good.clone();
        bad_total.push(0x00);
        assert!(registry.decode(&bad_total).unwrap_err().is_format_error());
    }

    #[test]
    fn test_missing_codec_is_unsupported_service() {
        let full = ServiceRegistry::knxnet_ip();
        let bytes = full
            .encode(DisconnectResponse {
                channel_id: 1,
                status: 0,
            })
            .unwrap();
        let err = ServiceRegistry::empty().decode(&bytes).unwrap_err();
        assert!(err.is_unsupported_service());
        assert!(!err.is_format_error());
    }

    #[test]
    fn test_body_errors_are_wrapped() {
        let registry = ServiceRegistry::knxnet_ip();
        // connection state response with a trailing byte
        let bytes = [0x06, 0x10, 0x02, 0x08, 0x00, 0x09, 0x01, 0x00, 0xFF];
        let err = registry.decode(&bytes).unwrap_err();
        assert!(err.is_frame_decode());
        let KnxError::FrameDecode(inner) = &err else {
            panic!("expected frame decode error");
        };
        assert_eq!(inner.service_type(), 0x0208);
        assert!(inner.cause().is_format_error());

        // truncated body
        let bytes = [0x06, 0x10, 0x02, 0x08, 0x00, 0x07, 0x01];
        assert!(registry.decode(&bytes).unwrap_err().is_frame_decode());
        assert!(registry.try_decode(&bytes).is_none());
    }

    #[test]
    fn test_raw_services_round_trip() {
        let registry = ServiceRegistry::knxnet_ip();
        let service = Service::Raw {
            service_type: ServiceType::RoutingBusy,
            payload: vec![0x06, 0x00, 0x00, 0x64, 0x00, 0x00],
        };
        let bytes = registry.encode(service.clone()).unwrap();
        assert_eq!(&bytes[..6], &[0x06, 0x10, 0x05, 0x32, 0x00, 0x0C]);
        assert_eq!(registry.decode(&bytes).unwrap().into_service(), service);

        // a raw body for a service with a typed codec is rejected
        let mismatched = Service::Raw {
            service_type: ServiceType::ConnectRequest,
            payload: vec![],
        };
        assert!(registry.encode(mismatched).is_err());
    }

    #[test]
    fn test_frame_invariants() {
        let registry = ServiceRegistry::knxnet_ip();
        let frame = Frame::new(
            &registry,
            ConnectionStateResponse {
                channel_id: 4,
                status: 0,
            }
            .into(),
        )
        .unwrap();
        assert_eq!(frame.size(), 8);
        assert_eq!(frame.service_type(), frame.service().service_type());
        let bytes = frame.encode(&registry).unwrap();
        assert_eq!(Frame::decode(&registry, &bytes).unwrap(), frame);
    }
}
