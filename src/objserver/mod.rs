//! Object-server messages over KNXnet/IP.
//!
//! An [`ObjectServerRequest`] (service type `0xF080`) carries a connection
//! header followed by one object-server message. Messages are dispatched by
//! an [`ObjectServerRegistry`] keyed by the `(main, sub)` service pair, the
//! same way the outer [`ServiceRegistry`] dispatches on the service type.
//! Services without a codec decode to [`ObjectServerMessage::Raw`].

pub mod datapoint;

pub use datapoint::{
    Datapoint, DatapointValueIndication, GetDatapointValueRequest, GetDatapointValueResponse,
    SetDatapointValueRequest, SetDatapointValueResponse,
};

use crate::error::{KnxError, Result};
use crate::protocol::codec::{FrameReader, FrameWriter};
use crate::protocol::constants::ServiceType;
use crate::protocol::registry::{ServiceBody, ServiceRegistry};
use crate::protocol::services::{ConnectionHeader, Service};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::marker::PhantomData;

/// `(main, sub)` service identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObjectServerService {
    pub main: u8,
    pub sub: u8,
}

impl ObjectServerService {
    pub const fn new(main: u8, sub: u8) -> Self {
        Self { main, sub }
    }

    pub const fn to_u16(self) -> u16 {
        (self.main as u16) << 8 | self.sub as u16
    }
}

/// A decoded object-server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectServerMessage {
    GetDatapointValueRequest(GetDatapointValueRequest),
    GetDatapointValueResponse(GetDatapointValueResponse),
    SetDatapointValueRequest(SetDatapointValueRequest),
    SetDatapointValueResponse(SetDatapointValueResponse),
    DatapointValueIndication(DatapointValueIndication),
    Raw {
        service: ObjectServerService,
        payload: Vec<u8>,
    },
}

impl ObjectServerMessage {
    pub const fn service(&self) -> ObjectServerService {
        match self {
            Self::GetDatapointValueRequest(_) => GetDatapointValueRequest::SERVICE,
            Self::GetDatapointValueResponse(_) => GetDatapointValueResponse::SERVICE,
            Self::SetDatapointValueRequest(_) => SetDatapointValueRequest::SERVICE,
            Self::SetDatapointValueResponse(_) => SetDatapointValueResponse::SERVICE,
            Self::DatapointValueIndication(_) => DatapointValueIndication::SERVICE,
            Self::Raw { service, .. } => *service,
        }
    }
}

/// A statically typed object-server message body (everything after `main, sub`).
pub trait ObjectServerBody: Sized + Send + Sync + 'static {
    const SERVICE: ObjectServerService;

    fn decode_body(r: &mut FrameReader<'_>) -> Result<Self>;

    fn encode_body(&self, w: &mut FrameWriter) -> Result<()>;

    fn from_message(message: &ObjectServerMessage) -> Option<&Self>;

    fn into_message(self) -> ObjectServerMessage;
}

trait ObjectServerCodec: Send + Sync {
    fn decode(&self, r: &mut FrameReader<'_>) -> Result<ObjectServerMessage>;

    fn encode(&self, message: &ObjectServerMessage, w: &mut FrameWriter) -> Result<()>;
}

struct BodyCodec<M>(PhantomData<fn() -> M>);

impl<M: ObjectServerBody> ObjectServerCodec for BodyCodec<M> {
    fn decode(&self, r: &mut FrameReader<'_>) -> Result<ObjectServerMessage> {
        M::decode_body(r).map(M::into_message)
    }

    fn encode(&self, message: &ObjectServerMessage, w: &mut FrameWriter) -> Result<()> {
        M::from_message(message)
            .ok_or_else(KnxError::invalid_structure)?
            .encode_body(w)
    }
}

/// `(main, sub)` keyed object-server codecs.
pub struct ObjectServerRegistry {
    codecs: BTreeMap<ObjectServerService, Box<dyn ObjectServerCodec>>,
}

impl core::fmt::Debug for ObjectServerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObjectServerRegistry")
            .field("services", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ObjectServerRegistry {
    pub fn empty() -> Self {
        Self {
            codecs: BTreeMap::new(),
        }
    }

    /// Datapoint value get/set/indication services
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register::<GetDatapointValueRequest>();
        registry.register::<GetDatapointValueResponse>();
        registry.register::<SetDatapointValueRequest>();
        registry.register::<SetDatapointValueResponse>();
        registry.register::<DatapointValueIndication>();
        registry
    }

    pub fn register<M: ObjectServerBody>(&mut self) {
        self.codecs
            .insert(M::SERVICE, Box::new(BodyCodec::<M>(PhantomData)));
    }

    /// Decode one message; the reader must be bounded to exactly the message.
    pub fn decode(&self, r: &mut FrameReader<'_>) -> Result<ObjectServerMessage> {
        let service = ObjectServerService::new(r.read_u8()?, r.read_u8()?);
        let message = match self.codecs.get(&service) {
            Some(codec) => codec.decode(r)?,
            None => ObjectServerMessage::Raw {
                service,
                payload: r.read_rest().to_vec(),
            },
        };
        r.expect_end()?;
        Ok(message)
    }

    pub fn encode(&self, message: &ObjectServerMessage, w: &mut FrameWriter) -> Result<()> {
        let service = message.service();
        w.write_u8(service.main);
        w.write_u8(service.sub);
        match message {
            ObjectServerMessage::Raw { payload, .. } => {
                w.write_bytes(payload);
                Ok(())
            }
            _ => self
                .codecs
                .get(&service)
                .ok_or_else(|| KnxError::unsupported_service(service.to_u16()))?
                .encode(message, w),
        }
    }
}

impl Default for ObjectServerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// `OBJECT_SERVER_REQUEST` (0xF080)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectServerRequest {
    pub header: ConnectionHeader,
    pub message: ObjectServerMessage,
}

impl ServiceBody for ObjectServerRequest {
    const SERVICE_TYPE: ServiceType = ServiceType::ObjectServerRequest;

    fn decode_body(r: &mut FrameReader<'_>, registry: &ServiceRegistry) -> Result<Self> {
        Ok(Self {
            header: ConnectionHeader::decode(r)?,
            message: registry.object_server().decode(r)?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter, registry: &ServiceRegistry) -> Result<()> {
        self.header.encode(w);
        registry.object_server().encode(&self.message, w)
    }

    fn from_service(service: &Service) -> Option<&Self> {
        match service {
            Service::ObjectServerRequest(body) => Some(body),
            _ => None,
        }
    }

    fn into_service(self) -> Service {
        Service::ObjectServerRequest(self)
    }
}
