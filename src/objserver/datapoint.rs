//! Datapoint services of the object server.
//!
//! ```text
//! GetDatapointValue.Req   F0 05  start(2) count(2) filter(1)
//! GetDatapointValue.Res   F0 85  start(2) count(2) {id(2) state(1) len(1) data}*  | error(1) if count = 0
//! SetDatapointValue.Req   F0 06  start(2) count(2) {id(2) command(1) len(1) data}*
//! SetDatapointValue.Res   F0 86  start(2) 00 00 error(1)
//! DatapointValue.Ind      F0 C1  start(2) count(2) {id(2) state(1) len(1) data}*
//! ```
//!
//! Datapoint lists are kept sorted by ascending id, whatever order they
//! were built or received in.

use super::{ObjectServerBody, ObjectServerMessage, ObjectServerService};
use crate::error::{KnxError, Result};
use crate::protocol::codec::{FrameReader, FrameWriter};
use alloc::vec::Vec;

/// Set-value commands
pub mod command {
    pub const NO_COMMAND: u8 = 0x00;
    pub const SET_VALUE: u8 = 0x01;
    pub const SEND_VALUE: u8 = 0x02;
    pub const SET_AND_SEND: u8 = 0x03;
    pub const READ_VALUE: u8 = 0x04;
    pub const CLEAR_TRANSMISSION_STATE: u8 = 0x05;
}

/// One datapoint entry.
///
/// `flags` is the command byte in set requests and the state byte in
/// responses and indications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datapoint {
    pub id: u16,
    pub flags: u8,
    data: Vec<u8>,
}

impl Datapoint {
    /// # Errors
    ///
    /// Fails if `data` is longer than 255 bytes.
    pub fn new(id: u16, flags: u8, data: Vec<u8>) -> Result<Self> {
        if data.len() > usize::from(u8::MAX) {
            return Err(KnxError::payload_too_large());
        }
        Ok(Self { id, flags, data })
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> u8 {
        self.data.len() as u8
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn decode(r: &mut FrameReader<'_>) -> Result<Self> {
        let id = r.read_u16()?;
        let flags = r.read_u8()?;
        let len = r.read_u8()?;
        Ok(Self {
            id,
            flags,
            data: r.read_bytes(usize::from(len))?.to_vec(),
        })
    }

    fn encode(&self, w: &mut FrameWriter) {
        w.write_u16(self.id);
        w.write_u8(self.flags);
        w.write_u8(self.len());
        w.write_bytes(&self.data);
    }
}

fn sorted(mut datapoints: Vec<Datapoint>) -> Vec<Datapoint> {
    datapoints.sort_by_key(|dp| dp.id);
    datapoints
}

/// Read `count` datapoints; the count must describe the rest of the body.
fn decode_datapoints(r: &mut FrameReader<'_>, count: u16) -> Result<Vec<Datapoint>> {
    let mut datapoints = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        datapoints.push(Datapoint::decode(r).map_err(|_| KnxError::length_mismatch())?);
    }
    if r.remaining() != 0 {
        return Err(KnxError::length_mismatch());
    }
    Ok(sorted(datapoints))
}

fn encode_datapoints(datapoints: &[Datapoint], w: &mut FrameWriter) -> Result<()> {
    let count = u16::try_from(datapoints.len()).map_err(|_| KnxError::payload_too_large())?;
    w.write_u16(count);
    for dp in datapoints {
        dp.encode(w);
    }
    Ok(())
}

// =============================================================================
// GetDatapointValue
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GetDatapointValueRequest {
    pub start: u16,
    pub count: u16,
    pub filter: u8,
}

impl ObjectServerBody for GetDatapointValueRequest {
    const SERVICE: ObjectServerService = ObjectServerService::new(0xF0, 0x05);

    fn decode_body(r: &mut FrameReader<'_>) -> Result<Self> {
        Ok(Self {
            start: r.read_u16()?,
            count: r.read_u16()?,
            filter: r.read_u8()?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter) -> Result<()> {
        w.write_u16(self.start);
        w.write_u16(self.count);
        w.write_u8(self.filter);
        Ok(())
    }

    fn from_message(message: &ObjectServerMessage) -> Option<&Self> {
        match message {
            ObjectServerMessage::GetDatapointValueRequest(body) => Some(body),
            _ => None,
        }
    }

    fn into_message(self) -> ObjectServerMessage {
        ObjectServerMessage::GetDatapointValueRequest(self)
    }
}

/// Either datapoint values or, when the server reports no values, an error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetDatapointValueResponse {
    pub start: u16,
    datapoints: Vec<Datapoint>,
    pub error_code: u8,
}

impl GetDatapointValueResponse {
    pub fn new(start: u16, datapoints: Vec<Datapoint>) -> Self {
        Self {
            start,
            datapoints: sorted(datapoints),
            error_code: 0,
        }
    }

    pub fn error(start: u16, error_code: u8) -> Self {
        Self {
            start,
            datapoints: Vec::new(),
            error_code,
        }
    }

    pub fn datapoints(&self) -> &[Datapoint] {
        &self.datapoints
    }
}

impl ObjectServerBody for GetDatapointValueResponse {
    const SERVICE: ObjectServerService = ObjectServerService::new(0xF0, 0x85);

    fn decode_body(r: &mut FrameReader<'_>) -> Result<Self> {
        let start = r.read_u16()?;
        let count = r.read_u16()?;
        if count == 0 {
            let error_code = r.read_u8()?;
            return Ok(Self::error(start, error_code));
        }
        Ok(Self {
            start,
            datapoints: decode_datapoints(r, count)?,
            error_code: 0,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter) -> Result<()> {
        w.write_u16(self.start);
        encode_datapoints(&self.datapoints, w)?;
        if self.datapoints.is_empty() {
            w.write_u8(self.error_code);
        }
        Ok(())
    }

    fn from_message(message: &ObjectServerMessage) -> Option<&Self> {
        match message {
            ObjectServerMessage::GetDatapointValueResponse(body) => Some(body),
            _ => None,
        }
    }

    fn into_message(self) -> ObjectServerMessage {
        ObjectServerMessage::GetDatapointValueResponse(self)
    }
}

// =============================================================================
// SetDatapointValue
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDatapointValueRequest {
    pub start: u16,
    datapoints: Vec<Datapoint>,
}

impl SetDatapointValueRequest {
    pub fn new(start: u16, datapoints: Vec<Datapoint>) -> Self {
        Self {
            start,
            datapoints: sorted(datapoints),
        }
    }

    pub fn datapoints(&self) -> &[Datapoint] {
        &self.datapoints
    }
}

impl ObjectServerBody for SetDatapointValueRequest {
    const SERVICE: ObjectServerService = ObjectServerService::new(0xF0, 0x06);

    fn decode_body(r: &mut FrameReader<'_>) -> Result<Self> {
        let start = r.read_u16()?;
        let count = r.read_u16()?;
        Ok(Self {
            start,
            datapoints: decode_datapoints(r, count)?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter) -> Result<()> {
        w.write_u16(self.start);
        encode_datapoints(&self.datapoints, w)
    }

    fn from_message(message: &ObjectServerMessage) -> Option<&Self> {
        match message {
            ObjectServerMessage::SetDatapointValueRequest(body) => Some(body),
            _ => None,
        }
    }

    fn into_message(self) -> ObjectServerMessage {
        ObjectServerMessage::SetDatapointValueRequest(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SetDatapointValueResponse {
    pub start: u16,
    pub error_code: u8,
}

impl ObjectServerBody for SetDatapointValueResponse {
    const SERVICE: ObjectServerService = ObjectServerService::new(0xF0, 0x86);

    fn decode_body(r: &mut FrameReader<'_>) -> Result<Self> {
        let start = r.read_u16()?;
        if r.read_u16()? != 0 {
            return Err(KnxError::invalid_value());
        }
        Ok(Self {
            start,
            error_code: r.read_u8()?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter) -> Result<()> {
        w.write_u16(self.start);
        w.write_u16(0);
        w.write_u8(self.error_code);
        Ok(())
    }

    fn from_message(message: &ObjectServerMessage) -> Option<&Self> {
        match message {
            ObjectServerMessage::SetDatapointValueResponse(body) => Some(body),
            _ => None,
        }
    }

    fn into_message(self) -> ObjectServerMessage {
        ObjectServerMessage::SetDatapointValueResponse(self)
    }
}

// =============================================================================
// DatapointValue.Ind
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatapointValueIndication {
    pub start: u16,
    datapoints: Vec<Datapoint>,
}

impl DatapointValueIndication {
    pub fn new(start: u16, datapoints: Vec<Datapoint>) -> Self {
        Self {
            start,
            datapoints: sorted(datapoints),
        }
    }

    pub fn datapoints(&self) -> &[Datapoint] {
        &self.datapoints
    }
}

impl ObjectServerBody for DatapointValueIndication {
    const SERVICE: ObjectServerService = ObjectServerService::new(0xF0, 0xC1);

    fn decode_body(r: &mut FrameReader<'_>) -> Result<Self> {
        let start = r.read_u16()?;
        let count = r.read_u16()?;
        Ok(Self {
            start,
            datapoints: decode_datapoints(r, count)?,
        })
    }

    fn encode_body(&self, w: &mut FrameWriter) -> Result<()> {
        w.write_u16(self.start);
        encode_datapoints(&self.datapoints, w)
    }

    fn from_message(message: &ObjectServerMessage) -> Option<&Self> {
        match message {
            ObjectServerMessage::DatapointValueIndication(body) => Some(body),
            _ => None,
        }
    }

    fn into_message(self) -> ObjectServerMessage {
        ObjectServerMessage::DatapointValueIndication(self)
    }
}
