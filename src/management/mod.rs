//! Device management over an established [`Connection`](crate::connection::Connection).
//!
//! Two clients share the same request/response contract:
//!
//! - [`ManagementConnection`] opens a transport-layer connection to one
//!   device and correlates replies on the TPCI sequence number
//! - [`ManagementClient`] sends unnumbered requests and correlates replies on
//!   the APCI type (and source) from a bounded FIFO of observed messages
//!
//! Both wait on the connection's event stream, bound every wait by a timeout
//! and fail when the underlying connection closes. A reply that arrives but
//! does not echo the request is a response-mismatch error, not a timeout.

pub mod connection_oriented;
pub mod connectionless;
#[cfg(test)]
pub(crate) mod test_support;

pub use connection_oriented::ManagementConnection;
pub use connectionless::ManagementClient;

use crate::addressing::{Address, IndividualAddress};
use crate::connection::{ConnectionEvent, EventSubscriber};
use crate::error::{KnxError, Result};
use crate::protocol::apdu::{Apdu, ApciType, Tpci, MAX_PACKED_VALUE};
use crate::protocol::cemi::{CemiMessage, CemiMessageCode, LData};
use crate::protocol::tunnel::ConnectionState;
use alloc::vec::Vec;

/// Response types one request may wait for
pub const MAX_EXPECTED_TYPES: usize = 4;

/// Largest `count` of a property value access (4 bits)
pub const MAX_PROPERTY_ELEMENTS: u8 = 15;

/// Largest property start index (12 bits)
pub const MAX_PROPERTY_START: u16 = 0x0FFF;

// =============================================================================
// Correlation
// =============================================================================

/// Result of offering an inbound message to a [`PendingRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Offer {
    /// First matching reply; the request is now complete
    Completed,
    /// Not a reply to this request
    Ignored,
    /// A matching reply after completion, dropped
    Duplicate,
}

/// One outstanding request: the reply discriminators plus a completion flag.
///
/// A request completes at most once; later matching replies are reported as
/// [`Offer::Duplicate`].
///
/// ```
/// use knx_tunnel::management::{Offer, PendingRequest};
/// use knx_tunnel::protocol::apdu::ApciType;
///
/// let pending = PendingRequest::new(&[ApciType::MemoryResponse]).with_sequence(3);
/// assert!(!pending.is_completed());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    expected: heapless::Vec<ApciType, MAX_EXPECTED_TYPES>,
    sequence: Option<u8>,
    source: Option<IndividualAddress>,
    completed: bool,
}

impl PendingRequest {
    /// Await any of `expected` (at most [`MAX_EXPECTED_TYPES`] are kept).
    pub fn new(expected: &[ApciType]) -> Self {
        Self {
            expected: expected.iter().copied().take(MAX_EXPECTED_TYPES).collect(),
            sequence: None,
            source: None,
            completed: false,
        }
    }

    /// Only accept numbered replies carrying `sequence`.
    #[must_use]
    pub fn with_sequence(mut self, sequence: u8) -> Self {
        self.sequence = Some(sequence & 0x0F);
        self
    }

    /// Only accept replies sent by `source`.
    #[must_use]
    pub fn from_device(mut self, source: IndividualAddress) -> Self {
        self.source = Some(source);
        self
    }

    /// Move the awaited sequence number, e.g. after an unrelated numbered
    /// message was acknowledged.
    pub fn expect_sequence(&mut self, sequence: u8) {
        self.sequence = Some(sequence & 0x0F);
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn expected(&self) -> &[ApciType] {
        &self.expected
    }

    /// Whether `ldata` answers this request, ignoring completion.
    pub fn matches(&self, ldata: &LData) -> bool {
        let Some(apci) = ldata.apci() else {
            return false;
        };
        self.expected.contains(&apci)
            && self.source.is_none_or(|source| source == ldata.source)
            && self
                .sequence
                .is_none_or(|seq| ldata.tpci.is_numbered() && ldata.tpci.sequence_number == seq)
    }

    pub fn offer(&mut self, ldata: &LData) -> Offer {
        if !self.matches(ldata) {
            Offer::Ignored
        } else if self.completed {
            Offer::Duplicate
        } else {
            self.completed = true;
            Offer::Completed
        }
    }
}

/// The `L_Data.ind` carried by `event`, or the error for a closed
/// connection. Other events yield `None`.
pub(crate) fn indication_of(event: ConnectionEvent) -> Option<Result<LData>> {
    match event {
        ConnectionEvent::FrameReceived(frame) => match frame.into_service().cemi() {
            Some(CemiMessage::LData(ldata)) if ldata.message_code == CemiMessageCode::LDataInd => {
                Some(Ok(ldata.clone()))
            }
            _ => None,
        },
        ConnectionEvent::StateChanged {
            state: ConnectionState::Closed,
            reason,
        } => Some(Err(reason
            .and_then(|reason| reason.to_error())
            .unwrap_or_else(KnxError::management_not_connected))),
        ConnectionEvent::StateChanged { .. } => None,
    }
}

/// Next `L_Data.ind` delivered by the connection.
///
/// # Errors
///
/// Fails once the connection reports `Closed`, with the error matching the
/// close reason.
pub(crate) async fn next_indication(events: &mut EventSubscriber<'_>) -> Result<LData> {
    loop {
        if let Some(indication) = indication_of(events.next_message_pure().await) {
            return indication;
        }
    }
}

/// `L_Data.req` from the tunnel's own address (0.0.0, filled in by the gateway)
pub(crate) fn request_frame(
    destination: Address,
    tpci: Tpci,
    apdu: Option<Apdu>,
) -> Result<CemiMessage> {
    LData::new(
        CemiMessageCode::LDataReq,
        IndividualAddress::UNSET,
        destination,
        tpci,
        apdu,
    )
    .map(CemiMessage::LData)
}

// =============================================================================
// Service encoding and reply checks
// =============================================================================

fn check_packed(value: u8) -> Result<()> {
    if value > MAX_PACKED_VALUE {
        Err(KnxError::invalid_value())
    } else {
        Ok(())
    }
}

fn property_header(object_index: u8, property_id: u8, start: u16, count: u8) -> Result<[u8; 4]> {
    if count == 0 || count > MAX_PROPERTY_ELEMENTS || start > MAX_PROPERTY_START {
        return Err(KnxError::invalid_value());
    }
    let [start_hi, start_lo] = start.to_be_bytes();
    Ok([object_index, property_id, count << 4 | start_hi, start_lo])
}

/// `A_DeviceDescriptor_Read` for descriptor `descriptor_type` (0-63)
pub(crate) fn device_descriptor_read(descriptor_type: u8) -> Result<Apdu> {
    check_packed(descriptor_type)?;
    Apdu::new(ApciType::DeviceDescriptorRead, alloc::vec![descriptor_type])
}

/// Descriptor bytes of a `A_DeviceDescriptor_Response`
pub(crate) fn device_descriptor_data(response: &Apdu, descriptor_type: u8) -> Result<Vec<u8>> {
    match response.data() {
        [kind, descriptor @ ..] if *kind == descriptor_type => Ok(descriptor.to_vec()),
        _ => Err(KnxError::response_mismatch()),
    }
}

/// `A_Memory_Read` of `count` (1-63) bytes at `address`
pub(crate) fn memory_read(address: u16, count: u8) -> Result<Apdu> {
    if count == 0 {
        return Err(KnxError::invalid_value());
    }
    check_packed(count)?;
    let [hi, lo] = address.to_be_bytes();
    Apdu::new(ApciType::MemoryRead, alloc::vec![count, hi, lo])
}

/// `A_Memory_Write` of up to 63 bytes at `address`
pub(crate) fn memory_write(address: u16, data: &[u8]) -> Result<Apdu> {
    let count = u8::try_from(data.len()).map_err(|_| KnxError::payload_too_large())?;
    if count == 0 {
        return Err(KnxError::invalid_value());
    }
    check_packed(count)?;
    let [hi, lo] = address.to_be_bytes();
    let mut payload = Vec::with_capacity(data.len() + 3);
    payload.extend_from_slice(&[count, hi, lo]);
    payload.extend_from_slice(data);
    Apdu::new(ApciType::MemoryWrite, payload)
}

/// Data of a `A_Memory_Response` answering a read of `count` bytes at
/// `address`. A count of zero is the device refusing access.
pub(crate) fn memory_data(response: &Apdu, address: u16, count: u8) -> Result<Vec<u8>> {
    let [returned, hi, lo, data @ ..] = response.data() else {
        return Err(KnxError::response_mismatch());
    };
    if u16::from_be_bytes([*hi, *lo]) != address {
        return Err(KnxError::response_mismatch());
    }
    if *returned == 0 {
        return Err(KnxError::device_error());
    }
    if *returned != count || data.len() != usize::from(count) {
        return Err(KnxError::response_mismatch());
    }
    Ok(data.to_vec())
}

/// `A_PropertyValue_Read` of `count` elements from `start`
pub(crate) fn property_value_read(
    object_index: u8,
    property_id: u8,
    start: u16,
    count: u8,
) -> Result<Apdu> {
    let header = property_header(object_index, property_id, start, count)?;
    Apdu::new(ApciType::PropertyValueRead, header.to_vec())
}

/// `A_PropertyValue_Write` of `count` elements from `start`
pub(crate) fn property_value_write(
    object_index: u8,
    property_id: u8,
    start: u16,
    count: u8,
    data: &[u8],
) -> Result<Apdu> {
    if data.is_empty() {
        return Err(KnxError::invalid_value());
    }
    let header = property_header(object_index, property_id, start, count)?;
    let mut payload = Vec::with_capacity(header.len() + data.len());
    payload.extend_from_slice(&header);
    payload.extend_from_slice(data);
    Apdu::new(ApciType::PropertyValueWrite, payload)
}

/// Element data of a `A_PropertyValue_Response`.
///
/// The response must echo object index, property id and start index. A
/// returned count of zero is the device rejecting the access; any other
/// count must equal the requested one.
pub(crate) fn property_data(request: &Apdu, response: &Apdu) -> Result<Vec<u8>> {
    let ([obj, pid, count_start, start_lo, ..], [r_obj, r_pid, r_count_start, r_start_lo, data @ ..]) =
        (request.data(), response.data())
    else {
        return Err(KnxError::response_mismatch());
    };
    if (obj, pid, start_lo) != (r_obj, r_pid, r_start_lo)
        || count_start & 0x0F != r_count_start & 0x0F
    {
        return Err(KnxError::response_mismatch());
    }
    let returned = r_count_start >> 4;
    if returned == 0 {
        return Err(KnxError::device_error());
    }
    if returned != count_start >> 4 || data.is_empty() {
        return Err(KnxError::response_mismatch());
    }
    Ok(data.to_vec())
}

/// Check that a write was answered with the written value.
pub(crate) fn property_write_confirmed(request: &Apdu, response: &Apdu) -> Result<()> {
    let written = request.data().get(4..).unwrap_or_default();
    if property_data(request, response)? == written {
        Ok(())
    } else {
        Err(KnxError::response_mismatch())
    }
}

/// Basic `A_Restart` (no reply)
pub(crate) fn restart() -> Result<Apdu> {
    Apdu::new(ApciType::Restart, Vec::new())
}
