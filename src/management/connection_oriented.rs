//! Connection-oriented management: one transport-layer connection to one device.
//!
//! ```text
//! client                      device
//!   │ T_Connect ─────────────▶ │
//!   │ T_Data(seq n) request ─▶ │
//!   │ ◀───────────── T_ACK(n)  │
//!   │ ◀──── T_Data(seq m) reply│
//!   │ T_ACK(m) ──────────────▶ │
//!   │ T_Disconnect ──────────▶ │
//! ```
//!
//! Every numbered message from the device is acknowledged, interesting or
//! not. A repeated message (our ack got lost) is acknowledged again and
//! dropped; any other out-of-sequence message is rejected with `T_NAK`.

use super::{
    device_descriptor_data, memory_data, next_indication, property_data,
    property_write_confirmed, request_frame, Offer, PendingRequest,
};
use crate::addressing::IndividualAddress;
use crate::connection::{Connection, EventSubscriber};
use crate::error::{KnxError, Result};
use crate::net::transport::AsyncTransport;
use crate::protocol::apdu::{Apdu, ApciType, ControlType, Tpci};
use crate::protocol::cemi::{CemiMessage, LData};
use alloc::vec::Vec;
use embassy_time::{with_timeout, Duration};

/// Repetitions of a request the device answered with `T_NAK`
pub const MAX_REPETITIONS: u8 = 3;

/// Management session with one device.
///
/// Opened with [`open()`](Self::open) and ended with
/// [`close()`](Self::close); dropping it without closing leaves the
/// device to time the transport connection out.
pub struct ManagementConnection<'c, T: AsyncTransport> {
    connection: &'c Connection<T>,
    device: IndividualAddress,
    events: EventSubscriber<'c>,
    send_sequence: u8,
    recv_sequence: u8,
    timeout: Duration,
    connected: bool,
}

impl<T: AsyncTransport> core::fmt::Debug for ManagementConnection<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ManagementConnection")
            .field("device", &self.device)
            .field("send_sequence", &self.send_sequence)
            .field("recv_sequence", &self.recv_sequence)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl<'c, T: AsyncTransport> ManagementConnection<'c, T> {
    /// Send `T_Connect` to `device` over an established tunnel.
    pub async fn open(connection: &'c Connection<T>, device: IndividualAddress) -> Result<Self> {
        let events = connection.subscribe()?;
        let mut session = Self {
            connection,
            device,
            events,
            send_sequence: 0,
            recv_sequence: 0,
            timeout: connection.config().response_timeout,
            connected: false,
        };
        session.send_control(Tpci::connect()).await?;
        knx_log!(info, "transport connection to {} opened", device);
        session.connected = true;
        Ok(session)
    }

    /// Bound for each exchange (defaults to the connection's response timeout)
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn device(&self) -> IndividualAddress {
        self.device
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// `(send, receive)` transport-layer sequence numbers
    pub fn sequence_numbers(&self) -> (u8, u8) {
        (self.send_sequence, self.recv_sequence)
    }

    async fn send_control(&self, tpci: Tpci) -> Result<()> {
        let frame = request_frame(self.device.into(), tpci, None)?;
        self.connection.send_cemi(frame).await
    }

    async fn acknowledge(&self, tpci: Tpci) {
        if self.send_control(tpci).await.is_err() {
            knx_log!(warn, "could not send transport ack to {}", self.device);
        }
    }

    /// Send `apdu` as numbered data and wait for its `T_ACK` plus, when
    /// `expected` is not empty, the first in-sequence reply of those types.
    async fn request(&mut self, apdu: Apdu, expected: &[ApciType]) -> Result<Option<Apdu>> {
        if !self.connected {
            return Err(KnxError::management_not_connected());
        }
        let sequence = self.send_sequence;
        let frame = request_frame(self.device.into(), Tpci::numbered_data(sequence), Some(apdu))?;
        let mut pending = PendingRequest::new(expected).from_device(self.device);

        let timeout = self.timeout;
        if let Ok(result) = with_timeout(timeout, self.exchange(frame, sequence, &mut pending)).await {
            result
        } else {
            knx_log!(warn, "no reply from {} for sequence {}", self.device, sequence);
            Err(KnxError::Timeout)
        }
    }

    async fn exchange(
        &mut self,
        frame: CemiMessage,
        sequence: u8,
        pending: &mut PendingRequest,
    ) -> Result<Option<Apdu>> {
        self.connection.send_cemi(frame.clone()).await?;

        let mut repetitions = 0;
        let mut acked = false;
        let mut response = None;
        while !acked || (response.is_none() && !pending.expected().is_empty()) {
            let ldata = next_indication(&mut self.events).await?;
            if ldata.source != self.device {
                continue;
            }
            let tpci = ldata.tpci;
            match tpci.control_type {
                Some(ControlType::Ack) if tpci.sequence_number == sequence && !acked => {
                    acked = true;
                    self.send_sequence = (sequence + 1) & 0x0F;
                }
                Some(ControlType::Nak) if tpci.sequence_number == sequence && !acked => {
                    repetitions += 1;
                    if repetitions > MAX_REPETITIONS {
                        return Err(KnxError::device_error());
                    }
                    knx_log!(debug, "{} rejected sequence {}, repeating", self.device, sequence);
                    self.connection.send_cemi(frame.clone()).await?;
                }
                Some(ControlType::Disconnect) => {
                    knx_log!(info, "{} closed the transport connection", self.device);
                    self.connected = false;
                    return Err(KnxError::management_not_connected());
                }
                Some(_) => {}
                None if tpci.is_numbered() => {
                    if let Some(apdu) = self.receive_numbered(&ldata, pending).await {
                        response = Some(apdu);
                    }
                }
                None => {}
            }
        }
        Ok(response)
    }

    async fn receive_numbered(&mut self, ldata: &LData, pending: &mut PendingRequest) -> Option<Apdu> {
        let sequence = ldata.tpci.sequence_number;
        if sequence == self.recv_sequence {
            pending.expect_sequence(sequence);
            self.acknowledge(Tpci::ack(sequence)).await;
            self.recv_sequence = (sequence + 1) & 0x0F;
            match pending.offer(ldata) {
                Offer::Completed => return ldata.apdu.clone(),
                Offer::Ignored | Offer::Duplicate => {
                    knx_log!(debug, "ignoring {:?} from {}", ldata.apci(), self.device);
                }
            }
        } else if sequence == self.recv_sequence.wrapping_sub(1) & 0x0F {
            // repeated because our ack was lost
            self.acknowledge(Tpci::ack(sequence)).await;
        } else {
            self.acknowledge(Tpci::nak(sequence)).await;
        }
        None
    }

    async fn request_reply(&mut self, apdu: Apdu, expected: ApciType) -> Result<Apdu> {
        self.request(apdu, &[expected])
            .await?
            .ok_or_else(KnxError::response_mismatch)
    }

    // =========================================================================
    // Services
    // =========================================================================

    /// Read device descriptor `descriptor_type` (0 = mask version).
    pub async fn device_descriptor_read(&mut self, descriptor_type: u8) -> Result<Vec<u8>> {
        let request = super::device_descriptor_read(descriptor_type)?;
        let response = self
            .request_reply(request, ApciType::DeviceDescriptorResponse)
            .await?;
        device_descriptor_data(&response, descriptor_type)
    }

    /// Read `count` (1-63) bytes of device memory.
    pub async fn memory_read(&mut self, address: u16, count: u8) -> Result<Vec<u8>> {
        let request = super::memory_read(address, count)?;
        let response = self.request_reply(request, ApciType::MemoryResponse).await?;
        memory_data(&response, address, count)
    }

    /// Write up to 63 bytes of device memory; completes on the device's `T_ACK`.
    pub async fn memory_write(&mut self, address: u16, data: &[u8]) -> Result<()> {
        self.request(super::memory_write(address, data)?, &[]).await?;
        Ok(())
    }

    pub async fn property_value_read(
        &mut self,
        object_index: u8,
        property_id: u8,
        start: u16,
        count: u8,
    ) -> Result<Vec<u8>> {
        let request = super::property_value_read(object_index, property_id, start, count)?;
        let response = self
            .request_reply(request.clone(), ApciType::PropertyValueResponse)
            .await?;
        property_data(&request, &response)
    }

    /// Write property elements; the device must answer with the written value.
    pub async fn property_value_write(
        &mut self,
        object_index: u8,
        property_id: u8,
        start: u16,
        count: u8,
        data: &[u8],
    ) -> Result<()> {
        let request = super::property_value_write(object_index, property_id, start, count, data)?;
        let response = self
            .request_reply(request.clone(), ApciType::PropertyValueResponse)
            .await?;
        property_write_confirmed(&request, &response)
    }

    /// Basic restart. The device drops the transport connection while
    /// restarting, so no `T_ACK` is awaited and the session ends here.
    pub async fn restart(mut self) -> Result<()> {
        if !self.connected {
            return Err(KnxError::management_not_connected());
        }
        let frame = request_frame(
            self.device.into(),
            Tpci::numbered_data(self.send_sequence),
            Some(super::restart()?),
        )?;
        self.connected = false;
        self.connection.send_cemi(frame).await
    }

    /// Send `T_Disconnect` and end the session.
    pub async fn close(mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        knx_log!(info, "closing transport connection to {}", self.device);
        self.send_control(Tpci::disconnect()).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{connection, device, from_device, with_device};
    use super::*;
    use crate::protocol::tunnel::ConnectionState;
    use alloc::vec;
    use core::cell::RefCell;

    /// Device that acks every numbered request and answers memory reads
    /// from a fixed image.
    fn memory_device(log: &RefCell<Vec<Tpci>>) -> impl FnMut(&LData) -> Vec<LData> + '_ {
        let mut sequence = 0u8;
        move |ldata| {
            log.borrow_mut().push(ldata.tpci);
            let mut replies = Vec::new();
            if ldata.tpci.is_data() && ldata.tpci.is_numbered() {
                replies.push(from_device(Tpci::ack(ldata.tpci.sequence_number), None));
                if let Some(apdu) = ldata.apdu.as_ref().filter(|a| a.apci() == ApciType::MemoryRead) {
                    let mut data = apdu.data().to_vec();
                    data.extend((0..data[0]).map(|i| 0xA0 + i));
                    let response = Apdu::new(ApciType::MemoryResponse, data).unwrap();
                    replies.push(from_device(Tpci::numbered_data(sequence), Some(response)));
                    sequence = (sequence + 1) & 0x0F;
                }
            }
            replies
        }
    }

    #[test]
    fn test_memory_read_round_trip() {
        let conn = connection();
        let log = RefCell::new(Vec::new());
        let data = with_device(&conn, memory_device(&log), async {
            let mut session = ManagementConnection::open(&conn, device()).await.unwrap();
            let data = session.memory_read(0x0104, 3).await.unwrap();
            let second = session.memory_read(0x0200, 1).await.unwrap();
            assert_eq!(second, vec![0xA0]);
            assert_eq!(session.sequence_numbers(), (2, 2));
            session.close().await.unwrap();
            data
        });
        assert_eq!(data, vec![0xA0, 0xA1, 0xA2]);

        // connect, request 0, ack of reply 0, request 1, ack of reply 1, disconnect
        assert_eq!(
            *log.borrow(),
            vec![
                Tpci::connect(),
                Tpci::numbered_data(0),
                Tpci::ack(0),
                Tpci::numbered_data(1),
                Tpci::ack(1),
                Tpci::disconnect(),
            ]
        );
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_uninteresting_and_repeated_messages() {
        let conn = connection();
        let log = RefCell::new(Vec::new());
        let mut sequence = 0u8;
        let responder = |ldata: &LData| {
            log.borrow_mut().push(ldata.tpci);
            let mut replies = Vec::new();
            if ldata.tpci.is_data() && ldata.tpci.is_numbered() {
                replies.push(from_device(Tpci::ack(ldata.tpci.sequence_number), None));
                let adc = Apdu::new(ApciType::AdcResponse, vec![1, 0, 0]).unwrap();
                let descriptor =
                    Apdu::new(ApciType::DeviceDescriptorResponse, vec![0, 0x07, 0xB0]).unwrap();
                // unrelated numbered message, the reply, then the reply repeated
                replies.push(from_device(Tpci::numbered_data(sequence), Some(adc)));
                replies.push(from_device(Tpci::numbered_data(sequence + 1), Some(descriptor.clone())));
                replies.push(from_device(Tpci::numbered_data(sequence + 1), Some(descriptor)));
                sequence += 2;
            }
            replies
        };
        let descriptor = with_device(&conn, responder, async {
            let mut session = ManagementConnection::open(&conn, device()).await.unwrap();
            let descriptor = session.device_descriptor_read(0).await.unwrap();
            assert_eq!(session.sequence_numbers(), (1, 2));
            descriptor
        });
        assert_eq!(descriptor, vec![0x07, 0xB0]);
        let acks: Vec<_> = log
            .borrow()
            .iter()
            .filter(|t| t.control_type == Some(ControlType::Ack))
            .map(|t| t.sequence_number)
            .collect();
        assert_eq!(acks, vec![0, 1]);
    }

    #[test]
    fn test_reply_repeated_after_completion() {
        let conn = connection();
        let log = RefCell::new(Vec::new());
        let mut sequence = 0u8;
        let responder = |ldata: &LData| {
            log.borrow_mut().push(ldata.tpci);
            let mut replies = Vec::new();
            let Some(apdu) = ldata.apdu.as_ref().filter(|_| ldata.tpci.is_numbered()) else {
                return replies;
            };
            replies.push(from_device(Tpci::ack(ldata.tpci.sequence_number), None));
            let mut data = apdu.data().to_vec();
            data.push(0xC0 + sequence);
            let reply = from_device(Tpci::numbered_data(sequence), Some(Apdu::new(ApciType::MemoryResponse, data).unwrap()));
            if sequence == 0 {
                // the first reply goes out twice
                replies.push(reply.clone());
            }
            replies.push(reply);
            sequence += 1;
            replies
        };
        let (first, second) = with_device(&conn, responder, async {
            let mut session = ManagementConnection::open(&conn, device()).await.unwrap();
            let first = session.memory_read(0x0010, 1).await.unwrap();
            // the repeat is still queued and must not answer this read
            let second = session.memory_read(0x0020, 1).await.unwrap();
            assert_eq!(session.sequence_numbers(), (2, 2));
            (first, second)
        });
        assert_eq!(first, vec![0xC0]);
        assert_eq!(second, vec![0xC1]);
        let acks: Vec<_> = log
            .borrow()
            .iter()
            .filter(|t| t.control_type == Some(ControlType::Ack))
            .map(|t| t.sequence_number)
            .collect();
        assert_eq!(acks, vec![0, 0, 1]);
    }

    #[test]
    fn test_mismatched_reply_keeps_connection() {
        let conn = connection();
        let responder = |ldata: &LData| {
            let mut replies = Vec::new();
            if ldata.tpci.is_data() && ldata.tpci.is_numbered() {
                replies.push(from_device(Tpci::ack(ldata.tpci.sequence_number), None));
                // one byte less than requested
                let response = Apdu::new(ApciType::MemoryResponse, vec![1, 0x01, 0x04, 0xAA]).unwrap();
                replies.push(from_device(Tpci::numbered_data(0), Some(response)));
            }
            replies
        };
        let err = with_device(&conn, responder, async {
            let mut session = ManagementConnection::open(&conn, device()).await.unwrap();
            session.memory_read(0x0104, 2).await.unwrap_err()
        });
        assert!(err.is_response_mismatch());
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_missing_reply_times_out() {
        let conn = connection();
        let responder = |ldata: &LData| {
            if ldata.tpci.is_data() && ldata.tpci.is_numbered() {
                vec![from_device(Tpci::ack(ldata.tpci.sequence_number), None)]
            } else {
                Vec::new()
            }
        };
        let err = with_device(&conn, responder, async {
            let mut session = ManagementConnection::open(&conn, device())
                .await
                .unwrap()
                .with_response_timeout(Duration::from_millis(50));
            let err = session.property_value_read(0, 0x0B, 1, 1).await.unwrap_err();
            // the device acked, so the request itself went through
            assert_eq!(session.sequence_numbers().0, 1);
            err
        });
        assert!(err.is_timeout());
        assert!(conn.is_connected());
    }

    #[test]
    fn test_device_disconnect_ends_session() {
        let conn = connection();
        let responder = |ldata: &LData| {
            if ldata.tpci.is_data() {
                vec![from_device(Tpci::disconnect(), None)]
            } else {
                Vec::new()
            }
        };
        with_device(&conn, responder, async {
            let mut session = ManagementConnection::open(&conn, device()).await.unwrap();
            let err = session.memory_write(0x0060, &[1, 2]).await.unwrap_err();
            assert!(matches!(err, KnxError::Management(_)));
            assert!(!session.is_connected());
            assert!(session.memory_read(0x0060, 2).await.is_err());
        });
    }
}
