//! Connectionless management: unnumbered requests, replies matched by type.
//!
//! Every `L_Data.ind` seen while waiting goes into a bounded FIFO; a request
//! completes with the first buffered message of an expected APCI type from
//! the addressed device. When the FIFO is full the oldest message is
//! evicted, so unsolicited traffic cannot grow it.

use super::{
    device_descriptor_data, indication_of, memory_data, next_indication, property_data,
    property_write_confirmed, request_frame, Offer, PendingRequest,
};
use crate::addressing::{Address, IndividualAddress};
use crate::connection::{Connection, EventSubscriber};
use crate::error::{KnxError, Result};
use crate::net::transport::AsyncTransport;
use crate::protocol::apdu::{Apdu, ApciType, Tpci};
use crate::protocol::cemi::LData;
use alloc::vec::Vec;
use embassy_time::{with_timeout, Duration};
use heapless::Deque;

/// Default FIFO depth
pub const DEFAULT_BUFFER: usize = 8;

/// Connectionless management client keeping up to `N` observed messages.
pub struct ManagementClient<'c, T: AsyncTransport, const N: usize = DEFAULT_BUFFER> {
    connection: &'c Connection<T>,
    events: EventSubscriber<'c>,
    observed: Deque<LData, N>,
    timeout: Duration,
}

impl<T: AsyncTransport, const N: usize> core::fmt::Debug for ManagementClient<'_, T, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ManagementClient")
            .field("buffered", &self.observed.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<'c, T: AsyncTransport, const N: usize> ManagementClient<'c, T, N> {
    pub fn new(connection: &'c Connection<T>) -> Result<Self> {
        Ok(Self {
            connection,
            events: connection.subscribe()?,
            observed: Deque::new(),
            timeout: connection.config().response_timeout,
        })
    }

    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Messages currently held in the FIFO
    pub fn buffered(&self) -> usize {
        self.observed.len()
    }

    fn observe(&mut self, ldata: LData) {
        if self.observed.is_full() {
            if let Some(evicted) = self.observed.pop_front() {
                knx_log!(debug, "evicting unclaimed {:?} from {}", evicted.apci(), evicted.source);
            }
        }
        if self.observed.push_back(ldata).is_err() {
            knx_log!(debug, "no room for observed message");
        }
    }

    /// Remove every buffered message `take` accepts, keeping the order of
    /// the rest, and return the first one removed.
    fn remove_where(&mut self, mut take: impl FnMut(&LData) -> bool) -> Option<LData> {
        let mut first = None;
        for _ in 0..self.observed.len() {
            let Some(ldata) = self.observed.pop_front() else {
                break;
            };
            if !take(&ldata) {
                // room was made by pop_front
                let _ = self.observed.push_back(ldata);
            } else if first.is_none() {
                first = Some(ldata);
            }
        }
        first
    }

    /// Move indications already delivered by the connection into the FIFO.
    fn drain_delivered(&mut self) -> Result<()> {
        while let Some(event) = self.events.try_next_message_pure() {
            if let Some(indication) = indication_of(event) {
                self.observe(indication?);
            }
        }
        Ok(())
    }

    async fn await_reply(&mut self, pending: &mut PendingRequest) -> Result<LData> {
        loop {
            let ldata = next_indication(&mut self.events).await?;
            self.observe(ldata);
            if let Some(reply) = self.remove_where(|ldata| pending.offer(ldata) == Offer::Completed) {
                return Ok(reply);
            }
        }
    }

    async fn send(&self, destination: Address, apdu: Apdu) -> Result<()> {
        let frame = request_frame(destination, Tpci::unnumbered_data(), Some(apdu))?;
        self.connection.send_cemi(frame).await
    }

    /// Send `apdu` and wait for the first matching reply.
    async fn request(&mut self, destination: Address, apdu: Apdu, mut pending: PendingRequest) -> Result<LData> {
        // replies to an earlier, timed out request must not complete this one
        self.drain_delivered()?;
        let stale = self.remove_where(|ldata| pending.matches(ldata));
        if stale.is_some() {
            knx_log!(debug, "discarded stale replies for {}", destination);
        }

        self.send(destination, apdu).await?;
        let timeout = self.timeout;
        if let Ok(reply) = with_timeout(timeout, self.await_reply(&mut pending)).await {
            reply
        } else {
            knx_log!(warn, "no reply from {}", destination);
            Err(KnxError::Timeout)
        }
    }

    async fn request_apdu(&mut self, device: IndividualAddress, apdu: Apdu, expected: ApciType) -> Result<Apdu> {
        let pending = PendingRequest::new(&[expected]).from_device(device);
        self.request(device.into(), apdu, pending)
            .await?
            .apdu
            .ok_or_else(KnxError::response_mismatch)
    }

    // =========================================================================
    // Services
    // =========================================================================

    pub async fn device_descriptor_read(&mut self, device: IndividualAddress, descriptor_type: u8) -> Result<Vec<u8>> {
        let request = super::device_descriptor_read(descriptor_type)?;
        let response = self
            .request_apdu(device, request, ApciType::DeviceDescriptorResponse)
            .await?;
        device_descriptor_data(&response, descriptor_type)
    }

    pub async fn memory_read(&mut self, device: IndividualAddress, address: u16, count: u8) -> Result<Vec<u8>> {
        let request = super::memory_read(address, count)?;
        let response = self.request_apdu(device, request, ApciType::MemoryResponse).await?;
        memory_data(&response, address, count)
    }

    /// Unconfirmed write; completes once the gateway has taken the frame.
    pub async fn memory_write(&mut self, device: IndividualAddress, address: u16, data: &[u8]) -> Result<()> {
        self.send(device.into(), super::memory_write(address, data)?).await
    }

    pub async fn property_value_read(
        &mut self,
        device: IndividualAddress,
        object_index: u8,
        property_id: u8,
        start: u16,
        count: u8,
    ) -> Result<Vec<u8>> {
        let request = super::property_value_read(object_index, property_id, start, count)?;
        let response = self
            .request_apdu(device, request.clone(), ApciType::PropertyValueResponse)
            .await?;
        property_data(&request, &response)
    }

    pub async fn property_value_write(
        &mut self,
        device: IndividualAddress,
        object_index: u8,
        property_id: u8,
        start: u16,
        count: u8,
        data: &[u8],
    ) -> Result<()> {
        let request = super::property_value_write(object_index, property_id, start, count, data)?;
        let response = self
            .request_apdu(device, request.clone(), ApciType::PropertyValueResponse)
            .await?;
        property_write_confirmed(&request, &response)
    }

    pub async fn restart(&mut self, device: IndividualAddress) -> Result<()> {
        self.send(device.into(), super::restart()?).await
    }

    /// Broadcast `A_IndividualAddress_Read` and return the address of the
    /// first device in programming mode that answers.
    pub async fn individual_address_read(&mut self) -> Result<IndividualAddress> {
        let apdu = Apdu::new(ApciType::IndividualAddressRead, Vec::new())?;
        let pending = PendingRequest::new(&[ApciType::IndividualAddressResponse]);
        let reply = self.request(Address::from_raw(0, true), apdu, pending).await?;
        Ok(reply.source)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{connection, device, from_device, indication, with_device};
    use super::*;
    use crate::addressing::GroupAddress;
    use crate::protocol::cemi::CemiMessageCode;
    use alloc::vec;
    use core::cell::RefCell;

    fn other_device() -> IndividualAddress {
        IndividualAddress::new(1, 1, 6).unwrap()
    }

    fn unnumbered(apci: ApciType, data: Vec<u8>) -> Option<Apdu> {
        Some(Apdu::new(apci, data).unwrap())
    }

    #[test]
    fn test_fifo_evicts_oldest() {
        let conn = connection();
        let mut client = ManagementClient::<_, 2>::new(&conn).unwrap();
        for n in 1..=3 {
            let source = IndividualAddress::new(1, 1, n).unwrap();
            client.observe(indication(source, Tpci::unnumbered_data(), unnumbered(ApciType::MemoryResponse, vec![1, 0, 0, 0])));
        }
        assert_eq!(client.buffered(), 2);

        let mut pending = PendingRequest::new(&[ApciType::MemoryResponse]);
        let first = client.remove_where(|l| pending.offer(l) == Offer::Completed).unwrap();
        // 1.1.1 was evicted
        assert_eq!(first.source, IndividualAddress::new(1, 1, 2).unwrap());
        // at most one completion: 1.1.3 stays buffered
        assert!(client.remove_where(|l| pending.offer(l) == Offer::Completed).is_none());
        assert_eq!(client.buffered(), 1);
    }

    #[test]
    fn test_property_read_skips_unrelated_traffic() {
        let conn = connection();
        let responder = |ldata: &LData| {
            if ldata.apci() != Some(ApciType::PropertyValueRead) {
                return Vec::new();
            }
            let mut group_write = LData::group_value_write(
                other_device(),
                GroupAddress::new(1, 2, 3).unwrap(),
                vec![1],
            )
            .unwrap();
            group_write.message_code = CemiMessageCode::LDataInd;
            let mut echo = ldata.apdu.as_ref().unwrap().data().to_vec();
            echo.extend([0x00, 0xFA]);
            vec![
                group_write,
                // right type, wrong device
                indication(other_device(), Tpci::unnumbered_data(), unnumbered(ApciType::PropertyValueResponse, echo.clone())),
                from_device(Tpci::unnumbered_data(), unnumbered(ApciType::PropertyValueResponse, echo)),
            ]
        };
        let data = with_device(&conn, responder, async {
            let mut client: ManagementClient<'_, _> = ManagementClient::new(&conn).unwrap();
            let data = client.property_value_read(device(), 0, 0x0B, 1, 1).await.unwrap();
            // the group write and the foreign response stay buffered
            assert_eq!(client.buffered(), 2);
            data
        });
        assert_eq!(data, vec![0x00, 0xFA]);
    }

    #[test]
    fn test_late_reply_does_not_complete_next_request() {
        let conn = connection();
        let responder = |ldata: &LData| {
            let Some(apdu) = ldata.apdu.as_ref() else {
                return Vec::new();
            };
            let reply = |data: Vec<u8>| from_device(Tpci::unnumbered_data(), unnumbered(ApciType::MemoryResponse, data));
            match apdu.apci() {
                // an answer to some earlier read of 0x0100
                ApciType::MemoryWrite => vec![reply(vec![1, 0x01, 0x00, 0xAA])],
                ApciType::MemoryRead => {
                    let mut data = apdu.data().to_vec();
                    data.push(0x55);
                    vec![reply(data)]
                }
                _ => Vec::new(),
            }
        };
        let data = with_device(&conn, responder, async {
            let mut client: ManagementClient<'_, _> = ManagementClient::new(&conn).unwrap();
            client.memory_write(device(), 0x0100, &[0xAA]).await.unwrap();
            // the stale reply lands between the two requests
            embassy_time::Timer::after(Duration::from_millis(10)).await;
            client.memory_read(device(), 0x0200, 1).await.unwrap()
        });
        assert_eq!(data, vec![0x55]);
    }

    #[test]
    fn test_individual_address_read_broadcast() {
        let conn = connection();
        let destinations = RefCell::new(Vec::new());
        let responder = |ldata: &LData| {
            destinations.borrow_mut().push(ldata.destination());
            if ldata.apci() == Some(ApciType::IndividualAddressRead) {
                vec![from_device(Tpci::unnumbered_data(), unnumbered(ApciType::IndividualAddressResponse, vec![]))]
            } else {
                Vec::new()
            }
        };
        let address = with_device(&conn, responder, async {
            let mut client: ManagementClient<'_, _> = ManagementClient::new(&conn).unwrap();
            client.individual_address_read().await.unwrap()
        });
        assert_eq!(address, device());
        assert_eq!(*destinations.borrow(), vec![Address::from_raw(0, true)]);
    }

    #[test]
    fn test_descriptor_mismatch_and_timeout() {
        let conn = connection();
        let responder = |ldata: &LData| {
            if ldata.apci() == Some(ApciType::DeviceDescriptorRead) {
                // answers descriptor type 2 whatever was asked
                vec![from_device(Tpci::unnumbered_data(), unnumbered(ApciType::DeviceDescriptorResponse, vec![2, 0x00]))]
            } else {
                Vec::new()
            }
        };
        with_device(&conn, responder, async {
            let mut client: ManagementClient<'_, _> = ManagementClient::new(&conn)
                .unwrap()
                .with_response_timeout(Duration::from_millis(50));
            let err = client.device_descriptor_read(device(), 0).await.unwrap_err();
            assert!(err.is_response_mismatch());

            let err = client.memory_read(device(), 0x0100, 1).await.unwrap_err();
            assert!(err.is_timeout());
        });
        assert!(conn.is_connected());
    }
}
