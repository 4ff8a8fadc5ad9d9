//! Tunneling connection state machine, without I/O.
//!
//! [`TunnelCore`] holds everything a connection mutates: state, channel id
//! and both sequence counters. It builds the services to send and judges
//! the services received; the async [`Connection`](crate::connection::Connection)
//! owns one behind a single lock and does the sending and waiting.
//!
//! ## State Machine
//!
//! ```text
//!            connect_request()          connect response (ok)
//!   Closed ──────────────────> Connecting ───────────────────> Connected
//!     ^                           │ refused / timeout              │
//!     ├───────────────────────────┘                                │ disconnect_request()
//!     │        response / timeout                                  v
//!     └─────────────────────────────────────────────────────── Disconnecting
//! ```
//!
//! Heartbeat loss, repeated ack failure and a disconnect request from the
//! gateway move any state straight to `Closed`.

use crate::addressing::IndividualAddress;
use crate::error::{KnxError, Result};
use crate::protocol::cemi::CemiMessage;
use crate::protocol::constants::{ConnectionType, ServiceType, E_NO_ERROR, E_SEQUENCE_NUMBER};
use crate::protocol::frame::Hpai;
use crate::protocol::services::{
    ConnectRequest, ConnectResponse, ConnectionHeader, ConnectionRequestInfo,
    ConnectionResponseData, ConnectionStateRequest, ConnectionStateResponse,
    DeviceConfigurationAck, DeviceConfigurationRequest, DisconnectRequest, DisconnectResponse,
    Service, TunnelingAck, TunnelingRequest,
};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Connected,
    Disconnecting,
}

/// Result of matching an inbound ack against the outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckOutcome {
    /// Matching positive ack, the send counter advanced
    Accepted,
    /// Matching ack with an error status
    Rejected(u8),
    /// Other channel or stale sequence number
    Ignored,
}

/// What to do with an inbound channel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InboundVerdict {
    /// Expected sequence number: deliver and acknowledge with `ack`
    Accept(ConnectionHeader),
    /// Unexpected sequence number: answer with the negative ack `nak`
    Reject(ConnectionHeader),
    /// Not ours (not connected or other channel)
    Ignore,
}

/// Mutable state of one tunneling connection.
#[derive(Debug, Clone)]
pub struct TunnelCore {
    state: ConnectionState,
    channel_id: u8,
    send_sequence: u8,
    recv_sequence: u8,
    control_endpoint: Hpai,
    data_endpoint: Hpai,
    cri: ConnectionRequestInfo,
    assigned_address: Option<IndividualAddress>,
}

impl TunnelCore {
    pub const fn new(control_endpoint: Hpai, data_endpoint: Hpai, cri: ConnectionRequestInfo) -> Self {
        Self {
            state: ConnectionState::Closed,
            channel_id: 0,
            send_sequence: 0,
            recv_sequence: 0,
            control_endpoint,
            data_endpoint,
            cri,
            assigned_address: None,
        }
    }

    #[inline]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    #[inline]
    pub const fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    /// Gateway-assigned channel, set while connected or disconnecting
    pub const fn channel_id(&self) -> Option<u8> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Disconnecting => Some(self.channel_id),
            _ => None,
        }
    }

    #[inline]
    pub const fn send_sequence(&self) -> u8 {
        self.send_sequence
    }

    #[inline]
    pub const fn recv_sequence(&self) -> u8 {
        self.recv_sequence
    }

    /// Individual address the gateway assigned to a tunnel connection
    pub const fn assigned_address(&self) -> Option<IndividualAddress> {
        self.assigned_address
    }

    pub const fn connection_type(&self) -> ConnectionType {
        self.cri.connection_type()
    }

    // =========================================================================
    // Connect
    // =========================================================================

    /// `Closed → Connecting`
    pub fn connect_request(&mut self) -> Result<ConnectRequest> {
        if self.state != ConnectionState::Closed {
            return Err(KnxError::already_connected());
        }
        self.state = ConnectionState::Connecting;
        Ok(ConnectRequest {
            control_endpoint: self.control_endpoint,
            data_endpoint: self.data_endpoint,
            cri: self.cri,
        })
    }

    /// `Connecting → Connected` on success, `Connecting → Closed` otherwise.
    ///
    /// Returns the assigned channel id.
    pub fn handle_connect_response(&mut self, response: &ConnectResponse) -> Result<u8> {
        if self.state != ConnectionState::Connecting {
            return Err(KnxError::InvalidState);
        }
        if !response.is_success() {
            self.reset();
            return Err(KnxError::connection_refused(response.status));
        }
        self.state = ConnectionState::Connected;
        self.channel_id = response.channel_id;
        self.send_sequence = 0;
        self.recv_sequence = 0;
        self.assigned_address = match response.crd {
            Some(ConnectionResponseData::Tunnel { address }) => Some(address),
            _ => None,
        };
        Ok(response.channel_id)
    }

    /// Connect attempt timed out or could not be sent: `Connecting → Closed`.
    pub fn connect_failed(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.reset();
        }
    }

    // =========================================================================
    // Outbound channel requests
    // =========================================================================

    /// Channel request for `cemi` carrying the current send counter.
    ///
    /// Tunnel connections use `TUNNELING_REQUEST`, device-management
    /// connections `DEVICE_CONFIGURATION_REQUEST`.
    pub fn channel_request(&self, cemi: CemiMessage) -> Result<Service> {
        if !self.is_connected() {
            return Err(KnxError::not_connected());
        }
        let header = ConnectionHeader::new(self.channel_id, self.send_sequence);
        Ok(match self.connection_type() {
            ConnectionType::DeviceManagement => DeviceConfigurationRequest { header, cemi }.into(),
            _ => TunnelingRequest { header, cemi }.into(),
        })
    }

    /// Match an ack against the request carrying the current send counter.
    pub fn handle_ack(&mut self, header: &ConnectionHeader) -> AckOutcome {
        if !self.is_connected()
            || header.channel_id != self.channel_id
            || header.sequence_counter != self.send_sequence
        {
            return AckOutcome::Ignored;
        }
        if header.status != E_NO_ERROR {
            return AckOutcome::Rejected(header.status);
        }
        self.send_sequence = self.send_sequence.wrapping_add(1);
        AckOutcome::Accepted
    }

    // =========================================================================
    // Inbound channel requests
    // =========================================================================

    /// Accept the request if it carries the expected sequence number.
    pub fn accept_inbound(&mut self, header: &ConnectionHeader) -> InboundVerdict {
        if !self.is_connected() || header.channel_id != self.channel_id {
            return InboundVerdict::Ignore;
        }
        if header.sequence_counter == self.recv_sequence {
            self.recv_sequence = self.recv_sequence.wrapping_add(1);
            InboundVerdict::Accept(ConnectionHeader::new(self.channel_id, header.sequence_counter))
        } else {
            InboundVerdict::Reject(
                ConnectionHeader::new(self.channel_id, header.sequence_counter)
                    .with_status(E_SEQUENCE_NUMBER),
            )
        }
    }

    // =========================================================================
    // Heartbeat
    // =========================================================================

    pub fn heartbeat_request(&self) -> Result<ConnectionStateRequest> {
        if !self.is_connected() {
            return Err(KnxError::not_connected());
        }
        Ok(ConnectionStateRequest {
            channel_id: self.channel_id,
            control_endpoint: self.control_endpoint,
        })
    }

    /// Whether a heartbeat response confirms this connection
    pub fn heartbeat_ok(&self, response: &ConnectionStateResponse) -> bool {
        self.is_connected() && response.channel_id == self.channel_id && response.status == E_NO_ERROR
    }

    // =========================================================================
    // Disconnect
    // =========================================================================

    /// `Connected → Disconnecting`
    pub fn disconnect_request(&mut self) -> Result<DisconnectRequest> {
        if !self.is_connected() {
            return Err(KnxError::not_connected());
        }
        self.state = ConnectionState::Disconnecting;
        Ok(DisconnectRequest {
            channel_id: self.channel_id,
            control_endpoint: self.control_endpoint,
        })
    }

    /// Gateway closes the channel: answer and go `Closed`.
    pub fn handle_disconnect_request(&mut self, request: &DisconnectRequest) -> Option<DisconnectResponse> {
        if self.channel_id().is_none() || request.channel_id != self.channel_id {
            return None;
        }
        let response = DisconnectResponse {
            channel_id: self.channel_id,
            status: E_NO_ERROR,
        };
        self.reset();
        Some(response)
    }

    /// Force `Closed`, returning the state left behind.
    pub fn close(&mut self) -> ConnectionState {
        let previous = self.state;
        self.reset();
        previous
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Closed;
        self.channel_id = 0;
        self.send_sequence = 0;
        self.recv_sequence = 0;
        self.assigned_address = None;
    }
}

/// Ack service answering a channel request of type `request`
pub fn ack_for(request: ServiceType, header: ConnectionHeader) -> Option<Service> {
    match request {
        ServiceType::TunnellingRequest => Some(TunnelingAck { header }.into()),
        ServiceType::DeviceConfigurationRequest => Some(DeviceConfigurationAck { header }.into()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(channel: u8) -> TunnelCore {
        let mut core = TunnelCore::new(Hpai::NAT, Hpai::NAT, ConnectionRequestInfo::tunnel_link_layer());
        core.connect_request().unwrap();
        let response = ConnectResponse::accepted(
            channel,
            Hpai::NAT,
            ConnectionResponseData::Tunnel {
                address: IndividualAddress::new(1, 1, 250).unwrap(),
            },
        );
        assert_eq!(core.handle_connect_response(&response).unwrap(), channel);
        core
    }

    #[test]
    fn test_connect_lifecycle() {
        let mut core = TunnelCore::new(Hpai::NAT, Hpai::NAT, ConnectionRequestInfo::tunnel_link_layer());
        assert_eq!(core.state(), ConnectionState::Closed);
        assert_eq!(core.channel_id(), None);
        assert!(core.channel_request(CemiMessage::Raw { message_code: 0x11, payload: alloc::vec![] }).is_err());

        core.connect_request().unwrap();
        assert_eq!(core.state(), ConnectionState::Connecting);
        assert!(core.connect_request().is_err());

        let refused = ConnectResponse::refused(0x24);
        let err = core.handle_connect_response(&refused).unwrap_err();
        assert!(err.is_connect_error());
        assert_eq!(core.state(), ConnectionState::Closed);

        let mut core = connected(0x15);
        assert_eq!(core.channel_id(), Some(0x15));
        assert_eq!(core.assigned_address(), Some(IndividualAddress::new(1, 1, 250).unwrap()));

        let request = core.disconnect_request().unwrap();
        assert_eq!(request.channel_id, 0x15);
        assert_eq!(core.state(), ConnectionState::Disconnecting);
        assert_eq!(core.close(), ConnectionState::Disconnecting);
        assert_eq!(core.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_connect_timeout_returns_to_closed() {
        let mut core = TunnelCore::new(Hpai::NAT, Hpai::NAT, ConnectionRequestInfo::tunnel_link_layer());
        core.connect_request().unwrap();
        core.connect_failed();
        assert_eq!(core.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_send_counter_advances_only_on_matching_ack() {
        let mut core = connected(7);
        let ok = |seq| ConnectionHeader::new(7, seq);

        // stale and foreign acks
        assert_eq!(core.handle_ack(&ok(3)), AckOutcome::Ignored);
        assert_eq!(core.handle_ack(&ConnectionHeader::new(8, 0)), AckOutcome::Ignored);
        assert_eq!(core.send_sequence(), 0);

        assert_eq!(core.handle_ack(&ok(0).with_status(0x29)), AckOutcome::Rejected(0x29));
        assert_eq!(core.send_sequence(), 0);

        assert_eq!(core.handle_ack(&ok(0)), AckOutcome::Accepted);
        assert_eq!(core.send_sequence(), 1);
        // a repeated ack no longer matches
        assert_eq!(core.handle_ack(&ok(0)), AckOutcome::Ignored);
    }

    #[test]
    fn test_send_counter_wraps() {
        let mut core = connected(1);
        for seq in 0..=255u8 {
            assert_eq!(core.handle_ack(&ConnectionHeader::new(1, seq)), AckOutcome::Accepted);
        }
        assert_eq!(core.send_sequence(), 0);
    }

    #[test]
    fn test_inbound_sequence_checks() {
        let mut core = connected(2);
        assert_eq!(
            core.accept_inbound(&ConnectionHeader::new(2, 0)),
            InboundVerdict::Accept(ConnectionHeader::new(2, 0))
        );
        assert_eq!(core.recv_sequence(), 1);

        // duplicate is rejected and does not advance
        assert_eq!(
            core.accept_inbound(&ConnectionHeader::new(2, 0)),
            InboundVerdict::Reject(ConnectionHeader::new(2, 0).with_status(E_SEQUENCE_NUMBER))
        );
        assert_eq!(core.recv_sequence(), 1);

        assert_eq!(core.accept_inbound(&ConnectionHeader::new(9, 1)), InboundVerdict::Ignore);
        assert!(matches!(
            core.accept_inbound(&ConnectionHeader::new(2, 1)),
            InboundVerdict::Accept(_)
        ));
    }

    #[test]
    fn test_channel_request_by_connection_type() {
        let core = connected(3);
        let cemi = CemiMessage::Raw {
            message_code: 0x11,
            payload: alloc::vec![0x00],
        };
        let service = core.channel_request(cemi.clone()).unwrap();
        assert_eq!(service.service_type(), ServiceType::TunnellingRequest);
        assert_eq!(service.connection_header(), Some(&ConnectionHeader::new(3, 0)));

        let mut mgmt = TunnelCore::new(Hpai::NAT, Hpai::NAT, ConnectionRequestInfo::DeviceManagement);
        mgmt.connect_request().unwrap();
        mgmt.handle_connect_response(&ConnectResponse::accepted(
            4,
            Hpai::NAT,
            ConnectionResponseData::DeviceManagement,
        ))
        .unwrap();
        let service = mgmt.channel_request(cemi).unwrap();
        assert_eq!(service.service_type(), ServiceType::DeviceConfigurationRequest);
    }

    #[test]
    fn test_heartbeat_and_remote_disconnect() {
        let mut core = connected(5);
        assert_eq!(core.heartbeat_request().unwrap().channel_id, 5);
        assert!(core.heartbeat_ok(&ConnectionStateResponse { channel_id: 5, status: 0 }));
        assert!(!core.heartbeat_ok(&ConnectionStateResponse { channel_id: 5, status: 0x21 }));

        let foreign = DisconnectRequest {
            channel_id: 6,
            control_endpoint: Hpai::NAT,
        };
        assert!(core.handle_disconnect_request(&foreign).is_none());
        let ours = DisconnectRequest {
            channel_id: 5,
            control_endpoint: Hpai::NAT,
        };
        assert_eq!(
            core.handle_disconnect_request(&ours),
            Some(DisconnectResponse { channel_id: 5, status: 0 })
        );
        assert_eq!(core.state(), ConnectionState::Closed);
        assert!(core.heartbeat_request().is_err());
    }

    #[test]
    fn test_ack_for_request_types() {
        let header = ConnectionHeader::new(1, 2);
        assert_eq!(
            ack_for(ServiceType::TunnellingRequest, header).map(|s| s.service_type()),
            Some(ServiceType::TunnellingAck)
        );
        assert_eq!(
            ack_for(ServiceType::DeviceConfigurationRequest, header).map(|s| s.service_type()),
            Some(ServiceType::DeviceConfigurationAck)
        );
        assert!(ack_for(ServiceType::RoutingIndication, header).is_none());
    }
}
