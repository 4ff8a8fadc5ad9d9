//! Async KNXnet/IP tunneling connection.
//!
//! [`Connection`] drives a [`TunnelCore`] over an [`AsyncTransport`]:
//!
//! - [`run()`](Connection::run) is the receive loop plus the heartbeat timer
//!   and must be polled for as long as the connection is used
//! - [`connect()`](Connection::connect), [`send_cemi()`](Connection::send_cemi)
//!   and [`close()`](Connection::close) run concurrently with it and wait for
//!   the replies the receive loop hands over
//!
//! Every wait is bounded by `response_timeout`. The core state lives behind
//! one blocking mutex; outbound channel requests are serialized so that only
//! one is ever waiting for its ack.
//!
//! ## Example
//!
//! ```rust,no_run
//! use embassy_futures::select::select;
//! use knx_tunnel::configuration::ConnectionConfig;
//! use knx_tunnel::connection::Connection;
//! use knx_tunnel::protocol::registry::ServiceRegistry;
//! use std::sync::Arc;
//!
//! # async fn demo(transport: knx_tunnel::net::mock_transport::MockTransport) -> knx_tunnel::Result<()> {
//! let config = ConnectionConfig::new("192.168.1.10:3671".parse()?);
//! let connection = Connection::new(transport, config, Arc::new(ServiceRegistry::knxnet_ip()));
//!
//! select(connection.run(), async {
//!     connection.connect().await?;
//!     // send cEMI frames, subscribe to events ...
//!     connection.close().await
//! })
//! .await;
//! # Ok(())
//! # }
//! ```

use crate::addressing::IndividualAddress;
use crate::configuration::ConnectionConfig;
use crate::error::{KnxError, Result};
use crate::net::transport::AsyncTransport;
use crate::protocol::cemi::CemiMessage;
use crate::protocol::frame::Frame;
use crate::protocol::registry::ServiceRegistry;
use crate::protocol::services::{
    ConnectResponse, ConnectionHeader, ConnectionStateResponse, DisconnectRequest,
    DisconnectResponse, Service,
};
use crate::protocol::tunnel::{ack_for, AckOutcome, ConnectionState, InboundVerdict, TunnelCore};
use alloc::sync::Arc;
use core::cell::RefCell;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::pubsub::{PubSubChannel, Subscriber};
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Timer};

/// Maximum UDP packet size for KNXnet/IP
pub const MAX_DATAGRAM_SIZE: usize = 512;

/// Events buffered per subscriber before the oldest are dropped
pub const EVENT_CAPACITY: usize = 16;

/// Concurrent event subscribers
pub const MAX_SUBSCRIBERS: usize = 4;

/// Acks held until the waiting sender judges them
pub const ACK_QUEUE_DEPTH: usize = 4;

/// Why a connection went to `Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CloseReason {
    /// `close()` was called
    Requested,
    /// Connect request refused or unanswered
    ConnectFailed,
    /// Heartbeats went unanswered
    ConnectionLost,
    /// A channel request was never acknowledged
    AckFailed,
    /// The gateway sent a disconnect request
    RemoteDisconnect,
}

impl CloseReason {
    /// Error equivalent, for reasons that are failures
    pub fn to_error(self) -> Option<KnxError> {
        match self {
            Self::Requested | Self::RemoteDisconnect => None,
            Self::ConnectFailed => Some(KnxError::connection_failed()),
            Self::ConnectionLost => Some(KnxError::connection_lost()),
            Self::AckFailed => Some(KnxError::tunneling_ack_failed()),
        }
    }
}

/// Notification published to every subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// An accepted channel request or any other frame not consumed by the
    /// connection itself (routing indications, search responses, ...)
    FrameReceived(Frame),
    StateChanged {
        state: ConnectionState,
        /// Set when `state` is `Closed`
        reason: Option<CloseReason>,
    },
}

type EventChannel =
    PubSubChannel<CriticalSectionRawMutex, ConnectionEvent, EVENT_CAPACITY, MAX_SUBSCRIBERS, 1>;

/// Receiving end of [`Connection::subscribe`]
pub type EventSubscriber<'a> =
    Subscriber<'a, CriticalSectionRawMutex, ConnectionEvent, EVENT_CAPACITY, MAX_SUBSCRIBERS, 1>;

/// A tunneling or device-management connection to one gateway.
pub struct Connection<T: AsyncTransport> {
    transport: T,
    config: ConnectionConfig,
    registry: Arc<ServiceRegistry>,
    core: BlockingMutex<CriticalSectionRawMutex, RefCell<TunnelCore>>,
    send_lock: Mutex<CriticalSectionRawMutex, ()>,
    connect_response: Signal<CriticalSectionRawMutex, ConnectResponse>,
    state_response: Signal<CriticalSectionRawMutex, ConnectionStateResponse>,
    disconnect_response: Signal<CriticalSectionRawMutex, DisconnectResponse>,
    acks: Channel<CriticalSectionRawMutex, ConnectionHeader, ACK_QUEUE_DEPTH>,
    events: EventChannel,
}

impl<T: AsyncTransport> core::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Connection")
            .field("gateway", &self.config.gateway)
            .field("state", &self.state())
            .field("channel_id", &self.channel_id())
            .finish_non_exhaustive()
    }
}

impl<T: AsyncTransport> Connection<T> {
    pub fn new(transport: T, config: ConnectionConfig, registry: Arc<ServiceRegistry>) -> Self {
        let core = TunnelCore::new(config.control_endpoint, config.data_endpoint, config.cri);
        Self {
            transport,
            config,
            registry,
            core: BlockingMutex::new(RefCell::new(core)),
            send_lock: Mutex::new(()),
            connect_response: Signal::new(),
            state_response: Signal::new(),
            disconnect_response: Signal::new(),
            acks: Channel::new(),
            events: PubSubChannel::new(),
        }
    }

    #[inline]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[inline]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    #[inline]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn state(&self) -> ConnectionState {
        self.with_core(|core| core.state())
    }

    pub fn is_connected(&self) -> bool {
        self.with_core(|core| core.is_connected())
    }

    pub fn channel_id(&self) -> Option<u8> {
        self.with_core(|core| core.channel_id())
    }

    /// Individual address the gateway assigned to this tunnel
    pub fn assigned_address(&self) -> Option<IndividualAddress> {
        self.with_core(|core| core.assigned_address())
    }

    /// `(send, receive)` sequence counters
    pub fn sequence_counters(&self) -> (u8, u8) {
        self.with_core(|core| (core.send_sequence(), core.recv_sequence()))
    }

    /// Subscribe to frame and state notifications.
    ///
    /// # Errors
    ///
    /// Fails when all [`MAX_SUBSCRIBERS`] slots are taken.
    pub fn subscribe(&self) -> Result<EventSubscriber<'_>> {
        self.events
            .subscriber()
            .map_err(|_| KnxError::no_subscriber_slot())
    }

    fn with_core<R>(&self, f: impl FnOnce(&mut TunnelCore) -> R) -> R {
        self.core.lock(|core| f(&mut core.borrow_mut()))
    }

    fn publish(&self, event: ConnectionEvent) {
        self.events.immediate_publisher().publish_immediate(event);
    }

    fn publish_state(&self, state: ConnectionState, reason: Option<CloseReason>) {
        self.publish(ConnectionEvent::StateChanged { state, reason });
    }

    /// Force `Closed`, notifying subscribers if the state changed.
    fn close_with(&self, reason: CloseReason) {
        let previous = self.with_core(TunnelCore::close);
        if previous != ConnectionState::Closed {
            knx_log!(info, "connection closed: {}", reason_name(reason));
            self.publish_state(ConnectionState::Closed, Some(reason));
        }
    }

    /// Encode `service` and send it to the gateway.
    pub async fn send(&self, service: Service) -> Result<()> {
        let bytes = self.registry.encode(service)?;
        self.transport.send_to(&bytes, self.config.gateway).await
    }

    // =========================================================================
    // Driver
    // =========================================================================

    /// Receive loop and heartbeat timer.
    ///
    /// Returns only when the transport fails.
    pub async fn run(&self) -> Result<()> {
        match select(self.receive_loop(), self.heartbeat_loop()).await {
            Either::First(result) | Either::Second(result) => result,
        }
    }

    async fn receive_loop(&self) -> Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (n, from) = self.transport.recv_from(&mut buf).await?;
            knx_log!(trace, "received {} bytes from {}", n, from);
            self.handle_datagram(&buf[..n]).await;
        }
    }

    async fn heartbeat_loop(&self) -> Result<()> {
        loop {
            Timer::after(self.config.heartbeat_interval).await;
            if self.is_connected() {
                // failures close the connection themselves
                self.heartbeat().await.ok();
            }
        }
    }

    /// Decode and dispatch one inbound datagram. Undecodable datagrams are
    /// logged and dropped.
    pub async fn handle_datagram(&self, datagram: &[u8]) {
        let Ok(frame) = self.registry.decode(datagram) else {
            knx_log!(warn, "dropping undecodable datagram ({} bytes)", datagram.len());
            return;
        };

        match frame.service() {
            Service::ConnectResponse(response) => self.connect_response.signal(*response),
            Service::ConnectionStateResponse(response) => self.state_response.signal(*response),
            Service::DisconnectResponse(response) => self.disconnect_response.signal(*response),
            Service::TunnelingAck(ack) => self.queue_ack(ack.header),
            Service::DeviceConfigurationAck(ack) => self.queue_ack(ack.header),
            Service::DisconnectRequest(request) => self.handle_remote_disconnect(*request).await,
            Service::TunnelingRequest(_) | Service::DeviceConfigurationRequest(_) => {
                self.handle_channel_request(frame).await;
            }
            _ => self.publish(ConnectionEvent::FrameReceived(frame)),
        }
    }

    fn queue_ack(&self, header: ConnectionHeader) {
        if self.acks.try_send(header).is_err() {
            knx_log!(warn, "ack queue full, dropping ack for sequence {}", header.sequence_counter);
        }
    }

    async fn handle_channel_request(&self, frame: Frame) {
        let Some(header) = frame.service().connection_header().copied() else {
            return;
        };
        let verdict = self.with_core(|core| core.accept_inbound(&header));
        match verdict {
            InboundVerdict::Accept(ack) => {
                self.send_ack(frame.service(), ack).await;
                self.publish(ConnectionEvent::FrameReceived(frame));
            }
            InboundVerdict::Reject(nak) => {
                knx_log!(
                    debug,
                    "rejecting sequence {} on channel {}",
                    header.sequence_counter,
                    header.channel_id
                );
                self.send_ack(frame.service(), nak).await;
            }
            InboundVerdict::Ignore => {
                knx_log!(debug, "ignoring request for channel {}", header.channel_id);
            }
        }
    }

    async fn send_ack(&self, request: &Service, header: ConnectionHeader) {
        let Some(ack) = ack_for(request.service_type(), header) else {
            return;
        };
        if self.send(ack).await.is_err() {
            knx_log!(warn, "failed to send ack for sequence {}", header.sequence_counter);
        }
    }

    async fn handle_remote_disconnect(&self, request: DisconnectRequest) {
        let Some(response) = self.with_core(|core| core.handle_disconnect_request(&request)) else {
            knx_log!(debug, "ignoring disconnect for channel {}", request.channel_id);
            return;
        };
        knx_log!(info, "gateway closed channel {}", request.channel_id);
        if self.send(response.into()).await.is_err() {
            knx_log!(warn, "failed to answer disconnect request");
        }
        self.publish_state(ConnectionState::Closed, Some(CloseReason::RemoteDisconnect));
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Open the connection and return the channel id.
    ///
    /// # Errors
    ///
    /// A connect error if the gateway refuses or does not answer within
    /// `response_timeout`; the connection is `Closed` afterwards.
    pub async fn connect(&self) -> Result<u8> {
        let request = self.with_core(TunnelCore::connect_request)?;
        self.publish_state(ConnectionState::Connecting, None);
        self.connect_response.reset();

        knx_log!(info, "connecting to {}", self.config.gateway);
        if let Err(e) = self.send(request.into()).await {
            self.fail_connect();
            return Err(e);
        }

        let Ok(response) = with_timeout(self.config.response_timeout, self.connect_response.wait()).await
        else {
            knx_log!(warn, "no connect response from {}", self.config.gateway);
            self.fail_connect();
            return Err(KnxError::connection_failed());
        };

        match self.with_core(|core| core.handle_connect_response(&response)) {
            Ok(channel_id) => {
                knx_log!(info, "connected on channel {}", channel_id);
                self.publish_state(ConnectionState::Connected, None);
                Ok(channel_id)
            }
            Err(e) => {
                knx_log!(warn, "connect refused with status {}", response.status);
                self.publish_state(ConnectionState::Closed, Some(CloseReason::ConnectFailed));
                Err(e)
            }
        }
    }

    fn fail_connect(&self) {
        self.with_core(TunnelCore::connect_failed);
        self.publish_state(ConnectionState::Closed, Some(CloseReason::ConnectFailed));
    }

    /// Send one cEMI message as a channel request and wait for its ack.
    ///
    /// The request is repeated `ack_retry_count` times with the same
    /// sequence number; if none is acknowledged the connection is torn down.
    pub async fn send_cemi(&self, cemi: CemiMessage) -> Result<()> {
        let _guard = self.send_lock.lock().await;
        let attempts = u16::from(self.config.ack_retry_count) + 1;

        for attempt in 1..=attempts {
            let request = self.with_core(|core| core.channel_request(cemi.clone()))?;
            self.acks.clear();
            self.send(request).await?;

            match with_timeout(self.config.response_timeout, self.wait_ack()).await {
                Ok(AckOutcome::Accepted) => return Ok(()),
                Ok(AckOutcome::Rejected(status)) => {
                    knx_log!(warn, "ack with status {} (attempt {})", status, attempt);
                }
                Ok(AckOutcome::Ignored) | Err(_) => {
                    knx_log!(warn, "no ack (attempt {})", attempt);
                }
            }
        }

        knx_log!(error, "channel request never acknowledged, closing");
        if let Ok(request) = self.with_core(TunnelCore::disconnect_request) {
            self.send(request.into()).await.ok();
        }
        self.close_with(CloseReason::AckFailed);
        Err(KnxError::tunneling_ack_failed())
    }

    /// Judge queued acks in arrival order until one matches.
    async fn wait_ack(&self) -> AckOutcome {
        loop {
            let header = self.acks.receive().await;
            match self.with_core(|core| core.handle_ack(&header)) {
                AckOutcome::Ignored => {}
                outcome => return outcome,
            }
        }
    }

    /// One heartbeat exchange, repeated up to `heartbeat_retry_count` times.
    ///
    /// # Errors
    ///
    /// Connection-lost error once every attempt went unanswered or was
    /// rejected; the connection is `Closed` afterwards.
    pub async fn heartbeat(&self) -> Result<()> {
        for attempt in 1..=self.config.heartbeat_retry_count.max(1) {
            let request = self.with_core(|core| core.heartbeat_request())?;
            self.state_response.reset();
            if self.send(request.into()).await.is_err() {
                knx_log!(warn, "heartbeat {} could not be sent", attempt);
                continue;
            }
            match with_timeout(self.config.response_timeout, self.state_response.wait()).await {
                Ok(response) if self.with_core(|core| core.heartbeat_ok(&response)) => return Ok(()),
                Ok(response) => {
                    knx_log!(warn, "heartbeat {} answered with status {}", attempt, response.status);
                }
                Err(_) => knx_log!(warn, "heartbeat {} unanswered", attempt),
            }
        }

        self.close_with(CloseReason::ConnectionLost);
        Err(KnxError::connection_lost())
    }

    /// `Connected → Disconnecting → Closed`.
    ///
    /// A missing disconnect response still closes the connection.
    pub async fn close(&self) -> Result<()> {
        let request = self.with_core(TunnelCore::disconnect_request)?;
        self.publish_state(ConnectionState::Disconnecting, None);
        self.disconnect_response.reset();

        let sent = self.send(request.into()).await;
        if sent.is_ok()
            && with_timeout(self.config.response_timeout, self.disconnect_response.wait())
                .await
                .is_err()
        {
            knx_log!(warn, "no disconnect response, closing anyway");
        }
        self.close_with(CloseReason::Requested);
        sent
    }
}

const fn reason_name(reason: CloseReason) -> &'static str {
    match reason {
        CloseReason::Requested => "requested",
        CloseReason::ConnectFailed => "connect failed",
        CloseReason::ConnectionLost => "connection lost",
        CloseReason::AckFailed => "ack failed",
        CloseReason::RemoteDisconnect => "remote disconnect",
    }
}
