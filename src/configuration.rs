//! Connection settings, passed to [`Connection::new`](crate::connection::Connection::new).
//!
//! ```rust
//! use embassy_time::Duration;
//! use knx_tunnel::configuration::ConnectionConfig;
//! use knx_tunnel::net::{IpEndpoint, Ipv4Addr};
//!
//! let config = ConnectionConfig::new(IpEndpoint::new(Ipv4Addr::new(192, 168, 1, 10), 3671))
//!     .with_response_timeout(Duration::from_millis(500))
//!     .with_ack_retry_count(2);
//! assert_eq!(config.heartbeat_interval, Duration::from_secs(60));
//! ```

use crate::net::{IpEndpoint, Ipv4Addr};
use crate::protocol::constants::KNXNETIP_DEFAULT_PORT;
use crate::protocol::frame::Hpai;
use crate::protocol::services::ConnectionRequestInfo;
use embassy_time::Duration;

/// Timeout for connect, heartbeat, ack and disconnect responses
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Recommended heartbeat interval (KNX spec: 60 seconds)
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Repetitions of an unacknowledged channel request
pub const DEFAULT_ACK_RETRY_COUNT: u8 = 1;

/// Consecutive unanswered heartbeats before the connection counts as lost
pub const DEFAULT_HEARTBEAT_RETRY_COUNT: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Gateway control endpoint
    pub gateway: IpEndpoint,
    /// Local control endpoint announced to the gateway (NAT by default)
    pub control_endpoint: Hpai,
    /// Local data endpoint announced to the gateway (NAT by default)
    pub data_endpoint: Hpai,
    pub cri: ConnectionRequestInfo,
    pub response_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub ack_retry_count: u8,
    pub heartbeat_retry_count: u8,
}

impl ConnectionConfig {
    /// Tunnel link-layer connection to `gateway` with default timings
    pub const fn new(gateway: IpEndpoint) -> Self {
        Self {
            gateway,
            control_endpoint: Hpai::NAT,
            data_endpoint: Hpai::NAT,
            cri: ConnectionRequestInfo::tunnel_link_layer(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            ack_retry_count: DEFAULT_ACK_RETRY_COUNT,
            heartbeat_retry_count: DEFAULT_HEARTBEAT_RETRY_COUNT,
        }
    }

    #[must_use]
    pub const fn with_endpoints(mut self, control: Hpai, data: Hpai) -> Self {
        self.control_endpoint = control;
        self.data_endpoint = data;
        self
    }

    #[must_use]
    pub const fn with_cri(mut self, cri: ConnectionRequestInfo) -> Self {
        self.cri = cri;
        self
    }

    #[must_use]
    pub const fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_ack_retry_count(mut self, count: u8) -> Self {
        self.ack_retry_count = count;
        self
    }

    /// At least one heartbeat attempt is always made.
    #[must_use]
    pub const fn with_heartbeat_retry_count(mut self, count: u8) -> Self {
        self.heartbeat_retry_count = if count == 0 { 1 } else { count };
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(IpEndpoint::new(Ipv4Addr::LOCALHOST, KNXNETIP_DEFAULT_PORT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.response_timeout, Duration::from_millis(3000));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(config.ack_retry_count, 1);
        assert_eq!(config.heartbeat_retry_count, 3);
        assert!(config.control_endpoint.is_nat());
        assert_eq!(config.cri, ConnectionRequestInfo::tunnel_link_layer());
    }

    #[test]
    fn test_builders() {
        let config = ConnectionConfig::default()
            .with_cri(ConnectionRequestInfo::DeviceManagement)
            .with_heartbeat_retry_count(0)
            .with_heartbeat_interval(Duration::from_secs(10));
        assert_eq!(config.cri, ConnectionRequestInfo::DeviceManagement);
        assert_eq!(config.heartbeat_retry_count, 1);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
    }
}
