//! In-memory transport used to play the gateway in tests.
//!
//! Datagrams injected with [`MockTransport::inject`] are returned by
//! `recv_from()` in FIFO order; everything passed to `send_to()` is queued
//! for inspection with [`MockTransport::next_sent`]. Both directions are
//! embassy channels, so a test can run a scripted gateway concurrently with
//! the connection under test.
//!
//! ## Example
//!
//! ```rust
//! use knx_tunnel::net::mock_transport::MockTransport;
//! use knx_tunnel::net::transport::AsyncTransport;
//!
//! let mock = MockTransport::new();
//! mock.inject(vec![0x06, 0x10, 0x02, 0x06, 0x00, 0x08, 0x00, 0x24]).unwrap();
//!
//! let mut buf = [0u8; 64];
//! let (n, from) = embassy_futures::block_on(mock.recv_from(&mut buf)).unwrap();
//! assert_eq!(n, 8);
//! assert_eq!(from, MockTransport::GATEWAY);
//! ```

use crate::error::{KnxError, Result};
use crate::net::transport::AsyncTransport;
use crate::net::{IpEndpoint, Ipv4Addr};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

const QUEUE_DEPTH: usize = 32;

type Datagram = (Vec<u8>, IpEndpoint);

/// Mock transport for testing KNX communication without real network.
pub struct MockTransport {
    inbound: Channel<CriticalSectionRawMutex, Datagram, QUEUE_DEPTH>,
    outbound: Channel<CriticalSectionRawMutex, Datagram, QUEUE_DEPTH>,
    sent_count: AtomicUsize,
    fail_sends: AtomicBool,
    closed: AtomicBool,
}

impl core::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MockTransport")
            .field("sent_count", &self.sent_count())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Source reported for datagrams injected without an explicit endpoint
    pub const GATEWAY: IpEndpoint = IpEndpoint::new(Ipv4Addr::new(192, 168, 1, 10), 3671);

    pub const fn new() -> Self {
        Self {
            inbound: Channel::new(),
            outbound: Channel::new(),
            sent_count: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue a datagram from [`Self::GATEWAY`] for the next `recv_from()`.
    ///
    /// # Errors
    ///
    /// Fails when the inbound queue is full.
    pub fn inject(&self, data: Vec<u8>) -> Result<()> {
        self.inject_from(data, Self::GATEWAY)
    }

    /// Queue a datagram with a specific source endpoint.
    pub fn inject_from(&self, data: Vec<u8>, from: IpEndpoint) -> Result<()> {
        self.inbound
            .try_send((data, from))
            .map_err(|_| KnxError::send_failed())
    }

    /// Wait for the next datagram the code under test sent.
    pub async fn next_sent(&self) -> Datagram {
        self.outbound.receive().await
    }

    /// Next sent datagram, if one is queued.
    pub fn try_next_sent(&self) -> Option<Datagram> {
        self.outbound.try_receive().ok()
    }

    /// Total number of datagrams sent so far.
    pub fn sent_count(&self) -> usize {
        self.sent_count.load(Ordering::Relaxed)
    }

    /// Make every following `send_to()` fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    /// Number of injected datagrams not yet received.
    pub fn pending_inbound(&self) -> usize {
        self.inbound.len()
    }
}

impl AsyncTransport for MockTransport {
    async fn send_to(&self, data: &[u8], addr: IpEndpoint) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(KnxError::transport_closed());
        }
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(KnxError::send_failed());
        }
        self.sent_count.fetch_add(1, Ordering::Relaxed);
        self.outbound
            .try_send((data.to_vec(), addr))
            .map_err(|_| KnxError::send_failed())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, IpEndpoint)> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(KnxError::transport_closed());
        }
        let (data, from) = self.inbound.receive().await;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok((n, from))
    }

    fn is_ready(&self) -> bool {
        !self.closed.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use embassy_futures::block_on;

    #[test]
    fn test_mock_send_receive() {
        let mock = MockTransport::new();
        let target = IpEndpoint::new(Ipv4Addr::new(192, 168, 1, 20), 3671);

        block_on(mock.send_to(&[0x06, 0x10], target)).unwrap();
        assert_eq!(mock.sent_count(), 1);
        assert_eq!(mock.try_next_sent(), Some((vec![0x06, 0x10], target)));
        assert_eq!(mock.try_next_sent(), None);
    }

    #[test]
    fn test_mock_fifo_order() {
        let mock = MockTransport::new();
        mock.inject(vec![1]).unwrap();
        mock.inject(vec![2, 2]).unwrap();
        assert_eq!(mock.pending_inbound(), 2);

        let mut buf = [0u8; 8];
        let (n, _) = block_on(mock.recv_from(&mut buf)).unwrap();
        assert_eq!(&buf[..n], &[1]);
        let (n, _) = block_on(mock.recv_from(&mut buf)).unwrap();
        assert_eq!(&buf[..n], &[2, 2]);
    }

    #[test]
    fn test_mock_failures() {
        let mock = MockTransport::new();
        mock.set_fail_sends(true);
        assert!(block_on(mock.send_to(&[0], MockTransport::GATEWAY)).is_err());
        mock.set_fail_sends(false);

        mock.close();
        assert!(!mock.is_ready());
        let mut buf = [0u8; 4];
        assert!(block_on(mock.recv_from(&mut buf)).is_err());
    }
}
