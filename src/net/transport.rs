//! Network transport abstraction for KNXnet/IP communication.
//!
//! The connection consumes an opaque datagram transport: it sends
//! whole KNXnet/IP frames and receives whole datagrams. Socket setup,
//! multicast membership and the choice between UDP and anything else stay
//! with the implementation.
//!
//! Methods take `&self` so one receive loop and several send paths can
//! share the transport concurrently; implementations use interior
//! mutability where they need state.

use crate::error::Result;
use crate::net::IpEndpoint;

/// Asynchronous datagram transport.
///
/// # Examples
///
/// ```rust,ignore
/// use knx_tunnel::net::{transport::AsyncTransport, IpEndpoint};
///
/// struct UdpTransport(tokio::net::UdpSocket);
///
/// impl AsyncTransport for UdpTransport {
///     async fn send_to(&self, data: &[u8], addr: IpEndpoint) -> Result<()> {
///         self.0.send_to(data, std::net::SocketAddrV4::from(addr)).await
///             .map(|_| ())
///             .map_err(|_| KnxError::send_failed())
///     }
///     // ...
/// }
/// ```
#[allow(async_fn_in_trait)]
pub trait AsyncTransport {
    /// Send one datagram to `addr`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the datagram could not be handed to the network.
    async fn send_to(&self, data: &[u8], addr: IpEndpoint) -> Result<()>;

    /// Wait for the next datagram.
    ///
    /// # Returns
    ///
    /// Number of bytes written to `buf` and the sender's endpoint.
    ///
    /// # Errors
    ///
    /// Returns a transport error if receiving failed or the transport is closed.
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, IpEndpoint)>;

    /// Whether the transport can currently send and receive.
    fn is_ready(&self) -> bool {
        true
    }

    /// Release the transport. Further calls fail.
    fn close(&self) {}
}
