#![cfg_attr(all(not(test), not(feature = "std")), no_std)]

//! # knx-tunnel
//!
//! KNXnet/IP client stack for tunneling and device management.
//!
//! The crate is split into a pure codec layer and a thin async layer on top:
//!
//! - [`protocol`] encodes and decodes KNXnet/IP frames through a
//!   [`ServiceRegistry`](protocol::ServiceRegistry), including the nested
//!   cEMI bus frame and its TPCI/APCI octets, and holds the sans-IO tunnel
//!   state machine
//! - [`objserver`] is the object-server protocol riding the same framing
//! - [`connection`] drives one tunnel over any [`AsyncTransport`](net::transport::AsyncTransport):
//!   handshake, acks, heartbeat and teardown
//! - [`management`] sends device management requests and correlates the
//!   replies
//!
//! The library is `no_std` + `alloc` without the default `std` feature and
//! runs on the Embassy primitives (`embassy-sync`, `embassy-time`).
//!
//! ## Example
//!
//! ```rust,no_run
//! use embassy_futures::select::select;
//! use knx_tunnel::configuration::ConnectionConfig;
//! use knx_tunnel::connection::Connection;
//! use knx_tunnel::protocol::{LData, ServiceRegistry};
//! use knx_tunnel::{ga, IndividualAddress};
//! use std::sync::Arc;
//!
//! # async fn demo(transport: knx_tunnel::net::mock_transport::MockTransport) -> knx_tunnel::Result<()> {
//! let config = ConnectionConfig::new("192.168.1.10:3671".parse()?);
//! let connection = Connection::new(transport, config, Arc::new(ServiceRegistry::knxnet_ip()));
//!
//! select(connection.run(), async {
//!     connection.connect().await?;
//!     let write = LData::group_value_write(IndividualAddress::UNSET, ga!(1 / 2 / 3), vec![1])?;
//!     connection.send_cemi(write.into()).await?;
//!     connection.close().await
//! })
//! .await;
//! # Ok(())
//! # }
//! ```

extern crate alloc;

// Macro modules (must be declared before use)
#[macro_use]
pub mod macros;
#[macro_use]
pub mod logging;

pub mod addressing;
pub mod configuration;
pub mod connection;
pub mod error;
pub mod management;
pub mod net;
pub mod objserver;
pub mod protocol;

// Re-export commonly used types
#[doc(inline)]
pub use addressing::{Address, GroupAddress, IndividualAddress};
#[doc(inline)]
pub use configuration::ConnectionConfig;
#[doc(inline)]
pub use connection::{CloseReason, Connection, ConnectionEvent};
#[doc(inline)]
pub use error::{KnxError, Result};
#[doc(inline)]
pub use net::{IpEndpoint, Ipv4Addr};
