//! KNXnet/IP protocol implementation.
//!
//! Frame header and service bodies, the service registry that dispatches
//! between them, the nested cEMI/APDU codec and the sans-IO tunnel state
//! machine. Nothing in here performs I/O.

pub mod apdu;
pub mod cemi;
pub mod codec;
pub mod constants;
pub mod dib;
pub mod frame;
pub mod registry;
pub mod services;
pub mod tunnel;

pub use apdu::{Apdu, ApciType, Tpci};
pub use cemi::{CemiMessage, CemiMessageCode, CemiRegistry, LData};
pub use constants::ServiceType;
pub use frame::{Frame, FrameHeader, Hpai};
pub use registry::{ServiceBody, ServiceRegistry};
pub use services::{ConnectionHeader, Service};
pub use tunnel::{ConnectionState, TunnelCore};
