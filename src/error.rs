//! Error types for KNX operations following M-ERRORS-CANONICAL-STRUCTS guideline.
//!
//! This module provides structured error types with backtraces (when std is enabled)
//! and helper methods for error information.
//!
//! ## Taxonomy
//!
//! | Variant | Scope |
//! |---|---|
//! | [`KnxError::Protocol`] | malformed bytes, fatal to one decode call |
//! | [`KnxError::UnsupportedService`] | no codec registered, fatal to one frame |
//! | [`KnxError::FrameDecode`] | body decoding failed, wraps the cause |
//! | [`KnxError::Connection`] | handshake failure or lost connection |
//! | [`KnxError::Tunneling`] | acknowledgement failures |
//! | [`KnxError::Management`] | device reply violates the expected shape |
//! | [`KnxError::Timeout`] | one bounded wait expired |

use alloc::boxed::Box;
use core::fmt;

#[cfg(feature = "std")]
use std::backtrace::Backtrace;

/// Result type alias for KNX operations.
pub type Result<T> = core::result::Result<T, KnxError>;

// =============================================================================
// Error Kind Enums (Internal)
// =============================================================================

/// Protocol (format) error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum ProtocolErrorKind {
    InvalidHeaderLength,
    UnsupportedVersion,
    UnknownServiceType,
    LengthMismatch,
    Truncated,
    TrailingBytes,
    InvalidStructure,
    InvalidMessageCode,
    InvalidAdditionalInfo,
    InvalidTpci,
    InvalidApci,
    PayloadTooLarge,
    InvalidValue,
}

/// Connection error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum ConnectionErrorKind {
    Refused,
    Failed,
    Lost,
    NotConnected,
    AlreadyConnected,
}

/// Tunneling error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum TunnelingErrorKind {
    AckFailed,
}

/// Transport error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum TransportErrorKind {
    SendFailed,
    ReceiveFailed,
    Closed,
}

/// Addressing error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum AddressingErrorKind {
    InvalidIndividualAddress,
    InvalidGroupAddress,
    InvalidIpAddress,
    OutOfRange,
}

/// Management error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum ManagementErrorKind {
    ResponseMismatch,
    DeviceError,
    NotConnected,
    NoSubscriberSlot,
}

// =============================================================================
// Main Error Type
// =============================================================================

/// KNX protocol error types.
///
/// This is the main error type returned by all KNX operations.
/// It contains a backtrace (when std feature is enabled) and detailed
/// error information through helper methods.
#[derive(Debug)]
pub enum KnxError {
    /// Malformed bytes (fixed constant, size mismatch, unknown enumerant)
    Protocol(ProtocolError),
    /// A recognized service type without a registered codec
    UnsupportedService(u16),
    /// Decoding a frame body failed; carries the original cause
    FrameDecode(FrameDecodeError),
    /// Connection-related errors (connect, heartbeat, disconnect)
    Connection(ConnectionError),
    /// Tunneling-related errors (sequence, ACK)
    Tunneling(TunnelingError),
    /// Transport-related errors (send, receive)
    Transport(TransportError),
    /// Addressing errors (invalid address format, etc.)
    Addressing(AddressingError),
    /// Management errors (device reply does not match the request)
    Management(ManagementError),
    /// A bounded wait expired
    Timeout,
    /// Operation not valid in the current state
    InvalidState,
}

// =============================================================================
// Structured Error Types
// =============================================================================

/// Protocol error with optional backtrace
#[derive(Debug)]
pub struct ProtocolError {
    kind: ProtocolErrorKind,
    #[cfg(feature = "std")]
    backtrace: Backtrace,
}

impl ProtocolError {
    pub(crate) fn new(kind: ProtocolErrorKind) -> Self {
        Self {
            kind,
            #[cfg(feature = "std")]
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if the header length byte was wrong
    pub fn is_invalid_header_length(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::InvalidHeaderLength)
    }

    /// Check if this is an unsupported version error
    pub fn is_unsupported_version(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::UnsupportedVersion)
    }

    /// Check if the service type identifier is not a known value
    pub fn is_unknown_service_type(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::UnknownServiceType)
    }

    /// Check if a declared length disagrees with the actual data
    pub fn is_length_mismatch(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::LengthMismatch)
    }

    /// Check if the buffer ended early
    pub fn is_truncated(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::Truncated)
    }

    /// Check if the APDU/APCI combination was invalid
    pub fn is_invalid_apci(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::InvalidApci)
    }
}

/// Failure to decode the body of a frame whose header was valid.
#[derive(Debug)]
pub struct FrameDecodeError {
    service_type: u16,
    source: Box<KnxError>,
}

impl FrameDecodeError {
    /// Service type of the frame that failed
    pub fn service_type(&self) -> u16 {
        self.service_type
    }

    /// The error raised by the body codec
    pub fn cause(&self) -> &KnxError {
        &self.source
    }
}

/// Connection error with optional backtrace
#[derive(Debug)]
pub struct ConnectionError {
    kind: ConnectionErrorKind,
    status: u8,
    #[cfg(feature = "std")]
    backtrace: Backtrace,
}

impl ConnectionError {
    pub(crate) fn new(kind: ConnectionErrorKind) -> Self {
        Self::with_status(kind, 0)
    }

    pub(crate) fn with_status(kind: ConnectionErrorKind, status: u8) -> Self {
        Self {
            kind,
            status,
            #[cfg(feature = "std")]
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if the gateway refused the connection
    pub fn is_refused(&self) -> bool {
        matches!(self.kind, ConnectionErrorKind::Refused)
    }

    /// Check if establishing the connection failed (refused or no answer)
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self.kind,
            ConnectionErrorKind::Refused | ConnectionErrorKind::Failed
        )
    }

    /// Check if connection was lost
    pub fn is_lost(&self) -> bool {
        matches!(self.kind, ConnectionErrorKind::Lost)
    }

    /// Check if the operation required an established connection
    pub fn is_not_connected(&self) -> bool {
        matches!(self.kind, ConnectionErrorKind::NotConnected)
    }

    /// Status code reported by the gateway, 0 if none
    pub fn status(&self) -> u8 {
        self.status
    }
}

/// Tunneling error with optional backtrace
#[derive(Debug)]
pub struct TunnelingError {
    kind: TunnelingErrorKind,
    #[cfg(feature = "std")]
    backtrace: Backtrace,
}

impl TunnelingError {
    pub(crate) fn new(kind: TunnelingErrorKind) -> Self {
        Self {
            kind,
            #[cfg(feature = "std")]
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if the gateway never acknowledged a request
    pub fn is_ack_failed(&self) -> bool {
        matches!(self.kind, TunnelingErrorKind::AckFailed)
    }
}

/// Transport error with optional backtrace
#[derive(Debug)]
pub struct TransportError {
    kind: TransportErrorKind,
    #[cfg(feature = "std")]
    backtrace: Backtrace,
}

impl TransportError {
    pub(crate) fn new(kind: TransportErrorKind) -> Self {
        Self {
            kind,
            #[cfg(feature = "std")]
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if the transport has been closed
    pub fn is_closed(&self) -> bool {
        matches!(self.kind, TransportErrorKind::Closed)
    }
}

/// Addressing error with optional backtrace
#[derive(Debug)]
pub struct AddressingError {
    kind: AddressingErrorKind,
    #[cfg(feature = "std")]
    backtrace: Backtrace,
}

impl AddressingError {
    pub(crate) fn new(kind: AddressingErrorKind) -> Self {
        Self {
            kind,
            #[cfg(feature = "std")]
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if address is out of range
    pub fn is_out_of_range(&self) -> bool {
        matches!(self.kind, AddressingErrorKind::OutOfRange)
    }
}

/// Management error with optional backtrace
#[derive(Debug)]
pub struct ManagementError {
    kind: ManagementErrorKind,
    #[cfg(feature = "std")]
    backtrace: Backtrace,
}

impl ManagementError {
    pub(crate) fn new(kind: ManagementErrorKind) -> Self {
        Self {
            kind,
            #[cfg(feature = "std")]
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if the device reply did not match the request
    pub fn is_response_mismatch(&self) -> bool {
        matches!(self.kind, ManagementErrorKind::ResponseMismatch)
    }

    /// Check if the device reported an error for the request
    pub fn is_device_error(&self) -> bool {
        matches!(self.kind, ManagementErrorKind::DeviceError)
    }
}

// =============================================================================
// Convenience Constructors for KnxError
// =============================================================================

impl KnxError {
    // Protocol errors
    pub(crate) fn invalid_header_length() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidHeaderLength))
    }

    pub(crate) fn unsupported_version() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::UnsupportedVersion))
    }

    pub(crate) fn unknown_service_type() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::UnknownServiceType))
    }

    pub(crate) fn length_mismatch() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::LengthMismatch))
    }

    pub(crate) fn truncated() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::Truncated))
    }

    pub(crate) fn trailing_bytes() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::TrailingBytes))
    }

    pub(crate) fn invalid_structure() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidStructure))
    }

    pub(crate) fn invalid_message_code() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidMessageCode))
    }

    pub(crate) fn invalid_additional_info() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidAdditionalInfo))
    }

    pub(crate) fn invalid_tpci() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidTpci))
    }

    pub(crate) fn invalid_apci() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidApci))
    }

    pub(crate) fn payload_too_large() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::PayloadTooLarge))
    }

    pub(crate) fn invalid_value() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidValue))
    }

    // Registry errors
    pub(crate) const fn unsupported_service(service_type: u16) -> Self {
        Self::UnsupportedService(service_type)
    }

    pub(crate) fn frame_decode(service_type: u16, source: KnxError) -> Self {
        Self::FrameDecode(FrameDecodeError {
            service_type,
            source: Box::new(source),
        })
    }

    // Connection errors
    pub(crate) fn connection_refused(status: u8) -> Self {
        Self::Connection(ConnectionError::with_status(
            ConnectionErrorKind::Refused,
            status,
        ))
    }

    pub(crate) fn connection_failed() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::Failed))
    }

    pub(crate) fn connection_lost() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::Lost))
    }

    pub(crate) fn not_connected() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::NotConnected))
    }

    pub(crate) fn already_connected() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::AlreadyConnected))
    }

    // Tunneling errors
    pub(crate) fn tunneling_ack_failed() -> Self {
        Self::Tunneling(TunnelingError::new(TunnelingErrorKind::AckFailed))
    }

    // Transport errors, also raised by external transports
    pub fn send_failed() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::SendFailed))
    }

    pub fn receive_failed() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::ReceiveFailed))
    }

    pub fn transport_closed() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::Closed))
    }

    // Addressing errors
    pub(crate) fn invalid_group_address() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::InvalidGroupAddress))
    }

    pub(crate) fn invalid_individual_address() -> Self {
        Self::Addressing(AddressingError::new(
            AddressingErrorKind::InvalidIndividualAddress,
        ))
    }

    pub(crate) fn invalid_ip_address() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::InvalidIpAddress))
    }

    pub(crate) fn address_out_of_range() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::OutOfRange))
    }

    // Management errors
    pub(crate) fn response_mismatch() -> Self {
        Self::Management(ManagementError::new(ManagementErrorKind::ResponseMismatch))
    }

    pub(crate) fn device_error() -> Self {
        Self::Management(ManagementError::new(ManagementErrorKind::DeviceError))
    }

    pub(crate) fn management_not_connected() -> Self {
        Self::Management(ManagementError::new(ManagementErrorKind::NotConnected))
    }

    pub(crate) fn no_subscriber_slot() -> Self {
        Self::Management(ManagementError::new(ManagementErrorKind::NoSubscriberSlot))
    }

    // Probes used across the crate and by callers

    /// Check if this is a malformed-bytes error
    pub fn is_format_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Check if no codec was registered for the service
    pub fn is_unsupported_service(&self) -> bool {
        matches!(self, Self::UnsupportedService(_))
    }

    /// Check if a frame body failed to decode
    pub fn is_frame_decode(&self) -> bool {
        matches!(self, Self::FrameDecode(_))
    }

    /// Check if establishing the connection failed
    pub fn is_connect_error(&self) -> bool {
        matches!(self, Self::Connection(e) if e.is_connect_error())
    }

    /// Check if an established connection was lost
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Connection(e) if e.is_lost())
    }

    /// Check if a bounded wait expired
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Check if a device reply did not match the request
    pub fn is_response_mismatch(&self) -> bool {
        matches!(self, Self::Management(e) if e.is_response_mismatch())
    }
}

// =============================================================================
// Display Implementation
// =============================================================================

impl fmt::Display for KnxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnxError::Protocol(e) => write!(f, "Protocol error: {:?}", e.kind),
            KnxError::UnsupportedService(st) => {
                write!(f, "Unsupported service type: 0x{st:04X}")
            }
            KnxError::FrameDecode(e) => {
                write!(f, "Failed to decode frame 0x{:04X}: {}", e.service_type, e.source)
            }
            KnxError::Connection(e) if e.status != 0 => {
                write!(f, "Connection error: {:?} (status 0x{:02X})", e.kind, e.status)
            }
            KnxError::Connection(e) => write!(f, "Connection error: {:?}", e.kind),
            KnxError::Tunneling(e) => write!(f, "Tunneling error: {:?}", e.kind),
            KnxError::Transport(e) => write!(f, "Transport error: {:?}", e.kind),
            KnxError::Addressing(e) => write!(f, "Addressing error: {:?}", e.kind),
            KnxError::Management(e) => write!(f, "Management error: {:?}", e.kind),
            KnxError::Timeout => write!(f, "Operation timeout"),
            KnxError::InvalidState => write!(f, "Invalid state"),
        }

        // Note: Backtrace will be printed when std::error::Error::source() is called
    }
}

// Implement std::error::Error for std-based applications
#[cfg(feature = "std")]
impl std::error::Error for KnxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KnxError::FrameDecode(e) => Some(e.source.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_decode_keeps_cause() {
        let err = KnxError::frame_decode(0x0420, KnxError::truncated());
        assert!(err.is_frame_decode());
        match &err {
            KnxError::FrameDecode(e) => {
                assert_eq!(e.service_type(), 0x0420);
                assert!(e.cause().is_format_error());
            }
            _ => panic!("expected frame decode error"),
        }
    }

    #[test]
    fn test_connect_error_predicates() {
        assert!(KnxError::connection_refused(0x24).is_connect_error());
        assert!(KnxError::connection_failed().is_connect_error());
        assert!(!KnxError::connection_lost().is_connect_error());
        assert!(KnxError::connection_lost().is_connection_lost());
    }

    #[test]
    fn test_display() {
        let err = KnxError::unsupported_service(0x0531);
        assert_eq!(format!("{err}"), "Unsupported service type: 0x0531");
        assert_eq!(format!("{}", KnxError::Timeout), "Operation timeout");
    }
}
