//! KNX Individual Address implementation.
//!
//! Individual addresses identify physical devices on the KNX bus.
//! Format: Area.Line.Device (e.g., 1.1.5)
//! - Area: 0-15 (4 bits)
//! - Line: 0-15 (4 bits)
//! - Device: 0-255 (8 bits)

use crate::error::{KnxError, Result};
use crate::protocol::codec::{FrameReader, FrameWriter};
use core::fmt;

/// KNX Individual Address (Area.Line.Device)
///
/// # Examples
///
/// ```
/// use knx_tunnel::IndividualAddress;
///
/// let addr = IndividualAddress::new(1, 1, 5).unwrap();
/// assert_eq!(addr.to_string(), "1.1.5");
/// assert_eq!(addr.raw(), 0x1105);
///
/// let parsed: IndividualAddress = "1.1.5".parse().unwrap();
/// assert_eq!(parsed, addr);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndividualAddress {
    raw: u16,
}

impl IndividualAddress {
    /// Maximum area value (4 bits)
    pub const MAX_AREA: u8 = 15;
    /// Maximum line value (4 bits)
    pub const MAX_LINE: u8 = 15;

    /// `0.0.0`, used by a client that lets the gateway assign its address.
    pub const UNSET: Self = Self { raw: 0 };

    /// Create a new Individual Address from components.
    ///
    /// # Errors
    ///
    /// Returns an addressing error if `area` or `line` exceeds 15.
    pub fn new(area: u8, line: u8, device: u8) -> Result<Self> {
        if area > Self::MAX_AREA || line > Self::MAX_LINE {
            return Err(KnxError::address_out_of_range());
        }
        Ok(Self::from_parts_unchecked(area, line, device))
    }

    /// Build from components already known to be in range.
    pub(crate) const fn from_parts_unchecked(area: u8, line: u8, device: u8) -> Self {
        Self {
            raw: ((area as u16 & 0x0F) << 12) | ((line as u16 & 0x0F) << 8) | device as u16,
        }
    }

    pub(crate) const fn from_raw_const(raw: u16) -> Self {
        Self { raw }
    }

    #[inline(always)]
    pub const fn raw(self) -> u16 {
        self.raw
    }

    #[inline(always)]
    pub const fn area(self) -> u8 {
        ((self.raw >> 12) & 0x0F) as u8
    }

    #[inline(always)]
    pub const fn line(self) -> u8 {
        ((self.raw >> 8) & 0x0F) as u8
    }

    #[inline(always)]
    pub const fn device(self) -> u8 {
        (self.raw & 0xFF) as u8
    }

    pub fn encode(&self, w: &mut FrameWriter) {
        w.write_u16(self.raw);
    }

    pub fn decode(r: &mut FrameReader<'_>) -> Result<Self> {
        Ok(Self { raw: r.read_u16()? })
    }
}

impl fmt::Display for IndividualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.area(), self.line(), self.device())
    }
}

impl From<u16> for IndividualAddress {
    #[inline(always)]
    fn from(raw: u16) -> Self {
        Self { raw }
    }
}

impl From<IndividualAddress> for u16 {
    #[inline(always)]
    fn from(addr: IndividualAddress) -> u16 {
        addr.raw
    }
}

impl core::str::FromStr for IndividualAddress {
    type Err = KnxError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('.').map(|p| p.parse::<u8>().ok());
        let (Some(Some(area)), Some(Some(line)), Some(Some(device)), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(KnxError::invalid_individual_address());
        };
        Self::new(area, line, device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_valid() {
        let addr = IndividualAddress::new(1, 2, 3).unwrap();
        assert_eq!(addr.area(), 1);
        assert_eq!(addr.line(), 2);
        assert_eq!(addr.device(), 3);
        assert_eq!(addr.raw(), 0x1203);
    }

    #[test]
    fn test_new_out_of_range() {
        assert!(IndividualAddress::new(16, 0, 0).is_err());
        assert!(IndividualAddress::new(0, 16, 0).is_err());
    }

    #[test]
    fn test_wire_format() {
        let addr = IndividualAddress::new(15, 15, 255).unwrap();
        let mut w = FrameWriter::new();
        addr.encode(&mut w);
        assert_eq!(w.as_slice(), &[0xFF, 0xFF]);
        let mut r = FrameReader::new(w.as_slice());
        assert_eq!(IndividualAddress::decode(&mut r).unwrap(), addr);
    }

    #[test]
    fn test_display() {
        assert_eq!(IndividualAddress::from(0x1105).to_string(), "1.1.5");
    }

    #[test]
    fn test_from_str_invalid() {
        assert!("1.2".parse::<IndividualAddress>().is_err());
        assert!("16.0.0".parse::<IndividualAddress>().is_err());
        assert!("1.2.3.4".parse::<IndividualAddress>().is_err());
        assert!("a.b.c".parse::<IndividualAddress>().is_err());
        assert!("".parse::<IndividualAddress>().is_err());
    }
}
