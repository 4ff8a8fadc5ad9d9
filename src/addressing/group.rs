//! KNX Group Address implementation.
//!
//! Group addresses represent logical groupings of devices for functional control.
//! Three display formats are supported, selected process-wide with
//! [`set_group_address_style`]:
//! - 3-level: Main/Middle/Sub (e.g., 1/2/3) - the default
//! - 2-level: Main/Sub (e.g., 1/515)
//! - free: the raw 16-bit value (e.g., 2563)
//!
//! Internally stored as 16 bits; equality never depends on the style.
//! - Main: 5 bits (0-31)
//! - Middle: 3 bits (0-7)
//! - Sub: 8 bits (0-255), or 11 bits (0-2047) in 2-level form

use crate::error::{KnxError, Result};
use crate::protocol::codec::{FrameReader, FrameWriter};
use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

/// How group addresses are rendered by `Display`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum GroupAddressStyle {
    /// `main/sub` (5/11 bits)
    TwoLevel = 0,
    /// `main/middle/sub` (5/3/8 bits)
    ThreeLevel = 1,
    /// plain 16-bit number
    Free = 2,
}

static GROUP_ADDRESS_STYLE: AtomicU8 = AtomicU8::new(GroupAddressStyle::ThreeLevel as u8);

/// Select the display style for every group address in the process.
pub fn set_group_address_style(style: GroupAddressStyle) {
    GROUP_ADDRESS_STYLE.store(style as u8, Ordering::Relaxed);
}

/// Currently selected display style.
pub fn group_address_style() -> GroupAddressStyle {
    match GROUP_ADDRESS_STYLE.load(Ordering::Relaxed) {
        0 => GroupAddressStyle::TwoLevel,
        2 => GroupAddressStyle::Free,
        _ => GroupAddressStyle::ThreeLevel,
    }
}

/// KNX Group Address
///
/// # Examples
///
/// ```
/// use knx_tunnel::GroupAddress;
///
/// let addr = GroupAddress::new(1, 2, 3).unwrap();
/// assert_eq!(addr.to_string_3level(), "1/2/3");
/// assert_eq!(addr.to_string_2level(), "1/515");
/// assert_eq!(addr.raw(), 0x0A03);
///
/// let parsed: GroupAddress = "1/515".parse().unwrap();
/// assert_eq!(parsed, addr);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupAddress {
    raw: u16,
}

impl GroupAddress {
    /// Maximum main group value (5 bits)
    pub const MAX_MAIN: u8 = 31;
    /// Maximum middle group value (3 bits)
    pub const MAX_MIDDLE: u8 = 7;
    /// Maximum sub value for 2-level format (11 bits)
    pub const MAX_SUB_2LEVEL: u16 = 2047;

    /// Create a new 3-level Group Address (Main/Middle/Sub).
    ///
    /// # Errors
    ///
    /// Returns an addressing error if `main > 31` or `middle > 7`.
    pub fn new(main: u8, middle: u8, sub: u8) -> Result<Self> {
        if main > Self::MAX_MAIN || middle > Self::MAX_MIDDLE {
            return Err(KnxError::address_out_of_range());
        }
        Ok(Self {
            raw: (u16::from(main) << 11) | (u16::from(middle) << 8) | u16::from(sub),
        })
    }

    /// Create a new 2-level Group Address (Main/Sub).
    ///
    /// # Errors
    ///
    /// Returns an addressing error if `main > 31` or `sub > 2047`.
    pub fn new_2level(main: u8, sub: u16) -> Result<Self> {
        if main > Self::MAX_MAIN || sub > Self::MAX_SUB_2LEVEL {
            return Err(KnxError::address_out_of_range());
        }
        Ok(Self {
            raw: (u16::from(main) << 11) | sub,
        })
    }

    pub(crate) const fn from_raw_const(raw: u16) -> Self {
        Self { raw }
    }

    #[inline(always)]
    pub const fn raw(self) -> u16 {
        self.raw
    }

    #[inline(always)]
    pub const fn main(self) -> u8 {
        ((self.raw >> 11) & 0x1F) as u8
    }

    /// Middle group component for 3-level format (0-7).
    #[inline(always)]
    pub const fn middle(self) -> u8 {
        ((self.raw >> 8) & 0x07) as u8
    }

    /// Sub group component for 3-level format (0-255).
    #[inline(always)]
    pub const fn sub(self) -> u8 {
        (self.raw & 0xFF) as u8
    }

    /// Sub group component for 2-level format (0-2047).
    #[inline(always)]
    pub const fn sub_2level(self) -> u16 {
        self.raw & 0x07FF
    }

    /// Format as 3-level string (Main/Middle/Sub).
    pub fn to_string_3level(&self) -> heapless::String<16> {
        use core::fmt::Write;
        let mut s = heapless::String::new();
        let _ = write!(s, "{}/{}/{}", self.main(), self.middle(), self.sub());
        s
    }

    /// Format as 2-level string (Main/Sub).
    pub fn to_string_2level(&self) -> heapless::String<16> {
        use core::fmt::Write;
        let mut s = heapless::String::new();
        let _ = write!(s, "{}/{}", self.main(), self.sub_2level());
        s
    }

    pub fn encode(&self, w: &mut FrameWriter) {
        w.write_u16(self.raw);
    }

    pub fn decode(r: &mut FrameReader<'_>) -> Result<Self> {
        Ok(Self { raw: r.read_u16()? })
    }
}

impl From<u16> for GroupAddress {
    #[inline(always)]
    fn from(raw: u16) -> Self {
        Self { raw }
    }
}

impl From<GroupAddress> for u16 {
    #[inline(always)]
    fn from(addr: GroupAddress) -> u16 {
        addr.raw
    }
}

impl fmt::Display for GroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match group_address_style() {
            GroupAddressStyle::ThreeLevel => {
                write!(f, "{}/{}/{}", self.main(), self.middle(), self.sub())
            }
            GroupAddressStyle::TwoLevel => write!(f, "{}/{}", self.main(), self.sub_2level()),
            GroupAddressStyle::Free => write!(f, "{}", self.raw),
        }
    }
}

impl core::str::FromStr for GroupAddress {
    type Err = KnxError;

    /// Accepts all three styles regardless of the current display style.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('/');
        let first = parts.next().ok_or_else(KnxError::invalid_group_address)?;
        let second = parts.next();
        let third = parts.next();
        if parts.next().is_some() {
            return Err(KnxError::invalid_group_address());
        }

        match (second, third) {
            (None, None) => first
                .parse::<u16>()
                .map(Self::from)
                .map_err(|_| KnxError::invalid_group_address()),
            (Some(sub), None) => {
                let main = first.parse::<u8>().map_err(|_| KnxError::invalid_group_address())?;
                let sub = sub.parse::<u16>().map_err(|_| KnxError::invalid_group_address())?;
                Self::new_2level(main, sub)
            }
            (Some(middle), Some(sub)) => {
                let main = first.parse::<u8>().map_err(|_| KnxError::invalid_group_address())?;
                let middle = middle.parse::<u8>().map_err(|_| KnxError::invalid_group_address())?;
                let sub = sub.parse::<u8>().map_err(|_| KnxError::invalid_group_address())?;
                Self::new(main, middle, sub)
            }
            (None, Some(_)) => Err(KnxError::invalid_group_address()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_3level() {
        let addr = GroupAddress::new(1, 2, 3).unwrap();
        assert_eq!(addr.main(), 1);
        assert_eq!(addr.middle(), 2);
        assert_eq!(addr.sub(), 3);
        assert_eq!(addr.raw(), 0x0A03);
        assert!(GroupAddress::new(32, 0, 0).is_err());
        assert!(GroupAddress::new(0, 8, 0).is_err());
    }

    #[test]
    fn test_new_2level() {
        let addr = GroupAddress::new_2level(1, 234).unwrap();
        assert_eq!(addr.main(), 1);
        assert_eq!(addr.sub_2level(), 234);
        assert!(GroupAddress::new_2level(0, 2048).is_err());
    }

    #[test]
    fn test_formats_do_not_change_equality() {
        let three = GroupAddress::new(1, 2, 3).unwrap();
        let two = GroupAddress::new_2level(1, 515).unwrap();
        assert_eq!(three, two);
        assert_eq!(three.to_string_2level(), "1/515");
        assert_eq!(two.to_string_3level(), "1/2/3");
    }

    #[test]
    fn test_wire_format() {
        let addr = GroupAddress::new(31, 7, 255).unwrap();
        let mut w = FrameWriter::new();
        addr.encode(&mut w);
        assert_eq!(w.as_slice(), &[0xFF, 0xFF]);
        assert_eq!(GroupAddress::decode(&mut FrameReader::new(w.as_slice())).unwrap(), addr);
    }

    #[test]
    fn test_from_str() {
        let a: GroupAddress = "1/2/3".parse().unwrap();
        let b: GroupAddress = "1/515".parse().unwrap();
        let c: GroupAddress = "2563".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_from_str_invalid() {
        assert!("32/0/0".parse::<GroupAddress>().is_err());
        assert!("1/2/3/4".parse::<GroupAddress>().is_err());
        assert!("a/b/c".parse::<GroupAddress>().is_err());
        assert!("".parse::<GroupAddress>().is_err());
        assert!("1/2048".parse::<GroupAddress>().is_err());
        assert!("1/8/0".parse::<GroupAddress>().is_err());
    }
}
