//! KNX serial number.
//!
//! Six bytes burnt into every device: a 2-byte manufacturer code followed by
//! a 4-byte manufacturer-specific number. Displayed as `mmmm:nnnnnnnn` in hex.

use crate::error::{KnxError, Result};
use crate::protocol::codec::{FrameReader, FrameWriter};
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerialNumber {
    bytes: [u8; 6],
}

impl SerialNumber {
    pub const SIZE: usize = 6;

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }

    /// Build from manufacturer code and manufacturer-specific part.
    pub const fn from_parts(manufacturer: u16, number: u32) -> Self {
        let m = manufacturer.to_be_bytes();
        let n = number.to_be_bytes();
        Self {
            bytes: [m[0], m[1], n[0], n[1], n[2], n[3]],
        }
    }

    pub const fn manufacturer(&self) -> u16 {
        u16::from_be_bytes([self.bytes[0], self.bytes[1]])
    }

    pub const fn number(&self) -> u32 {
        u32::from_be_bytes([self.bytes[2], self.bytes[3], self.bytes[4], self.bytes[5]])
    }

    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.bytes
    }

    pub fn encode(&self, w: &mut FrameWriter) {
        w.write_bytes(&self.bytes);
    }

    pub fn decode(r: &mut FrameReader<'_>) -> Result<Self> {
        Ok(Self {
            bytes: r.read_array()?,
        })
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:08x}", self.manufacturer(), self.number())
    }
}

impl core::str::FromStr for SerialNumber {
    type Err = KnxError;

    fn from_str(s: &str) -> Result<Self> {
        let (m, n) = s.split_once(':').ok_or_else(KnxError::invalid_value)?;
        if m.len() != 4 || n.len() != 8 {
            return Err(KnxError::invalid_value());
        }
        let manufacturer = u16::from_str_radix(m, 16).map_err(|_| KnxError::invalid_value())?;
        let number = u32::from_str_radix(n, 16).map_err(|_| KnxError::invalid_value())?;
        Ok(Self::from_parts(manufacturer, number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parts() {
        let sn = SerialNumber::new([0x00, 0x83, 0x12, 0x34, 0xAB, 0xCD]);
        assert_eq!(sn.manufacturer(), 0x0083);
        assert_eq!(sn.number(), 0x1234_ABCD);
        assert_eq!(SerialNumber::from_parts(0x0083, 0x1234_ABCD), sn);
    }

    #[test]
    fn test_display_and_parse() {
        let sn = SerialNumber::from_parts(0x00C5, 0x0001_F00D);
        assert_eq!(format!("{sn}"), "00c5:0001f00d");
        assert_eq!("00c5:0001f00d".parse::<SerialNumber>().unwrap(), sn);
        assert!("00c5-0001f00d".parse::<SerialNumber>().is_err());
        assert!("c5:1f00d".parse::<SerialNumber>().is_err());
    }

    #[test]
    fn test_decode_truncated() {
        let mut r = FrameReader::new(&[0, 1, 2, 3, 4]);
        assert!(SerialNumber::decode(&mut r).is_err());
    }
}
