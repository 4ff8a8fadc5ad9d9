//! KNX addressing system.
//!
//! KNX uses two types of addresses:
//! - Individual addresses for physical devices (Area.Line.Device)
//! - Group addresses for logical grouping (Main/Middle/Sub or Main/Sub)
//!
//! Both are 16-bit values on the wire. A cEMI frame tells them apart by the
//! address-type bit of control field 2, see [`Address::from_raw`].

pub mod group;
pub mod individual;
pub mod serial;

use core::fmt;

pub use group::{group_address_style, set_group_address_style, GroupAddress, GroupAddressStyle};
pub use individual::IndividualAddress;
pub use serial::SerialNumber;

/// Destination of a bus frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Address {
    Individual(IndividualAddress),
    Group(GroupAddress),
}

impl Address {
    /// Interpret a raw 16-bit value as group or individual address.
    pub const fn from_raw(raw: u16, is_group: bool) -> Self {
        if is_group {
            Self::Group(GroupAddress::from_raw_const(raw))
        } else {
            Self::Individual(IndividualAddress::from_raw_const(raw))
        }
    }

    pub const fn raw(self) -> u16 {
        match self {
            Self::Individual(a) => a.raw(),
            Self::Group(a) => a.raw(),
        }
    }

    pub const fn is_group(self) -> bool {
        matches!(self, Self::Group(_))
    }
}

impl From<IndividualAddress> for Address {
    fn from(addr: IndividualAddress) -> Self {
        Self::Individual(addr)
    }
}

impl From<GroupAddress> for Address {
    fn from(addr: GroupAddress) -> Self {
        Self::Group(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Individual(a) => a.fmt(f),
            Self::Group(a) => a.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_kind_from_raw() {
        let group = Address::from_raw(0x0A03, true);
        let individual = Address::from_raw(0x0A03, false);
        assert!(group.is_group());
        assert!(!individual.is_group());
        assert_eq!(group.raw(), individual.raw());
        assert_ne!(group, individual);
    }

    // The only test touching the process-wide style; it restores the default.
    #[test]
    fn test_group_display_style() {
        let addr = GroupAddress::new(1, 2, 3).unwrap();
        set_group_address_style(GroupAddressStyle::TwoLevel);
        assert_eq!(format!("{addr}"), "1/515");
        set_group_address_style(GroupAddressStyle::Free);
        assert_eq!(format!("{}", Address::Group(addr)), "2563");
        set_group_address_style(GroupAddressStyle::ThreeLevel);
        assert_eq!(format!("{addr}"), "1/2/3");
        assert_eq!(group_address_style(), GroupAddressStyle::ThreeLevel);

        // individual addresses ignore the style
        assert_eq!(format!("{}", Address::from_raw(0x1105, false)), "1.1.5");
    }
}
