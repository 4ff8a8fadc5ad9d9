//! Transport and application layer control information.
//!
//! The first octet after the NPDU length carries the TPCI in its upper six
//! bits. For data packets its low two bits are the high bits of the 10-bit
//! APCI, which continues into the next octet:
//!
//! ```text
//!   octet 0                      octet 1              octets 2..
//! ┌───┬───┬─────────┬──────┐ ┌──────┬────────────┐ ┌───────────┐
//! │ C │ N │ seq 5-2 │ A9-8 │ │ A7-6 │ A5-0/data  │ │ data      │
//! └───┴───┴─────────┴──────┘ └──────┴────────────┘ └───────────┘
//!   C = control packet, N = numbered
//! ```
//!
//! Control packets (`T_Connect`, `T_Disconnect`, `T_ACK`, `T_NAK`) are a
//! single octet with the control type in bits 1-0 and no APDU.
//!
//! Some APCI types pack a small value into A5-0 instead of appending a byte;
//! the packing rule is part of each type's [`ApciDescriptor`].

use crate::error::{KnxError, Result};
use crate::protocol::codec::FrameWriter;
use alloc::vec::Vec;

/// Largest value that fits into the six packed APCI bits
pub const MAX_PACKED_VALUE: u8 = 0x3F;

/// Largest data length representable by the one-byte NPDU length field
pub const MAX_APDU_DATA: usize = 254;

// =============================================================================
// TPCI
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketType {
    Data,
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequenceType {
    Unnumbered,
    Numbered,
}

/// Transport-layer control packet kind (bits 1-0 of a control TPCI)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ControlType {
    Connect = 0b00,
    Disconnect = 0b01,
    Ack = 0b10,
    Nak = 0b11,
}

impl ControlType {
    const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Connect,
            0b01 => Self::Disconnect,
            0b10 => Self::Ack,
            _ => Self::Nak,
        }
    }
}

/// Transport Layer Protocol Control Information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tpci {
    pub packet_type: PacketType,
    pub sequence_type: SequenceType,
    /// 4-bit sequence number, 0 for unnumbered packets
    pub sequence_number: u8,
    /// Set for control packets only
    pub control_type: Option<ControlType>,
}

impl Tpci {
    /// `T_Data_Group` / `T_Data_Broadcast` / `T_Data_Individual`
    pub const fn unnumbered_data() -> Self {
        Self {
            packet_type: PacketType::Data,
            sequence_type: SequenceType::Unnumbered,
            sequence_number: 0,
            control_type: None,
        }
    }

    /// `T_Data_Connected` with a sequence number
    pub const fn numbered_data(sequence: u8) -> Self {
        Self {
            packet_type: PacketType::Data,
            sequence_type: SequenceType::Numbered,
            sequence_number: sequence & 0x0F,
            control_type: None,
        }
    }

    pub const fn connect() -> Self {
        Self::unnumbered_control(ControlType::Connect)
    }

    pub const fn disconnect() -> Self {
        Self::unnumbered_control(ControlType::Disconnect)
    }

    pub const fn ack(sequence: u8) -> Self {
        Self::numbered_control(ControlType::Ack, sequence)
    }

    pub const fn nak(sequence: u8) -> Self {
        Self::numbered_control(ControlType::Nak, sequence)
    }

    const fn unnumbered_control(control: ControlType) -> Self {
        Self {
            packet_type: PacketType::Control,
            sequence_type: SequenceType::Unnumbered,
            sequence_number: 0,
            control_type: Some(control),
        }
    }

    const fn numbered_control(control: ControlType, sequence: u8) -> Self {
        Self {
            packet_type: PacketType::Control,
            sequence_type: SequenceType::Numbered,
            sequence_number: sequence & 0x0F,
            control_type: Some(control),
        }
    }

    /// Decode from the first NPDU octet. The low two bits are read as the
    /// control type for control packets and ignored otherwise.
    pub const fn from_octet(octet: u8) -> Self {
        let numbered = octet & 0x40 != 0;
        let sequence_number = if numbered { (octet >> 2) & 0x0F } else { 0 };
        let sequence_type = if numbered {
            SequenceType::Numbered
        } else {
            SequenceType::Unnumbered
        };
        if octet & 0x80 != 0 {
            Self {
                packet_type: PacketType::Control,
                sequence_type,
                sequence_number,
                control_type: Some(ControlType::from_bits(octet)),
            }
        } else {
            Self {
                packet_type: PacketType::Data,
                sequence_type,
                sequence_number,
                control_type: None,
            }
        }
    }

    /// Encode into the upper six bits of an octet (plus the control type).
    pub const fn to_octet(self) -> u8 {
        let mut octet = 0u8;
        if matches!(self.packet_type, PacketType::Control) {
            octet |= 0x80;
        }
        if matches!(self.sequence_type, SequenceType::Numbered) {
            octet |= 0x40 | ((self.sequence_number & 0x0F) << 2);
        }
        if let Some(control) = self.control_type {
            octet |= control as u8;
        }
        octet
    }

    #[inline]
    pub const fn is_data(self) -> bool {
        matches!(self.packet_type, PacketType::Data)
    }

    #[inline]
    pub const fn is_numbered(self) -> bool {
        matches!(self.sequence_type, SequenceType::Numbered)
    }
}

// =============================================================================
// APCI
// =============================================================================

/// Whether an APCI type carries data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataMode {
    Required,
    None,
    Optional,
}

/// How data shares the second APCI octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Packing {
    /// The code uses all ten bits; data is appended.
    Never,
    /// A single byte `<= 0x3F` is packed into bits 5-0; anything else is appended.
    Optimized,
    /// The first data byte always occupies bits 5-0 (count, channel, type).
    FirstByte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ApciDescriptor {
    pub code: u16,
    pub data_mode: DataMode,
    pub packing: Packing,
}

/// Application layer services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ApciType {
    GroupValueRead,
    GroupValueResponse,
    GroupValueWrite,
    IndividualAddressWrite,
    IndividualAddressRead,
    IndividualAddressResponse,
    AdcRead,
    AdcResponse,
    MemoryRead,
    MemoryResponse,
    MemoryWrite,
    DeviceDescriptorRead,
    DeviceDescriptorResponse,
    Restart,
    AuthorizeRequest,
    AuthorizeResponse,
    PropertyValueRead,
    PropertyValueResponse,
    PropertyValueWrite,
    PropertyDescriptionRead,
    PropertyDescriptionResponse,
    IndividualAddressSerialNumberRead,
    IndividualAddressSerialNumberResponse,
    IndividualAddressSerialNumberWrite,
    /// Any other 10-bit code; data is carried through unchanged
    Unknown(u16),
}

const fn desc(code: u16, data_mode: DataMode, packing: Packing) -> ApciDescriptor {
    ApciDescriptor {
        code,
        data_mode,
        packing,
    }
}

/// Every named type, in code order.
const KNOWN_TYPES: [ApciType; 24] = [
    ApciType::GroupValueRead,
    ApciType::GroupValueResponse,
    ApciType::GroupValueWrite,
    ApciType::IndividualAddressWrite,
    ApciType::IndividualAddressRead,
    ApciType::IndividualAddressResponse,
    ApciType::AdcRead,
    ApciType::AdcResponse,
    ApciType::MemoryRead,
    ApciType::MemoryResponse,
    ApciType::MemoryWrite,
    ApciType::DeviceDescriptorRead,
    ApciType::DeviceDescriptorResponse,
    ApciType::Restart,
    ApciType::AuthorizeRequest,
    ApciType::AuthorizeResponse,
    ApciType::PropertyValueRead,
    ApciType::PropertyValueResponse,
    ApciType::PropertyValueWrite,
    ApciType::PropertyDescriptionRead,
    ApciType::PropertyDescriptionResponse,
    ApciType::IndividualAddressSerialNumberRead,
    ApciType::IndividualAddressSerialNumberResponse,
    ApciType::IndividualAddressSerialNumberWrite,
];

impl ApciType {
    pub const fn descriptor(self) -> ApciDescriptor {
        use DataMode as D;
        use Packing as P;
        match self {
            Self::GroupValueRead => desc(0x000, D::None, P::Never),
            Self::GroupValueResponse => desc(0x040, D::Required, P::Optimized),
            Self::GroupValueWrite => desc(0x080, D::Required, P::Optimized),
            Self::IndividualAddressWrite => desc(0x0C0, D::Required, P::Never),
            Self::IndividualAddressRead => desc(0x100, D::None, P::Never),
            Self::IndividualAddressResponse => desc(0x140, D::None, P::Never),
            Self::AdcRead => desc(0x180, D::Required, P::FirstByte),
            Self::AdcResponse => desc(0x1C0, D::Required, P::FirstByte),
            Self::MemoryRead => desc(0x200, D::Required, P::FirstByte),
            Self::MemoryResponse => desc(0x240, D::Required, P::FirstByte),
            Self::MemoryWrite => desc(0x280, D::Required, P::FirstByte),
            Self::DeviceDescriptorRead => desc(0x300, D::Required, P::FirstByte),
            Self::DeviceDescriptorResponse => desc(0x340, D::Required, P::FirstByte),
            Self::Restart => desc(0x380, D::Optional, P::Never),
            Self::AuthorizeRequest => desc(0x3D1, D::Required, P::Never),
            Self::AuthorizeResponse => desc(0x3D2, D::Required, P::Never),
            Self::PropertyValueRead => desc(0x3D5, D::Required, P::Never),
            Self::PropertyValueResponse => desc(0x3D6, D::Required, P::Never),
            Self::PropertyValueWrite => desc(0x3D7, D::Required, P::Never),
            Self::PropertyDescriptionRead => desc(0x3D8, D::Required, P::Never),
            Self::PropertyDescriptionResponse => desc(0x3D9, D::Required, P::Never),
            Self::IndividualAddressSerialNumberRead => desc(0x3DC, D::Required, P::Never),
            Self::IndividualAddressSerialNumberResponse => desc(0x3DD, D::Required, P::Never),
            Self::IndividualAddressSerialNumberWrite => desc(0x3DE, D::Required, P::Never),
            Self::Unknown(code) => desc(code & 0x3FF, D::Optional, P::Never),
        }
    }

    #[inline]
    pub const fn code(self) -> u16 {
        self.descriptor().code
    }

    /// Resolve a 10-bit APCI value: exact match first, then the 4-bit class
    /// for types that use the low six bits for data. A class match on a type
    /// that owns all ten bits stays [`ApciType::Unknown`].
    pub fn from_code(apci: u16) -> Self {
        let apci = apci & 0x3FF;
        if let Some(t) = KNOWN_TYPES.iter().find(|t| t.code() == apci) {
            return *t;
        }
        let class = apci & 0x3C0;
        KNOWN_TYPES
            .iter()
            .find(|t| t.code() == class && t.descriptor().packing != Packing::Never)
            .copied()
            .unwrap_or(Self::Unknown(apci))
    }
}

// =============================================================================
// APDU
// =============================================================================

/// Application Protocol Data Unit: an APCI type plus its data bytes.
///
/// `data` always holds the logical values; whether a byte travels packed in
/// the APCI octet is decided by the type's [`Packing`]. A small value that
/// arrived appended to an optimized type is re-encoded appended.
///
/// # Examples
///
/// ```
/// use knx_tunnel::protocol::apdu::{Apdu, ApciType};
///
/// // 63 still fits into the six APCI bits
/// assert_eq!(Apdu::new(ApciType::GroupValueWrite, vec![63]).unwrap().size(), 2);
/// // 64 does not
/// assert_eq!(Apdu::new(ApciType::GroupValueWrite, vec![64]).unwrap().size(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    apci: ApciType,
    data: Vec<u8>,
    appended_small: bool,
}

impl Apdu {
    /// # Errors
    ///
    /// Fails when the data contradicts the type's data mode, when a
    /// first-byte packed value exceeds 63, or when the data is too long.
    pub fn new(apci: ApciType, data: Vec<u8>) -> Result<Self> {
        let d = apci.descriptor();
        match d.data_mode {
            DataMode::Required if data.is_empty() => return Err(KnxError::invalid_apci()),
            DataMode::None if !data.is_empty() => return Err(KnxError::invalid_apci()),
            _ => {}
        }
        if d.packing == Packing::FirstByte && data.first().is_some_and(|b| *b > MAX_PACKED_VALUE) {
            return Err(KnxError::invalid_apci());
        }
        if data.len() > MAX_APDU_DATA {
            return Err(KnxError::payload_too_large());
        }
        Ok(Self {
            apci,
            data,
            appended_small: false,
        })
    }

    #[inline]
    pub const fn apci(&self) -> ApciType {
        self.apci
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether a data byte travels in the APCI octet
    fn packed_value(&self) -> Option<u8> {
        match self.apci.descriptor().packing {
            Packing::Never => None,
            Packing::Optimized => match self.data.as_slice() {
                [v] if *v <= MAX_PACKED_VALUE && !self.appended_small => Some(*v),
                _ => None,
            },
            Packing::FirstByte => self.data.first().copied(),
        }
    }

    fn appended(&self) -> &[u8] {
        match self.apci.descriptor().packing {
            Packing::Never => &self.data,
            Packing::Optimized if self.packed_value().is_some() => &[],
            Packing::Optimized => &self.data,
            Packing::FirstByte => self.data.get(1..).unwrap_or(&[]),
        }
    }

    /// Octets from the TPCI/APCI octet to the end, i.e. NPDU length + 1.
    pub fn size(&self) -> usize {
        2 + self.appended().len()
    }

    /// Write TPCI/APCI octets plus data, merging `tpci` into the first octet.
    pub fn encode(&self, tpci: Tpci, w: &mut FrameWriter) {
        let code = self.apci.code();
        w.write_u8((tpci.to_octet() & 0xFC) | ((code >> 8) as u8 & 0x03));
        let packed = self.packed_value().unwrap_or(0) & MAX_PACKED_VALUE;
        w.write_u8((code & 0xFF) as u8 | packed);
        w.write_bytes(self.appended());
    }

    /// Decode from the TPCI/APCI octet onwards (`npdu_length + 1` octets).
    pub fn decode(octets: &[u8]) -> Result<Self> {
        let [first, second, rest @ ..] = octets else {
            return Err(KnxError::invalid_apci());
        };
        let raw = (u16::from(*first & 0x03) << 8) | u16::from(*second);
        let apci = ApciType::from_code(raw);
        let low = *second & MAX_PACKED_VALUE;

        let packing = apci.descriptor().packing;
        let data = match packing {
            Packing::Never => rest.to_vec(),
            Packing::Optimized if rest.is_empty() => alloc::vec![low],
            Packing::Optimized => rest.to_vec(),
            Packing::FirstByte => {
                let mut data = Vec::with_capacity(rest.len() + 1);
                data.push(low);
                data.extend_from_slice(rest);
                data
            }
        };
        let mut apdu = Self::new(apci, data)?;
        // standard 8-bit form of a value that would fit the APCI bits
        apdu.appended_small = packing == Packing::Optimized
            && matches!(rest, [v] if *v <= MAX_PACKED_VALUE);
        Ok(apdu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn encoded(apdu: &Apdu, tpci: Tpci) -> Vec<u8> {
        let mut w = FrameWriter::new();
        apdu.encode(tpci, &mut w);
        w.into_vec()
    }

    #[test]
    fn test_tpci_control_octets() {
        assert_eq!(Tpci::connect().to_octet(), 0x80);
        assert_eq!(Tpci::disconnect().to_octet(), 0x81);
        assert_eq!(Tpci::ack(3).to_octet(), 0xCE);
        assert_eq!(Tpci::nak(15).to_octet(), 0xFF);
        assert_eq!(Tpci::from_octet(0xCE), Tpci::ack(3));
        assert_eq!(Tpci::from_octet(0x80), Tpci::connect());
    }

    #[test]
    fn test_tpci_data_ignores_apci_bits() {
        let tpci = Tpci::from_octet(0x47);
        assert_eq!(tpci, Tpci::numbered_data(1));
        assert_eq!(Tpci::from_octet(0x03), Tpci::unnumbered_data());
    }

    #[test]
    fn test_optimized_boundary() {
        let small = Apdu::new(ApciType::GroupValueWrite, vec![63]).unwrap();
        assert_eq!(small.size(), 2);
        assert_eq!(encoded(&small, Tpci::unnumbered_data()), vec![0x00, 0xBF]);

        let large = Apdu::new(ApciType::GroupValueWrite, vec![64]).unwrap();
        assert_eq!(large.size(), 3);
        assert_eq!(encoded(&large, Tpci::unnumbered_data()), vec![0x00, 0x80, 0x40]);

        let two = Apdu::new(ApciType::GroupValueResponse, vec![0x0C, 0x1A]).unwrap();
        assert_eq!(two.size(), 4);
    }

    #[test]
    fn test_data_mode_validation() {
        let read = Apdu::new(ApciType::GroupValueRead, vec![]).unwrap();
        assert_eq!(read.size(), 2);
        assert!(Apdu::new(ApciType::GroupValueWrite, vec![]).is_err());
        assert!(Apdu::new(ApciType::GroupValueRead, vec![1]).is_err());
        assert!(Apdu::new(ApciType::MemoryRead, vec![64, 0x01, 0x00]).is_err());
        assert!(Apdu::new(ApciType::PropertyValueRead, vec![0; 255]).is_err());
    }

    #[test]
    fn test_first_byte_packing() {
        // read 4 bytes from 0x0104
        let apdu = Apdu::new(ApciType::MemoryRead, vec![4, 0x01, 0x04]).unwrap();
        assert_eq!(apdu.size(), 4);
        let bytes = encoded(&apdu, Tpci::numbered_data(2));
        assert_eq!(bytes, vec![0x4A, 0x04, 0x01, 0x04]);
        assert_eq!(Apdu::decode(&bytes).unwrap(), apdu);
    }

    #[test]
    fn test_decode_prefers_exact_code() {
        // 0x3D5 is inside the 0x3C0 class but has its own code
        let bytes = [0x43, 0xD5, 0x00, 0x07, 0x10, 0x01];
        let apdu = Apdu::decode(&bytes).unwrap();
        assert_eq!(apdu.apci(), ApciType::PropertyValueRead);
        assert_eq!(apdu.data(), &[0x00, 0x07, 0x10, 0x01]);

        // class match for a packed group value
        let apdu = Apdu::decode(&[0x00, 0x81]).unwrap();
        assert_eq!(apdu.apci(), ApciType::GroupValueWrite);
        assert_eq!(apdu.data(), &[0x01]);
    }

    #[test]
    fn test_unknown_apci_is_preserved() {
        let bytes = [0x03, 0xC5, 0xAA];
        let apdu = Apdu::decode(&bytes).unwrap();
        assert_eq!(apdu.apci(), ApciType::Unknown(0x3C5));
        assert_eq!(encoded(&apdu, Tpci::unnumbered_data()), bytes.to_vec());
    }

    #[test]
    fn test_appended_small_value_keeps_its_form() {
        let bytes = [0x00, 0x80, 0x05];
        let apdu = Apdu::decode(&bytes).unwrap();
        assert_eq!(apdu.apci(), ApciType::GroupValueWrite);
        assert_eq!(apdu.data(), &[0x05]);
        assert_eq!(apdu.size(), 3);
        assert_eq!(encoded(&apdu, Tpci::unnumbered_data()), bytes.to_vec());

        // the packed form still packs
        let packed = Apdu::decode(&[0x00, 0x85]).unwrap();
        assert_eq!(packed.size(), 2);
        assert_eq!(encoded(&packed, Tpci::unnumbered_data()), vec![0x00, 0x85]);
    }

    #[test]
    fn test_class_match_only_for_packing_types() {
        // 0x005 shares the GroupValueRead class but is not a group read
        let bytes = [0x00, 0x05];
        let apdu = Apdu::decode(&bytes).unwrap();
        assert_eq!(apdu.apci(), ApciType::Unknown(0x005));
        assert_eq!(encoded(&apdu, Tpci::unnumbered_data()), bytes.to_vec());

        assert_eq!(ApciType::from_code(0x381), ApciType::Unknown(0x381));
        assert_eq!(ApciType::from_code(0x245), ApciType::MemoryResponse);
        assert_eq!(ApciType::from_code(0x07F), ApciType::GroupValueResponse);
    }

    #[test]
    fn test_decode_too_short() {
        assert!(Apdu::decode(&[0x00]).is_err());
    }
}
