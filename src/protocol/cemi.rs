//! Common External Message Interface (cEMI) implementation.
//!
//! cEMI is the device message carried inside tunnelling, device
//! configuration and routing bodies. The first octet is the message code;
//! [`CemiRegistry`] maps it to a codec, and message codes without one
//! decode to [`CemiMessage::Raw`] so they survive a round trip.
//!
//! ## `L_Data` layout
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Message Code (1 byte)                    │
//! ├──────────────────────────────────────────┤
//! │ Additional Info Length (1 byte)          │
//! ├──────────────────────────────────────────┤
//! │ Additional Info {type, len, data}*       │
//! ├──────────────────────────────────────────┤
//! │ Control Field 1 (1 byte)                 │
//! │ Control Field 2 (1 byte)                 │
//! │ Source Address (2 bytes)                 │
//! │ Destination Address (2 bytes)            │
//! │ NPDU Length (1 byte)                     │
//! │ TPCI/APCI + Data (NPDU Length + 1)       │
//! └──────────────────────────────────────────┘
//! ```

use crate::addressing::{Address, GroupAddress, IndividualAddress};
use crate::error::{KnxError, Result};
use crate::protocol::apdu::{Apdu, ApciType, Tpci};
use crate::protocol::codec::{FrameReader, FrameWriter};
pub use crate::protocol::constants::CemiMessageCode;
use crate::protocol::constants::Priority;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

// =============================================================================
// Additional information
// =============================================================================

/// cEMI Additional Information Type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AdditionalInfoType {
    /// PL medium information
    PlMediumInfo = 0x01,
    /// RF medium information
    RfMediumInfo = 0x02,
    /// Busmonitor error flags
    BusmonitorErrorFlags = 0x03,
    /// Relative timestamp
    RelativeTimestamp = 0x04,
    /// Time delay
    TimeDelay = 0x05,
    /// Extended relative timestamp
    ExtendedRelativeTimestamp = 0x06,
    /// `BiBat` information
    BiBatInfo = 0x07,
    /// Manufacturer specific data
    ManufacturerSpecific = 0xFE,
}

impl AdditionalInfoType {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::PlMediumInfo),
            0x02 => Some(Self::RfMediumInfo),
            0x03 => Some(Self::BusmonitorErrorFlags),
            0x04 => Some(Self::RelativeTimestamp),
            0x05 => Some(Self::TimeDelay),
            0x06 => Some(Self::ExtendedRelativeTimestamp),
            0x07 => Some(Self::BiBatInfo),
            0xFE => Some(Self::ManufacturerSpecific),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdditionalInfo {
    pub info_type: AdditionalInfoType,
    pub data: Vec<u8>,
}

impl AdditionalInfo {
    pub fn new(info_type: AdditionalInfoType, data: Vec<u8>) -> Result<Self> {
        if data.len() > 253 {
            return Err(KnxError::invalid_additional_info());
        }
        Ok(Self { info_type, data })
    }

    /// Encoded size: type + length + data
    pub fn size(&self) -> usize {
        2 + self.data.len()
    }
}

fn decode_additional_info(r: &mut FrameReader<'_>) -> Result<Vec<AdditionalInfo>> {
    let total = usize::from(r.read_u8()?);
    let mut block = r.sub_reader(total)?;
    let mut infos = Vec::new();
    while block.remaining() > 0 {
        let info_type = AdditionalInfoType::from_u8(block.read_u8()?)
            .ok_or_else(KnxError::invalid_additional_info)?;
        let len = usize::from(block.read_u8()?);
        let data = block
            .read_bytes(len)
            .map_err(|_| KnxError::invalid_additional_info())?;
        infos.push(AdditionalInfo {
            info_type,
            data: data.to_vec(),
        });
    }
    Ok(infos)
}

fn encode_additional_info(infos: &[AdditionalInfo], w: &mut FrameWriter) -> Result<()> {
    let total: usize = infos.iter().map(AdditionalInfo::size).sum();
    let total = u8::try_from(total).map_err(|_| KnxError::invalid_additional_info())?;
    w.write_u8(total);
    for info in infos {
        w.write_u8(info.info_type as u8);
        // bounded by AdditionalInfo::new and the total check above
        w.write_u8(info.data.len() as u8);
        w.write_bytes(&info.data);
    }
    Ok(())
}

// =============================================================================
// Control fields
// =============================================================================

/// Control Field 1 of `L_Data` frame
///
/// ```text
/// Bit 7: Frame Type (0=extended, 1=standard)
/// Bit 6: Reserved
/// Bit 5: Repeat (0=repeat, 1=do not repeat)
/// Bit 4: System Broadcast (0=system, 1=broadcast)
/// Bit 3-2: Priority (00=system, 01=normal, 10=urgent, 11=low)
/// Bit 1: Acknowledge Request (0=no ack, 1=ack requested)
/// Bit 0: Confirm (0=no error, 1=error)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlField1 {
    raw: u8,
}

impl From<u8> for ControlField1 {
    #[inline(always)]
    fn from(raw: u8) -> Self {
        Self { raw }
    }
}

impl From<ControlField1> for u8 {
    #[inline(always)]
    fn from(ctrl: ControlField1) -> u8 {
        ctrl.raw
    }
}

impl ControlField1 {
    #[inline(always)]
    pub const fn raw(self) -> u8 {
        self.raw
    }

    #[inline(always)]
    pub const fn is_standard_frame(self) -> bool {
        (self.raw & 0x80) != 0
    }

    #[inline(always)]
    pub const fn reserved(self) -> bool {
        (self.raw & 0x40) != 0
    }

    /// Check if repeat flag is set (do not repeat if true)
    #[inline(always)]
    pub const fn do_not_repeat(self) -> bool {
        (self.raw & 0x20) != 0
    }

    #[inline(always)]
    pub const fn is_broadcast(self) -> bool {
        (self.raw & 0x10) != 0
    }

    #[inline(always)]
    pub const fn priority(self) -> Priority {
        Priority::from_u8((self.raw >> 2) & 0x03)
    }

    #[inline(always)]
    pub const fn ack_requested(self) -> bool {
        (self.raw & 0x02) != 0
    }

    /// Confirm flag (error in an `L_Data.con`)
    #[inline(always)]
    pub const fn has_error(self) -> bool {
        (self.raw & 0x01) != 0
    }

    pub const fn new(
        standard_frame: bool,
        do_not_repeat: bool,
        broadcast: bool,
        priority: Priority,
        ack_requested: bool,
        has_error: bool,
    ) -> Self {
        let mut raw = 0u8;
        if standard_frame {
            raw |= 0x80;
        }
        if do_not_repeat {
            raw |= 0x20;
        }
        if broadcast {
            raw |= 0x10;
        }
        raw |= (priority.to_u8() & 0x03) << 2;
        if ack_requested {
            raw |= 0x02;
        }
        if has_error {
            raw |= 0x01;
        }
        Self { raw }
    }

    #[must_use]
    pub const fn with_priority(self, priority: Priority) -> Self {
        Self {
            raw: (self.raw & !0x0C) | ((priority.to_u8() & 0x03) << 2),
        }
    }
}

impl Default for ControlField1 {
    /// Standard frame, no repeat, broadcast, low priority (0xBC)
    #[inline]
    fn default() -> Self {
        Self { raw: 0xBC }
    }
}

/// Control Field 2 of `L_Data` frame
///
/// ```text
/// Bit 7: Destination Address Type (0=individual, 1=group)
/// Bit 6-4: Hop Count (0-7)
/// Bit 3-0: Extended Frame Format (0000=standard)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlField2 {
    raw: u8,
}

impl From<u8> for ControlField2 {
    #[inline(always)]
    fn from(raw: u8) -> Self {
        Self { raw }
    }
}

impl From<ControlField2> for u8 {
    #[inline(always)]
    fn from(ctrl: ControlField2) -> u8 {
        ctrl.raw
    }
}

impl ControlField2 {
    #[inline(always)]
    pub const fn raw(self) -> u8 {
        self.raw
    }

    #[inline(always)]
    pub const fn is_group_address(self) -> bool {
        (self.raw & 0x80) != 0
    }

    #[inline(always)]
    pub const fn hop_count(self) -> u8 {
        (self.raw >> 4) & 0x07
    }

    #[inline(always)]
    pub const fn extended_format(self) -> u8 {
        self.raw & 0x0F
    }

    pub const fn new(is_group: bool, hop_count: u8, extended_format: u8) -> Self {
        let mut raw = 0u8;
        if is_group {
            raw |= 0x80;
        }
        raw |= (hop_count & 0x07) << 4;
        raw |= extended_format & 0x0F;
        Self { raw }
    }
}

impl Default for ControlField2 {
    /// Group address, hop count 6, standard format (0xE0)
    #[inline]
    fn default() -> Self {
        Self { raw: 0xE0 }
    }
}

// =============================================================================
// L_Data
// =============================================================================

/// `L_Data.req` / `L_Data.con` / `L_Data.ind`
///
/// The APDU is present exactly when the TPCI is a data packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LData {
    pub message_code: CemiMessageCode,
    pub additional_info: Vec<AdditionalInfo>,
    pub ctrl1: ControlField1,
    pub ctrl2: ControlField2,
    pub source: IndividualAddress,
    /// Raw destination; its kind is given by `ctrl2`
    pub destination_raw: u16,
    pub tpci: Tpci,
    pub apdu: Option<Apdu>,
}

impl LData {
    /// Build a frame with default control fields.
    ///
    /// # Errors
    ///
    /// Fails when `apdu` presence does not match the TPCI packet type.
    pub fn new(
        message_code: CemiMessageCode,
        source: IndividualAddress,
        destination: Address,
        tpci: Tpci,
        apdu: Option<Apdu>,
    ) -> Result<Self> {
        if tpci.is_data() != apdu.is_some() {
            return Err(KnxError::invalid_tpci());
        }
        Ok(Self {
            message_code,
            additional_info: Vec::new(),
            ctrl1: ControlField1::default(),
            ctrl2: ControlField2::new(destination.is_group(), 6, 0),
            source,
            destination_raw: destination.raw(),
            tpci,
            apdu,
        })
    }

    /// `A_GroupValue_Write` request from `source` (0.0.0 lets the gateway fill it in)
    pub fn group_value_write(
        source: IndividualAddress,
        destination: GroupAddress,
        data: Vec<u8>,
    ) -> Result<Self> {
        let apdu = Apdu::new(ApciType::GroupValueWrite, data)?;
        Self::new(
            CemiMessageCode::LDataReq,
            source,
            destination.into(),
            Tpci::unnumbered_data(),
            Some(apdu),
        )
    }

    pub fn group_value_read(source: IndividualAddress, destination: GroupAddress) -> Result<Self> {
        let apdu = Apdu::new(ApciType::GroupValueRead, Vec::new())?;
        Self::new(
            CemiMessageCode::LDataReq,
            source,
            destination.into(),
            Tpci::unnumbered_data(),
            Some(apdu),
        )
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.ctrl1 = self.ctrl1.with_priority(priority);
        self
    }

    #[inline]
    pub fn destination(&self) -> Address {
        Address::from_raw(self.destination_raw, self.ctrl2.is_group_address())
    }

    #[inline]
    pub fn apci(&self) -> Option<ApciType> {
        self.apdu.as_ref().map(Apdu::apci)
    }

    #[inline]
    pub fn is_group_write(&self) -> bool {
        self.apci() == Some(ApciType::GroupValueWrite)
    }

    #[inline]
    pub fn is_group_read(&self) -> bool {
        self.apci() == Some(ApciType::GroupValueRead)
    }

    #[inline]
    pub fn is_group_response(&self) -> bool {
        self.apci() == Some(ApciType::GroupValueResponse)
    }

    /// Decode the body after the message code.
    pub fn decode(message_code: CemiMessageCode, r: &mut FrameReader<'_>) -> Result<Self> {
        let additional_info = decode_additional_info(r)?;
        let ctrl1 = ControlField1::from(r.read_u8()?);
        let ctrl2 = ControlField2::from(r.read_u8()?);
        let source = IndividualAddress::decode(r)?;
        let destination_raw = r.read_u16()?;
        let npdu_length = usize::from(r.read_u8()?);
        let npdu = r.read_bytes(npdu_length + 1)?;

        let tpci = Tpci::from_octet(npdu[0]);
        // a zero length carries no APDU whatever the packet type
        let apdu = match (tpci.is_data(), npdu_length) {
            (_, 0) => None,
            (true, _) => Some(Apdu::decode(npdu)?),
            (false, _) => return Err(KnxError::invalid_tpci()),
        };

        Ok(Self {
            message_code,
            additional_info,
            ctrl1,
            ctrl2,
            source,
            destination_raw,
            tpci,
            apdu,
        })
    }

    pub fn encode(&self, w: &mut FrameWriter) -> Result<()> {
        w.write_u8(self.message_code.to_u8());
        encode_additional_info(&self.additional_info, w)?;
        w.write_u8(self.ctrl1.raw());
        w.write_u8(self.ctrl2.raw());
        self.source.encode(w);
        w.write_u16(self.destination_raw);
        match (&self.apdu, self.tpci.is_data()) {
            (Some(apdu), true) => {
                let npdu_length =
                    u8::try_from(apdu.size() - 1).map_err(|_| KnxError::payload_too_large())?;
                w.write_u8(npdu_length);
                apdu.encode(self.tpci, w);
            }
            (None, false) => {
                w.write_u8(0);
                w.write_u8(self.tpci.to_octet());
            }
            _ => return Err(KnxError::invalid_tpci()),
        }
        Ok(())
    }

    /// Encoded size including the message code
    pub fn size(&self) -> usize {
        let info: usize = self.additional_info.iter().map(AdditionalInfo::size).sum();
        let npdu = self.apdu.as_ref().map_or(1, Apdu::size);
        // code + info length + info + ctrl1 + ctrl2 + src + dst + npdu length
        1 + 1 + info + 1 + 1 + 2 + 2 + 1 + npdu
    }
}

// =============================================================================
// Message + registry
// =============================================================================

/// A decoded cEMI message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CemiMessage {
    LData(LData),
    /// Message code without a registered codec; `payload` follows the code.
    Raw { message_code: u8, payload: Vec<u8> },
}

impl CemiMessage {
    pub const fn message_code(&self) -> u8 {
        match self {
            Self::LData(ldata) => ldata.message_code.to_u8(),
            Self::Raw { message_code, .. } => *message_code,
        }
    }

    pub const fn as_ldata(&self) -> Option<&LData> {
        match self {
            Self::LData(ldata) => Some(ldata),
            Self::Raw { .. } => None,
        }
    }
}

impl From<LData> for CemiMessage {
    fn from(ldata: LData) -> Self {
        Self::LData(ldata)
    }
}

/// Codec for one or more cEMI message codes.
pub trait CemiCodec: Send + Sync {
    /// Decode everything after the message code.
    fn decode(&self, message_code: u8, r: &mut FrameReader<'_>) -> Result<CemiMessage>;
    /// Encode the complete message, message code included.
    fn encode(&self, message: &CemiMessage, w: &mut FrameWriter) -> Result<()>;
}

struct LDataCodec;

impl CemiCodec for LDataCodec {
    fn decode(&self, message_code: u8, r: &mut FrameReader<'_>) -> Result<CemiMessage> {
        let code = CemiMessageCode::from_u8(message_code).ok_or_else(KnxError::invalid_message_code)?;
        LData::decode(code, r).map(CemiMessage::LData)
    }

    fn encode(&self, message: &CemiMessage, w: &mut FrameWriter) -> Result<()> {
        message
            .as_ldata()
            .ok_or_else(KnxError::invalid_message_code)?
            .encode(w)
    }
}

/// Message-code keyed cEMI codecs, built once and shared read-only.
pub struct CemiRegistry {
    codecs: BTreeMap<u8, Box<dyn CemiCodec>>,
}

impl core::fmt::Debug for CemiRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CemiRegistry")
            .field("message_codes", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CemiRegistry {
    /// Registry without any codec: every message decodes to `Raw`.
    pub fn empty() -> Self {
        Self {
            codecs: BTreeMap::new(),
        }
    }

    /// `L_Data.req`, `L_Data.con` and `L_Data.ind`
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for code in [
            CemiMessageCode::LDataReq,
            CemiMessageCode::LDataCon,
            CemiMessageCode::LDataInd,
        ] {
            registry.register(code.to_u8(), Box::new(LDataCodec));
        }
        registry
    }

    pub fn register(&mut self, message_code: u8, codec: Box<dyn CemiCodec>) {
        self.codecs.insert(message_code, codec);
    }

    /// Decode one message; the reader must be bounded to exactly the message.
    pub fn decode(&self, r: &mut FrameReader<'_>) -> Result<CemiMessage> {
        let message_code = r.read_u8()?;
        let message = match self.codecs.get(&message_code) {
            Some(codec) => codec.decode(message_code, r)?,
            None => CemiMessage::Raw {
                message_code,
                payload: r.read_rest().to_vec(),
            },
        };
        r.expect_end()?;
        Ok(message)
    }

    pub fn encode(&self, message: &CemiMessage, w: &mut FrameWriter) -> Result<()> {
        match message {
            CemiMessage::Raw {
                message_code,
                payload,
            } => {
                w.write_u8(*message_code);
                w.write_bytes(payload);
                Ok(())
            }
            CemiMessage::LData(ldata) => self
                .codecs
                .get(&ldata.message_code.to_u8())
                .ok_or_else(KnxError::invalid_message_code)?
                .encode(message, w),
        }
    }
}

impl Default for CemiRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn round_trip(message: &CemiMessage) -> Vec<u8> {
        let registry = CemiRegistry::standard();
        let mut w = FrameWriter::new();
        registry.encode(message, &mut w).unwrap();
        let bytes = w.into_vec();
        let decoded = registry.decode(&mut FrameReader::new(&bytes)).unwrap();
        assert_eq!(&decoded, message);
        bytes
    }

    #[test]
    fn test_control_field1_bits() {
        let ctrl = ControlField1::from(0xBC);
        assert!(ctrl.is_standard_frame());
        assert!(!ctrl.reserved());
        assert!(ctrl.do_not_repeat());
        assert!(ctrl.is_broadcast());
        assert_eq!(ctrl.priority(), Priority::Low);
        assert!(!ctrl.ack_requested());
        assert!(!ctrl.has_error());
        assert_eq!(ControlField1::new(true, true, true, Priority::Low, false, false), ctrl);
        assert_eq!(ctrl.with_priority(Priority::System).raw(), 0xB0);
    }

    #[test]
    fn test_control_field2_bits() {
        let ctrl = ControlField2::from(0xE0);
        assert!(ctrl.is_group_address());
        assert_eq!(ctrl.hop_count(), 6);
        assert_eq!(ctrl.extended_format(), 0);
        assert_eq!(ControlField2::new(false, 7, 0x0F).raw(), 0x7F);
    }

    #[test]
    fn test_group_write_wire_format() {
        let ga = GroupAddress::new(1, 2, 3).unwrap();
        let ldata = LData::group_value_write(IndividualAddress::UNSET, ga, vec![1]).unwrap();
        assert_eq!(ldata.size(), 11);
        let bytes = round_trip(&ldata.into());
        assert_eq!(
            bytes,
            vec![0x11, 0x00, 0xBC, 0xE0, 0x00, 0x00, 0x0A, 0x03, 0x01, 0x00, 0x81]
        );
    }

    #[test]
    fn test_indication_with_additional_info() {
        let bytes = [
            0x29, 0x04, 0x03, 0x02, 0xAB, 0xCD, // code, info (busmonitor flags)
            0xBC, 0xE0, 0x11, 0x05, 0x0A, 0x03, 0x03, 0x00, 0x80, 0x0C, 0x1A,
        ];
        let message = CemiRegistry::standard()
            .decode(&mut FrameReader::new(&bytes))
            .unwrap();
        let ldata = message.as_ldata().unwrap();
        assert_eq!(ldata.message_code, CemiMessageCode::LDataInd);
        assert_eq!(ldata.additional_info.len(), 1);
        assert_eq!(ldata.additional_info[0].data, vec![0xAB, 0xCD]);
        assert_eq!(ldata.source, IndividualAddress::from(0x1105));
        assert_eq!(ldata.destination(), Address::Group(GroupAddress::from(0x0A03)));
        assert!(ldata.is_group_write());
        assert_eq!(ldata.apdu.as_ref().unwrap().data(), &[0x0C, 0x1A]);
        assert_eq!(round_trip(&message), bytes.to_vec());
    }

    #[test]
    fn test_additional_info_length_mismatch() {
        // declares 5 bytes of info but the entry needs 4
        let bytes = [0x29, 0x05, 0x03, 0x02, 0xAB, 0xCD, 0xBC];
        let err = CemiRegistry::standard()
            .decode(&mut FrameReader::new(&bytes))
            .unwrap_err();
        assert!(err.is_format_error());
    }

    #[test]
    fn test_control_packet_has_no_apdu() {
        let ldata = LData::new(
            CemiMessageCode::LDataReq,
            IndividualAddress::UNSET,
            Address::Individual(IndividualAddress::new(1, 1, 10).unwrap()),
            Tpci::connect(),
            None,
        )
        .unwrap();
        let bytes = round_trip(&ldata.clone().into());
        assert_eq!(&bytes[6..], &[0x11, 0x0A, 0x00, 0x80]);
        assert_eq!(ldata.size(), bytes.len());
    }

    #[test]
    fn test_apdu_presence_must_match_tpci() {
        let dst = Address::Individual(IndividualAddress::from(0x110A));
        assert!(LData::new(
            CemiMessageCode::LDataReq,
            IndividualAddress::UNSET,
            dst,
            Tpci::unnumbered_data(),
            None,
        )
        .is_err());

        let mut ldata = LData::new(
            CemiMessageCode::LDataReq,
            IndividualAddress::UNSET,
            dst,
            Tpci::disconnect(),
            None,
        )
        .unwrap();
        ldata.apdu = Some(Apdu::new(ApciType::GroupValueRead, vec![]).unwrap());
        assert!(ldata.encode(&mut FrameWriter::new()).is_err());
    }

    #[test]
    fn test_data_packet_with_zero_length_has_no_apdu() {
        let bytes = [0x29, 0x00, 0xBC, 0xE0, 0x11, 0x05, 0x0A, 0x03, 0x00, 0x00];
        let message = CemiRegistry::standard()
            .decode(&mut FrameReader::new(&bytes))
            .unwrap();
        let ldata = message.as_ldata().unwrap();
        assert!(ldata.tpci.is_data());
        assert!(ldata.apdu.is_none());
        assert_eq!(ldata.destination(), Address::Group(GroupAddress::from(0x0A03)));

        // data without an APDU cannot be sent
        let mut w = FrameWriter::new();
        assert!(CemiRegistry::standard().encode(&message, &mut w).is_err());
    }

    #[test]
    fn test_appended_small_value_round_trips_byte_exact() {
        let bytes = [0x29, 0x00, 0xBC, 0xE0, 0x11, 0x05, 0x0A, 0x03, 0x02, 0x00, 0x80, 0x05];
        let message = CemiRegistry::standard()
            .decode(&mut FrameReader::new(&bytes))
            .unwrap();
        let ldata = message.as_ldata().unwrap();
        assert_eq!(ldata.apdu.as_ref().unwrap().data(), &[0x05]);
        assert_eq!(ldata.size(), bytes.len());

        let mut w = FrameWriter::new();
        CemiRegistry::standard().encode(&message, &mut w).unwrap();
        assert_eq!(w.as_slice(), &bytes);
    }

    #[test]
    fn test_unknown_message_code_is_raw() {
        let message = CemiMessage::Raw {
            message_code: 0xFC,
            payload: vec![0x00, 0x00, 0x01, 0x01, 0x01],
        };
        assert_eq!(round_trip(&message)[0], 0xFC);
        // an empty registry treats L_Data as raw too
        let raw = CemiRegistry::empty()
            .decode(&mut FrameReader::new(&[0x11, 0x00]))
            .unwrap();
        assert_eq!(raw.message_code(), 0x11);
        assert!(raw.as_ldata().is_none());
    }
}
