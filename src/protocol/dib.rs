//! Description information blocks and search request parameters.
//!
//! Both are `{length, type, data}` structures where `length` counts itself.
//! DIBs describe a device in search and description responses; SRPs narrow
//! an extended search.

use crate::addressing::{IndividualAddress, SerialNumber};
use crate::error::{KnxError, Result};
use crate::protocol::codec::{FrameReader, FrameWriter};
use alloc::vec::Vec;
use core::net::Ipv4Addr;

/// KNX medium codes used in the device information DIB
pub mod medium {
    pub const TP1: u8 = 0x02;
    pub const PL110: u8 = 0x04;
    pub const RF: u8 = 0x10;
    pub const KNX_IP: u8 = 0x20;
}

/// Service family identifiers
pub mod family {
    pub const CORE: u8 = 0x02;
    pub const DEVICE_MANAGEMENT: u8 = 0x03;
    pub const TUNNELLING: u8 = 0x04;
    pub const ROUTING: u8 = 0x05;
    pub const REMOTE_LOGGING: u8 = 0x06;
    pub const REMOTE_CONFIGURATION: u8 = 0x07;
    pub const OBJECT_SERVER: u8 = 0x08;
    pub const SECURITY: u8 = 0x09;
}

const DIB_DEVICE_INFO: u8 = 0x01;
const DIB_SUPP_SVC_FAMILIES: u8 = 0x02;
const FRIENDLY_NAME_LEN: usize = 30;

/// Read the `{length, type}` prefix and return a reader bounded to the data.
fn read_block<'a>(r: &mut FrameReader<'a>) -> Result<(u8, FrameReader<'a>)> {
    let length = usize::from(r.read_u8()?);
    if length < 2 {
        return Err(KnxError::invalid_structure());
    }
    let block_type = r.read_u8()?;
    Ok((block_type, r.sub_reader(length - 2)?))
}

/// Device information DIB (54 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInformation {
    pub medium: u8,
    /// Bit 0 is the programming mode flag
    pub status: u8,
    pub individual_address: IndividualAddress,
    pub project_installation_id: u16,
    pub serial_number: SerialNumber,
    pub multicast_address: Ipv4Addr,
    pub mac_address: [u8; 6],
    friendly_name: [u8; FRIENDLY_NAME_LEN],
}

impl DeviceInformation {
    pub const SIZE: usize = 54;

    pub fn new(
        medium: u8,
        individual_address: IndividualAddress,
        serial_number: SerialNumber,
        name: &str,
    ) -> Self {
        let mut friendly_name = [0u8; FRIENDLY_NAME_LEN];
        let bytes = name.as_bytes();
        let len = bytes.len().min(FRIENDLY_NAME_LEN);
        friendly_name[..len].copy_from_slice(&bytes[..len]);
        Self {
            medium,
            status: 0,
            individual_address,
            project_installation_id: 0,
            serial_number,
            multicast_address: Ipv4Addr::UNSPECIFIED,
            mac_address: [0; 6],
            friendly_name,
        }
    }

    pub const fn programming_mode(&self) -> bool {
        self.status & 0x01 != 0
    }

    /// Friendly name up to the first NUL, if it is valid UTF-8
    pub fn name(&self) -> Option<&str> {
        let end = self
            .friendly_name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(FRIENDLY_NAME_LEN);
        core::str::from_utf8(&self.friendly_name[..end]).ok()
    }

    fn decode_data(r: &mut FrameReader<'_>) -> Result<Self> {
        if r.remaining() != Self::SIZE - 2 {
            return Err(KnxError::length_mismatch());
        }
        Ok(Self {
            medium: r.read_u8()?,
            status: r.read_u8()?,
            individual_address: IndividualAddress::decode(r)?,
            project_installation_id: r.read_u16()?,
            serial_number: SerialNumber::decode(r)?,
            multicast_address: Ipv4Addr::from(r.read_array::<4>()?),
            mac_address: r.read_array()?,
            friendly_name: r.read_array()?,
        })
    }

    fn encode_data(&self, w: &mut FrameWriter) {
        w.write_u8(self.medium);
        w.write_u8(self.status);
        self.individual_address.encode(w);
        w.write_u16(self.project_installation_id);
        self.serial_number.encode(w);
        w.write_bytes(&self.multicast_address.octets());
        w.write_bytes(&self.mac_address);
        w.write_bytes(&self.friendly_name);
    }
}

/// One entry of the supported service families DIB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceFamily {
    pub family: u8,
    pub version: u8,
}

/// Description information block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dib {
    DeviceInfo(DeviceInformation),
    SupportedServiceFamilies(Vec<ServiceFamily>),
    /// Any other DIB type, kept verbatim
    Raw { dib_type: u8, data: Vec<u8> },
}

impl Dib {
    pub fn decode(r: &mut FrameReader<'_>) -> Result<Self> {
        let (dib_type, mut data) = read_block(r)?;
        let dib = match dib_type {
            DIB_DEVICE_INFO => Self::DeviceInfo(DeviceInformation::decode_data(&mut data)?),
            DIB_SUPP_SVC_FAMILIES => {
                if data.remaining() % 2 != 0 {
                    return Err(KnxError::length_mismatch());
                }
                let mut families = Vec::with_capacity(data.remaining() / 2);
                while data.remaining() > 0 {
                    families.push(ServiceFamily {
                        family: data.read_u8()?,
                        version: data.read_u8()?,
                    });
                }
                Self::SupportedServiceFamilies(families)
            }
            _ => Self::Raw {
                dib_type,
                data: data.read_rest().to_vec(),
            },
        };
        data.expect_end()?;
        Ok(dib)
    }

    pub fn encode(&self, w: &mut FrameWriter) -> Result<()> {
        let start = w.len();
        w.write_u8(0);
        match self {
            Self::DeviceInfo(info) => {
                w.write_u8(DIB_DEVICE_INFO);
                info.encode_data(w);
            }
            Self::SupportedServiceFamilies(families) => {
                w.write_u8(DIB_SUPP_SVC_FAMILIES);
                for f in families {
                    w.write_u8(f.family);
                    w.write_u8(f.version);
                }
            }
            Self::Raw { dib_type, data } => {
                w.write_u8(*dib_type);
                w.write_bytes(data);
            }
        }
        w.finish_length_u8(start)
    }

    /// Decode DIBs until the reader is exhausted.
    pub fn decode_all(r: &mut FrameReader<'_>) -> Result<Vec<Self>> {
        let mut dibs = Vec::new();
        while r.remaining() > 0 {
            dibs.push(Self::decode(r)?);
        }
        Ok(dibs)
    }
}

/// Find the device information DIB in a list
pub fn device_info(dibs: &[Dib]) -> Option<&DeviceInformation> {
    dibs.iter().find_map(|d| match d {
        Dib::DeviceInfo(info) => Some(info),
        _ => None,
    })
}

// =============================================================================
// Search request parameters
// =============================================================================

const SRP_PROGRAMMING_MODE: u8 = 0x01;
const SRP_MAC_ADDRESS: u8 = 0x02;
const SRP_SERVICE: u8 = 0x03;
const SRP_REQUEST_DIBS: u8 = 0x04;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchParameterKind {
    /// Only devices currently in programming mode answer
    ProgrammingMode,
    MacAddress([u8; 6]),
    Service(ServiceFamily),
    /// DIB types the response must contain
    RequestDibs(Vec<u8>),
    Raw { srp_type: u8, data: Vec<u8> },
}

/// Search request parameter of an extended search request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParameter {
    /// A server that does not understand a mandatory SRP must not answer
    pub mandatory: bool,
    pub kind: SearchParameterKind,
}

impl SearchParameter {
    pub const fn new(kind: SearchParameterKind) -> Self {
        Self {
            mandatory: false,
            kind,
        }
    }

    #[must_use]
    pub const fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn decode(r: &mut FrameReader<'_>) -> Result<Self> {
        let (type_byte, mut data) = read_block(r)?;
        let mandatory = type_byte & 0x80 != 0;
        let srp_type = type_byte & 0x7F;
        let kind = match srp_type {
            SRP_PROGRAMMING_MODE => SearchParameterKind::ProgrammingMode,
            SRP_MAC_ADDRESS => SearchParameterKind::MacAddress(data.read_array()?),
            SRP_SERVICE => SearchParameterKind::Service(ServiceFamily {
                family: data.read_u8()?,
                version: data.read_u8()?,
            }),
            SRP_REQUEST_DIBS => {
                // padded with 0x00 to an even length
                let types = data.read_rest();
                let end = types.iter().rposition(|t| *t != 0).map_or(0, |i| i + 1);
                SearchParameterKind::RequestDibs(types[..end].to_vec())
            }
            _ => SearchParameterKind::Raw {
                srp_type,
                data: data.read_rest().to_vec(),
            },
        };
        data.expect_end()?;
        Ok(Self { mandatory, kind })
    }

    pub fn encode(&self, w: &mut FrameWriter) -> Result<()> {
        let start = w.len();
        w.write_u8(0);
        let flag = if self.mandatory { 0x80 } else { 0x00 };
        match &self.kind {
            SearchParameterKind::ProgrammingMode => w.write_u8(flag | SRP_PROGRAMMING_MODE),
            SearchParameterKind::MacAddress(mac) => {
                w.write_u8(flag | SRP_MAC_ADDRESS);
                w.write_bytes(mac);
            }
            SearchParameterKind::Service(f) => {
                w.write_u8(flag | SRP_SERVICE);
                w.write_u8(f.family);
                w.write_u8(f.version);
            }
            SearchParameterKind::RequestDibs(types) => {
                w.write_u8(flag | SRP_REQUEST_DIBS);
                w.write_bytes(types);
                if types.len() % 2 != 0 {
                    w.write_u8(0);
                }
            }
            SearchParameterKind::Raw { srp_type, data } => {
                w.write_u8(flag | (srp_type & 0x7F));
                w.write_bytes(data);
            }
        }
        w.finish_length_u8(start)
    }
}
