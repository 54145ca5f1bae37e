use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth UUID in canonical 128-bit form.
///
/// Short 16-bit and 32-bit SIG-assigned values are expanded through the
/// Bluetooth base UUID on construction, so equality and hashing always
/// compare the full 128-bit value. Bytes are kept little-endian, the order
/// they travel in on the wire.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Uuid {
    bytes: [u8; 16],
}

/// "00000000-0000-1000-8000-00805F9B34FB" in little-endian order.
const BASE_UUID_BYTES: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Offset within the base UUID where the short value is inserted.
const BASE_OFFSET: usize = 12;

/// Errors produced when parsing a UUID from text.
#[derive(Debug, Error, PartialEq)]
pub enum UuidParseError {
    #[error("UUID must have 4, 8 or 32 hex digits, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex in UUID: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl Uuid {
    /// Creates a UUID from 16 little-endian bytes.
    pub const fn from_bytes_le(bytes: [u8; 16]) -> Self {
        Uuid { bytes }
    }

    /// Creates a UUID from 16 big-endian bytes (textual order).
    pub fn from_bytes_be(mut bytes: [u8; 16]) -> Self {
        bytes.reverse();
        Uuid { bytes }
    }

    /// Expands a 16-bit SIG-assigned value through the base UUID.
    pub const fn from_u16(uuid16: u16) -> Self {
        Self::from_u32(uuid16 as u32)
    }

    /// Expands a 32-bit SIG-assigned value through the base UUID.
    pub const fn from_u32(uuid32: u32) -> Self {
        let mut bytes = BASE_UUID_BYTES;
        let short = uuid32.to_le_bytes();
        bytes[BASE_OFFSET] = short[0];
        bytes[BASE_OFFSET + 1] = short[1];
        bytes[BASE_OFFSET + 2] = short[2];
        bytes[BASE_OFFSET + 3] = short[3];
        Uuid { bytes }
    }

    /// Decodes a UUID embedded in a PDU.
    ///
    /// Accepts 2, 4 or 16 little-endian bytes; any other length is `None`.
    pub fn try_from_slice_le(slice: &[u8]) -> Option<Self> {
        match *slice {
            [a, b] => Some(Uuid::from_u16(u16::from_le_bytes([a, b]))),
            [a, b, c, d] => Some(Uuid::from_u32(u32::from_le_bytes([a, b, c, d]))),
            _ if slice.len() == 16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(slice);
                Some(Uuid::from_bytes_le(bytes))
            }
            _ => None,
        }
    }

    pub const fn as_bytes_le(&self) -> &[u8; 16] {
        &self.bytes
    }

    pub fn as_bytes_be(&self) -> [u8; 16] {
        let mut bytes = self.bytes;
        bytes.reverse();
        bytes
    }

    fn is_sig_assigned(&self) -> bool {
        self.bytes[..BASE_OFFSET] == BASE_UUID_BYTES[..BASE_OFFSET]
    }

    /// The 16-bit short form, if this UUID has one.
    pub fn as_u16(&self) -> Option<u16> {
        self.as_u32().and_then(|v| u16::try_from(v).ok())
    }

    /// The 32-bit short form, if this UUID is SIG-assigned.
    pub fn as_u32(&self) -> Option<u32> {
        if !self.is_sig_assigned() {
            return None;
        }
        let mut short = [0u8; 4];
        short.copy_from_slice(&self.bytes[BASE_OFFSET..]);
        Some(u32::from_le_bytes(short))
    }

    /// Length of the shortest ATT encoding (2 or 16 bytes).
    ///
    /// ATT has no 32-bit encoding, so 32-bit values go out in full.
    pub fn att_len(&self) -> usize {
        if self.as_u16().is_some() {
            2
        } else {
            16
        }
    }

    /// Appends the shortest ATT encoding to `out`.
    pub fn write_att(&self, out: &mut Vec<u8>) {
        match self.as_u16() {
            Some(short) => out.extend_from_slice(&short.to_le_bytes()),
            None => out.extend_from_slice(&self.bytes),
        }
    }
}

impl From<u16> for Uuid {
    fn from(uuid16: u16) -> Self {
        Uuid::from_u16(uuid16)
    }
}

impl From<u32> for Uuid {
    fn from(uuid32: u32) -> Self {
        Uuid::from_u32(uuid32)
    }
}

impl PartialEq<u16> for Uuid {
    fn eq(&self, other: &u16) -> bool {
        self.as_u16() == Some(*other)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.as_bytes_be();
        write!(
            f,
            "{}-{}-{}-{}-{}",
            hex::encode(&b[0..4]),
            hex::encode(&b[4..6]),
            hex::encode(&b[6..8]),
            hex::encode(&b[8..10]),
            hex::encode(&b[10..16])
        )
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_u32() {
            Some(short) if short <= 0xFFFF => write!(f, "Uuid(0x{:04X})", short),
            Some(short) => write!(f, "Uuid(0x{:08X})", short),
            None => write!(f, "Uuid({})", self),
        }
    }
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.chars().filter(|c| *c != '-').collect();
        match cleaned.len() {
            4 => {
                let mut short = [0u8; 2];
                hex::decode_to_slice(&cleaned, &mut short)?;
                Ok(Uuid::from_u16(u16::from_be_bytes(short)))
            }
            8 => {
                let mut short = [0u8; 4];
                hex::decode_to_slice(&cleaned, &mut short)?;
                Ok(Uuid::from_u32(u32::from_be_bytes(short)))
            }
            32 => {
                let mut bytes = [0u8; 16];
                hex::decode_to_slice(&cleaned, &mut bytes)?;
                Ok(Uuid::from_bytes_be(bytes))
            }
            n => Err(UuidParseError::InvalidLength(n)),
        }
    }
}
