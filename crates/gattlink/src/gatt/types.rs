//! Common types for GATT operations
//!
//! Discovery results are plain values owned by the returned collection.

use super::error::{GattError, GattResult};
use crate::att::{ATT_HANDLE_MAX, ATT_HANDLE_MIN};
use crate::uuid::Uuid;
use bitflags::bitflags;
use std::fmt;

/// Inclusive attribute handle range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleRange {
    start: u16,
    end: u16,
}

impl HandleRange {
    /// The whole handle space, `0x0001..=0xFFFF`
    pub const ALL: HandleRange = HandleRange {
        start: ATT_HANDLE_MIN,
        end: ATT_HANDLE_MAX,
    };

    /// Create a range, requiring `1 <= start <= end`
    pub fn new(start: u16, end: u16) -> GattResult<Self> {
        if start < ATT_HANDLE_MIN || start > end {
            return Err(GattError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn contains(&self, handle: u16) -> bool {
        handle >= self.start && handle <= self.end
    }
}

impl Default for HandleRange {
    fn default() -> Self {
        Self::ALL
    }
}

impl fmt::Display for HandleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}-0x{:04X}", self.start, self.end)
    }
}

bitflags! {
    /// Characteristic properties as defined in the Bluetooth specification
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

/// A primary service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryService {
    /// Handles of the service declaration through its last attribute
    pub range: HandleRange,
    pub uuid: Uuid,
}

/// A service included by another service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncludedService {
    /// Handle of the include declaration
    pub handle: u16,
    /// Handle range of the included service
    pub range: HandleRange,
    pub uuid: Uuid,
}

/// A characteristic declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Characteristic {
    /// Declaration handle
    pub handle: u16,
    pub value_handle: u16,
    pub properties: CharacteristicProperties,
    pub uuid: Uuid,
}

/// A characteristic descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub handle: u16,
    pub uuid: Uuid,
}

/// A value returned by Read By Type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeValue {
    pub handle: u16,
    pub value: Vec<u8>,
}

/// The server's echo of a queued prepare write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedWrite {
    pub handle: u16,
    pub offset: u16,
    pub value: Vec<u8>,
}
