//! Error types for GATT procedures
use crate::att::{AttError, AttErrorCode};
use thiserror::Error;

/// Failures of a GATT procedure
#[derive(Debug, Clone, Error)]
pub enum GattError {
    #[error(transparent)]
    Att(#[from] AttError),

    /// The peer returned a page that ends before the requested start handle
    #[error("Handle regression: page ended at 0x{last:04X} below cursor 0x{cursor:04X}")]
    HandleRegression { cursor: u16, last: u16 },

    #[error("Invalid handle range 0x{start:04X}-0x{end:04X}")]
    InvalidRange { start: u16, end: u16 },

    #[error("Value of {len} bytes exceeds the maximum of {max}")]
    ValueTooLong { len: usize, max: usize },

    #[error("Not connected")]
    NotConnected,

    #[error("Operation timed out")]
    Timeout,

    #[error("Blocking call issued from the event loop thread")]
    WouldDeadlock,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl GattError {
    /// The ATT error code that best describes this failure.
    ///
    /// Protocol inconsistencies map to `Unlikely`; local failures have none.
    pub fn att_code(&self) -> Option<AttErrorCode> {
        match self {
            GattError::Att(err) => err.code(),
            GattError::HandleRegression { .. } => Some(AttErrorCode::Unlikely),
            _ => None,
        }
    }
}

/// GATT Result type
pub type GattResult<T> = Result<T, GattError>;
