//! Error types for the gattlink library
//!
//! Connection-level failures. ATT and GATT failures live in their own modules.

use crate::att::AttError;
use thiserror::Error;

/// Errors that can occur when opening or closing a connection
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid Bluetooth address: {0}")]
    InvalidAddress(String),

    #[error("Invalid address type: {0}")]
    InvalidAddressType(u8),

    #[error("Invalid security level: {0}")]
    InvalidSecurityLevel(u8),

    #[error("Invalid PSM: 0x{0:04X}")]
    InvalidPsm(u16),

    #[error("Invalid MTU: {0}")]
    InvalidMtu(u16),

    #[error("Socket error: {0}")]
    Socket(std::io::Error),

    #[error("Failed to connect: {0}")]
    Connect(std::io::Error),

    #[error("Connection timed out")]
    Timeout,

    #[error("Already disconnected")]
    AlreadyDisconnected,

    #[error("Event loop stopped")]
    LoopStopped,

    #[error("MTU exchange failed: {0}")]
    Att(#[from] AttError),
}

/// Transport Result type
pub type TransportResult<T> = Result<T, TransportError>;
