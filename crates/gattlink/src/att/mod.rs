//! Attribute Protocol (ATT) client
//!
//! This module provides the ATT PDU codec and the per-bearer request
//! multiplexer the GATT procedures are built on.

pub mod channel;
pub mod constants;
pub mod error;
pub mod pdu;

#[cfg(test)]
mod tests;

// Re-export the public API
pub use self::channel::{
    AttChannel, Bearer, NotifyCallback, NotifyKind, RegistrationId, ResponseCallback,
    TransactionId,
};
pub use self::constants::*;
pub use self::error::{AttError, AttErrorCode, AttResult};
pub use self::pdu::AttPdu;
