//! GATT (Generic Attribute Profile) client
//!
//! Discovery, long reads and writes and the single-request primitives are
//! implemented on [`AttChannel`](crate::att::AttChannel) and complete through
//! callbacks on the event loop thread. The blocking equivalents are
//! methods of [`Connection`](crate::transport::Connection).

pub mod blocking;
pub mod client;
pub mod discovery;
pub mod error;
pub mod long_value;
pub mod operation;
pub mod types;


pub use self::error::{GattError, GattResult};
pub use self::operation::{Completion, Outcome};
pub use self::types::{
    AttributeValue, Characteristic, CharacteristicProperties, Descriptor, HandleRange,
    IncludedService, PreparedWrite, PrimaryService,
};
