//! gattlink - A Bluetooth LE GATT client
//!
//! This library drives the Attribute Protocol over an L2CAP socket on Linux.
//! One background event loop, shared by every open connection, multiplexes
//! requests and delivers notifications. On top of it sit the GATT discovery
//! procedures, long value reads and writes, and a blocking API on
//! [`Connection`].
//!
//! ```no_run
//! use gattlink::{ConnectOptions, Connection};
//!
//! let addr = "AA:BB:CC:DD:EE:FF".parse()?;
//! let conn = Connection::connect(addr, &ConnectOptions::default())?;
//! for service in conn.discover_primary_services(None).into_result()? {
//!     println!("{} {}", service.range, service.uuid);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod att;
pub mod error;
pub mod gatt;
pub mod transport;
pub mod uuid;

// Re-export common types for convenience
pub use att::{AttChannel, AttError, AttErrorCode, NotifyKind};
pub use error::{TransportError, TransportResult};
pub use gatt::{
    Characteristic, CharacteristicProperties, Descriptor, GattError, GattResult, HandleRange,
    IncludedService, Outcome, PrimaryService,
};
pub use transport::{AddressType, BdAddr, ConnectOptions, Connection, SecurityLevel};
pub use uuid::Uuid;
