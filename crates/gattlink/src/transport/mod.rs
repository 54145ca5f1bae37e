//! Connection transport
//!
//! Opens the ATT bearer (an L2CAP socket, or any other message-preserving
//! socket) and runs it on the process-wide event loop.

pub mod connection;
pub(crate) mod event_loop;
pub mod socket;


use crate::att::{Bearer, ATT_DEFAULT_MTU, ATT_MAX_MTU};
use crate::error::{TransportError, TransportResult};
use std::fmt;
use std::io;
use std::os::unix::io::AsRawFd;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use self::connection::Connection;
pub use self::socket::L2capSocket;

// Bluetooth address types (BDADDR_*)
pub const BDADDR_BREDR: u8 = 0x00;
pub const BDADDR_LE_PUBLIC: u8 = 0x01;
pub const BDADDR_LE_RANDOM: u8 = 0x02;

// Socket security levels (BT_SECURITY_*)
pub const BT_SECURITY_LOW: u8 = 1;
pub const BT_SECURITY_MEDIUM: u8 = 2;
pub const BT_SECURITY_HIGH: u8 = 3;
pub const BT_SECURITY_FIPS: u8 = 4;

/// Default time allowed for connecting and for each blocking call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bluetooth device address, stored little-endian as on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddr {
    pub bytes: [u8; 6],
}

impl BdAddr {
    /// `00:00:00:00:00:00`, lets the kernel pick the local adapter
    pub const ANY: BdAddr = BdAddr { bytes: [0; 6] };

    pub fn new(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.bytes[5],
            self.bytes[4],
            self.bytes[3],
            self.bytes[2],
            self.bytes[1],
            self.bytes[0]
        )
    }
}

impl FromStr for BdAddr {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TransportError::InvalidAddress(s.to_string());
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(invalid());
        }
        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            let mut byte = [0u8; 1];
            hex::decode_to_slice(part, &mut byte).map_err(|_| invalid())?;
            bytes[5 - i] = byte[0];
        }
        Ok(BdAddr { bytes })
    }
}

/// Remote address type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressType {
    BrEdr,
    #[default]
    LePublic,
    LeRandom,
}

impl AddressType {
    pub fn is_le(self) -> bool {
        self != AddressType::BrEdr
    }
}

impl TryFrom<u8> for AddressType {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            BDADDR_BREDR => Ok(AddressType::BrEdr),
            BDADDR_LE_PUBLIC => Ok(AddressType::LePublic),
            BDADDR_LE_RANDOM => Ok(AddressType::LeRandom),
            _ => Err(TransportError::InvalidAddressType(value)),
        }
    }
}

impl From<AddressType> for u8 {
    fn from(value: AddressType) -> Self {
        match value {
            AddressType::BrEdr => BDADDR_BREDR,
            AddressType::LePublic => BDADDR_LE_PUBLIC,
            AddressType::LeRandom => BDADDR_LE_RANDOM,
        }
    }
}

/// Link security required before the connection is usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SecurityLevel {
    #[default]
    Low,
    Medium,
    High,
    Fips,
}

impl TryFrom<u8> for SecurityLevel {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            BT_SECURITY_LOW => Ok(SecurityLevel::Low),
            BT_SECURITY_MEDIUM => Ok(SecurityLevel::Medium),
            BT_SECURITY_HIGH => Ok(SecurityLevel::High),
            BT_SECURITY_FIPS => Ok(SecurityLevel::Fips),
            _ => Err(TransportError::InvalidSecurityLevel(value)),
        }
    }
}

impl From<SecurityLevel> for u8 {
    fn from(value: SecurityLevel) -> Self {
        match value {
            SecurityLevel::Low => BT_SECURITY_LOW,
            SecurityLevel::Medium => BT_SECURITY_MEDIUM,
            SecurityLevel::High => BT_SECURITY_HIGH,
            SecurityLevel::Fips => BT_SECURITY_FIPS,
        }
    }
}

/// Parameters for [`Connection::connect`]
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Local adapter address; `None` lets the kernel choose
    pub local: Option<BdAddr>,
    pub address_type: AddressType,
    pub security: SecurityLevel,
    /// L2CAP PSM; `None` uses the ATT fixed channel (LE) or ATT PSM (BR/EDR)
    pub psm: Option<u16>,
    /// ATT MTU to negotiate once connected
    pub mtu: Option<u16>,
    /// Limit for connecting, and the default for blocking calls
    pub timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            local: None,
            address_type: AddressType::default(),
            security: SecurityLevel::default(),
            psm: None,
            mtu: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ConnectOptions {
    /// Check parameters before any socket is opened
    pub fn validate(&self) -> TransportResult<()> {
        if let Some(psm) = self.psm {
            // Valid PSMs are odd with an even most significant octet
            if psm & 0x0101 != 0x0001 {
                return Err(TransportError::InvalidPsm(psm));
            }
        }
        if let Some(mtu) = self.mtu {
            if !(ATT_DEFAULT_MTU..=ATT_MAX_MTU).contains(&mtu) {
                return Err(TransportError::InvalidMtu(mtu));
            }
        }
        Ok(())
    }
}

/// A connected, message-preserving socket carrying one ATT PDU per message
pub trait PduSocket: AsRawFd + Send + Sync + 'static {
    /// Send one PDU
    fn send_pdu(&self, pdu: &[u8]) -> io::Result<()>;

    /// Receive one PDU into `buf`; `Ok(0)` means the peer closed
    fn recv_pdu(&self, buf: &mut [u8]) -> io::Result<usize>;
}

impl Bearer for Arc<dyn PduSocket> {
    fn send_pdu(&mut self, pdu: &[u8]) -> io::Result<()> {
        PduSocket::send_pdu(self.as_ref(), pdu)
    }
}
