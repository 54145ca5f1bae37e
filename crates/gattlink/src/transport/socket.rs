//! L2CAP socket carrying the ATT bearer
//!
//! This module wraps a Linux `AF_BLUETOOTH`/`BTPROTO_L2CAP` sequential packet
//! socket. LE connections use the fixed ATT channel, BR/EDR connections the
//! ATT PSM.

use super::{BdAddr, ConnectOptions, PduSocket, BDADDR_BREDR, BDADDR_LE_PUBLIC};
use crate::att::{ATT_CID, ATT_PSM};
use crate::error::{TransportError, TransportResult};
use log::{debug, error};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::time::Duration;

// Bluetooth socket constants
const AF_BLUETOOTH: i32 = 31;
const BTPROTO_L2CAP: i32 = 0;
const SOL_BLUETOOTH: i32 = 274;
const BT_SECURITY: i32 = 4;

// Define the sockaddr_l2 structure
#[repr(C)]
struct SockaddrL2 {
    l2_family: libc::sa_family_t,
    l2_psm: u16,
    l2_bdaddr: [u8; 6],
    l2_cid: u16,
    l2_bdaddr_type: u8,
}

#[repr(C)]
struct BtSecurity {
    level: u8,
    key_size: u8,
}

impl SockaddrL2 {
    fn new(addr: BdAddr, addr_type: u8, psm: u16, cid: u16) -> Self {
        Self {
            l2_family: AF_BLUETOOTH as libc::sa_family_t,
            l2_psm: psm.to_le(),
            l2_bdaddr: addr.bytes,
            l2_cid: cid.to_le(),
            l2_bdaddr_type: addr_type,
        }
    }

    fn as_ptr(&self) -> *const libc::sockaddr {
        self as *const _ as *const libc::sockaddr
    }

    fn len() -> libc::socklen_t {
        std::mem::size_of::<SockaddrL2>() as libc::socklen_t
    }
}

/// Represents a connected L2CAP socket
#[derive(Debug)]
pub struct L2capSocket {
    fd: RawFd,
}

impl L2capSocket {
    /// Opens an L2CAP connection to `remote` for ATT.
    ///
    /// Blocks for at most `options.timeout` while the link is set up.
    pub fn connect(remote: BdAddr, options: &ConnectOptions) -> TransportResult<Self> {
        options.validate()?;

        let fd = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC,
                BTPROTO_L2CAP,
            )
        };
        if fd < 0 {
            return Err(TransportError::Socket(io::Error::last_os_error()));
        }
        // Closed on every early return from here on
        let socket = L2capSocket { fd };

        let le = options.address_type.is_le();
        let local_type = if le { BDADDR_LE_PUBLIC } else { BDADDR_BREDR };
        let (psm, cid) = match options.psm {
            Some(psm) => (psm, 0),
            None if le => (0, ATT_CID),
            None => (ATT_PSM, 0),
        };

        let local = SockaddrL2::new(
            options.local.unwrap_or(BdAddr::ANY),
            local_type,
            0,
            cid,
        );
        if unsafe { libc::bind(fd, local.as_ptr(), SockaddrL2::len()) } < 0 {
            return Err(TransportError::Socket(io::Error::last_os_error()));
        }

        let security = BtSecurity {
            level: options.security.into(),
            key_size: 0,
        };
        let result = unsafe {
            libc::setsockopt(
                fd,
                SOL_BLUETOOTH,
                BT_SECURITY,
                &security as *const _ as *const libc::c_void,
                std::mem::size_of::<BtSecurity>() as libc::socklen_t,
            )
        };
        if result < 0 {
            return Err(TransportError::Socket(io::Error::last_os_error()));
        }

        let target = SockaddrL2::new(remote, options.address_type.into(), psm, cid);
        socket.set_nonblocking(true)?;
        if unsafe { libc::connect(fd, target.as_ptr(), SockaddrL2::len()) } < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINPROGRESS) {
                return Err(TransportError::Connect(err));
            }
            socket.wait_connected(options.timeout)?;
        }
        socket.set_nonblocking(false)?;

        debug!("L2CAP socket {} connected to {}", fd, remote);
        Ok(socket)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> TransportResult<()> {
        let flags = unsafe { libc::fcntl(self.fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(TransportError::Socket(io::Error::last_os_error()));
        }
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        if unsafe { libc::fcntl(self.fd, libc::F_SETFL, flags) } < 0 {
            return Err(TransportError::Socket(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn wait_connected(&self, timeout: Duration) -> TransportResult<()> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLOUT,
            revents: 0,
        };
        let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        let ready = loop {
            let ready = unsafe { libc::poll(&mut pfd, 1, millis) };
            if ready < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(TransportError::Connect(err));
            }
            break ready;
        };
        if ready == 0 {
            error!("L2CAP connect timed out after {:?}", timeout);
            return Err(TransportError::Timeout);
        }

        let mut so_error: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        let result = unsafe {
            libc::getsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut so_error as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if result < 0 {
            return Err(TransportError::Connect(io::Error::last_os_error()));
        }
        if so_error != 0 {
            return Err(TransportError::Connect(io::Error::from_raw_os_error(so_error)));
        }
        Ok(())
    }
}

impl PduSocket for L2capSocket {
    fn send_pdu(&self, pdu: &[u8]) -> io::Result<()> {
        let sent = unsafe {
            libc::send(
                self.fd,
                pdu.as_ptr() as *const libc::c_void,
                pdu.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn recv_pdu(&self, buf: &mut [u8]) -> io::Result<usize> {
        let received = unsafe {
            libc::recv(
                self.fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if received < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(received as usize)
    }
}

impl AsRawFd for L2capSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for L2capSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// A connected Unix datagram socket also preserves message boundaries, which
/// makes it a stand-in bearer for local peers.
impl PduSocket for UnixDatagram {
    fn send_pdu(&self, pdu: &[u8]) -> io::Result<()> {
        self.send(pdu).map(|_| ())
    }

    fn recv_pdu(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf)
    }
}
