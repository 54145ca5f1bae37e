//! Client connection handle
//!
//! A [`Connection`] is one ATT bearer attached to the shared event loop. It
//! holds a reference on the loop for as long as it is connected; the blocking
//! GATT calls in [`crate::gatt::blocking`] are implemented on it.

use super::event_loop::{self, Command, ConnectionId, EventLoop, Job};
use super::{BdAddr, ConnectOptions, L2capSocket, PduSocket, DEFAULT_TIMEOUT};
use crate::att::{AttError, ATT_DEFAULT_MTU};
use crate::error::{TransportError, TransportResult};
use crate::gatt::{GattError, GattResult};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A connected ATT client
pub struct Connection {
    id: ConnectionId,
    remote: Option<BdAddr>,
    event_loop: Option<Arc<EventLoop>>,
    timeout: Duration,
}

impl Connection {
    /// Connect to `remote` over L2CAP.
    ///
    /// With `options.mtu` set, the MTU is exchanged before this returns.
    pub fn connect(remote: BdAddr, options: &ConnectOptions) -> TransportResult<Self> {
        options.validate()?;
        info!("Connecting to {}", remote);
        let socket = L2capSocket::connect(remote, options)?;

        let mut conn = Self::from_socket(socket, ATT_DEFAULT_MTU)?;
        conn.remote = Some(remote);
        conn.timeout = options.timeout;

        if let Some(mtu) = options.mtu {
            conn.exchange_mtu(mtu)
                .into_result()
                .map_err(|err| exchange_failed(err, mtu))?;
        }
        info!("Connected to {}", remote);
        Ok(conn)
    }

    /// Attach an already connected socket, e.g. one end of a local socket pair.
    pub fn from_socket<S: PduSocket>(socket: S, mtu: u16) -> TransportResult<Self> {
        let event_loop = event_loop::acquire()?;
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        event_loop.submit(Command::Attach {
            id,
            socket: Arc::new(socket),
            mtu,
        })?;
        debug!("Attached connection {}", id);
        Ok(Self {
            id,
            remote: None,
            event_loop: Some(event_loop),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Remote address, if connected with [`Connection::connect`]
    pub fn remote(&self) -> Option<BdAddr> {
        self.remote
    }

    /// Limit applied to each blocking call
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn is_connected(&self) -> bool {
        self.event_loop.is_some()
    }

    /// Detach from the event loop and close the socket.
    ///
    /// Pending operations complete with [`AttError::Disconnected`]. A second
    /// call fails with [`TransportError::AlreadyDisconnected`].
    pub fn disconnect(&mut self) -> TransportResult<()> {
        let event_loop = self
            .event_loop
            .take()
            .ok_or(TransportError::AlreadyDisconnected)?;
        let (done, detached) = mpsc::channel();
        event_loop.submit(Command::Detach { id: self.id, done })?;

        // On the loop thread the detach runs after the current callback
        if !event_loop.is_worker_thread() && detached.recv_timeout(self.timeout).is_err() {
            warn!("Connection {} did not detach in time", self.id);
            return Err(TransportError::Timeout);
        }
        info!("Disconnected connection {}", self.id);
        Ok(())
    }

    /// Run `job` against this connection's channel on the loop thread
    pub(crate) fn submit(&self, job: Job) -> GattResult<()> {
        let event_loop = self.event_loop.as_ref().ok_or(GattError::NotConnected)?;
        event_loop
            .submit(Command::Run { id: self.id, job })
            .map_err(|_| GattError::NotConnected)
    }

    /// Whether blocking here would stall the loop that has to answer
    pub(crate) fn on_loop_thread(&self) -> bool {
        self.event_loop
            .as_ref()
            .is_some_and(|event_loop| event_loop.is_worker_thread())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.event_loop.is_some() {
            if let Err(err) = self.disconnect() {
                debug!("Disconnect on drop failed: {}", err);
            }
        }
    }
}

fn exchange_failed(err: GattError, mtu: u16) -> TransportError {
    match err {
        GattError::Att(err) => TransportError::Att(err),
        GattError::Timeout => TransportError::Timeout,
        GattError::NotConnected => TransportError::Att(AttError::Disconnected),
        _ => TransportError::InvalidMtu(mtu),
    }
}
