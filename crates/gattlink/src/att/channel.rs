//! ATT request/response multiplexer
//!
//! An [`AttChannel`] owns one bearer. It correlates responses with the
//! request that is currently on the wire, dispatches notifications and
//! indications to registered handlers, and owns the MTU-sized scratch buffer
//! requests are encoded into.
//!
//! ATT allows a single outstanding request per bearer, so requests are kept
//! in a FIFO and only the head is transmitted. The next request is written
//! as soon as the head completes.
//!
//! The channel is single-threaded: it lives on the event-loop thread and every
//! callback runs there.
use super::constants::*;
use super::error::{AttError, AttResult};
use super::pdu::*;
use log::{debug, error, trace, warn};
use std::collections::VecDeque;
use std::io;
use std::time::Instant;

/// Identifies one request; also names the group it starts.
pub type TransactionId = u32;

/// Identifies one notification/indication handler.
pub type RegistrationId = u32;

/// Invoked exactly once with the raw response PDU or the failure.
///
/// Receives the channel so follow-up requests can be chained.
pub type ResponseCallback = Box<dyn FnOnce(&mut AttChannel, AttResult<&[u8]>)>;

/// Invoked with `(handle, value)` for each matching notification or indication.
pub type NotifyCallback = Box<dyn FnMut(u16, &[u8]) + Send>;

/// Outbound half of a connected ATT bearer.
pub trait Bearer {
    /// Writes one complete PDU.
    fn send_pdu(&mut self, pdu: &[u8]) -> io::Result<()>;
}

/// Which server-initiated PDUs a handler receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Notification,
    Indication,
    Both,
}

impl NotifyKind {
    fn accepts(self, opcode: u8) -> bool {
        match self {
            NotifyKind::Notification => opcode == ATT_HANDLE_VALUE_NTF,
            NotifyKind::Indication => opcode == ATT_HANDLE_VALUE_IND,
            NotifyKind::Both => true,
        }
    }
}

struct PendingRequest {
    id: TransactionId,
    group: TransactionId,
    opcode: u8,
    expected: u8,
    /// Encoded PDU, kept until the request reaches the head of the queue
    pdu: Vec<u8>,
    /// `None` once cancelled while on the wire
    callback: Option<ResponseCallback>,
    sent: bool,
}

struct Registration {
    id: RegistrationId,
    kind: NotifyKind,
    handle: Option<u16>,
    callback: NotifyCallback,
}

/// ATT client bearer multiplexer
pub struct AttChannel {
    bearer: Box<dyn Bearer>,
    mtu: u16,
    buffer: Vec<u8>,
    next_id: TransactionId,
    pending: VecDeque<PendingRequest>,
    in_flight_since: Option<Instant>,
    registrations: Vec<Registration>,
    next_registration: RegistrationId,
    closed: Option<AttError>,
}

impl AttChannel {
    /// Create a channel over `bearer` with the given MTU
    pub fn new(bearer: Box<dyn Bearer>, mtu: u16) -> Self {
        let mtu = mtu.clamp(ATT_DEFAULT_MTU, ATT_MAX_MTU);
        Self {
            bearer,
            mtu,
            buffer: vec![0; mtu as usize],
            next_id: 1,
            pending: VecDeque::new(),
            in_flight_since: None,
            registrations: Vec::new(),
            next_registration: 1,
            closed: None,
        }
    }

    /// Current ATT MTU
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Set the ATT MTU, resizing the scratch buffer.
    ///
    /// Values are clamped to `ATT_DEFAULT_MTU..=ATT_MAX_MTU`.
    pub fn set_mtu(&mut self, mtu: u16) {
        self.mtu = mtu.clamp(ATT_DEFAULT_MTU, ATT_MAX_MTU);
        self.buffer.resize(self.mtu as usize, 0);
        debug!("ATT MTU set to {}", self.mtu);
    }

    /// Whether the bearer has failed or been shut down
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Number of requests queued or on the wire
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// The MTU-sized scratch buffer used to encode outgoing PDUs.
    ///
    /// Fill it and hand the length to [`AttChannel::send_from_buffer`].
    pub fn buffer(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Queue a request PDU.
    ///
    /// `group` is `None` to start a new group (whose id is the returned
    /// transaction id) or an earlier id to extend that group, so all sends of
    /// a multi-step operation can be cancelled together. Local failures are
    /// returned immediately and the callback is dropped without being called.
    pub fn send(
        &mut self,
        group: Option<TransactionId>,
        pdu: &[u8],
        callback: ResponseCallback,
    ) -> AttResult<TransactionId> {
        if let Some(err) = &self.closed {
            return Err(err.clone());
        }
        let opcode = *pdu.first().ok_or(AttError::InvalidPdu)?;
        let expected = response_opcode_for(opcode).ok_or(AttError::NotARequest(opcode))?;
        if pdu.len() > self.mtu as usize {
            return Err(AttError::Encode(self.mtu as usize));
        }

        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1).unwrap_or(1);

        self.pending.push_back(PendingRequest {
            id,
            group: group.unwrap_or(id),
            opcode,
            expected,
            pdu: pdu.to_vec(),
            callback: Some(callback),
            sent: false,
        });

        if self.pending.len() == 1 {
            if let Err(err) = self.transmit_head() {
                self.pending.pop_back();
                return Err(err);
            }
        } else {
            trace!("Queued ATT request 0x{:02X} (id {}) behind {}", opcode, id, self.pending.len() - 1);
        }
        Ok(id)
    }

    /// Encode `pdu` into the scratch buffer and queue it.
    pub fn request<P: AttPdu>(
        &mut self,
        group: Option<TransactionId>,
        pdu: &P,
        callback: ResponseCallback,
    ) -> AttResult<TransactionId> {
        let mut buffer = std::mem::take(&mut self.buffer);
        let result = pdu
            .encode(&mut buffer)
            .and_then(|len| self.send(group, &buffer[..len], callback));
        self.buffer = buffer;
        result
    }

    /// Queue the first `len` bytes of the scratch buffer.
    pub fn send_from_buffer(
        &mut self,
        group: Option<TransactionId>,
        len: usize,
        callback: ResponseCallback,
    ) -> AttResult<TransactionId> {
        if len > self.buffer.len() {
            return Err(AttError::Encode(self.buffer.len()));
        }
        let buffer = std::mem::take(&mut self.buffer);
        let result = self.send(group, &buffer[..len], callback);
        self.buffer = buffer;
        result
    }

    /// Write a command PDU immediately, bypassing the request queue.
    pub fn command<P: AttPdu>(&mut self, pdu: &P) -> AttResult<()> {
        if let Some(err) = &self.closed {
            return Err(err.clone());
        }
        let len = pdu.encode(&mut self.buffer)?;
        trace!("ATT command 0x{:02X} ({} bytes)", P::OPCODE, len);
        self.bearer.send_pdu(&self.buffer[..len])?;
        Ok(())
    }

    /// Install a notification and/or indication handler.
    ///
    /// `handle` restricts the handler to one attribute; `None` receives all.
    pub fn register(
        &mut self,
        kind: NotifyKind,
        handle: Option<u16>,
        callback: NotifyCallback,
    ) -> RegistrationId {
        let id = self.next_registration;
        self.next_registration = self.next_registration.checked_add(1).unwrap_or(1);
        self.registrations.push(Registration {
            id,
            kind,
            handle,
            callback,
        });
        id
    }

    /// Remove a handler; returns `false` if it was not registered.
    pub fn unregister(&mut self, id: RegistrationId) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.id != id);
        self.registrations.len() != before
    }

    /// Drop every request in `group` without invoking its callback.
    ///
    /// A request already on the wire stays queued as a silent placeholder so
    /// its late response is swallowed instead of matched to a later request.
    /// Returns the number of requests cancelled.
    pub fn cancel(&mut self, group: TransactionId) -> usize {
        self.cancel_where(|req| req.group == group)
    }

    /// Drop every pending request without invoking callbacks.
    pub fn cancel_all(&mut self) -> usize {
        self.cancel_where(|_| true)
    }

    fn cancel_where(&mut self, matches: impl Fn(&PendingRequest) -> bool) -> usize {
        let mut dropped = Vec::new();
        self.pending.retain_mut(|req| {
            if !matches(req) || req.callback.is_none() {
                return true;
            }
            dropped.push(req.callback.take());
            req.sent
        });
        debug!("Cancelled {} ATT request(s)", dropped.len());
        let count = dropped.len();
        // Released after the queue is consistent; dropping a callback can
        // release the last reference of an operation.
        drop(dropped);
        count
    }

    /// Fail every pending request with `err` and refuse further sends.
    pub fn fail_all(&mut self, err: AttError) {
        if self.closed.is_none() {
            self.closed = Some(err.clone());
        }
        self.in_flight_since = None;
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            debug!("Failing {} ATT request(s): {}", pending.len(), err);
        }
        for req in pending {
            if let Some(callback) = req.callback {
                callback(self, Err(err.clone()));
            }
        }
    }

    /// Fail the bearer if the request on the wire has exceeded the ATT
    /// transaction timeout. Returns `true` if it did.
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        match self.in_flight_since {
            Some(since) if now.saturating_duration_since(since) >= ATT_TRANSACTION_TIMEOUT => {
                error!("ATT transaction timed out, closing bearer");
                self.fail_all(AttError::Timeout);
                true
            }
            _ => false,
        }
    }

    /// Process one inbound PDU.
    pub fn handle_pdu(&mut self, pdu: &[u8]) {
        let Some(&opcode) = pdu.first() else {
            warn!("Dropping empty ATT PDU");
            return;
        };
        trace!("ATT rx opcode 0x{:02X} ({} bytes)", opcode, pdu.len());

        match opcode {
            ATT_HANDLE_VALUE_NTF | ATT_HANDLE_VALUE_IND => self.dispatch_notification(opcode, pdu),
            _ => self.handle_response(opcode, pdu),
        }
    }

    fn handle_response(&mut self, opcode: u8, pdu: &[u8]) {
        let correlates = match self.pending.front() {
            Some(head) if head.sent => {
                opcode == head.expected
                    || (opcode == ATT_ERROR_RSP && pdu.get(1) == Some(&head.opcode))
            }
            _ => false,
        };
        if !correlates {
            warn!("Dropping uncorrelated ATT PDU opcode 0x{:02X}", opcode);
            return;
        }
        let Some(head) = self.pending.pop_front() else {
            return;
        };
        self.in_flight_since = None;

        let result = if opcode == ATT_ERROR_RSP {
            match ErrorResponse::decode(pdu) {
                Ok(rsp) => {
                    debug!("ATT error response {:?} for request id {}", rsp.code, head.id);
                    Err(AttError::from(rsp))
                }
                Err(err) => Err(err),
            }
        } else {
            Ok(pdu)
        };

        match head.callback {
            Some(callback) => callback(self, result),
            None => debug!("Swallowed response to cancelled request id {}", head.id),
        }
        self.pump_queue();
    }

    fn dispatch_notification(&mut self, opcode: u8, pdu: &[u8]) {
        let decoded = if opcode == ATT_HANDLE_VALUE_NTF {
            HandleValueNotification::decode(pdu).map(|n| (n.handle, n.value))
        } else {
            HandleValueIndication::decode(pdu).map(|i| (i.handle, i.value))
        };
        let (handle, value) = match decoded {
            Ok(decoded) => decoded,
            Err(_) => {
                warn!("Dropping malformed notification/indication");
                return;
            }
        };

        let mut matched = 0;
        for reg in self.registrations.iter_mut() {
            if reg.kind.accepts(opcode) && reg.handle.map_or(true, |h| h == handle) {
                (reg.callback)(handle, &value);
                matched += 1;
            }
        }
        if matched == 0 {
            debug!("No handler for opcode 0x{:02X} on handle 0x{:04X}", opcode, handle);
        }

        // Confirmed even when unhandled, or the server stalls its indications
        if opcode == ATT_HANDLE_VALUE_IND {
            if let Err(err) = self.command(&HandleValueConfirmation) {
                error!("Failed to confirm indication: {}", err);
            }
        }
    }

    fn transmit_head(&mut self) -> AttResult<()> {
        let Some(head) = self.pending.front_mut() else {
            return Ok(());
        };
        if head.sent {
            return Ok(());
        }
        trace!("ATT tx opcode 0x{:02X} (id {}, {} bytes)", head.opcode, head.id, head.pdu.len());
        self.bearer.send_pdu(&head.pdu)?;
        head.sent = true;
        head.pdu = Vec::new();
        self.in_flight_since = Some(Instant::now());
        Ok(())
    }

    /// Put the next queued request on the wire.
    fn pump_queue(&mut self) {
        if let Err(err) = self.transmit_head() {
            error!("ATT bearer write failed: {}", err);
            self.fail_all(err);
        }
    }
}

impl Drop for AttChannel {
    fn drop(&mut self) {
        self.fail_all(AttError::Disconnected);
    }
}
