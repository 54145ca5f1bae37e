//! Blocking GATT calls on a [`Connection`]
//!
//! Each call submits the asynchronous procedure to the event loop and waits
//! on a channel for its outcome, up to the connection's timeout.
//!
//! A call that times out returns [`GattError::Timeout`] but leaves the
//! procedure running: it still owns its requests and completes in the
//! background, and its result is discarded. Calls from several threads may
//! overlap; the channel serialises the requests on the wire.
//!
//! [`Connection::register_notification`] is the exception: a timed out
//! registration is withdrawn, so no handler is left without an id.
//!
//! These calls must not be made from a notification handler or any other
//! code running on the loop thread. They fail with
//! [`GattError::WouldDeadlock`] there.

use super::error::{GattError, GattResult};
use super::operation::{Completion, Outcome};
use super::types::*;
use crate::att::{AttChannel, NotifyKind, RegistrationId, TransactionId};
use crate::transport::event_loop::Job;
use crate::transport::Connection;
use crate::uuid::Uuid;
use log::{debug, warn};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};

impl Connection {
    /// Start an asynchronous procedure and wait for its outcome
    fn wait<T, F>(&self, start: F) -> Outcome<T>
    where
        T: Default + Send + 'static,
        F: FnOnce(&mut AttChannel, Completion<T>) -> GattResult<TransactionId> + Send + 'static,
    {
        if self.on_loop_thread() {
            return Outcome::failed(GattError::WouldDeadlock, T::default());
        }
        let (tx, rx) = mpsc::channel::<Outcome<T>>();
        let job: Job = Box::new(move |chan: &mut AttChannel| {
            let reply = tx.clone();
            let done: Completion<T> = Box::new(move |outcome| {
                let _ = reply.send(outcome);
            });
            if let Err(err) = start(chan, done) {
                let _ = tx.send(Outcome::failed(err, T::default()));
            }
        });
        if let Err(err) = self.submit(job) {
            return Outcome::failed(err, T::default());
        }
        match rx.recv_timeout(self.timeout()) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                warn!("Blocking GATT call timed out after {:?}", self.timeout());
                Outcome::failed(GattError::Timeout, T::default())
            }
            // The job or its operation was dropped without completing
            Err(RecvTimeoutError::Disconnected) => {
                Outcome::failed(GattError::NotConnected, T::default())
            }
        }
    }

    /// Run `f` on the loop thread and return its result
    fn call<R, F>(&self, f: F) -> GattResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut AttChannel) -> R + Send + 'static,
    {
        if self.on_loop_thread() {
            return Err(GattError::WouldDeadlock);
        }
        let (tx, rx) = mpsc::channel();
        self.submit(Box::new(move |chan: &mut AttChannel| {
            let _ = tx.send(f(chan));
        }))?;
        rx.recv_timeout(self.timeout()).map_err(|err| match err {
            RecvTimeoutError::Timeout => GattError::Timeout,
            RecvTimeoutError::Disconnected => GattError::NotConnected,
        })
    }

    /// Discover every primary service, or those of one UUID
    pub fn discover_primary_services(&self, uuid: Option<Uuid>) -> Outcome<Vec<PrimaryService>> {
        self.wait(move |chan, done| chan.discover_primary_services(HandleRange::ALL, uuid, done))
    }

    pub fn discover_included_services(&self, range: HandleRange) -> Outcome<Vec<IncludedService>> {
        self.wait(move |chan, done| chan.discover_included_services(range, done))
    }

    pub fn discover_characteristics(
        &self,
        range: HandleRange,
        uuid: Option<Uuid>,
    ) -> Outcome<Vec<Characteristic>> {
        self.wait(move |chan, done| chan.discover_characteristics(range, uuid, done))
    }

    pub fn discover_descriptors(
        &self,
        range: HandleRange,
        uuid: Option<Uuid>,
    ) -> Outcome<Vec<Descriptor>> {
        self.wait(move |chan, done| chan.discover_descriptors(range, uuid, done))
    }

    /// Read a value of any length
    pub fn read(&self, handle: u16) -> Outcome<Vec<u8>> {
        self.wait(move |chan, done| chan.read_value(handle, done))
    }

    pub fn read_by_uuid(&self, range: HandleRange, uuid: Uuid) -> Outcome<Vec<AttributeValue>> {
        self.wait(move |chan, done| chan.read_by_uuid(range, uuid, done))
    }

    /// Write a value of any length
    pub fn write(&self, handle: u16, value: &[u8]) -> Outcome<()> {
        let value = value.to_vec();
        self.wait(move |chan, done| chan.write_value(handle, value, done))
    }

    pub fn write_without_response(&self, handle: u16, value: &[u8]) -> GattResult<()> {
        let value = value.to_vec();
        self.call(move |chan| chan.write_without_response(handle, &value))?
    }

    /// Queue a value with one Prepare Write and return the server's echo
    pub fn reliable_write(&self, handle: u16, value: &[u8]) -> Outcome<PreparedWrite> {
        let value = value.to_vec();
        self.wait(move |chan, done| chan.reliable_write(handle, &value, done))
    }

    pub fn execute_write(&self, commit: bool) -> Outcome<()> {
        self.wait(move |chan, done| chan.execute_write(commit, done))
    }

    /// Negotiate the MTU; the outcome carries the MTU now in effect
    pub fn exchange_mtu(&self, mtu: u16) -> Outcome<u16> {
        self.wait(move |chan, done| chan.exchange_mtu(mtu, done))
    }

    pub fn mtu(&self) -> GattResult<u16> {
        self.call(|chan| chan.mtu())
    }

    /// Install a handler for notifications and/or indications.
    ///
    /// The handler runs on the loop thread. Indications are confirmed
    /// whether or not a handler accepts them. If the call times out the
    /// handler is never installed.
    pub fn register_notification<F>(
        &self,
        kind: NotifyKind,
        handle: Option<u16>,
        callback: F,
    ) -> GattResult<RegistrationId>
    where
        F: FnMut(u16, &[u8]) + Send + 'static,
    {
        if self.on_loop_thread() {
            return Err(GattError::WouldDeadlock);
        }
        // Held across install and reply, so the caller either sees the id
        // or the job sees the call was given up
        let abandoned = Arc::new(Mutex::new(false));
        let (tx, rx) = mpsc::channel();
        let flag = Arc::clone(&abandoned);
        self.submit(Box::new(move |chan: &mut AttChannel| {
            let abandoned = flag.lock().unwrap_or_else(PoisonError::into_inner);
            if *abandoned {
                debug!("Skipping notification handler of a timed out call");
                return;
            }
            let _ = tx.send(chan.register(kind, handle, Box::new(callback)));
        }))?;
        match rx.recv_timeout(self.timeout()) {
            Ok(id) => Ok(id),
            Err(RecvTimeoutError::Disconnected) => Err(GattError::NotConnected),
            Err(RecvTimeoutError::Timeout) => {
                *abandoned.lock().unwrap_or_else(PoisonError::into_inner) = true;
                // Installed just as the wait expired
                rx.try_recv().map_err(|_| GattError::Timeout)
            }
        }
    }

    pub fn unregister_notification(&self, id: RegistrationId) -> GattResult<bool> {
        self.call(move |chan| chan.unregister(id))
    }
}
