//! Unit tests for the ATT multiplexer

use super::channel::{AttChannel, Bearer, NotifyKind};
use super::constants::*;
use super::error::{AttError, AttErrorCode};
use super::pdu::*;
use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Bearer that records every PDU written to it
#[derive(Clone, Default)]
struct RecordingBearer {
    sent: Rc<RefCell<Vec<Vec<u8>>>>,
    fail: Rc<RefCell<bool>>,
}

impl Bearer for RecordingBearer {
    fn send_pdu(&mut self, pdu: &[u8]) -> io::Result<()> {
        if *self.fail.borrow() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "bearer down"));
        }
        self.sent.borrow_mut().push(pdu.to_vec());
        Ok(())
    }
}

fn channel() -> (AttChannel, RecordingBearer) {
    let bearer = RecordingBearer::default();
    (AttChannel::new(Box::new(bearer.clone()), ATT_DEFAULT_MTU), bearer)
}

type Log = Rc<RefCell<Vec<Result<Vec<u8>, AttError>>>>;

fn recorder(log: &Log) -> super::ResponseCallback {
    let log = log.clone();
    Box::new(move |_, result| {
        log.borrow_mut().push(result.map(|pdu| pdu.to_vec()));
    })
}

fn read(handle: u16) -> ReadRequest {
    ReadRequest { handle }
}

#[test]
fn only_one_request_on_the_wire() {
    let (mut chan, bearer) = channel();
    let log = Log::default();

    let first = chan.request(None, &read(0x0003), recorder(&log)).unwrap();
    let second = chan.request(None, &read(0x0005), recorder(&log)).unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 2);
    assert_eq!(bearer.sent.borrow().len(), 1);
    assert_eq!(chan.pending_requests(), 2);

    chan.handle_pdu(&[ATT_READ_RSP, 0xAA]);
    assert_eq!(log.borrow().len(), 1);
    assert_eq!(bearer.sent.borrow().len(), 2);
    assert_eq!(bearer.sent.borrow()[1], vec![ATT_READ_REQ, 0x05, 0x00]);

    chan.handle_pdu(&[ATT_READ_RSP, 0xBB]);
    let log = log.borrow();
    assert_eq!(log[0].as_ref().unwrap(), &vec![ATT_READ_RSP, 0xAA]);
    assert_eq!(log[1].as_ref().unwrap(), &vec![ATT_READ_RSP, 0xBB]);
    assert_eq!(chan.pending_requests(), 0);
}

#[test]
fn error_response_correlates_by_request_opcode() {
    let (mut chan, _bearer) = channel();
    let log = Log::default();
    chan.request(None, &read(0x0003), recorder(&log)).unwrap();

    // Error for a different request is not ours
    chan.handle_pdu(&[ATT_ERROR_RSP, ATT_WRITE_REQ, 0x03, 0x00, ATT_ERROR_INVALID_HANDLE]);
    assert!(log.borrow().is_empty());

    chan.handle_pdu(&[ATT_ERROR_RSP, ATT_READ_REQ, 0x03, 0x00, ATT_ERROR_READ_NOT_PERMITTED]);
    let log = log.borrow();
    match &log[0] {
        Err(AttError::Protocol {
            request,
            handle,
            code,
        }) => {
            assert_eq!(*request, ATT_READ_REQ);
            assert_eq!(*handle, 0x0003);
            assert_eq!(*code, AttErrorCode::ReadNotPermitted);
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn uncorrelated_response_is_dropped() {
    let (mut chan, _bearer) = channel();
    let log = Log::default();

    chan.handle_pdu(&[ATT_READ_RSP, 0x01]);
    chan.request(None, &read(0x0003), recorder(&log)).unwrap();
    chan.handle_pdu(&[ATT_WRITE_RSP]);
    assert!(log.borrow().is_empty());
    assert_eq!(chan.pending_requests(), 1);
}

#[test]
fn callback_can_chain_requests() {
    let (mut chan, bearer) = channel();
    let log = Log::default();
    let inner = recorder(&log);

    let group = chan
        .request(
            None,
            &read(0x0003),
            Box::new(move |chan, _| {
                chan.request(None, &read(0x0004), inner).unwrap();
            }),
        )
        .unwrap();
    assert_eq!(group, 1);

    chan.handle_pdu(&[ATT_READ_RSP]);
    assert_eq!(bearer.sent.borrow().len(), 2);
    chan.handle_pdu(&[ATT_READ_RSP, 0x42]);
    assert_eq!(log.borrow().len(), 1);
}

#[test]
fn cancel_in_flight_swallows_late_response() {
    let (mut chan, bearer) = channel();
    let log = Log::default();
    let other = Log::default();

    let group = chan.request(None, &read(0x0003), recorder(&log)).unwrap();
    chan.request(Some(group), &read(0x0004), recorder(&log)).unwrap();
    chan.request(None, &read(0x0009), recorder(&other)).unwrap();

    assert_eq!(chan.cancel(group), 2);
    // The in-flight head stays as a placeholder
    assert_eq!(chan.pending_requests(), 2);

    chan.handle_pdu(&[ATT_READ_RSP, 0x01]);
    assert!(log.borrow().is_empty());
    assert_eq!(bearer.sent.borrow().last().unwrap(), &vec![ATT_READ_REQ, 0x09, 0x00]);

    chan.handle_pdu(&[ATT_READ_RSP, 0x02]);
    assert!(log.borrow().is_empty());
    assert_eq!(other.borrow().len(), 1);
}

#[test]
fn notifications_respect_kind_and_handle() {
    let (mut chan, bearer) = channel();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let all = seen.clone();
    let id = chan.register(
        NotifyKind::Notification,
        None,
        Box::new(move |handle, value| all.lock().unwrap().push(("all", handle, value.to_vec()))),
    );
    let one = seen.clone();
    chan.register(
        NotifyKind::Both,
        Some(0x0010),
        Box::new(move |handle, value| one.lock().unwrap().push(("one", handle, value.to_vec()))),
    );

    chan.handle_pdu(&[ATT_HANDLE_VALUE_NTF, 0x10, 0x00, 0x01]);
    chan.handle_pdu(&[ATT_HANDLE_VALUE_NTF, 0x11, 0x00, 0x02]);
    assert_eq!(seen.lock().unwrap().len(), 3);

    assert!(chan.unregister(id));
    assert!(!chan.unregister(id));

    chan.handle_pdu(&[ATT_HANDLE_VALUE_IND, 0x10, 0x00, 0x03]);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[3], ("one", 0x0010, vec![0x03]));
    assert_eq!(bearer.sent.borrow().last().unwrap(), &vec![ATT_HANDLE_VALUE_CONF]);
}

#[test]
fn unhandled_indication_is_still_confirmed() {
    let (mut chan, bearer) = channel();
    chan.handle_pdu(&[ATT_HANDLE_VALUE_IND, 0x20, 0x00]);
    assert_eq!(bearer.sent.borrow().as_slice(), &[vec![ATT_HANDLE_VALUE_CONF]]);
}

#[test]
fn fail_all_reaches_every_pending_request() {
    let (mut chan, _bearer) = channel();
    let log = Log::default();
    chan.request(None, &read(0x0003), recorder(&log)).unwrap();
    chan.request(None, &read(0x0004), recorder(&log)).unwrap();

    chan.fail_all(AttError::Disconnected);
    assert_eq!(log.borrow().len(), 2);
    assert!(log.borrow().iter().all(|r| matches!(r, Err(AttError::Disconnected))));

    assert!(matches!(
        chan.request(None, &read(0x0005), recorder(&log)),
        Err(AttError::Disconnected)
    ));
    assert_eq!(log.borrow().len(), 2);
}

#[test]
fn transaction_timeout_closes_bearer() {
    let (mut chan, _bearer) = channel();
    let log = Log::default();
    chan.request(None, &read(0x0003), recorder(&log)).unwrap();

    assert!(!chan.check_timeout(Instant::now()));
    assert!(chan.check_timeout(Instant::now() + ATT_TRANSACTION_TIMEOUT + Duration::from_secs(1)));
    assert!(matches!(log.borrow()[0], Err(AttError::Timeout)));
    assert!(chan.is_closed());
}

#[test]
fn local_failures_are_synchronous() {
    let (mut chan, bearer) = channel();
    let log = Log::default();

    assert!(matches!(
        chan.send(None, &[ATT_WRITE_CMD, 0x01, 0x00], recorder(&log)),
        Err(AttError::NotARequest(ATT_WRITE_CMD))
    ));
    assert!(matches!(
        chan.request(
            None,
            &WriteRequest {
                handle: 1,
                value: vec![0; 30]
            },
            recorder(&log)
        ),
        Err(AttError::Encode(_))
    ));

    *bearer.fail.borrow_mut() = true;
    assert!(matches!(
        chan.request(None, &read(0x0003), recorder(&log)),
        Err(AttError::Io(_))
    ));
    assert_eq!(chan.pending_requests(), 0);
    assert!(log.borrow().is_empty());
}

#[test]
fn scratch_buffer_follows_mtu() {
    let (mut chan, bearer) = channel();
    assert_eq!(chan.buffer().len(), 23);
    chan.set_mtu(247);
    assert_eq!(chan.buffer().len(), 247);
    chan.set_mtu(5);
    assert_eq!(chan.mtu(), ATT_DEFAULT_MTU);

    let len = ReadRequest { handle: 0x0007 }.encode(chan.buffer()).unwrap();
    chan.send_from_buffer(None, len, Box::new(|_, _| {})).unwrap();
    assert_eq!(bearer.sent.borrow()[0], vec![ATT_READ_REQ, 0x07, 0x00]);
}
