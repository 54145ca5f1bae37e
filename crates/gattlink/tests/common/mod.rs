//! A GATT server peer on the far end of a Unix datagram pair

use gattlink::att::pdu::*;
use gattlink::att::*;
use gattlink::{Connection, Uuid};
use std::os::unix::net::UnixDatagram;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const HEART_RATE: u16 = 0x180D;
pub const MEASUREMENT: u16 = 0x2A37;
pub const DEVICE_NAME: u16 = 0x2A00;
pub const NAME_HANDLE: u16 = 0x0003;
pub const MEASUREMENT_HANDLE: u16 = 0x0007;
pub const CCC_HANDLE: u16 = 0x0008;
/// Requests for this handle are never answered
pub const SILENT_HANDLE: u16 = 0x00EE;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Attribute {
    handle: u16,
    kind: Uuid,
    value: Vec<u8>,
}

fn declaration(properties: u8, value_handle: u16, uuid: u16) -> Vec<u8> {
    let mut value = vec![properties];
    value.extend_from_slice(&value_handle.to_le_bytes());
    value.extend_from_slice(&uuid.to_le_bytes());
    value
}

/// Generic access with a 100-byte device name, then heart rate with a
/// notifying measurement and its configuration descriptor.
fn table() -> Vec<Attribute> {
    let name: Vec<u8> = (0..100u8).map(|i| b'a' + i % 26).collect();
    let attr = |handle: u16, kind: u16, value: Vec<u8>| Attribute {
        handle,
        kind: Uuid::from_u16(kind),
        value,
    };
    vec![
        attr(0x0001, PRIMARY_SERVICE_UUID, 0x1800u16.to_le_bytes().to_vec()),
        attr(0x0002, CHARACTERISTIC_UUID, declaration(0x0A, NAME_HANDLE, DEVICE_NAME)),
        attr(NAME_HANDLE, DEVICE_NAME, name),
        attr(0x0004, 0x2901, b"name".to_vec()),
        attr(0x0005, PRIMARY_SERVICE_UUID, HEART_RATE.to_le_bytes().to_vec()),
        attr(0x0006, CHARACTERISTIC_UUID, declaration(0x12, MEASUREMENT_HANDLE, MEASUREMENT)),
        attr(MEASUREMENT_HANDLE, MEASUREMENT, vec![0x06, 0x48]),
        attr(CCC_HANDLE, CLIENT_CHAR_CONFIG_UUID, vec![0x00, 0x00]),
    ]
}

pub struct Peer {
    /// Every PDU the server received
    pub received: Arc<Mutex<Vec<Vec<u8>>>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.join().unwrap();
        }
    }
}

impl Peer {
    pub fn received_opcodes(&self) -> Vec<u8> {
        self.received.lock().unwrap().iter().map(|pdu| pdu[0]).collect()
    }
}

/// Connect a client to a freshly started server peer
pub fn connect() -> (Connection, Peer) {
    init_logging();
    let (local, remote) = UnixDatagram::pair().unwrap();
    remote
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let stop = Arc::new(AtomicBool::new(false));
    let worker = {
        let received = Arc::clone(&received);
        let stop = Arc::clone(&stop);
        thread::spawn(move || serve(remote, received, stop))
    };

    let conn = Connection::from_socket(local, ATT_DEFAULT_MTU).unwrap();
    (
        conn,
        Peer {
            received,
            stop,
            worker: Some(worker),
        },
    )
}

fn encode<P: AttPdu>(pdu: &P) -> Vec<u8> {
    let mut buf = vec![0; ATT_MAX_MTU as usize];
    let len = pdu.encode(&mut buf).unwrap();
    buf.truncate(len);
    buf
}

struct Server {
    table: Vec<Attribute>,
    mtu: usize,
    prepared: Vec<PrepareWriteRequest>,
}

fn serve(socket: UnixDatagram, received: Arc<Mutex<Vec<Vec<u8>>>>, stop: Arc<AtomicBool>) {
    let mut server = Server {
        table: table(),
        mtu: ATT_DEFAULT_MTU as usize,
        prepared: Vec::new(),
    };
    let mut buf = [0u8; ATT_MAX_MTU as usize];
    while !stop.load(Ordering::Acquire) {
        let len = match socket.recv(&mut buf) {
            Ok(0) => return,
            Ok(len) => len,
            Err(_) => continue,
        };
        let pdu = &buf[..len];
        received.lock().unwrap().push(pdu.to_vec());
        for reply in server.answer(pdu) {
            if socket.send(&reply).is_err() {
                return;
            }
        }
    }
}

impl Server {
    fn answer(&mut self, pdu: &[u8]) -> Vec<Vec<u8>> {
        let opcode = pdu[0];
        let result = match opcode {
            ATT_EXCHANGE_MTU_REQ => {
                let req = ExchangeMtuRequest::decode(pdu).unwrap();
                self.mtu = req.client_rx_mtu.min(64) as usize;
                Ok(encode(&ExchangeMtuResponse { server_rx_mtu: 64 }))
            }
            ATT_READ_BY_GROUP_TYPE_REQ => {
                let req = ReadByGroupTypeRequest::decode(pdu).unwrap();
                let entries: Vec<GroupValue> = self
                    .matching(req.start_handle, req.end_handle, req.group_type)
                    .map(|a| GroupValue {
                        handle: a.handle,
                        end_group: self.group_end(a.handle),
                        value: a.value.clone(),
                    })
                    .take((self.mtu - 2) / 6)
                    .collect();
                self.found(req.start_handle, entries.is_empty())
                    .map(|_| encode(&ReadByGroupTypeResponse { entries }))
            }
            ATT_FIND_BY_TYPE_VALUE_REQ => {
                let req = FindByTypeValueRequest::decode(pdu).unwrap();
                let kind = Uuid::from_u16(req.attribute_type);
                let handles: Vec<HandlesInformation> = self
                    .matching(req.start_handle, req.end_handle, kind)
                    .filter(|a| a.value == req.value)
                    .map(|a| HandlesInformation {
                        found: a.handle,
                        end_group: self.group_end(a.handle),
                    })
                    .take((self.mtu - 1) / 4)
                    .collect();
                self.found(req.start_handle, handles.is_empty())
                    .map(|_| encode(&FindByTypeValueResponse { handles }))
            }
            ATT_READ_BY_TYPE_REQ => {
                let req = ReadByTypeRequest::decode(pdu).unwrap();
                let mut entries: Vec<HandleValue> = Vec::new();
                let mut size = 2;
                for a in self.matching(req.start_handle, req.end_handle, req.attribute_type) {
                    let len = a.value.len().min(self.mtu - 4);
                    if entries.first().is_some_and(|e| e.value.len() != len) || size + 2 + len > self.mtu {
                        break;
                    }
                    size += 2 + len;
                    entries.push(HandleValue {
                        handle: a.handle,
                        value: a.value[..len].to_vec(),
                    });
                }
                self.found(req.start_handle, entries.is_empty())
                    .map(|_| encode(&ReadByTypeResponse { entries }))
            }
            ATT_FIND_INFO_REQ => {
                let req = FindInformationRequest::decode(pdu).unwrap();
                let entries: Vec<HandleUuid> = self
                    .table
                    .iter()
                    .filter(|a| a.handle >= req.start_handle && a.handle <= req.end_handle)
                    .map(|a| HandleUuid {
                        handle: a.handle,
                        uuid: a.kind,
                    })
                    .take((self.mtu - 2) / 4)
                    .collect();
                self.found(req.start_handle, entries.is_empty())
                    .map(|_| encode(&FindInformationResponse { entries }))
            }
            ATT_READ_REQ | ATT_READ_BLOB_REQ => {
                let (handle, offset) = if opcode == ATT_READ_REQ {
                    (ReadRequest::decode(pdu).unwrap().handle, 0)
                } else {
                    let req = ReadBlobRequest::decode(pdu).unwrap();
                    (req.handle, req.offset as usize)
                };
                if handle == SILENT_HANDLE {
                    return Vec::new();
                }
                match self.table.iter().find(|a| a.handle == handle) {
                    None => Err((handle, AttErrorCode::InvalidHandle)),
                    Some(a) if offset > a.value.len() => Err((handle, AttErrorCode::InvalidOffset)),
                    Some(a) => {
                        let end = a.value.len().min(offset + self.mtu - 1);
                        let value = a.value[offset..end].to_vec();
                        Ok(if opcode == ATT_READ_REQ {
                            encode(&ReadResponse { value })
                        } else {
                            encode(&ReadBlobResponse { value })
                        })
                    }
                }
            }
            ATT_WRITE_REQ => {
                let req = WriteRequest::decode(pdu).unwrap();
                self.store(req.handle, 0, &req.value);
                Ok(encode(&WriteResponse))
            }
            ATT_PREPARE_WRITE_REQ => {
                let req = PrepareWriteRequest::decode(pdu).unwrap();
                let echo = encode(&PrepareWriteResponse {
                    handle: req.handle,
                    offset: req.offset,
                    value: req.value.clone(),
                });
                self.prepared.push(req);
                Ok(echo)
            }
            ATT_EXECUTE_WRITE_REQ => {
                let req = ExecuteWriteRequest::decode(pdu).unwrap();
                for part in std::mem::take(&mut self.prepared) {
                    if req.commit {
                        self.store(part.handle, part.offset as usize, &part.value);
                    }
                }
                Ok(encode(&ExecuteWriteResponse))
            }
            // Writing the measurement pushes it back as a notification and
            // an indication
            ATT_WRITE_CMD => {
                let cmd = WriteCommand::decode(pdu).unwrap();
                self.store(cmd.handle, 0, &cmd.value);
                return vec![
                    encode(&HandleValueNotification {
                        handle: cmd.handle,
                        value: cmd.value.clone(),
                    }),
                    encode(&HandleValueIndication {
                        handle: cmd.handle,
                        value: cmd.value,
                    }),
                ];
            }
            _ => return Vec::new(),
        };
        let reply = result.unwrap_or_else(|(handle, code)| {
            encode(&ErrorResponse {
                request_opcode: opcode,
                handle,
                code,
            })
        });
        vec![reply]
    }

    fn matching(&self, start: u16, end: u16, kind: Uuid) -> impl Iterator<Item = &Attribute> {
        self.table
            .iter()
            .filter(move |a| a.handle >= start && a.handle <= end && a.kind == kind)
    }

    fn found(&self, start: u16, empty: bool) -> Result<(), (u16, AttErrorCode)> {
        if empty {
            Err((start, AttErrorCode::AttributeNotFound))
        } else {
            Ok(())
        }
    }

    fn group_end(&self, handle: u16) -> u16 {
        self.table
            .iter()
            .find(|a| a.handle > handle && a.kind == PRIMARY_SERVICE_UUID)
            .map_or(0xFFFF, |next| next.handle - 1)
    }

    fn store(&mut self, handle: u16, offset: usize, value: &[u8]) {
        if let Some(a) = self.table.iter_mut().find(|a| a.handle == handle) {
            a.value.resize(offset, 0);
            a.value.extend_from_slice(value);
        }
    }
}
