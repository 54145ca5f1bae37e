//! GATT discovery procedures
//!
//! All discovery kinds share one pagination engine: request a page for
//! `[cursor, end]`, append the decoded entries, then continue at
//! `last + 1` until the page reaches the end of the range or the handle
//! space. `Attribute Not Found` ends the walk successfully. A page ending
//! below the cursor aborts with [`GattError::HandleRegression`] instead of
//! looping against a misbehaving peer.
use super::error::{GattError, GattResult};
use super::operation::{Operation, Outcome};
use super::types::*;
use crate::att::pdu::*;
use crate::att::{
    AttChannel, AttError, AttErrorCode, AttResult, ResponseCallback, TransactionId,
    ATT_HANDLE_MAX, CHARACTERISTIC_UUID, INCLUDE_UUID, PRIMARY_SERVICE_UUID,
};
use crate::uuid::Uuid;
use log::{debug, warn};

/// One decoded page of a discovery walk
struct Page<T> {
    items: Vec<T>,
    /// Highest handle covered by the page
    last: u16,
    /// End the walk after this page
    stop: bool,
}

/// Request that fetches the page starting at the cursor
enum PageRequest {
    Group(ReadByGroupTypeRequest),
    TypeValue(FindByTypeValueRequest),
    Type(ReadByTypeRequest),
    Information(FindInformationRequest),
}

impl PageRequest {
    fn send(
        self,
        chan: &mut AttChannel,
        group: Option<TransactionId>,
        callback: ResponseCallback,
    ) -> AttResult<TransactionId> {
        match self {
            PageRequest::Group(req) => chan.request(group, &req, callback),
            PageRequest::TypeValue(req) => chan.request(group, &req, callback),
            PageRequest::Type(req) => chan.request(group, &req, callback),
            PageRequest::Information(req) => chan.request(group, &req, callback),
        }
    }
}

/// A discovery kind plugged into the pagination engine
trait Procedure: 'static {
    type Item: 'static;

    const NAME: &'static str;

    fn request(&self, cursor: u16, end: u16) -> PageRequest;

    fn decode_page(&mut self, pdu: &[u8]) -> GattResult<Page<Self::Item>>;

    /// Called once a page has been appended at index `first`.
    fn appended(&mut self, _chan: &mut AttChannel, _op: &Operation<Vec<Self::Item>>, _first: usize) {
    }
}

struct Pager<P> {
    procedure: P,
    cursor: u16,
    end: u16,
}

fn start<P: Procedure>(
    chan: &mut AttChannel,
    range: HandleRange,
    procedure: P,
    done: impl FnOnce(Outcome<Vec<P::Item>>) + 'static,
) -> GattResult<TransactionId> {
    let op = Operation::new(Vec::new(), done);
    let pager = Pager {
        procedure,
        cursor: range.start(),
        end: range.end(),
    };
    let first = request_page(chan, op.clone(), pager);
    op.started(first)
}

fn request_page<P: Procedure>(
    chan: &mut AttChannel,
    op: Operation<Vec<P::Item>>,
    pager: Pager<P>,
) -> AttResult<TransactionId> {
    debug!("{}: requesting 0x{:04X}-0x{:04X}", P::NAME, pager.cursor, pager.end);
    let request = pager.procedure.request(pager.cursor, pager.end);
    let group = op.group();
    request.send(
        chan,
        group,
        Box::new(move |chan, result| on_page(chan, op, pager, result)),
    )
}

fn on_page<P: Procedure>(
    chan: &mut AttChannel,
    op: Operation<Vec<P::Item>>,
    mut pager: Pager<P>,
    result: AttResult<&[u8]>,
) {
    if op.is_finished() {
        return;
    }
    let pdu = match result {
        Ok(pdu) => pdu,
        Err(err) if err.is_code(AttErrorCode::AttributeNotFound) => {
            debug!("{}: complete at 0x{:04X}", P::NAME, pager.cursor);
            op.finish();
            return;
        }
        Err(err) => {
            op.fail(err.into());
            return;
        }
    };

    let page = match pager.procedure.decode_page(pdu) {
        Ok(page) => page,
        Err(err) => {
            op.fail(err);
            return;
        }
    };
    if page.last < pager.cursor {
        warn!(
            "{}: page ended at 0x{:04X} below cursor 0x{:04X}",
            P::NAME,
            page.last,
            pager.cursor
        );
        op.fail(GattError::HandleRegression {
            cursor: pager.cursor,
            last: page.last,
        });
        return;
    }

    let first = op.with(|acc| {
        let first = acc.len();
        acc.extend(page.items);
        first
    });
    pager.procedure.appended(chan, &op, first);

    if page.stop || page.last == ATT_HANDLE_MAX || page.last >= pager.end {
        debug!("{}: complete", P::NAME);
        op.finish();
        return;
    }
    pager.cursor = page.last + 1;
    if let Err(err) = request_page(chan, op.clone(), pager) {
        op.fail(err.into());
    }
}

fn range_of(start: u16, end: u16) -> GattResult<HandleRange> {
    HandleRange::new(start, end).map_err(|_| GattError::Att(AttError::InvalidPdu))
}

fn uuid_of(bytes: &[u8]) -> GattResult<Uuid> {
    match bytes.len() {
        2 | 16 => Uuid::try_from_slice_le(bytes).ok_or(GattError::Att(AttError::InvalidPdu)),
        _ => Err(GattError::Att(AttError::InvalidPdu)),
    }
}

struct PrimaryServices;

impl Procedure for PrimaryServices {
    type Item = PrimaryService;

    const NAME: &'static str = "primary services";

    fn request(&self, cursor: u16, end: u16) -> PageRequest {
        PageRequest::Group(ReadByGroupTypeRequest {
            start_handle: cursor,
            end_handle: end,
            group_type: Uuid::from_u16(PRIMARY_SERVICE_UUID),
        })
    }

    fn decode_page(&mut self, pdu: &[u8]) -> GattResult<Page<PrimaryService>> {
        let rsp = ReadByGroupTypeResponse::decode(pdu)?;
        let items = rsp
            .entries
            .iter()
            .map(|entry| {
                Ok(PrimaryService {
                    range: range_of(entry.handle, entry.end_group)?,
                    uuid: uuid_of(&entry.value)?,
                })
            })
            .collect::<GattResult<Vec<_>>>()?;
        let last = rsp.entries.last().map_or(0, |e| e.end_group);
        Ok(Page {
            items,
            last,
            stop: false,
        })
    }
}

struct PrimaryServicesByUuid {
    uuid: Uuid,
}

impl Procedure for PrimaryServicesByUuid {
    type Item = PrimaryService;

    const NAME: &'static str = "primary services by UUID";

    fn request(&self, cursor: u16, end: u16) -> PageRequest {
        let mut value = Vec::with_capacity(16);
        self.uuid.write_att(&mut value);
        PageRequest::TypeValue(FindByTypeValueRequest {
            start_handle: cursor,
            end_handle: end,
            attribute_type: PRIMARY_SERVICE_UUID,
            value,
        })
    }

    fn decode_page(&mut self, pdu: &[u8]) -> GattResult<Page<PrimaryService>> {
        let rsp = FindByTypeValueResponse::decode(pdu)?;
        let items = rsp
            .handles
            .iter()
            .map(|info| {
                Ok(PrimaryService {
                    range: range_of(info.found, info.end_group)?,
                    uuid: self.uuid,
                })
            })
            .collect::<GattResult<Vec<_>>>()?;
        let last = rsp.handles.last().map_or(0, |h| h.end_group);
        Ok(Page {
            items,
            last,
            stop: false,
        })
    }
}

/// Include declarations of 128-bit services omit the UUID, so it is read
/// from the included service's declaration.
#[derive(Default)]
struct IncludedServices {
    /// Page-relative index and declaration handle of entries awaiting a UUID
    unresolved: Vec<(usize, u16)>,
}

impl Procedure for IncludedServices {
    type Item = IncludedService;

    const NAME: &'static str = "included services";

    fn request(&self, cursor: u16, end: u16) -> PageRequest {
        PageRequest::Type(ReadByTypeRequest {
            start_handle: cursor,
            end_handle: end,
            attribute_type: Uuid::from_u16(INCLUDE_UUID),
        })
    }

    fn decode_page(&mut self, pdu: &[u8]) -> GattResult<Page<IncludedService>> {
        let rsp = ReadByTypeResponse::decode(pdu)?;
        self.unresolved.clear();
        let mut items = Vec::with_capacity(rsp.entries.len());
        for (index, entry) in rsp.entries.iter().enumerate() {
            let value = &entry.value;
            if value.len() != 4 && value.len() != 6 {
                return Err(AttError::InvalidPdu.into());
            }
            let start = u16::from_le_bytes([value[0], value[1]]);
            let end = u16::from_le_bytes([value[2], value[3]]);
            let uuid = if value.len() == 6 {
                uuid_of(&value[4..])?
            } else {
                self.unresolved.push((index, start));
                Uuid::from_u16(0)
            };
            items.push(IncludedService {
                handle: entry.handle,
                range: range_of(start, end)?,
                uuid,
            });
        }
        let last = rsp.entries.last().map_or(0, |e| e.handle);
        Ok(Page {
            items,
            last,
            stop: false,
        })
    }

    fn appended(&mut self, chan: &mut AttChannel, op: &Operation<Vec<IncludedService>>, first: usize) {
        for (offset, declaration) in self.unresolved.drain(..) {
            let index = first + offset;
            let nested = op.clone();
            op.hold();
            let sent = chan.request(
                op.group(),
                &ReadRequest {
                    handle: declaration,
                },
                Box::new(move |_, result| {
                    resolve_included(&nested, index, result);
                    nested.release();
                }),
            );
            if let Err(err) = sent {
                op.release();
                op.with(|acc| acc.truncate(index));
                op.fail(err.into());
                return;
            }
        }
    }
}

fn resolve_included(op: &Operation<Vec<IncludedService>>, index: usize, result: AttResult<&[u8]>) {
    let uuid = result
        .map_err(GattError::from)
        .and_then(|pdu| Ok(ReadResponse::decode(pdu)?))
        .and_then(|rsp| match rsp.value.len() {
            16 => uuid_of(&rsp.value),
            _ => Err(AttError::InvalidPdu.into()),
        });
    match uuid {
        Ok(uuid) => op.with(|acc| {
            if let Some(service) = acc.get_mut(index) {
                service.uuid = uuid;
            }
        }),
        Err(err) => {
            // Entries from this one on have no reliable UUID
            op.with(|acc| acc.truncate(index));
            op.fail(err);
        }
    }
}

struct Characteristics {
    filter: Option<Uuid>,
}

impl Procedure for Characteristics {
    type Item = Characteristic;

    const NAME: &'static str = "characteristics";

    fn request(&self, cursor: u16, end: u16) -> PageRequest {
        PageRequest::Type(ReadByTypeRequest {
            start_handle: cursor,
            end_handle: end,
            attribute_type: Uuid::from_u16(CHARACTERISTIC_UUID),
        })
    }

    fn decode_page(&mut self, pdu: &[u8]) -> GattResult<Page<Characteristic>> {
        let rsp = ReadByTypeResponse::decode(pdu)?;
        let mut items = Vec::with_capacity(rsp.entries.len());
        for entry in &rsp.entries {
            let value = &entry.value;
            if value.len() != 5 && value.len() != 19 {
                return Err(AttError::InvalidPdu.into());
            }
            let characteristic = Characteristic {
                handle: entry.handle,
                properties: CharacteristicProperties::from_bits_retain(value[0]),
                value_handle: u16::from_le_bytes([value[1], value[2]]),
                uuid: uuid_of(&value[3..])?,
            };
            if self.filter.map_or(true, |f| f == characteristic.uuid) {
                items.push(characteristic);
            }
        }
        let last = rsp.entries.last().map_or(0, |e| e.handle);
        Ok(Page {
            items,
            last,
            stop: false,
        })
    }
}

struct Descriptors {
    filter: Option<Uuid>,
}

impl Procedure for Descriptors {
    type Item = Descriptor;

    const NAME: &'static str = "descriptors";

    fn request(&self, cursor: u16, end: u16) -> PageRequest {
        PageRequest::Information(FindInformationRequest {
            start_handle: cursor,
            end_handle: end,
        })
    }

    fn decode_page(&mut self, pdu: &[u8]) -> GattResult<Page<Descriptor>> {
        let rsp = FindInformationResponse::decode(pdu)?;
        let last = rsp.entries.last().map_or(0, |e| e.handle);
        let page = match self.filter {
            None => Page {
                items: rsp
                    .entries
                    .iter()
                    .map(|e| Descriptor {
                        handle: e.handle,
                        uuid: e.uuid,
                    })
                    .collect(),
                last,
                stop: false,
            },
            Some(filter) => match rsp.entries.iter().find(|e| e.uuid == filter) {
                Some(found) => Page {
                    items: vec![Descriptor {
                        handle: found.handle,
                        uuid: found.uuid,
                    }],
                    last: found.handle,
                    stop: true,
                },
                None => Page {
                    items: Vec::new(),
                    last,
                    stop: false,
                },
            },
        };
        Ok(page)
    }
}

struct ValuesByType {
    uuid: Uuid,
}

impl Procedure for ValuesByType {
    type Item = AttributeValue;

    const NAME: &'static str = "read by type";

    fn request(&self, cursor: u16, end: u16) -> PageRequest {
        PageRequest::Type(ReadByTypeRequest {
            start_handle: cursor,
            end_handle: end,
            attribute_type: self.uuid,
        })
    }

    fn decode_page(&mut self, pdu: &[u8]) -> GattResult<Page<AttributeValue>> {
        let rsp = ReadByTypeResponse::decode(pdu)?;
        let last = rsp.entries.last().map_or(0, |e| e.handle);
        let items = rsp
            .entries
            .into_iter()
            .map(|e| AttributeValue {
                handle: e.handle,
                value: e.value,
            })
            .collect();
        Ok(Page {
            items,
            last,
            stop: false,
        })
    }
}

impl AttChannel {
    /// Discover primary services in `range`, optionally only those with `uuid`.
    ///
    /// Returns the transaction group, which can be passed to
    /// [`AttChannel::cancel`]. `done` runs once with every service found,
    /// plus the error if the walk was aborted.
    pub fn discover_primary_services(
        &mut self,
        range: HandleRange,
        uuid: Option<Uuid>,
        done: impl FnOnce(Outcome<Vec<PrimaryService>>) + 'static,
    ) -> GattResult<TransactionId> {
        match uuid {
            None => start(self, range, PrimaryServices, done),
            Some(uuid) => start(self, range, PrimaryServicesByUuid { uuid }, done),
        }
    }

    /// Discover the services included by the service spanning `range`.
    pub fn discover_included_services(
        &mut self,
        range: HandleRange,
        done: impl FnOnce(Outcome<Vec<IncludedService>>) + 'static,
    ) -> GattResult<TransactionId> {
        start(self, range, IncludedServices::default(), done)
    }

    /// Discover characteristic declarations in `range`.
    ///
    /// With a UUID filter the whole range is still walked; non-matching
    /// declarations are dropped locally.
    pub fn discover_characteristics(
        &mut self,
        range: HandleRange,
        uuid: Option<Uuid>,
        done: impl FnOnce(Outcome<Vec<Characteristic>>) + 'static,
    ) -> GattResult<TransactionId> {
        start(self, range, Characteristics { filter: uuid }, done)
    }

    /// Discover descriptors in `range`.
    ///
    /// With a UUID filter the walk stops at the first match.
    pub fn discover_descriptors(
        &mut self,
        range: HandleRange,
        uuid: Option<Uuid>,
        done: impl FnOnce(Outcome<Vec<Descriptor>>) + 'static,
    ) -> GattResult<TransactionId> {
        start(self, range, Descriptors { filter: uuid }, done)
    }

    /// Read every attribute of type `uuid` in `range`.
    pub fn read_by_uuid(
        &mut self,
        range: HandleRange,
        uuid: Uuid,
        done: impl FnOnce(Outcome<Vec<AttributeValue>>) + 'static,
    ) -> GattResult<TransactionId> {
        start(self, range, ValuesByType { uuid }, done)
    }
}
