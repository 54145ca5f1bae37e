//! Long attribute value transfers
//!
//! Reads continue with Read Blob while responses fill the MTU. Writes that do
//! not fit a single Write Request are queued on the server with Prepare
//! Write and committed with one Execute Write once every part is acknowledged.
use super::error::{GattError, GattResult};
use super::operation::{Operation, Outcome};
use crate::att::pdu::*;
use crate::att::{
    AttChannel, AttError, AttErrorCode, AttResult, TransactionId, ATT_MTU_HEADER_SIZE,
    ATT_PREPARE_HEADER_SIZE,
};
use log::{debug, warn};

fn read_step(
    chan: &mut AttChannel,
    op: Operation<Vec<u8>>,
    handle: u16,
    offset: u16,
) -> AttResult<TransactionId> {
    let group = op.group();
    let callback = Box::new(move |chan: &mut AttChannel, result: AttResult<&[u8]>| {
        on_value(chan, op, handle, offset, result)
    });
    if offset == 0 {
        chan.request(group, &ReadRequest { handle }, callback)
    } else {
        chan.request(group, &ReadBlobRequest { handle, offset }, callback)
    }
}

fn on_value(
    chan: &mut AttChannel,
    op: Operation<Vec<u8>>,
    handle: u16,
    offset: u16,
    result: AttResult<&[u8]>,
) {
    let blob = offset > 0;
    let pdu = match result {
        Ok(pdu) => pdu,
        // The value ended exactly on an MTU boundary
        Err(err)
            if blob
                && (err.is_code(AttErrorCode::InvalidOffset)
                    || err.is_code(AttErrorCode::AttributeNotLong)) =>
        {
            op.finish();
            return;
        }
        Err(err) => {
            op.fail(err.into());
            return;
        }
    };
    let chunk = if blob {
        ReadBlobResponse::decode(pdu).map(|rsp| rsp.value)
    } else {
        ReadResponse::decode(pdu).map(|rsp| rsp.value)
    };
    let chunk = match chunk {
        Ok(chunk) => chunk,
        Err(err) => {
            op.fail(err.into());
            return;
        }
    };

    let full = chunk.len() == chan.mtu() as usize - 1;
    let total = op.with(|acc| {
        acc.extend_from_slice(&chunk);
        acc.len()
    });
    let next = match u16::try_from(total) {
        Ok(next) if full => next,
        _ => {
            op.finish();
            return;
        }
    };
    debug!("Long read of 0x{:04X} continuing at offset {}", handle, next);
    if let Err(err) = read_step(chan, op.clone(), handle, next) {
        op.fail(err.into());
    }
}

/// State of a long write carried between prepare steps
struct LongWrite {
    handle: u16,
    value: Vec<u8>,
    offset: usize,
}

fn prepare_step(
    chan: &mut AttChannel,
    op: Operation<()>,
    write: LongWrite,
) -> AttResult<TransactionId> {
    let room = chan.mtu() as usize - ATT_PREPARE_HEADER_SIZE;
    let end = write.value.len().min(write.offset + room);
    let request = PrepareWriteRequest {
        handle: write.handle,
        // Bounded by the length check in `write_value`
        offset: write.offset as u16,
        value: write.value[write.offset..end].to_vec(),
    };
    let group = op.group();
    chan.request(
        group,
        &request,
        Box::new(move |chan, result| on_prepared(chan, op, write, result)),
    )
}

fn on_prepared(
    chan: &mut AttChannel,
    op: Operation<()>,
    mut write: LongWrite,
    result: AttResult<&[u8]>,
) {
    let echo = match result
        .map_err(GattError::from)
        .and_then(|pdu| Ok(PrepareWriteResponse::decode(pdu)?))
    {
        Ok(echo) => echo,
        Err(err) => {
            op.fail(err);
            return;
        }
    };
    let valid = echo.handle == write.handle
        && echo.offset as usize == write.offset
        && !echo.value.is_empty()
        && write.value[write.offset..].starts_with(&echo.value);
    if !valid {
        warn!(
            "Prepare write echo mismatch on 0x{:04X} at offset {}",
            write.handle, write.offset
        );
        op.fail(AttError::InvalidPdu.into());
        return;
    }

    write.offset += echo.value.len();
    if write.offset < write.value.len() {
        if let Err(err) = prepare_step(chan, op.clone(), write) {
            op.fail(err.into());
        }
        return;
    }

    debug!("Long write of 0x{:04X} prepared, executing", write.handle);
    let group = op.group();
    let executed = op.clone();
    let sent = chan.request(
        group,
        &ExecuteWriteRequest { commit: true },
        Box::new(move |_, result| {
            match result.and_then(ExecuteWriteResponse::decode) {
                Ok(_) => executed.finish(),
                Err(err) => executed.fail(err.into()),
            }
        }),
    );
    if let Err(err) = sent {
        op.fail(err.into());
    }
}

impl AttChannel {
    /// Read an attribute value of any length.
    ///
    /// A first response shorter than `MTU - 1` is delivered as is; otherwise
    /// Read Blob requests follow at increasing offsets until a short part
    /// arrives. On error the bytes read so far are delivered with it.
    pub fn read_value(
        &mut self,
        handle: u16,
        done: impl FnOnce(Outcome<Vec<u8>>) + 'static,
    ) -> GattResult<TransactionId> {
        let op = Operation::new(Vec::new(), done);
        let first = read_step(self, op.clone(), handle, 0);
        op.started(first)
    }

    /// Write an attribute value of any length.
    ///
    /// Values up to `MTU - 3` bytes go out as one Write Request. Longer ones
    /// are split into Prepare Write parts followed by a committing Execute
    /// Write. If a part fails the execute is never sent; the server's queue
    /// can be discarded with [`AttChannel::execute_write`].
    pub fn write_value(
        &mut self,
        handle: u16,
        value: Vec<u8>,
        done: impl FnOnce(Outcome<()>) + 'static,
    ) -> GattResult<TransactionId> {
        if value.len() > u16::MAX as usize {
            return Err(GattError::ValueTooLong {
                len: value.len(),
                max: u16::MAX as usize,
            });
        }
        let op = Operation::new((), done);

        let first = if value.len() <= self.mtu() as usize - ATT_MTU_HEADER_SIZE {
            let written = op.clone();
            self.request(
                None,
                &WriteRequest { handle, value },
                Box::new(move |_, result| match result.and_then(WriteResponse::decode) {
                    Ok(_) => written.finish(),
                    Err(err) => written.fail(err.into()),
                }),
            )
        } else {
            debug!("Long write of {} bytes to 0x{:04X}", value.len(), handle);
            prepare_step(
                self,
                op.clone(),
                LongWrite {
                    handle,
                    value,
                    offset: 0,
                },
            )
        };
        op.started(first)
    }
}
