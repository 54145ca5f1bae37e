//! Single-request GATT client primitives
use super::error::{GattError, GattResult};
use super::operation::{Operation, Outcome};
use super::types::PreparedWrite;
use crate::att::pdu::*;
use crate::att::{
    AttChannel, AttResult, TransactionId, ATT_DEFAULT_MTU, ATT_MAX_MTU, ATT_MTU_HEADER_SIZE,
    ATT_PREPARE_HEADER_SIZE,
};
use log::info;

/// Send one request and finish the operation with the decoded response.
fn single<T, P>(
    chan: &mut AttChannel,
    pdu: &P,
    initial: T,
    done: impl FnOnce(Outcome<T>) + 'static,
    on_response: impl FnOnce(&mut AttChannel, &[u8]) -> GattResult<T> + 'static,
) -> GattResult<TransactionId>
where
    T: Default + 'static,
    P: AttPdu,
{
    let op = Operation::new(initial, done);
    let answered = op.clone();
    let first = chan.request(
        None,
        pdu,
        Box::new(move |chan, result: AttResult<&[u8]>| {
            match result
                .map_err(GattError::from)
                .and_then(|pdu| on_response(chan, pdu))
            {
                Ok(value) => {
                    answered.with(|slot| *slot = value);
                    answered.finish();
                }
                Err(err) => answered.fail(err),
            }
        }),
    );
    op.started(first)
}

impl AttChannel {
    /// Negotiate the ATT MTU.
    ///
    /// The channel MTU becomes the smaller of `client_mtu` and the server's
    /// receive MTU, never below the default of 23, and is delivered to `done`.
    pub fn exchange_mtu(
        &mut self,
        client_mtu: u16,
        done: impl FnOnce(Outcome<u16>) + 'static,
    ) -> GattResult<TransactionId> {
        if !(ATT_DEFAULT_MTU..=ATT_MAX_MTU).contains(&client_mtu) {
            return Err(GattError::InvalidParameter(format!(
                "MTU {} outside {}..={}",
                client_mtu, ATT_DEFAULT_MTU, ATT_MAX_MTU
            )));
        }
        let current = self.mtu();
        single(
            self,
            &ExchangeMtuRequest {
                client_rx_mtu: client_mtu,
            },
            current,
            done,
            move |chan, pdu| {
                let rsp = ExchangeMtuResponse::decode(pdu)?;
                let mtu = client_mtu.min(rsp.server_rx_mtu).max(ATT_DEFAULT_MTU);
                chan.set_mtu(mtu);
                info!("Negotiated ATT MTU {}", mtu);
                Ok(chan.mtu())
            },
        )
    }

    /// Write with a Write Command; nothing is acknowledged.
    pub fn write_without_response(&mut self, handle: u16, value: &[u8]) -> GattResult<()> {
        let max = self.mtu() as usize - ATT_MTU_HEADER_SIZE;
        if value.len() > max {
            return Err(GattError::ValueTooLong {
                len: value.len(),
                max,
            });
        }
        self.command(&WriteCommand {
            handle,
            value: value.to_vec(),
        })?;
        Ok(())
    }

    /// Queue `value` at offset 0 with a single Prepare Write.
    ///
    /// `done` receives the server's echo so the caller can verify it before
    /// committing with [`AttChannel::execute_write`].
    pub fn reliable_write(
        &mut self,
        handle: u16,
        value: &[u8],
        done: impl FnOnce(Outcome<PreparedWrite>) + 'static,
    ) -> GattResult<TransactionId> {
        let max = self.mtu() as usize - ATT_PREPARE_HEADER_SIZE;
        if value.len() > max {
            return Err(GattError::ValueTooLong {
                len: value.len(),
                max,
            });
        }
        single(
            self,
            &PrepareWriteRequest {
                handle,
                offset: 0,
                value: value.to_vec(),
            },
            PreparedWrite::default(),
            done,
            |_, pdu| {
                let echo = PrepareWriteResponse::decode(pdu)?;
                Ok(PreparedWrite {
                    handle: echo.handle,
                    offset: echo.offset,
                    value: echo.value,
                })
            },
        )
    }

    /// Commit (`true`) or discard (`false`) the server's prepared writes.
    pub fn execute_write(
        &mut self,
        commit: bool,
        done: impl FnOnce(Outcome<()>) + 'static,
    ) -> GattResult<TransactionId> {
        single(
            self,
            &ExecuteWriteRequest { commit },
            (),
            done,
            |_, pdu| {
                ExecuteWriteResponse::decode(pdu)?;
                Ok(())
            },
        )
    }
}
