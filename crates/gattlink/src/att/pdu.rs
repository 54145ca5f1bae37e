//! ATT PDU encoding and decoding
//!
//! Every PDU the client sends or receives implements [`AttPdu`]. Requests are
//! encoded straight into the channel's MTU-sized scratch buffer; responses are
//! decoded from the received datagram into owned values.
use super::constants::*;
use super::error::{AttError, AttErrorCode, AttResult};
use crate::uuid::Uuid;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Common interface of ATT PDUs
pub trait AttPdu: Sized {
    /// Opcode for this PDU
    const OPCODE: u8;

    /// Encodes the PDU into `buf`, returning the number of bytes written.
    ///
    /// Fails with [`AttError::Encode`] when the PDU does not fit.
    fn encode(&self, buf: &mut [u8]) -> AttResult<usize>;

    /// Decodes the PDU from a complete datagram, opcode included.
    fn decode(data: &[u8]) -> AttResult<Self>;
}

/// Maps a request opcode to the opcode of its success response.
///
/// Returns `None` for commands, notifications and anything else that is not
/// answered by a response.
pub fn response_opcode_for(request: u8) -> Option<u8> {
    match request {
        ATT_EXCHANGE_MTU_REQ => Some(ATT_EXCHANGE_MTU_RSP),
        ATT_FIND_INFO_REQ => Some(ATT_FIND_INFO_RSP),
        ATT_FIND_BY_TYPE_VALUE_REQ => Some(ATT_FIND_BY_TYPE_VALUE_RSP),
        ATT_READ_BY_TYPE_REQ => Some(ATT_READ_BY_TYPE_RSP),
        ATT_READ_REQ => Some(ATT_READ_RSP),
        ATT_READ_BLOB_REQ => Some(ATT_READ_BLOB_RSP),
        ATT_READ_BY_GROUP_TYPE_REQ => Some(ATT_READ_BY_GROUP_TYPE_RSP),
        ATT_WRITE_REQ => Some(ATT_WRITE_RSP),
        ATT_PREPARE_WRITE_REQ => Some(ATT_PREPARE_WRITE_RSP),
        ATT_EXECUTE_WRITE_REQ => Some(ATT_EXECUTE_WRITE_RSP),
        _ => None,
    }
}

/// Bounded little-endian writer over a scratch buffer.
struct PduWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> PduWriter<'a> {
    fn new(buf: &'a mut [u8], opcode: u8) -> AttResult<Self> {
        let mut writer = PduWriter { buf, len: 0 };
        writer.put_u8(opcode)?;
        Ok(writer)
    }

    fn reserve(&mut self, n: usize) -> AttResult<&mut [u8]> {
        let start = self.len;
        if start + n > self.buf.len() {
            return Err(AttError::Encode(self.buf.len()));
        }
        self.len += n;
        Ok(&mut self.buf[start..start + n])
    }

    fn put_u8(&mut self, value: u8) -> AttResult<()> {
        self.reserve(1)?[0] = value;
        Ok(())
    }

    fn put_u16(&mut self, value: u16) -> AttResult<()> {
        LittleEndian::write_u16(self.reserve(2)?, value);
        Ok(())
    }

    fn put_bytes(&mut self, bytes: &[u8]) -> AttResult<()> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    fn put_uuid(&mut self, uuid: &Uuid) -> AttResult<()> {
        match uuid.as_u16() {
            Some(short) => self.put_u16(short),
            None => self.put_bytes(uuid.as_bytes_le()),
        }
    }

    fn finish(self) -> usize {
        self.len
    }
}

/// Checks the opcode and minimum length, returning a cursor past the opcode.
fn reader(data: &[u8], opcode: u8, min_len: usize) -> AttResult<Cursor<&[u8]>> {
    if data.len() < min_len || data.first() != Some(&opcode) {
        return Err(AttError::InvalidPdu);
    }
    let mut cursor = Cursor::new(data);
    cursor.set_position(1);
    Ok(cursor)
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> AttResult<u16> {
    cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| AttError::InvalidPdu)
}

fn rest(cursor: &Cursor<&[u8]>) -> Vec<u8> {
    let data = *cursor.get_ref();
    data[cursor.position() as usize..].to_vec()
}

/// Attribute handle and value pair (Read By Type Response entries)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValue {
    pub handle: u16,
    pub value: Vec<u8>,
}

/// Attribute handle, group end handle and value (Read By Group Type entries)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupValue {
    pub handle: u16,
    pub end_group: u16,
    pub value: Vec<u8>,
}

/// Attribute handle and type (Find Information entries)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleUuid {
    pub handle: u16,
    pub uuid: Uuid,
}

/// Found attribute handle and group end (Find By Type Value entries)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlesInformation {
    pub found: u16,
    pub end_group: u16,
}

/// Error Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResponse {
    pub request_opcode: u8,
    pub handle: u16,
    pub code: AttErrorCode,
}

impl AttPdu for ErrorResponse {
    const OPCODE: u8 = ATT_ERROR_RSP;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u8(self.request_opcode)?;
        w.put_u16(self.handle)?;
        w.put_u8(self.code.into())?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        if data.len() != 5 {
            return Err(AttError::InvalidPdu);
        }
        let mut cursor = reader(data, Self::OPCODE, 5)?;
        let request_opcode = cursor.read_u8().map_err(|_| AttError::InvalidPdu)?;
        let handle = read_u16(&mut cursor)?;
        let code = cursor.read_u8().map_err(|_| AttError::InvalidPdu)?;
        Ok(Self {
            request_opcode,
            handle,
            code: AttErrorCode::from(code),
        })
    }
}

impl From<ErrorResponse> for AttError {
    fn from(rsp: ErrorResponse) -> Self {
        AttError::Protocol {
            request: rsp.request_opcode,
            handle: rsp.handle,
            code: rsp.code,
        }
    }
}

/// Exchange MTU Request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeMtuRequest {
    pub client_rx_mtu: u16,
}

impl AttPdu for ExchangeMtuRequest {
    const OPCODE: u8 = ATT_EXCHANGE_MTU_REQ;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u16(self.client_rx_mtu)?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        let mut cursor = reader(data, Self::OPCODE, 3)?;
        Ok(Self {
            client_rx_mtu: read_u16(&mut cursor)?,
        })
    }
}

/// Exchange MTU Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeMtuResponse {
    pub server_rx_mtu: u16,
}

impl AttPdu for ExchangeMtuResponse {
    const OPCODE: u8 = ATT_EXCHANGE_MTU_RSP;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u16(self.server_rx_mtu)?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        let mut cursor = reader(data, Self::OPCODE, 3)?;
        Ok(Self {
            server_rx_mtu: read_u16(&mut cursor)?,
        })
    }
}

/// Find Information Request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindInformationRequest {
    pub start_handle: u16,
    pub end_handle: u16,
}

impl AttPdu for FindInformationRequest {
    const OPCODE: u8 = ATT_FIND_INFO_REQ;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u16(self.start_handle)?;
        w.put_u16(self.end_handle)?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        let mut cursor = reader(data, Self::OPCODE, 5)?;
        Ok(Self {
            start_handle: read_u16(&mut cursor)?,
            end_handle: read_u16(&mut cursor)?,
        })
    }
}

/// Find Information Response
///
/// All entries of one response share the same UUID width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindInformationResponse {
    pub entries: Vec<HandleUuid>,
}

impl AttPdu for FindInformationResponse {
    const OPCODE: u8 = ATT_FIND_INFO_RSP;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let width = self.entries.first().map_or(2, |e| e.uuid.att_len());
        let format = if width == 2 {
            ATT_FIND_INFO_RSP_FORMAT_16BIT
        } else {
            ATT_FIND_INFO_RSP_FORMAT_128BIT
        };
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u8(format)?;
        for entry in &self.entries {
            if entry.uuid.att_len() != width {
                return Err(AttError::InvalidPdu);
            }
            w.put_u16(entry.handle)?;
            w.put_uuid(&entry.uuid)?;
        }
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        reader(data, Self::OPCODE, 2)?;
        let width = match data[1] {
            ATT_FIND_INFO_RSP_FORMAT_16BIT => 2,
            ATT_FIND_INFO_RSP_FORMAT_128BIT => 16,
            _ => return Err(AttError::InvalidPdu),
        };
        let body = &data[2..];
        if body.is_empty() || body.len() % (2 + width) != 0 {
            return Err(AttError::InvalidPdu);
        }
        let entries = body
            .chunks_exact(2 + width)
            .map(|chunk| {
                let uuid = Uuid::try_from_slice_le(&chunk[2..]).ok_or(AttError::InvalidPdu)?;
                Ok(HandleUuid {
                    handle: LittleEndian::read_u16(chunk),
                    uuid,
                })
            })
            .collect::<AttResult<Vec<_>>>()?;
        Ok(Self { entries })
    }
}

/// Find By Type Value Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindByTypeValueRequest {
    pub start_handle: u16,
    pub end_handle: u16,
    pub attribute_type: u16,
    pub value: Vec<u8>,
}

impl AttPdu for FindByTypeValueRequest {
    const OPCODE: u8 = ATT_FIND_BY_TYPE_VALUE_REQ;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u16(self.start_handle)?;
        w.put_u16(self.end_handle)?;
        w.put_u16(self.attribute_type)?;
        w.put_bytes(&self.value)?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        let mut cursor = reader(data, Self::OPCODE, 7)?;
        Ok(Self {
            start_handle: read_u16(&mut cursor)?,
            end_handle: read_u16(&mut cursor)?,
            attribute_type: read_u16(&mut cursor)?,
            value: rest(&cursor),
        })
    }
}

/// Find By Type Value Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindByTypeValueResponse {
    pub handles: Vec<HandlesInformation>,
}

impl AttPdu for FindByTypeValueResponse {
    const OPCODE: u8 = ATT_FIND_BY_TYPE_VALUE_RSP;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        for info in &self.handles {
            w.put_u16(info.found)?;
            w.put_u16(info.end_group)?;
        }
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        let mut cursor = reader(data, Self::OPCODE, 5)?;
        if (data.len() - 1) % 4 != 0 {
            return Err(AttError::InvalidPdu);
        }
        let mut handles = Vec::with_capacity((data.len() - 1) / 4);
        while (cursor.position() as usize) < data.len() {
            handles.push(HandlesInformation {
                found: read_u16(&mut cursor)?,
                end_group: read_u16(&mut cursor)?,
            });
        }
        Ok(Self { handles })
    }
}

/// Read By Type Request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadByTypeRequest {
    pub start_handle: u16,
    pub end_handle: u16,
    pub attribute_type: Uuid,
}

impl AttPdu for ReadByTypeRequest {
    const OPCODE: u8 = ATT_READ_BY_TYPE_REQ;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u16(self.start_handle)?;
        w.put_u16(self.end_handle)?;
        w.put_uuid(&self.attribute_type)?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        let mut cursor = reader(data, Self::OPCODE, 7)?;
        let start_handle = read_u16(&mut cursor)?;
        let end_handle = read_u16(&mut cursor)?;
        let attribute_type = Uuid::try_from_slice_le(&data[5..]).ok_or(AttError::InvalidPdu)?;
        Ok(Self {
            start_handle,
            end_handle,
            attribute_type,
        })
    }
}

/// Read By Type Response
///
/// All entries carry values of the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByTypeResponse {
    pub entries: Vec<HandleValue>,
}

impl AttPdu for ReadByTypeResponse {
    const OPCODE: u8 = ATT_READ_BY_TYPE_RSP;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let value_len = self.entries.first().map_or(0, |e| e.value.len());
        let length = u8::try_from(2 + value_len).map_err(|_| AttError::InvalidPdu)?;
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u8(length)?;
        for entry in &self.entries {
            if entry.value.len() != value_len {
                return Err(AttError::InvalidPdu);
            }
            w.put_u16(entry.handle)?;
            w.put_bytes(&entry.value)?;
        }
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        reader(data, Self::OPCODE, 2)?;
        let length = data[1] as usize;
        let body = &data[2..];
        if length < 2 || body.is_empty() || body.len() % length != 0 {
            return Err(AttError::InvalidPdu);
        }
        let entries = body
            .chunks_exact(length)
            .map(|chunk| HandleValue {
                handle: LittleEndian::read_u16(chunk),
                value: chunk[2..].to_vec(),
            })
            .collect();
        Ok(Self { entries })
    }
}

/// Read Request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub handle: u16,
}

impl AttPdu for ReadRequest {
    const OPCODE: u8 = ATT_READ_REQ;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u16(self.handle)?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        let mut cursor = reader(data, Self::OPCODE, 3)?;
        Ok(Self {
            handle: read_u16(&mut cursor)?,
        })
    }
}

/// Read Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    pub value: Vec<u8>,
}

impl AttPdu for ReadResponse {
    const OPCODE: u8 = ATT_READ_RSP;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_bytes(&self.value)?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        reader(data, Self::OPCODE, 1)?;
        Ok(Self {
            value: data[1..].to_vec(),
        })
    }
}

/// Read Blob Request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBlobRequest {
    pub handle: u16,
    pub offset: u16,
}

impl AttPdu for ReadBlobRequest {
    const OPCODE: u8 = ATT_READ_BLOB_REQ;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u16(self.handle)?;
        w.put_u16(self.offset)?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        let mut cursor = reader(data, Self::OPCODE, 5)?;
        Ok(Self {
            handle: read_u16(&mut cursor)?,
            offset: read_u16(&mut cursor)?,
        })
    }
}

/// Read Blob Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBlobResponse {
    pub value: Vec<u8>,
}

impl AttPdu for ReadBlobResponse {
    const OPCODE: u8 = ATT_READ_BLOB_RSP;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_bytes(&self.value)?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        reader(data, Self::OPCODE, 1)?;
        Ok(Self {
            value: data[1..].to_vec(),
        })
    }
}

/// Read By Group Type Request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadByGroupTypeRequest {
    pub start_handle: u16,
    pub end_handle: u16,
    pub group_type: Uuid,
}

impl AttPdu for ReadByGroupTypeRequest {
    const OPCODE: u8 = ATT_READ_BY_GROUP_TYPE_REQ;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u16(self.start_handle)?;
        w.put_u16(self.end_handle)?;
        w.put_uuid(&self.group_type)?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        let mut cursor = reader(data, Self::OPCODE, 7)?;
        let start_handle = read_u16(&mut cursor)?;
        let end_handle = read_u16(&mut cursor)?;
        let group_type = Uuid::try_from_slice_le(&data[5..]).ok_or(AttError::InvalidPdu)?;
        Ok(Self {
            start_handle,
            end_handle,
            group_type,
        })
    }
}

/// Read By Group Type Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByGroupTypeResponse {
    pub entries: Vec<GroupValue>,
}

impl AttPdu for ReadByGroupTypeResponse {
    const OPCODE: u8 = ATT_READ_BY_GROUP_TYPE_RSP;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let value_len = self.entries.first().map_or(0, |e| e.value.len());
        let length = u8::try_from(4 + value_len).map_err(|_| AttError::InvalidPdu)?;
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u8(length)?;
        for entry in &self.entries {
            if entry.value.len() != value_len {
                return Err(AttError::InvalidPdu);
            }
            w.put_u16(entry.handle)?;
            w.put_u16(entry.end_group)?;
            w.put_bytes(&entry.value)?;
        }
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        reader(data, Self::OPCODE, 2)?;
        let length = data[1] as usize;
        let body = &data[2..];
        if length < 4 || body.is_empty() || body.len() % length != 0 {
            return Err(AttError::InvalidPdu);
        }
        let entries = body
            .chunks_exact(length)
            .map(|chunk| GroupValue {
                handle: LittleEndian::read_u16(&chunk[0..2]),
                end_group: LittleEndian::read_u16(&chunk[2..4]),
                value: chunk[4..].to_vec(),
            })
            .collect();
        Ok(Self { entries })
    }
}

/// Write Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttPdu for WriteRequest {
    const OPCODE: u8 = ATT_WRITE_REQ;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u16(self.handle)?;
        w.put_bytes(&self.value)?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        let mut cursor = reader(data, Self::OPCODE, 3)?;
        Ok(Self {
            handle: read_u16(&mut cursor)?,
            value: rest(&cursor),
        })
    }
}

/// Write Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResponse;

impl AttPdu for WriteResponse {
    const OPCODE: u8 = ATT_WRITE_RSP;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        Ok(PduWriter::new(buf, Self::OPCODE)?.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        reader(data, Self::OPCODE, 1)?;
        Ok(Self)
    }
}

/// Write Command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCommand {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttPdu for WriteCommand {
    const OPCODE: u8 = ATT_WRITE_CMD;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u16(self.handle)?;
        w.put_bytes(&self.value)?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        let mut cursor = reader(data, Self::OPCODE, 3)?;
        Ok(Self {
            handle: read_u16(&mut cursor)?,
            value: rest(&cursor),
        })
    }
}

/// Prepare Write Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareWriteRequest {
    pub handle: u16,
    pub offset: u16,
    pub value: Vec<u8>,
}

impl AttPdu for PrepareWriteRequest {
    const OPCODE: u8 = ATT_PREPARE_WRITE_REQ;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u16(self.handle)?;
        w.put_u16(self.offset)?;
        w.put_bytes(&self.value)?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        let mut cursor = reader(data, Self::OPCODE, 5)?;
        Ok(Self {
            handle: read_u16(&mut cursor)?,
            offset: read_u16(&mut cursor)?,
            value: rest(&cursor),
        })
    }
}

/// Prepare Write Response, echoing the queued part value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareWriteResponse {
    pub handle: u16,
    pub offset: u16,
    pub value: Vec<u8>,
}

impl AttPdu for PrepareWriteResponse {
    const OPCODE: u8 = ATT_PREPARE_WRITE_RSP;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u16(self.handle)?;
        w.put_u16(self.offset)?;
        w.put_bytes(&self.value)?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        let mut cursor = reader(data, Self::OPCODE, 5)?;
        Ok(Self {
            handle: read_u16(&mut cursor)?,
            offset: read_u16(&mut cursor)?,
            value: rest(&cursor),
        })
    }
}

/// Execute Write Request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteWriteRequest {
    /// `true` writes the queued values, `false` discards them
    pub commit: bool,
}

impl AttPdu for ExecuteWriteRequest {
    const OPCODE: u8 = ATT_EXECUTE_WRITE_REQ;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u8(if self.commit {
            ATT_EXEC_WRITE_COMMIT
        } else {
            ATT_EXEC_WRITE_CANCEL
        })?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        reader(data, Self::OPCODE, 2)?;
        match data[1] {
            ATT_EXEC_WRITE_CANCEL => Ok(Self { commit: false }),
            ATT_EXEC_WRITE_COMMIT => Ok(Self { commit: true }),
            _ => Err(AttError::InvalidPdu),
        }
    }
}

/// Execute Write Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteWriteResponse;

impl AttPdu for ExecuteWriteResponse {
    const OPCODE: u8 = ATT_EXECUTE_WRITE_RSP;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        Ok(PduWriter::new(buf, Self::OPCODE)?.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        reader(data, Self::OPCODE, 1)?;
        Ok(Self)
    }
}

/// Handle Value Notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValueNotification {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttPdu for HandleValueNotification {
    const OPCODE: u8 = ATT_HANDLE_VALUE_NTF;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u16(self.handle)?;
        w.put_bytes(&self.value)?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        let mut cursor = reader(data, Self::OPCODE, 3)?;
        Ok(Self {
            handle: read_u16(&mut cursor)?,
            value: rest(&cursor),
        })
    }
}

/// Handle Value Indication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValueIndication {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttPdu for HandleValueIndication {
    const OPCODE: u8 = ATT_HANDLE_VALUE_IND;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        let mut w = PduWriter::new(buf, Self::OPCODE)?;
        w.put_u16(self.handle)?;
        w.put_bytes(&self.value)?;
        Ok(w.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        let mut cursor = reader(data, Self::OPCODE, 3)?;
        Ok(Self {
            handle: read_u16(&mut cursor)?,
            value: rest(&cursor),
        })
    }
}

/// Handle Value Confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleValueConfirmation;

impl AttPdu for HandleValueConfirmation {
    const OPCODE: u8 = ATT_HANDLE_VALUE_CONF;

    fn encode(&self, buf: &mut [u8]) -> AttResult<usize> {
        Ok(PduWriter::new(buf, Self::OPCODE)?.finish())
    }

    fn decode(data: &[u8]) -> AttResult<Self> {
        reader(data, Self::OPCODE, 1)?;
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode<P: AttPdu>(pdu: &P) -> Vec<u8> {
        let mut buf = [0u8; ATT_MAX_MTU as usize];
        let len = pdu.encode(&mut buf).unwrap();
        buf[..len].to_vec()
    }

    #[test]
    fn read_by_group_type_request_uses_short_uuid() {
        let req = ReadByGroupTypeRequest {
            start_handle: 0x0001,
            end_handle: 0xFFFF,
            group_type: Uuid::from_u16(PRIMARY_SERVICE_UUID),
        };
        assert_eq!(encode(&req), vec![0x10, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x28]);
    }

    #[test]
    fn encode_respects_buffer_size() {
        let req = WriteRequest {
            handle: 0x0010,
            value: vec![0xAA; 21],
        };
        let mut buf = [0u8; 23];
        assert!(matches!(req.encode(&mut buf), Err(AttError::Encode(23))));
    }

    #[test]
    fn error_response_decodes_code() {
        let rsp = ErrorResponse::decode(&[0x01, 0x10, 0x01, 0x00, 0x0A]).unwrap();
        assert_eq!(rsp.request_opcode, ATT_READ_BY_GROUP_TYPE_REQ);
        assert_eq!(rsp.handle, 0x0001);
        assert_eq!(rsp.code, AttErrorCode::AttributeNotFound);
        assert!(ErrorResponse::decode(&[0x01, 0x10, 0x01, 0x00]).is_err());
    }

    #[test]
    fn read_by_type_response_rejects_ragged_entries() {
        assert!(ReadByTypeResponse::decode(&[0x09, 0x04, 0x01, 0x00, 0xAA, 0xBB, 0x02]).is_err());
        assert!(ReadByTypeResponse::decode(&[0x09, 0x04]).is_err());

        let rsp =
            ReadByTypeResponse::decode(&[0x09, 0x04, 0x01, 0x00, 0xAA, 0xBB, 0x02, 0x00, 0xCC, 0xDD])
                .unwrap();
        assert_eq!(rsp.entries.len(), 2);
        assert_eq!(rsp.entries[1].handle, 0x0002);
        assert_eq!(rsp.entries[1].value, vec![0xCC, 0xDD]);
    }

    #[test]
    fn find_information_response_widths() {
        let rsp = FindInformationResponse::decode(&[0x05, 0x01, 0x03, 0x00, 0x02, 0x29]).unwrap();
        assert_eq!(rsp.entries[0].handle, 0x0003);
        assert_eq!(rsp.entries[0].uuid, Uuid::from_u16(0x2902));
        assert!(FindInformationResponse::decode(&[0x05, 0x03, 0x03, 0x00, 0x02, 0x29]).is_err());
    }

    #[test]
    fn response_opcodes() {
        assert_eq!(response_opcode_for(ATT_READ_REQ), Some(ATT_READ_RSP));
        assert_eq!(
            response_opcode_for(ATT_PREPARE_WRITE_REQ),
            Some(ATT_PREPARE_WRITE_RSP)
        );
        assert_eq!(response_opcode_for(ATT_WRITE_CMD), None);
        assert_eq!(response_opcode_for(ATT_HANDLE_VALUE_CONF), None);
    }
}
