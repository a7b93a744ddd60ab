//! Wire format for acceptor requests and replies
//!
//! Every message travels as a single frame:
//!
//! ```text
//! u32 LE body length | u32 LE crc32(body) | body
//! ```
//!
//! The body starts with a one-byte kind tag followed by the message fields. Sequence numbers
//! and done vector slots are zig-zag varints, proposal numbers are plain varints and optional
//! values are preceded by a presence byte.

use std::error::Error;
use std::fmt;
use std::io::{self, Read, Write};

use log::warn;

use crate::Seq;
use crate::data::{DataMut, DataReader};
use crate::messages::{Reply, Request};
use crate::paxos::ProposalNumber;
use crate::value::Value;

/// Frames larger than this are assumed to be garbage
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const FRAME_HEADER_SIZE: usize = 8;

const PREPARE: u8 = 1;
const ACCEPT: u8 = 2;
const DECIDE: u8 = 3;

const PREPARE_OK: u8 = 1;
const PREPARE_REJECT: u8 = 2;
const ACCEPT_OK: u8 = 3;
const ACCEPT_REJECT: u8 = 4;
const DECIDED: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Truncated,
    UnknownKind(u8),
    Checksum,
    FrameTooLarge(usize),
    Invalid(&'static str)
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated => write!(f, "Message truncated"),
            DecodeError::UnknownKind(k) => write!(f, "Unknown message kind {}", k),
            DecodeError::Checksum => write!(f, "Frame checksum mismatch"),
            DecodeError::FrameTooLarge(n) => write!(f, "Frame of {} bytes exceeds limit", n),
            DecodeError::Invalid(what) => write!(f, "Invalid message content: {}", what)
        }
    }
}

impl Error for DecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

impl From<DecodeError> for io::Error {
    fn from(e: DecodeError) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }
}

fn put_done(buf: &mut DataMut, done: &[Seq]) {
    buf.put_varint(done.len() as u64);
    for d in done {
        buf.put_signed_varint(*d);
    }
}

fn get_done(buf: &mut DataReader) -> Result<Vec<Seq>, DecodeError> {
    let n = buf.get_varint()?;
    // Each slot takes at least one byte
    if n > buf.remaining() as u64 {
        return Err(DecodeError::Truncated);
    }
    let mut done = Vec::with_capacity(n as usize);
    for _ in 0..n {
        done.push(buf.get_signed_varint()?);
    }
    Ok(done)
}

fn get_number(buf: &mut DataReader) -> Result<ProposalNumber, DecodeError> {
    Ok(ProposalNumber(buf.get_varint()?))
}

fn finish(buf: &DataReader) -> Result<(), DecodeError> {
    if buf.remaining() == 0 {
        Ok(())
    } else {
        Err(DecodeError::Invalid("trailing bytes"))
    }
}

pub fn encode_request<V: Value>(request: &Request<V>) -> Vec<u8> {
    let mut buf = DataMut::with_capacity(64);

    match request {
        Request::Prepare { seq, number, done } => {
            buf.put_u8(PREPARE);
            buf.put_signed_varint(*seq);
            buf.put_varint(number.0);
            put_done(&mut buf, done);
        },
        Request::Accept { seq, number, value } => {
            buf.put_u8(ACCEPT);
            buf.put_signed_varint(*seq);
            buf.put_varint(number.0);
            value.encode_into(&mut buf);
        },
        Request::Decide { seq, value } => {
            buf.put_u8(DECIDE);
            buf.put_signed_varint(*seq);
            value.encode_into(&mut buf);
        }
    }

    buf.finalize()
}

pub fn decode_request<V: Value>(body: &[u8]) -> Result<Request<V>, DecodeError> {
    let mut buf = DataReader::new(body);

    let request = match buf.get_u8()? {
        PREPARE => {
            let seq = buf.get_signed_varint()?;
            let number = get_number(&mut buf)?;
            let done = get_done(&mut buf)?;
            Request::Prepare { seq, number, done }
        },
        ACCEPT => {
            let seq = buf.get_signed_varint()?;
            let number = get_number(&mut buf)?;
            let value = V::decode_from(&mut buf)?;
            Request::Accept { seq, number, value }
        },
        DECIDE => {
            let seq = buf.get_signed_varint()?;
            let value = V::decode_from(&mut buf)?;
            Request::Decide { seq, value }
        },
        kind => return Err(DecodeError::UnknownKind(kind))
    };

    finish(&buf)?;
    Ok(request)
}

pub fn encode_reply<V: Value>(reply: &Reply<V>) -> Vec<u8> {
    let mut buf = DataMut::with_capacity(32);

    match reply {
        Reply::PrepareOk { accepted, value, done } => {
            buf.put_u8(PREPARE_OK);
            buf.put_varint(accepted.0);
            match value {
                Some(v) => {
                    buf.put_u8(1);
                    v.encode_into(&mut buf);
                },
                None => buf.put_u8(0)
            }
            put_done(&mut buf, done);
        },
        Reply::PrepareReject { promised, done } => {
            buf.put_u8(PREPARE_REJECT);
            buf.put_varint(promised.0);
            put_done(&mut buf, done);
        },
        Reply::AcceptOk { accepted } => {
            buf.put_u8(ACCEPT_OK);
            buf.put_varint(accepted.0);
        },
        Reply::AcceptReject { promised } => {
            buf.put_u8(ACCEPT_REJECT);
            buf.put_varint(promised.0);
        },
        Reply::Decided => buf.put_u8(DECIDED)
    }

    buf.finalize()
}

pub fn decode_reply<V: Value>(body: &[u8]) -> Result<Reply<V>, DecodeError> {
    let mut buf = DataReader::new(body);

    let reply = match buf.get_u8()? {
        PREPARE_OK => {
            let accepted = get_number(&mut buf)?;
            let value = match buf.get_u8()? {
                0 => None,
                1 => Some(V::decode_from(&mut buf)?),
                _ => return Err(DecodeError::Invalid("value presence flag"))
            };
            let done = get_done(&mut buf)?;
            Reply::PrepareOk { accepted, value, done }
        },
        PREPARE_REJECT => {
            let promised = get_number(&mut buf)?;
            let done = get_done(&mut buf)?;
            Reply::PrepareReject { promised, done }
        },
        ACCEPT_OK => Reply::AcceptOk { accepted: get_number(&mut buf)? },
        ACCEPT_REJECT => Reply::AcceptReject { promised: get_number(&mut buf)? },
        DECIDED => Reply::Decided,
        kind => return Err(DecodeError::UnknownKind(kind))
    };

    finish(&buf)?;
    Ok(reply)
}

/// Writes `body` as a single checksummed frame. Bodies the receiver would refuse are not
/// written at all
pub fn write_frame<W: Write>(w: &mut W, body: &[u8]) -> io::Result<()> {
    if body.len() > MAX_FRAME_SIZE {
        warn!("Refusing to send {} byte frame, limit is {}", body.len(), MAX_FRAME_SIZE);
        return Err(DecodeError::FrameTooLarge(body.len()).into());
    }

    let mut header = DataMut::with_capacity(FRAME_HEADER_SIZE);
    header.put_u32_le(body.len() as u32);
    header.put_u32_le(crc32fast::hash(body));

    w.write_all(header.as_bytes())?;
    w.write_all(body)?;
    w.flush()
}

/// Reads one frame and verifies its checksum. Corrupt or oversized frames are reported as
/// `io::ErrorKind::InvalidData` wrapping a `DecodeError`
pub fn read_frame<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let mut raw_header = [0u8; FRAME_HEADER_SIZE];
    r.read_exact(&mut raw_header)?;

    let mut header = DataReader::new(&raw_header);
    let len = header.get_u32_le()? as usize;
    let crc = header.get_u32_le()?;

    if len > MAX_FRAME_SIZE {
        return Err(DecodeError::FrameTooLarge(len).into());
    }

    let mut body = vec![0u8; len];
    r.read_exact(&mut body)?;

    if crc32fast::hash(&body) != crc {
        return Err(DecodeError::Checksum.into());
    }

    Ok(body)
}
