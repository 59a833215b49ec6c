//! Framing: length-prefix (4 bytes big-endian) + payload. Exchange payloads are
//! bincode-encoded [`Message`]s.

use std::io::{self, Read, Write};

use serde::Serialize;

use crate::protocol::Message;

const LEN_SIZE: usize = 4;
/// Largest payload accepted in one frame.
pub const EXCHANGE_SIZE: u32 = 256 * 1024;

/// Encode a message into a single frame: 4 bytes BE length + bincode payload.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(msg).map_err(FrameEncodeError::Encode)?;
    frame_payload(&payload)
}

/// Prefix raw `payload` with its length.
pub fn frame_payload(payload: &[u8]) -> Result<Vec<u8>, FrameEncodeError> {
    if payload.len() > EXCHANGE_SIZE as usize {
        return Err(FrameEncodeError::TooLarge);
    }
    let len = payload.len() as u32;
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Longest prefix of `items` whose encoding, plus `overhead` bytes for the
/// enclosing message, fits in one frame. Relies on bincode's fixed-width
/// encoding, where a sequence encodes as its length followed by its items.
pub fn fitting_prefix<T: Serialize>(overhead: u64, mut items: Vec<T>) -> Result<Vec<T>, FrameEncodeError> {
    let mut used = overhead;
    for (i, item) in items.iter().enumerate() {
        used += bincode::serialized_size(item)?;
        if used > EXCHANGE_SIZE as u64 {
            items.truncate(i);
            break;
        }
    }
    Ok(items)
}

/// Error encoding a message into a frame (bincode or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Decode one frame from the front of `bytes`. Returns the message and the number of bytes consumed.
/// Call with partial buffer; returns error if not enough bytes (caller should try again after more data).
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    check_length(len)?;
    let len = len as usize;
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let msg = decode_payload(&bytes[LEN_SIZE..LEN_SIZE + len])?;
    Ok((msg, LEN_SIZE + len))
}

pub fn decode_payload(payload: &[u8]) -> Result<Message, FrameDecodeError> {
    bincode::deserialize(payload).map_err(FrameDecodeError::Decode)
}

fn check_length(len: u32) -> Result<(), FrameDecodeError> {
    if len > EXCHANGE_SIZE {
        return Err(FrameDecodeError::TooLarge(len));
    }
    Ok(())
}

fn read_fully<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), FrameDecodeError> {
    // read_exact loops over short reads and retries on Interrupted.
    r.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => FrameDecodeError::Eof,
        _ => FrameDecodeError::Io(e),
    })
}

/// Read exactly four bytes and interpret them as a big-endian length.
pub fn pop_length<R: Read>(r: &mut R) -> Result<u32, FrameDecodeError> {
    let mut len = [0u8; LEN_SIZE];
    read_fully(r, &mut len)?;
    Ok(u32::from_be_bytes(len))
}

/// Read exactly `len` payload bytes.
pub fn read_payload<R: Read>(r: &mut R, len: u32) -> Result<Vec<u8>, FrameDecodeError> {
    check_length(len)?;
    let mut buf = vec![0u8; len as usize];
    read_fully(r, &mut buf)?;
    Ok(buf)
}

/// Read one whole frame and return its payload.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Vec<u8>, FrameDecodeError> {
    let len = pop_length(r)?;
    read_payload(r, len)
}

/// Write `payload` as one frame and flush.
pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    let frame = frame_payload(payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    w.write_all(&frame)?;
    w.flush()
}

/// Error decoding a frame (need more bytes, too large, stream ended, or bincode failure).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(u32),
    #[error("stream closed mid-frame")]
    Eof,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}
