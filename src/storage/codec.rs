//! Length-prefixed record framing.
//!
//! Both the WAL and snapshot files are streams of
//! `(u32 little-endian length)(payload)` records. The same framing is
//! used for in-memory snapshot transfer between the FSM adapter and the
//! consensus module.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};

/// Write one framed record.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(payload)
}

/// Read one framed record.
///
/// Returns `Ok(None)` on a clean end of stream (no bytes left). A stream
/// that ends mid-record yields `ErrorKind::UnexpectedEof`, which callers
/// on the recovery path treat as a discarded partial tail.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        filled += n;
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}

/// Append one framed record to an in-memory buffer.
pub fn put_frame(buf: &mut BytesMut, payload: &[u8]) {
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
}

/// Split one framed record off the front of an in-memory buffer.
///
/// Returns `Ok(None)` when the buffer is empty; a buffer that ends
/// mid-record is an `UnexpectedEof` error.
pub fn take_frame(buf: &mut Bytes) -> io::Result<Option<Bytes>> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf.len() < 4 {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    let len = buf.get_u32_le() as usize;
    if buf.len() < len {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(Some(buf.split_to(len)))
}
