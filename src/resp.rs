use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// 512MB max bulk string length.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
const MAX_ARRAY_LEN: i64 = 1024 * 1024;
/// Requests and replies are flat: an array may not contain another array.
const MAX_ARRAY_DEPTH: usize = 1;
/// Longest header line we wait for before declaring the frame malformed.
const MAX_LINE_LEN: usize = 64 * 1024;

/// A RESP2 value.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// +OK\r\n
    SimpleString(String),
    /// -ERR message\r\n
    Error(String),
    /// :1000\r\n
    Integer(i64),
    /// $6\r\nfoobar\r\n  or  $-1\r\n (null)
    BulkString(Option<Bytes>),
    /// *2\r\n...  or  *-1\r\n (null)
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    pub fn null_bulk_string() -> Self {
        RespValue::BulkString(None)
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(Some(items))
    }

    /// Serialize this value to RESP bytes.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Write RESP bytes into the given buffer.
    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, b'+', s.as_bytes()),
            RespValue::Error(s) => write_line(buf, b'-', s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, b':', n.to_string().as_bytes()),
            RespValue::BulkString(None) => buf.put_slice(b"$-1\r\n"),
            RespValue::BulkString(Some(data)) => {
                write_line(buf, b'$', data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(b"\r\n");
            }
            RespValue::Array(None) => buf.put_slice(b"*-1\r\n"),
            RespValue::Array(Some(items)) => {
                write_line(buf, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.write_to(buf);
                }
            }
        }
    }

    /// Consume a string-like value into its payload.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            RespValue::BulkString(Some(data)) => Some(data),
            RespValue::SimpleString(s) => Some(Bytes::from(s)),
            _ => None,
        }
    }
}

fn write_line(buf: &mut BytesMut, tag: u8, body: &[u8]) {
    buf.reserve(body.len() + 3);
    buf.put_u8(tag);
    buf.put_slice(body);
    buf.put_slice(b"\r\n");
}

/// Streaming RESP codec.
///
/// Decoding never consumes a partial frame: the buffer is only advanced once
/// a complete value has been parsed, so `FramedRead` can keep feeding bytes
/// as they arrive.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = RespError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        match parse_value(src, 0, 0)? {
            Some((value, end)) => {
                src.advance(end);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<RespValue> for RespCodec {
    type Error = RespError;

    fn encode(&mut self, item: RespValue, dst: &mut BytesMut) -> Result<(), RespError> {
        item.write_to(dst);
        Ok(())
    }
}

/// Parse one value starting at `pos`. Returns the value and the offset just
/// past it, or `None` if the buffer does not hold a complete value yet.
/// `depth` is the number of enclosing arrays.
fn parse_value(
    buf: &[u8],
    pos: usize,
    depth: usize,
) -> Result<Option<(RespValue, usize)>, RespError> {
    let Some(&tag) = buf.get(pos) else {
        return Ok(None);
    };
    if !matches!(tag, b'+' | b'-' | b':' | b'$' | b'*') {
        return Err(RespError::InvalidByte(tag));
    }

    let line_end = match find_crlf_from(buf, pos + 1) {
        Some(end) => end,
        None if buf.len() - pos > MAX_LINE_LEN => {
            return Err(RespError::InvalidData("line too long".into()));
        }
        None => return Ok(None),
    };
    let line = &buf[pos + 1..line_end];
    let next = line_end + 2;

    match tag {
        b'+' => {
            let s = String::from_utf8_lossy(line).into_owned();
            Ok(Some((RespValue::SimpleString(s), next)))
        }
        b'-' => {
            let s = String::from_utf8_lossy(line).into_owned();
            Ok(Some((RespValue::Error(s), next)))
        }
        b':' => {
            let n = parse_int(line, "invalid integer")?;
            Ok(Some((RespValue::Integer(n), next)))
        }
        b'$' => parse_bulk_string(buf, parse_int(line, "invalid bulk length")?, next),
        _ => {
            if depth >= MAX_ARRAY_DEPTH {
                return Err(RespError::InvalidData("nested arrays are not supported".into()));
            }
            let len = parse_int(line, "invalid multibulk length")?;
            parse_array(buf, len, next, depth + 1)
        }
    }
}

fn parse_bulk_string(
    buf: &[u8],
    len: i64,
    start: usize,
) -> Result<Option<(RespValue, usize)>, RespError> {
    if len == -1 {
        return Ok(Some((RespValue::BulkString(None), start)));
    }
    if !(0..=MAX_BULK_LEN).contains(&len) {
        return Err(RespError::InvalidData("invalid bulk length".into()));
    }

    let end = start + len as usize;
    if buf.len() < end + 2 {
        return Ok(None);
    }
    if &buf[end..end + 2] != b"\r\n" {
        return Err(RespError::InvalidData(
            "missing trailing CRLF after bulk string".into(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[start..end]);
    Ok(Some((RespValue::BulkString(Some(data)), end + 2)))
}

fn parse_array(
    buf: &[u8],
    len: i64,
    start: usize,
    depth: usize,
) -> Result<Option<(RespValue, usize)>, RespError> {
    // Any negative length is a null array.
    if len < 0 {
        return Ok(Some((RespValue::Array(None), start)));
    }
    if len > MAX_ARRAY_LEN {
        return Err(RespError::InvalidData("invalid multibulk length".into()));
    }

    // Every element takes at least 3 bytes, so don't reserve for more
    // elements than the buffer could already hold.
    let received = buf.len().saturating_sub(start);
    let mut items = Vec::with_capacity((len as usize).min(received / 3));
    let mut pos = start;
    for _ in 0..len {
        match parse_value(buf, pos, depth)? {
            Some((item, next)) => {
                items.push(item);
                pos = next;
            }
            None => return Ok(None),
        }
    }
    Ok(Some((RespValue::Array(Some(items)), pos)))
}

fn parse_int(line: &[u8], what: &str) -> Result<i64, RespError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| RespError::InvalidData(what.to_string()))
}

/// Find \r\n starting from the given position.
fn find_crlf_from(buf: &[u8], start: usize) -> Option<usize> {
    buf.get(start..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| start + i)
}

#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("invalid type byte '{}'", *.0 as char)]
    InvalidByte(u8),

    #[error("{0}")]
    InvalidData(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
