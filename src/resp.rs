//! RESP2/RESP3 framing: decode bytes accumulated from a socket into `Frame`s,
//! and encode `Frame`s (or the handful of ad hoc replies the handlers build)
//! back into bytes.

use crate::errors::{RedisError, Result};
use crate::protocol_constants::*;
use bytes::{Buf, Bytes, BytesMut};
use std::io::Cursor;

/// A single parsed RESP value. Only the variants the server actually produces
/// carry data the rest of the codebase touches; the RESP3 prefixes are parsed
/// so a RESP3 client's frames don't desynchronize the reader, but they never
/// appear in a command frame the dispatcher sees (commands always arrive as
/// arrays of bulk strings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Simple(Bytes),
    Error(Bytes),
    Integer(i64),
    Bulk(Bytes),
    NullBulk,
    Array(Vec<Frame>),
    NullArray,
    /// RESP3 `_\r\n`.
    Null,
    /// RESP3 `#t\r\n` / `#f\r\n`.
    Boolean(bool),
}

impl Frame {
    pub fn array_of_bulks<I, S>(items: I) -> Frame
    where
        I: IntoIterator<Item = S>,
        S: Into<Bytes>,
    {
        Frame::Array(items.into_iter().map(|s| Frame::Bulk(s.into())).collect())
    }

    /// Interpret this frame as a command: an array of bulk strings. Returns
    /// the argument list as owned `Bytes`, or a protocol error if the frame
    /// isn't shaped like a command.
    pub fn into_command_args(self) -> Result<Vec<Bytes>> {
        match self {
            Frame::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Frame::Bulk(b) => Ok(b),
                    Frame::Simple(b) => Ok(b),
                    other => Err(RedisError::Protocol(format!(
                        "expected bulk string in command array, found {other:?}"
                    ))),
                })
                .collect(),
            other => Err(RedisError::Protocol(format!(
                "expected array for command frame, found {other:?}"
            ))),
        }
    }

    /// Encode this frame into canonical RESP2/3 bytes.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                out.extend_from_slice(&[SIMPLE_STRING_PREFIX]);
                out.extend_from_slice(s);
                out.extend_from_slice(CRLF);
            }
            Frame::Error(s) => {
                out.extend_from_slice(&[SIMPLE_ERROR_PREFIX]);
                out.extend_from_slice(s);
                out.extend_from_slice(CRLF);
            }
            Frame::Integer(n) => {
                out.extend_from_slice(&[INTEGER_PREFIX]);
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(CRLF);
            }
            Frame::Bulk(b) => {
                out.extend_from_slice(&[BULK_STRING_PREFIX]);
                out.extend_from_slice(b.len().to_string().as_bytes());
                out.extend_from_slice(CRLF);
                out.extend_from_slice(b);
                out.extend_from_slice(CRLF);
            }
            Frame::NullBulk => out.extend_from_slice(b"$-1\r\n"),
            Frame::NullArray => out.extend_from_slice(b"*-1\r\n"),
            Frame::Null => out.extend_from_slice(b"_\r\n"),
            Frame::Boolean(b) => {
                out.extend_from_slice(if *b { b"#t\r\n" } else { b"#f\r\n" });
            }
            Frame::Array(items) => {
                out.extend_from_slice(&[ARRAY_PREFIX]);
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(CRLF);
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    pub fn encode_to_bytes(&self) -> BytesMut {
        let mut out = BytesMut::new();
        self.encode(&mut out);
        out
    }
}

/// Attempt to parse one frame out of `buf`. Returns `Ok(None)` if `buf` does
/// not yet contain a complete frame (the caller should read more bytes and
/// retry); returns `Err` on a genuinely malformed frame.
///
/// On success, the consumed bytes are split off the front of `buf` and the
/// frame is returned alongside the exact byte length consumed, which the
/// dispatcher needs for replication-offset accounting.
pub fn try_parse(buf: &mut BytesMut) -> Result<Option<(Frame, usize)>> {
    let mut cursor = Cursor::new(&buf[..]);
    match parse_frame(&mut cursor) {
        Ok(frame) => {
            let consumed = cursor.position() as usize;
            let bytes = buf.split_to(consumed);
            let _ = bytes;
            Ok(Some((frame, consumed)))
        }
        Err(ParseError::Incomplete) => Ok(None),
        Err(ParseError::Malformed(msg)) => Err(RedisError::Protocol(msg)),
    }
}

enum ParseError {
    Incomplete,
    Malformed(String),
}

impl From<String> for ParseError {
    fn from(s: String) -> Self {
        ParseError::Malformed(s)
    }
}

fn peek_u8(cur: &Cursor<&[u8]>) -> std::result::Result<u8, ParseError> {
    let data = cur.get_ref();
    let pos = cur.position() as usize;
    data.get(pos).copied().ok_or(ParseError::Incomplete)
}

fn get_u8(cur: &mut Cursor<&[u8]>) -> std::result::Result<u8, ParseError> {
    let b = peek_u8(cur)?;
    cur.advance(1);
    Ok(b)
}

/// Read up to (and consuming) the next CRLF, returning the bytes before it.
fn read_line<'a>(cur: &mut Cursor<&'a [u8]>) -> std::result::Result<&'a [u8], ParseError> {
    let start = cur.position() as usize;
    let data = *cur.get_ref();
    if let Some(rel) = data[start..].windows(2).position(|w| w == b"\r\n") {
        let end = start + rel;
        cur.set_position((end + 2) as u64);
        Ok(&data[start..end])
    } else {
        Err(ParseError::Incomplete)
    }
}

fn read_line_str<'a>(cur: &mut Cursor<&'a [u8]>) -> std::result::Result<&'a str, ParseError> {
    let line = read_line(cur)?;
    std::str::from_utf8(line)
        .map_err(|_| ParseError::Malformed("non-utf8 line where ASCII was expected".into()))
}

fn parse_int_line(cur: &mut Cursor<&[u8]>) -> std::result::Result<i64, ParseError> {
    let line = read_line_str(cur)?;
    line.parse::<i64>()
        .map_err(|_| ParseError::Malformed(format!("invalid integer: {line:?}")))
}

fn take_exact<'a>(cur: &mut Cursor<&'a [u8]>, n: usize) -> std::result::Result<&'a [u8], ParseError> {
    let start = cur.position() as usize;
    let data = *cur.get_ref();
    if data.len() < start + n {
        return Err(ParseError::Incomplete);
    }
    cur.set_position((start + n) as u64);
    Ok(&data[start..start + n])
}

fn expect_crlf(cur: &mut Cursor<&[u8]>) -> std::result::Result<(), ParseError> {
    let bytes = take_exact(cur, 2)?;
    if bytes != b"\r\n" {
        return Err(ParseError::Malformed("expected CRLF terminator".into()));
    }
    Ok(())
}

fn parse_frame(cur: &mut Cursor<&[u8]>) -> std::result::Result<Frame, ParseError> {
    let prefix = get_u8(cur)?;
    match prefix {
        SIMPLE_STRING_PREFIX => Ok(Frame::Simple(Bytes::copy_from_slice(read_line(cur)?))),
        SIMPLE_ERROR_PREFIX => Ok(Frame::Error(Bytes::copy_from_slice(read_line(cur)?))),
        INTEGER_PREFIX => Ok(Frame::Integer(parse_int_line(cur)?)),
        BULK_STRING_PREFIX => {
            let len = parse_int_line(cur)?;
            if len < 0 {
                return Ok(Frame::NullBulk);
            }
            let data = take_exact(cur, len as usize)?;
            let data = Bytes::copy_from_slice(data);
            expect_crlf(cur)?;
            Ok(Frame::Bulk(data))
        }
        ARRAY_PREFIX => {
            let len = parse_int_line(cur)?;
            if len < 0 {
                return Ok(Frame::NullArray);
            }
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(parse_frame(cur)?);
            }
            Ok(Frame::Array(items))
        }
        NULL_PREFIX => {
            expect_crlf(cur)?;
            Ok(Frame::Null)
        }
        BOOLEAN_PREFIX => {
            let b = get_u8(cur)?;
            expect_crlf(cur)?;
            match b {
                b't' => Ok(Frame::Boolean(true)),
                b'f' => Ok(Frame::Boolean(false)),
                _ => Err(ParseError::Malformed("invalid RESP3 boolean".into())),
            }
        }
        DOUBLE_PREFIX | BIG_NUMBER_PREFIX => {
            // Parsed for grammar-completeness only; the server never needs
            // the numeric value of a RESP3 double/bignum a client sends it.
            let line = read_line_str(cur)?;
            Ok(Frame::Simple(Bytes::copy_from_slice(line.as_bytes())))
        }
        BULK_ERROR_PREFIX | VERBATIM_STRING_PREFIX => {
            let len = parse_int_line(cur)?;
            let data = take_exact(cur, len.max(0) as usize)?;
            let data = Bytes::copy_from_slice(data);
            expect_crlf(cur)?;
            Ok(if prefix == BULK_ERROR_PREFIX {
                Frame::Error(data)
            } else {
                Frame::Bulk(data)
            })
        }
        MAP_PREFIX => {
            let pairs = parse_int_line(cur)?;
            let mut items = Vec::with_capacity((pairs as usize) * 2);
            for _ in 0..pairs * 2 {
                items.push(parse_frame(cur)?);
            }
            Ok(Frame::Array(items))
        }
        SET_PREFIX | PUSH_PREFIX => {
            let len = parse_int_line(cur)?;
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(parse_frame(cur)?);
            }
            Ok(Frame::Array(items))
        }
        other => Err(ParseError::Malformed(format!(
            "unrecognized RESP type prefix: {:?}",
            other as char
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Vec<Frame> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some((frame, _len)) = try_parse(&mut buf).unwrap() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn parses_ping_array() {
        let frames = parse_all(b"*1\r\n$4\r\nPING\r\n");
        assert_eq!(
            frames,
            vec![Frame::Array(vec![Frame::Bulk(Bytes::from_static(b"PING"))])]
        );
    }

    #[test]
    fn incomplete_frame_yields_none() {
        let mut buf = BytesMut::from(&b"*1\r\n$4\r\nPI"[..]);
        assert!(try_parse(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 10); // nothing consumed
    }

    #[test]
    fn parses_null_bulk_and_null_array() {
        let frames = parse_all(b"$-1\r\n*-1\r\n");
        assert_eq!(frames, vec![Frame::NullBulk, Frame::NullArray]);
    }

    #[test]
    fn parses_simple_and_error_and_integer() {
        let frames = parse_all(b"+OK\r\n-ERR bad\r\n:42\r\n");
        assert_eq!(
            frames,
            vec![
                Frame::Simple(Bytes::from_static(b"OK")),
                Frame::Error(Bytes::from_static(b"ERR bad")),
                Frame::Integer(42),
            ]
        );
    }

    #[test]
    fn malformed_length_is_protocol_error() {
        let mut buf = BytesMut::from(&b"$abc\r\nxyz\r\n"[..]);
        assert!(try_parse(&mut buf).is_err());
    }

    #[test]
    fn bulk_string_length_mismatch_is_incomplete_then_errors_on_missing_crlf() {
        // declared length 3 but body is "ab" + wrong terminator
        let mut buf = BytesMut::from(&b"$3\r\nabXX"[..]);
        // Not enough bytes yet for len 3 plus CRLF -> incomplete
        assert!(try_parse(&mut buf).unwrap().is_none());
    }

    #[test]
    fn round_trips_array_of_bulks_encoding() {
        let frame = Frame::array_of_bulks(vec![Bytes::from_static(b"a"), Bytes::from_static(b"bc")]);
        let encoded = frame.encode_to_bytes();
        assert_eq!(&encoded[..], b"*2\r\n$1\r\na\r\n$2\r\nbc\r\n");
    }

    #[test]
    fn into_command_args_extracts_bulks() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from_static(b"SET")),
            Frame::Bulk(Bytes::from_static(b"k")),
            Frame::Bulk(Bytes::from_static(b"v")),
        ]);
        let args = frame.into_command_args().unwrap();
        assert_eq!(args, vec![Bytes::from_static(b"SET"), Bytes::from_static(b"k"), Bytes::from_static(b"v")]);
    }

    #[test]
    fn recognizes_resp3_prefixes_without_desync() {
        let frames = parse_all(b"_\r\n#t\r\n#f\r\n");
        assert_eq!(frames, vec![Frame::Null, Frame::Boolean(true), Frame::Boolean(false)]);
    }
}
