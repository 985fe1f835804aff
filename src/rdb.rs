//! RDB snapshot loader: hydrates the keyspace from an on-disk RDB file at
//! boot, and decodes the fixed empty-RDB payload used for FULLRESYNC.

use crate::keyspace::Keyspace;
use crate::protocol_constants::*;
use bytes::Bytes;
use std::io;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncReadExt};

pub struct RdbLoader<R> {
    reader: R,
}

impl<R> RdbLoader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Parse the full file into `keyspace`. Any malformed-header error aborts
    /// the load; truncation mid-stream is treated as EOF (best-effort load).
    pub async fn load(mut self, keyspace: &mut Keyspace) -> io::Result<()> {
        self.verify_magic().await?;
        loop {
            let marker = match self.reader.read_u8().await {
                Ok(b) => b,
                Err(_) => break, // EOF with no trailing 0xFF: treat as done.
            };
            match marker {
                OPCODE_AUX => {
                    self.read_string().await?;
                    self.read_string().await?;
                }
                OPCODE_SELECT_DB => {
                    self.read_length().await?;
                }
                OPCODE_RESIZE_DB => {
                    self.read_length().await?;
                    self.read_length().await?;
                }
                OPCODE_EXPIRE_MS => {
                    let ms = self.reader.read_u64_le().await?;
                    self.read_value(keyspace, Some(ms as i64)).await?;
                }
                OPCODE_EXPIRE_SEC => {
                    let secs = self.reader.read_u32_le().await?;
                    self.read_value(keyspace, Some(secs as i64 * 1000)).await?;
                }
                OPCODE_EOF => break,
                VALUE_TYPE_STRING => {
                    self.read_value_of_type(keyspace, VALUE_TYPE_STRING, None).await?;
                }
                other if other > 14 => break, // unsupported value type: stop, best-effort.
                other => {
                    self.read_value_of_type(keyspace, other, None).await?;
                }
            }
        }
        Ok(())
    }

    async fn verify_magic(&mut self) -> io::Result<()> {
        let mut magic = [0u8; 5];
        self.reader.read_exact(&mut magic).await?;
        if magic != RDB_MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "not an RDB file"));
        }
        let mut version = [0u8; 4];
        self.reader.read_exact(&mut version).await?;
        Ok(())
    }

    /// Read a key plus a (already-identified-as-string) value preceded by an
    /// expiry, inserting it into `keyspace` unless it's already expired.
    async fn read_value(&mut self, keyspace: &mut Keyspace, expire_in_ms: Option<i64>) -> io::Result<()> {
        let value_type = self.reader.read_u8().await?;
        self.read_value_of_type(keyspace, value_type, expire_in_ms).await
    }

    async fn read_value_of_type(
        &mut self,
        keyspace: &mut Keyspace,
        value_type: u8,
        expire_in_ms: Option<i64>,
    ) -> io::Result<()> {
        let key = self.read_string().await?;
        match value_type {
            VALUE_TYPE_STRING => {
                let value = self.read_string().await?;
                let expire_at = expire_in_ms.and_then(absolute_to_instant);
                if !already_expired(expire_in_ms) {
                    keyspace.set(Bytes::from(key), Bytes::from(value), expire_at);
                }
                Ok(())
            }
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported RDB value type {other}"),
            )),
        }
    }

    async fn read_length(&mut self) -> io::Result<usize> {
        let first = self.reader.read_u8().await?;
        match first >> 6 {
            0b00 => Ok((first & 0x3F) as usize),
            0b01 => {
                let second = self.reader.read_u8().await?;
                Ok((((first & 0x3F) as usize) << 8) | second as usize)
            }
            0b10 => Ok(self.reader.read_u32().await? as usize),
            _ => Err(io::Error::new(io::ErrorKind::InvalidData, "length-encoded value where plain length expected")),
        }
    }

    /// Reads a possibly integer-encoded RDB string, returning its decimal
    /// rendering when the special "integer as string" encoding is used.
    async fn read_string(&mut self) -> io::Result<Vec<u8>> {
        let first = self.reader.read_u8().await?;
        match first >> 6 {
            0b11 => {
                let int_text = match first & 0x3F {
                    0 => self.reader.read_i8().await?.to_string(),
                    1 => self.reader.read_i16_le().await?.to_string(),
                    2 => self.reader.read_i32_le().await?.to_string(),
                    other => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("unsupported string-integer encoding {other}"),
                        ))
                    }
                };
                Ok(int_text.into_bytes())
            }
            0b00 => {
                let len = (first & 0x3F) as usize;
                self.read_exact_vec(len).await
            }
            0b01 => {
                let second = self.reader.read_u8().await?;
                let len = (((first & 0x3F) as usize) << 8) | second as usize;
                self.read_exact_vec(len).await
            }
            0b10 => {
                let len = self.reader.read_u32().await? as usize;
                self.read_exact_vec(len).await
            }
            _ => unreachable!(),
        }
    }

    async fn read_exact_vec(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

fn already_expired(expire_in_ms: Option<i64>) -> bool {
    match expire_in_ms {
        None => false,
        Some(at_ms) => {
            let now_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            at_ms <= now_ms
        }
    }
}

/// Convert a Unix-epoch-ms expiry into an `Instant` deadline, relative to now.
fn absolute_to_instant(at_ms: i64) -> Option<Instant> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let remaining_ms = at_ms - now_ms;
    if remaining_ms <= 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_millis(remaining_ms as u64))
    }
}

/// Decode the fixed empty-RDB constant used to bootstrap FULLRESYNC.
pub fn empty_rdb_bytes() -> Bytes {
    use base64_decode::decode;
    Bytes::from(decode(EMPTY_RDB_BASE64))
}

/// A tiny base64 decoder covering the standard alphabet with `=` padding,
/// kept local since the teacher's dependency stack carries no base64 crate.
mod base64_decode {
    pub fn decode(input: &str) -> Vec<u8> {
        fn val(c: u8) -> Option<u8> {
            match c {
                b'A'..=b'Z' => Some(c - b'A'),
                b'a'..=b'z' => Some(c - b'a' + 26),
                b'0'..=b'9' => Some(c - b'0' + 52),
                b'+' => Some(62),
                b'/' => Some(63),
                _ => None,
            }
        }
        let bytes: Vec<u8> = input.bytes().filter(|&b| b != b'=' && !b.is_ascii_whitespace()).collect();
        let mut out = Vec::with_capacity(bytes.len() * 3 / 4 + 3);
        for chunk in bytes.chunks(4) {
            let vals: Vec<u8> = chunk.iter().filter_map(|&b| val(b)).collect();
            if vals.is_empty() {
                continue;
            }
            let b0 = vals[0];
            let b1 = *vals.get(1).unwrap_or(&0);
            out.push((b0 << 2) | (b1 >> 4));
            if vals.len() > 2 {
                let b2 = vals[2];
                out.push((b1 << 4) | (b2 >> 2));
                if vals.len() > 3 {
                    let b3 = vals[3];
                    out.push((b2 << 6) | b3);
                }
            }
        }
        out
    }
}
