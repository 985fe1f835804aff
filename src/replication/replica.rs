//! Replica-side replication: dial a master, complete the handshake, ingest
//! the RDB snapshot, and apply the stream of replicated commands that
//! follows.

use crate::command::Command;
use crate::handlers;
use crate::rdb::RdbLoader;
use crate::resp::{self, Frame};
use crate::state::SharedState;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Runs for the lifetime of the process once a `--replicaof` handshake
/// succeeds; on any I/O error it logs and returns, leaving the server as a
/// master with whatever data it loaded (the caller does not retry — a
/// concrete, bounded follow-up would be exponential backoff reconnection,
/// not implemented here).
pub async fn run(state: Arc<SharedState>, master_host: String, master_port: u16, my_port: u16) {
    if let Err(err) = handshake_and_ingest(&state, &master_host, master_port, my_port).await {
        eprintln!("replica: handshake with {master_host}:{master_port} failed: {err}");
    }
}

async fn handshake_and_ingest(
    state: &Arc<SharedState>,
    master_host: &str,
    master_port: u16,
    my_port: u16,
) -> std::io::Result<()> {
    let stream = TcpStream::connect((master_host, master_port)).await?;
    let (mut reader, mut writer) = stream.into_split();
    let mut read_buf = BytesMut::with_capacity(8 * 1024);

    send_command(&mut writer, &[b"PING"]).await?;
    expect_simple(&mut reader, &mut read_buf).await?;

    send_command(&mut writer, &[b"REPLCONF", b"listening-port", my_port.to_string().as_bytes()]).await?;
    expect_simple(&mut reader, &mut read_buf).await?;

    send_command(&mut writer, &[b"REPLCONF", b"capa", b"psync2"]).await?;
    expect_simple(&mut reader, &mut read_buf).await?;

    send_command(&mut writer, &[b"PSYNC", b"?", b"-1"]).await?;
    expect_simple(&mut reader, &mut read_buf).await?; // +FULLRESYNC <replid> <offset>

    let rdb_bytes = read_rdb_payload(&mut reader, &mut read_buf).await?;
    // Loading requires `.await`, so parse into a standalone keyspace first
    // and move the result in under the lock rather than holding it across
    // the parse.
    let mut loaded = crate::keyspace::Keyspace::new();
    RdbLoader::new(&rdb_bytes[..]).load(&mut loaded).await?;
    state.core.lock().unwrap().keyspace = loaded;

    {
        let mut repl = state.replication.lock().unwrap();
        repl.set_replica_of(master_host.to_string(), master_port);
    }

    apply_replicated_stream(state, &mut reader, &mut writer, read_buf).await
}

async fn send_command(writer: &mut (impl AsyncWriteExt + Unpin), parts: &[&[u8]]) -> std::io::Result<()> {
    let frame = Frame::array_of_bulks(parts.iter().map(|p| Bytes::copy_from_slice(p)));
    writer.write_all(&frame.encode_to_bytes()).await
}

async fn expect_simple(
    reader: &mut (impl AsyncReadExt + Unpin),
    buf: &mut BytesMut,
) -> std::io::Result<Bytes> {
    loop {
        {
            let mut cursor = BytesMut::from(&buf[..]);
            if let Ok(Some((frame, consumed))) = resp::try_parse(&mut cursor) {
                buf.split_to(consumed);
                return Ok(match frame {
                    Frame::Simple(s) => s,
                    other => Bytes::from(format!("{other:?}")),
                });
            }
        }
        let mut chunk = [0u8; 4096];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "master closed during handshake"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Reads the `$<n>\r\n<n bytes>` RDB framing (no trailing CRLF), consuming
/// from `buf` first and then the socket.
async fn read_rdb_payload(reader: &mut (impl AsyncReadExt + Unpin), buf: &mut BytesMut) -> std::io::Result<Vec<u8>> {
    while !buf.contains(&b'\n') {
        let mut chunk = [0u8; 4096];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "master closed before RDB length"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let newline = buf.iter().position(|&b| b == b'\n').unwrap();
    let header: Vec<u8> = buf.split_to(newline + 1).to_vec();
    let header_str = std::str::from_utf8(&header).map_err(|_| invalid("non-utf8 RDB length header"))?;
    let header_str = header_str.trim_end();
    let len_str = header_str.strip_prefix('$').ok_or_else(|| invalid("expected $ RDB length prefix"))?;
    let len: usize = len_str.parse().map_err(|_| invalid("invalid RDB length"))?;

    while buf.len() < len {
        let mut chunk = [0u8; 8192];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "master closed mid-RDB"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(buf.split_to(len).to_vec())
}

fn invalid(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

/// The post-RDB loop: apply replicated command frames, answering
/// `REPLCONF GETACK` with the byte offset snapshotted before this frame was
/// added to the running counter.
async fn apply_replicated_stream(
    state: &Arc<SharedState>,
    reader: &mut (impl AsyncReadExt + Unpin),
    writer: &mut (impl AsyncWriteExt + Unpin),
    mut buf: BytesMut,
) -> std::io::Result<()> {
    loop {
        let (frame, consumed) = loop {
            if let Some((frame, consumed)) = resp::try_parse(&mut buf).map_err(|_| invalid("protocol error from master"))? {
                break (frame, consumed);
            }
            let mut chunk = [0u8; 8192];
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(()); // master closed the replication link
            }
            buf.extend_from_slice(&chunk[..n]);
        };

        let offset_before = {
            let repl = state.replication.lock().unwrap();
            repl.offset
        };
        {
            let mut repl = state.replication.lock().unwrap();
            repl.offset += consumed as u64;
        }

        let args = match frame.into_command_args() {
            Ok(args) => args,
            Err(_) => continue,
        };
        let Some(command) = Command::from_args(args) else { continue };

        if command.name == "REPLCONF" && command.arg_str(0).map(|s| s.to_ascii_uppercase()) == Some("GETACK".to_string()) {
            let ack = Frame::array_of_bulks(vec![
                Bytes::from_static(b"REPLCONF"),
                Bytes::from_static(b"ACK"),
                Bytes::from(offset_before.to_string()),
            ]);
            writer.write_all(&ack.encode_to_bytes()).await?;
            continue;
        }

        let _ = handlers::execute(state, &command).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_rdb_payload_reads_exact_length() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"$5\r\nhello");
        let mut reader = &[][..];
        let payload = read_rdb_payload(&mut reader, &mut buf).await.unwrap();
        assert_eq!(payload, b"hello");
    }
}
