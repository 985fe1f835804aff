//! Master-side replication: promote a connection to a replica on PSYNC, fan
//! out writes to it, and answer WAIT.

use crate::rdb;
use crate::resp::Frame;
use crate::state::SharedState;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;

/// `+FULLRESYNC <replid> 0\r\n`.
pub fn fullresync_frame(replid: &str) -> Frame {
    Frame::Simple(Bytes::from(format!("FULLRESYNC {replid} 0")))
}

/// `$<len>\r\n<bytes>` with no trailing CRLF — the RDB bulk framing is
/// special-cased because a normal `Frame::Bulk` always appends one.
pub fn rdb_payload_chunk() -> Bytes {
    let rdb = rdb::empty_rdb_bytes();
    let mut out = BytesMut::with_capacity(rdb.len() + 16);
    out.extend_from_slice(format!("${}\r\n", rdb.len()).as_bytes());
    out.extend_from_slice(&rdb);
    out.freeze()
}

/// Spawn the dedicated writer task for a newly promoted replica connection
/// and register it in the shared replication state. The caller has already
/// written the FULLRESYNC reply and RDB payload on `write_half` directly;
/// this call takes ownership of the socket for all subsequent propagation.
pub fn promote_to_replica(state: &Arc<SharedState>, addr: SocketAddr, mut write_half: OwnedWriteHalf) -> u64 {
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });
    let mut repl = state.replication.lock().unwrap();
    repl.register_replica(addr, tx)
}
