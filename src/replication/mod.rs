//! Replication bookkeeping shared between the master and replica roles. The
//! handshake and ingestion loops themselves live in `master` and `replica`;
//! this module owns the state both sides read and mutate under the shared
//! lock: role, replication id, offsets, and (master-only) the replica list.

pub mod master;
pub mod replica;

use bytes::Bytes;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica { host: String, port: u16 },
}

pub struct ReplicaHandle {
    pub id: u64,
    pub addr: SocketAddr,
    pub sender: mpsc::UnboundedSender<Bytes>,
    pub acked_offset: u64,
}

pub struct ReplicationState {
    pub role: Role,
    pub replid: String,
    /// Master: total bytes of write commands propagated so far.
    /// Replica: total bytes of replicated command frames applied since the
    /// post-handshake RDB was consumed.
    pub offset: u64,
    pub replicas: Vec<ReplicaHandle>,
    notify: Arc<Notify>,
}

impl ReplicationState {
    pub fn new() -> Self {
        Self {
            role: Role::Master,
            replid: generate_replid(),
            offset: 0,
            replicas: Vec::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self.role, Role::Master)
    }

    pub fn set_replica_of(&mut self, host: String, port: u16) {
        self.role = Role::Replica { host, port };
        self.offset = 0;
    }

    /// CONFIG SET REPL-ROLE|REPL-ID|REPL-ACK — a direct admin/test knob onto
    /// this struct's fields, distinct from the handshake-driven role change
    /// above.
    pub fn config_set(&mut self, field: &str, value: &str) -> bool {
        match field.to_ascii_uppercase().as_str() {
            "REPL-ROLE" => {
                self.role = match value.to_ascii_lowercase().as_str() {
                    "master" => Role::Master,
                    "slave" | "replica" => Role::Replica { host: String::new(), port: 0 },
                    _ => return false,
                };
                true
            }
            "REPL-ID" => {
                self.replid = value.to_string();
                true
            }
            "REPL-ACK" => match value.parse::<u64>() {
                Ok(n) => {
                    self.offset = n;
                    true
                }
                Err(_) => false,
            },
            _ => false,
        }
    }

    pub fn register_replica(&mut self, addr: SocketAddr, sender: mpsc::UnboundedSender<Bytes>) -> u64 {
        let id = self.replicas.len() as u64 + 1 + self.replicas.iter().map(|r| r.id).max().unwrap_or(0);
        self.replicas.push(ReplicaHandle { id, addr, sender, acked_offset: 0 });
        id
    }

    /// Fan out `frame_bytes` to every connected replica, bumping the write
    /// offset, and pruning any replica whose writer task has gone away.
    pub fn propagate(&mut self, frame_bytes: &Bytes) {
        self.offset += frame_bytes.len() as u64;
        self.replicas.retain(|r| r.sender.send(frame_bytes.clone()).is_ok());
    }

    /// Send `REPLCONF GETACK *` to every replica without counting it against
    /// the write offset (GETACK is not a write command).
    pub fn send_getack_to_all(&mut self) {
        let frame = crate::resp::Frame::array_of_bulks(vec![
            Bytes::from_static(b"REPLCONF"),
            Bytes::from_static(b"GETACK"),
            Bytes::from_static(b"*"),
        ]);
        let bytes = frame.encode_to_bytes().freeze();
        self.replicas.retain(|r| r.sender.send(bytes.clone()).is_ok());
    }

    pub fn record_ack(&mut self, replica_id: u64, offset: u64) {
        if let Some(r) = self.replicas.iter_mut().find(|r| r.id == replica_id) {
            r.acked_offset = offset;
        }
        self.notify.notify_waiters();
    }

    pub fn connected_replica_count(&self) -> usize {
        self.replicas.len()
    }

    pub fn count_acked_at_least(&self, target_offset: u64) -> usize {
        self.replicas.iter().filter(|r| r.acked_offset >= target_offset).count()
    }

    pub fn notify_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// INFO field rendering: an explicit ordered table of emitters, not
    /// reflection over this struct.
    pub fn info_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        match &self.role {
            Role::Master => {
                lines.push("role:master".to_string());
                lines.push(format!("master_replid:{}", self.replid));
                lines.push(format!("master_repl_offset:{}", self.offset));
                lines.push(format!("connected_slaves:{}", self.replicas.len()));
                for (i, r) in self.replicas.iter().enumerate() {
                    lines.push(format!(
                        "slave{}:ip={},port={},state=online,offset={}",
                        i,
                        r.addr.ip(),
                        r.addr.port(),
                        r.acked_offset
                    ));
                }
            }
            Role::Replica { host, port } => {
                lines.push("role:slave".to_string());
                lines.push(format!("master_host:{host}"));
                lines.push(format!("master_port:{port}"));
                lines.push("master_link_status:up".to_string());
                lines.push(format!("master_replid:{}", self.replid));
                lines.push(format!("master_repl_offset:{}", self.offset));
            }
        }
        lines
    }
}

impl Default for ReplicationState {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_replid() -> String {
    rand::rng().sample_iter(&Alphanumeric).take(40).map(char::from).collect()
}

/// WAIT numreplicas timeout_ms: snapshot the current offset as the target,
/// send GETACK to all replicas, then poll until enough replicas have acked
/// at least that offset or the timeout elapses. `state` is the whole shared
/// state so the caller can release/reacquire the single mutex around each
/// poll without holding it across the wait.
pub async fn wait_for_acks<F, G>(numreplicas: usize, timeout_ms: u64, mut snapshot: F, mut poll: G) -> usize
where
    F: FnMut() -> (u64, Arc<Notify>, usize),
    G: FnMut(u64) -> usize,
{
    let (target_offset, notify, replica_count) = snapshot();
    if target_offset == 0 {
        // Degenerate case: no writes have ever been propagated.
        return replica_count;
    }
    let already = poll(target_offset);
    if already >= numreplicas {
        return already;
    }
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms.max(1));
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return poll(target_offset);
        }
        tokio::select! {
            _ = notify.notified() => {
                let count = poll(target_offset);
                if count >= numreplicas {
                    return count;
                }
            }
            _ = tokio::time::sleep(remaining) => {
                return poll(target_offset);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_set_repl_role_switches_role() {
        let mut repl = ReplicationState::new();
        assert!(repl.config_set("repl-role", "slave"));
        assert!(!repl.is_master());
        assert!(repl.config_set("REPL-ROLE", "master"));
        assert!(repl.is_master());
    }

    #[test]
    fn config_set_rejects_unknown_field() {
        let mut repl = ReplicationState::new();
        assert!(!repl.config_set("bogus", "x"));
    }

    #[test]
    fn info_lines_reflect_master_role_by_default() {
        let repl = ReplicationState::new();
        let lines = repl.info_lines();
        assert!(lines.iter().any(|l| l == "role:master"));
        assert!(lines.iter().any(|l| l.starts_with("master_replid:")));
    }

    #[test]
    fn info_lines_reflect_replica_role_after_set_replica_of() {
        let mut repl = ReplicationState::new();
        repl.set_replica_of("localhost".to_string(), 6380);
        let lines = repl.info_lines();
        assert!(lines.contains(&"role:slave".to_string()));
        assert!(lines.contains(&"master_host:localhost".to_string()));
        assert!(lines.contains(&"master_port:6380".to_string()));
    }

    #[tokio::test]
    async fn propagate_bumps_offset_and_prunes_dead_replicas() {
        let mut repl = ReplicationState::new();
        let (tx, rx) = mpsc::unbounded_channel();
        repl.register_replica("127.0.0.1:9000".parse().unwrap(), tx);
        drop(rx);
        repl.propagate(&Bytes::from_static(b"hello"));
        assert_eq!(repl.offset, 5);
        assert_eq!(repl.connected_replica_count(), 0);
    }

    #[tokio::test]
    async fn wait_returns_replica_count_when_no_writes_happened() {
        let count = wait_for_acks(2, 50, || (0, Arc::new(Notify::new()), 3), |_| 0).await;
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn wait_times_out_and_returns_whatever_acked() {
        let notify = Arc::new(Notify::new());
        let count = wait_for_acks(5, 30, move || (10, Arc::clone(&notify), 0), |_| 1).await;
        assert_eq!(count, 1);
    }
}
