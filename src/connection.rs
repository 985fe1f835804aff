//! Per-connection state that only the owning connection task ever reads or
//! writes: transaction queue, subscriber channel set, replica-link flag.

use crate::command::Command;
use bytes::Bytes;
use std::collections::HashSet;
use std::net::SocketAddr;

pub struct ConnectionState {
    pub client_id: u64,
    pub addr: SocketAddr,
    /// `None` outside MULTI; `Some(queue)` while queuing commands for EXEC.
    pub transaction: Option<Vec<Command>>,
    pub subscribed_channels: HashSet<Bytes>,
    pub is_replica_link: bool,
    pub replica_id: Option<u64>,
}

impl ConnectionState {
    pub fn new(client_id: u64, addr: SocketAddr) -> Self {
        Self {
            client_id,
            addr,
            transaction: None,
            subscribed_channels: HashSet::new(),
            is_replica_link: false,
            replica_id: None,
        }
    }

    pub fn is_subscriber(&self) -> bool {
        !self.subscribed_channels.is_empty()
    }

    pub fn is_in_transaction(&self) -> bool {
        self.transaction.is_some()
    }
}
