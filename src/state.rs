//! The single shared state object every connection task holds an `Arc` to.
//! Keyspace, blocking registries, and pub/sub share one mutex boundary since
//! a BLPOP wake or an XADD notification must be atomic with the mutation
//! that triggered it; replication state is guarded separately so propagating
//! a write never has to fight a keyspace read for the same lock.

use crate::blocking::BlockingRegistry;
use crate::config::Config;
use crate::keyspace::Keyspace;
use crate::pubsub::PubSub;
use crate::replication::ReplicationState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct Core {
    pub keyspace: Keyspace,
    pub list_waiters: BlockingRegistry,
    pub stream_waiters: BlockingRegistry,
    pub pubsub: PubSub,
}

impl Core {
    fn new() -> Self {
        Self {
            keyspace: Keyspace::new(),
            list_waiters: BlockingRegistry::new(),
            stream_waiters: BlockingRegistry::new(),
            pubsub: PubSub::new(),
        }
    }
}

pub struct SharedState {
    pub core: Mutex<Core>,
    pub replication: Mutex<ReplicationState>,
    pub config: Mutex<Config>,
    next_client_id: AtomicU64,
}

impl SharedState {
    pub fn new(config: Config) -> Self {
        Self {
            core: Mutex::new(Core::new()),
            replication: Mutex::new(ReplicationState::new()),
            config: Mutex::new(config),
            next_client_id: AtomicU64::new(1),
        }
    }

    pub fn next_client_id(&self) -> u64 {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_monotonic_and_unique() {
        let state = SharedState::new(Config::default());
        let a = state.next_client_id();
        let b = state.next_client_id();
        let c = state.next_client_id();
        assert!(a < b && b < c);
    }
}
