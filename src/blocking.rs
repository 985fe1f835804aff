//! FIFO registries of suspended clients, used by BLPOP (on the keyspace) and
//! XREAD BLOCK (on streams). Wake is a one-shot signal: a woken waiter must
//! re-check state under the shared lock rather than assume work is waiting,
//! since two waiters racing a single push can both be notified before either
//! re-acquires the lock.

use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;

struct Waiter {
    client_id: u64,
    wake: oneshot::Sender<()>,
}

#[derive(Default)]
pub struct BlockingRegistry {
    queues: HashMap<Bytes, VecDeque<Waiter>>,
}

impl BlockingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client_id` as waiting on `key`; returns a receiver that
    /// fires once this waiter is woken.
    pub fn register(&mut self, key: Bytes, client_id: u64) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.queues
            .entry(key)
            .or_default()
            .push_back(Waiter { client_id, wake: tx });
        rx
    }

    /// Wake the head of `key`'s queue, if any. Returns true if a waiter was
    /// woken (the caller pushed/added exactly one unit of work and wants to
    /// hand it to exactly one waiter).
    pub fn wake_one(&mut self, key: &[u8]) -> bool {
        if let Some(queue) = self.queues.get_mut(key) {
            while let Some(waiter) = queue.pop_front() {
                if waiter.wake.send(()).is_ok() {
                    return true;
                }
                // Receiver already dropped (disconnected/timed out) — try the next.
            }
        }
        false
    }

    /// Idempotent removal used on timeout or client disconnect.
    pub fn unregister(&mut self, key: &[u8], client_id: u64) {
        if let Some(queue) = self.queues.get_mut(key) {
            queue.retain(|w| w.client_id != client_id);
            if queue.is_empty() {
                self.queues.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wakes_in_fifo_order() {
        let mut reg = BlockingRegistry::new();
        let key = Bytes::from_static(b"q");
        let mut r1 = reg.register(key.clone(), 1);
        let mut r2 = reg.register(key.clone(), 2);

        assert!(reg.wake_one(&key));
        assert!(r1.try_recv().is_ok());
        assert!(r2.try_recv().is_err());

        assert!(reg.wake_one(&key));
        assert!(r2.try_recv().is_ok());

        assert!(!reg.wake_one(&key));
    }

    #[test]
    fn unregister_is_idempotent_and_skips_dead_waiters_on_wake() {
        let mut reg = BlockingRegistry::new();
        let key = Bytes::from_static(b"q");
        let _r1 = reg.register(key.clone(), 1);
        reg.unregister(&key, 1);
        reg.unregister(&key, 1); // idempotent
        assert!(!reg.wake_one(&key));
    }

    #[test]
    fn wake_one_skips_waiters_whose_receiver_was_dropped() {
        let mut reg = BlockingRegistry::new();
        let key = Bytes::from_static(b"q");
        {
            let _r1 = reg.register(key.clone(), 1); // dropped immediately
        }
        let mut r2 = reg.register(key.clone(), 2);
        assert!(reg.wake_one(&key));
        assert!(r2.try_recv().is_ok());
    }
}
