//! Channel subscriber tracking and PUBLISH fan-out.

use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Messages pushed to a subscriber connection's own reader task, which
/// interleaves them with that connection's RESP replies.
pub type SubscriberSender = mpsc::UnboundedSender<Bytes>;

#[derive(Default)]
pub struct PubSub {
    channels: HashMap<Bytes, HashMap<u64, SubscriberSender>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, channel: Bytes, client_id: u64, sender: SubscriberSender) -> usize {
        let subs = self.channels.entry(channel).or_default();
        subs.insert(client_id, sender);
        subs.len()
    }

    /// Returns the channel's remaining subscriber count after removal (0 if
    /// the channel no longer exists or the client wasn't subscribed).
    pub fn unsubscribe(&mut self, channel: &[u8], client_id: u64) -> usize {
        if let Some(subs) = self.channels.get_mut(channel) {
            subs.remove(&client_id);
            let remaining = subs.len();
            if subs.is_empty() {
                self.channels.remove(channel);
            }
            remaining
        } else {
            0
        }
    }

    pub fn unsubscribe_all(&mut self, client_id: u64) {
        self.channels.retain(|_, subs| {
            subs.remove(&client_id);
            !subs.is_empty()
        });
    }

    /// Deliver `message` to every subscriber of `channel`; returns the
    /// number of subscribers the message was enqueued for.
    pub fn publish(&mut self, channel: &[u8], message: Bytes) -> usize {
        let Some(subs) = self.channels.get(channel) else {
            return 0;
        };
        let mut delivered = 0;
        for sender in subs.values() {
            if sender.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_counts_and_publish_delivers() {
        let mut ps = PubSub::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        assert_eq!(ps.subscribe(Bytes::from_static(b"ch"), 1, tx1), 1);
        assert_eq!(ps.subscribe(Bytes::from_static(b"ch"), 2, tx2), 2);

        let delivered = ps.publish(b"ch", Bytes::from_static(b"hi"));
        assert_eq!(delivered, 2);
        assert_eq!(rx1.try_recv().unwrap(), Bytes::from_static(b"hi"));
        assert_eq!(rx2.try_recv().unwrap(), Bytes::from_static(b"hi"));
    }

    #[test]
    fn unsubscribe_removes_empty_channel() {
        let mut ps = PubSub::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        ps.subscribe(Bytes::from_static(b"ch"), 1, tx1);
        assert_eq!(ps.unsubscribe(b"ch", 1), 0);
        assert_eq!(ps.publish(b"ch", Bytes::from_static(b"x")), 0);
    }

    #[test]
    fn unsubscribe_all_clears_every_channel_for_client() {
        let mut ps = PubSub::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        ps.subscribe(Bytes::from_static(b"a"), 1, tx1.clone());
        ps.subscribe(Bytes::from_static(b"b"), 1, tx1);
        ps.unsubscribe_all(1);
        assert_eq!(ps.publish(b"a", Bytes::from_static(b"x")), 0);
        assert_eq!(ps.publish(b"b", Bytes::from_static(b"x")), 0);
    }
}
