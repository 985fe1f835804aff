//! The typed keyspace: a value map plus a lazily-expiring TTL map, with one
//! typed mutation primitive per supported operation. Handlers never touch
//! the underlying maps directly.

use crate::errors::{RedisError, Result};
use crate::value::{KeyType, StreamEntry, StreamId, Value};
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Default)]
pub struct Keyspace {
    values: HashMap<Bytes, Value>,
    ttl: HashMap<Bytes, Instant>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lazy expiry: remove `key` from both maps if its TTL has passed.
    /// Returns true if the key was (or already was) absent afterward.
    fn expire_if_needed(&mut self, key: &[u8]) -> bool {
        if let Some(deadline) = self.ttl.get(key) {
            if Instant::now() >= *deadline {
                self.ttl.remove(key);
                self.values.remove(key);
                return true;
            }
        }
        false
    }

    fn get(&mut self, key: &[u8]) -> Option<&Value> {
        self.expire_if_needed(key);
        self.values.get(key)
    }

    fn get_mut(&mut self, key: &[u8]) -> Option<&mut Value> {
        self.expire_if_needed(key);
        self.values.get_mut(key)
    }

    pub fn type_of(&mut self, key: &[u8]) -> KeyType {
        match self.get(key) {
            Some(v) => v.type_tag(),
            None => KeyType::None,
        }
    }

    pub fn keys(&mut self) -> Vec<Bytes> {
        let expired: Vec<Bytes> = self
            .ttl
            .iter()
            .filter(|(_, deadline)| Instant::now() >= **deadline)
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired {
            self.ttl.remove(&k);
            self.values.remove(&k);
        }
        self.values.keys().cloned().collect()
    }

    // --- strings / integers -------------------------------------------------

    pub fn set(&mut self, key: Bytes, value: Bytes, expire_at: Option<Instant>) {
        self.values.insert(key.clone(), Value::Str(value));
        match expire_at {
            Some(instant) => {
                self.ttl.insert(key, instant);
            }
            None => {
                self.ttl.remove(&key);
            }
        }
    }

    pub fn expire_at(&mut self, key: &Bytes, instant: Instant) {
        if self.values.contains_key(key) {
            self.ttl.insert(key.clone(), instant);
        }
    }

    pub fn ttl_remaining(&mut self, key: &[u8]) -> Option<std::time::Duration> {
        self.expire_if_needed(key);
        self.ttl
            .get(key)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn get_string(&mut self, key: &[u8]) -> Result<Option<Bytes>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Str(_) | Value::Int(_)) => Ok(self.get(key).and_then(|v| v.as_string_bytes())),
            Some(_) => Err(RedisError::WrongType),
        }
    }

    pub fn get_int(&mut self, key: &[u8]) -> Result<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Int(n)) => Ok(Some(*n)),
            Some(Value::Str(s)) => std::str::from_utf8(s)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .map(Some)
                .ok_or(RedisError::NotInteger),
            Some(_) => Err(RedisError::WrongType),
        }
    }

    /// INCR: create as `Int(1)` if absent, otherwise parse-increment-store.
    pub fn incr(&mut self, key: &Bytes) -> Result<i64> {
        self.expire_if_needed(key);
        let current = match self.values.get(key) {
            None => 0,
            Some(Value::Int(n)) => *n,
            Some(Value::Str(s)) => std::str::from_utf8(s)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(RedisError::NotInteger)?,
            Some(_) => return Err(RedisError::WrongType),
        };
        let next = current.checked_add(1).ok_or(RedisError::NotInteger)?;
        self.values.insert(key.clone(), Value::Int(next));
        Ok(next)
    }

    // --- lists ---------------------------------------------------------------

    pub fn get_list(&mut self, key: &[u8]) -> Result<Option<&VecDeque<Bytes>>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::List(_)) => match self.values.get(key) {
                Some(Value::List(list)) => Ok(Some(list)),
                _ => unreachable!(),
            },
            Some(_) => Err(RedisError::WrongType),
        }
    }

    pub fn list_len(&mut self, key: &[u8]) -> Result<usize> {
        Ok(self.get_list(key)?.map(|l| l.len()).unwrap_or(0))
    }

    /// RPUSH/LPUSH: append/prepend `values` in the order given, returning the
    /// new length.
    pub fn push(&mut self, key: &Bytes, values: &[Bytes], side: Side) -> Result<usize> {
        self.expire_if_needed(key);
        let entry = self
            .values
            .entry(key.clone())
            .or_insert_with(|| Value::List(VecDeque::new()));
        let list = match entry {
            Value::List(list) => list,
            _ => return Err(RedisError::WrongType),
        };
        match side {
            Side::Right => {
                for v in values {
                    list.push_back(v.clone());
                }
            }
            Side::Left => {
                for v in values {
                    list.push_front(v.clone());
                }
            }
        }
        Ok(list.len())
    }

    /// LPOP-family primitive: pop up to `count` elements from the head.
    /// Returns an empty vec if the key is absent or the list is already
    /// empty. The key is retained as an empty list rather than deleted.
    pub fn pop_at(&mut self, key: &[u8], count: usize) -> Result<Vec<Bytes>> {
        match self.get_mut(key) {
            None => Ok(Vec::new()),
            Some(Value::List(list)) => {
                let n = count.min(list.len());
                Ok(list.drain(..n).collect())
            }
            Some(_) => Err(RedisError::WrongType),
        }
    }

    pub fn lrange(&mut self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Bytes>> {
        let list = match self.get_list(key)? {
            None => return Ok(Vec::new()),
            Some(list) => list,
        };
        let len = list.len() as i64;
        if len == 0 {
            return Ok(Vec::new());
        }
        let norm = |i: i64| -> i64 {
            if i < 0 {
                (len + i).max(0)
            } else {
                i
            }
        };
        let start = norm(start).min(len);
        let stop = norm(stop).min(len - 1);
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    // --- sets ------------------------------------------------------------------

    pub fn get_set(&mut self, key: &[u8]) -> Result<Option<&HashSet<Bytes>>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Set(_)) => match self.values.get(key) {
                Some(Value::Set(set)) => Ok(Some(set)),
                _ => unreachable!(),
            },
            Some(_) => Err(RedisError::WrongType),
        }
    }

    pub fn sadd(&mut self, key: &Bytes, members: &[Bytes]) -> Result<usize> {
        self.expire_if_needed(key);
        let entry = self
            .values
            .entry(key.clone())
            .or_insert_with(|| Value::Set(HashSet::new()));
        let set = match entry {
            Value::Set(set) => set,
            _ => return Err(RedisError::WrongType),
        };
        let mut added = 0;
        for m in members {
            if set.insert(m.clone()) {
                added += 1;
            }
        }
        Ok(added)
    }

    // --- streams -----------------------------------------------------------------

    pub fn get_stream(&mut self, key: &[u8]) -> Result<Option<&Vec<StreamEntry>>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Stream(_)) => match self.values.get(key) {
                Some(Value::Stream(entries)) => Ok(Some(entries)),
                _ => unreachable!(),
            },
            Some(_) => Err(RedisError::WrongType),
        }
    }

    pub fn stream_top(&mut self, key: &[u8]) -> Result<StreamId> {
        Ok(self
            .get_stream(key)?
            .and_then(|entries| entries.last())
            .map(|e| e.id)
            .unwrap_or(StreamId::ZERO))
    }

    /// Append a validated entry. Callers (the XADD handler) own id
    /// validation/derivation against `stream_top`; this just performs the
    /// insert-or-create-and-insert.
    pub fn xadd(&mut self, key: &Bytes, id: StreamId, fields: Vec<(Bytes, Bytes)>, arrival_ms: i64) -> Result<()> {
        self.expire_if_needed(key);
        let entry = self
            .values
            .entry(key.clone())
            .or_insert_with(|| Value::Stream(Vec::new()));
        let stream = match entry {
            Value::Stream(entries) => entries,
            _ => return Err(RedisError::WrongType),
        };
        stream.push(StreamEntry { id, fields, arrival_ms });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn set_get_roundtrip() {
        let mut ks = Keyspace::new();
        ks.set(b("k"), b("v"), None);
        assert_eq!(ks.get_string(b"k").unwrap(), Some(b("v")));
    }

    #[test]
    fn px_expiry_makes_key_disappear() {
        let mut ks = Keyspace::new();
        ks.set(b("k"), b("v"), Some(Instant::now() - Duration::from_millis(1)));
        assert_eq!(ks.get_string(b"k").unwrap(), None);
        assert_eq!(ks.type_of(b"k"), KeyType::None);
    }

    #[test]
    fn incr_creates_and_increments() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.incr(&b("counter")).unwrap(), 1);
        assert_eq!(ks.incr(&b("counter")).unwrap(), 2);
        assert_eq!(ks.incr(&b("counter")).unwrap(), 3);
    }

    #[test]
    fn incr_on_non_numeric_string_fails() {
        let mut ks = Keyspace::new();
        ks.set(b("k"), b("abc"), None);
        assert!(matches!(ks.incr(&b("k")), Err(RedisError::NotInteger)));
    }

    #[test]
    fn incr_on_wrong_type_fails() {
        let mut ks = Keyspace::new();
        ks.push(&b("k"), &[b("x")], Side::Right).unwrap();
        assert!(matches!(ks.incr(&b("k")), Err(RedisError::WrongType)));
    }

    #[test]
    fn rpush_then_lpush_order() {
        let mut ks = Keyspace::new();
        ks.push(&b("l"), &[b("a"), b("b"), b("c")], Side::Right).unwrap();
        assert_eq!(ks.lrange(b"l", 0, -1).unwrap(), vec![b("a"), b("b"), b("c")]);

        ks.push(&b("l2"), &[b("a"), b("b"), b("c")], Side::Left).unwrap();
        assert_eq!(ks.lrange(b"l2", 0, -1).unwrap(), vec![b("c"), b("b"), b("a")]);
    }

    #[test]
    fn lrange_negative_indices_clamp() {
        let mut ks = Keyspace::new();
        ks.push(&b("l"), &[b("a"), b("b"), b("c")], Side::Right).unwrap();
        assert_eq!(ks.lrange(b"l", -100, 100).unwrap(), vec![b("a"), b("b"), b("c")]);
        assert_eq!(ks.lrange(b"l", 5, 10).unwrap(), Vec::<Bytes>::new());
    }

    #[test]
    fn pop_at_retains_empty_list() {
        let mut ks = Keyspace::new();
        ks.push(&b("l"), &[b("a")], Side::Right).unwrap();
        let popped = ks.pop_at(b"l", 1).unwrap();
        assert_eq!(popped, vec![b("a")]);
        assert_eq!(ks.type_of(b"l"), KeyType::List);
        assert_eq!(ks.list_len(b"l").unwrap(), 0);
    }

    #[test]
    fn sadd_dedupes_and_counts_additions() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.sadd(&b("s"), &[b("a"), b("b"), b("a")]).unwrap(), 2);
        assert_eq!(ks.sadd(&b("s"), &[b("b"), b("c")]).unwrap(), 1);
    }

    #[test]
    fn xadd_tracks_top_and_get_stream_orders_entries() {
        let mut ks = Keyspace::new();
        ks.xadd(&b("s"), StreamId::new(1, 1), vec![(b("k"), b("v"))], 100).unwrap();
        ks.xadd(&b("s"), StreamId::new(1, 2), vec![(b("k"), b("v2"))], 101).unwrap();
        assert_eq!(ks.stream_top(b"s").unwrap(), StreamId::new(1, 2));
        let entries = ks.get_stream(b"s").unwrap().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, StreamId::new(1, 1));
    }
}
