//! The typed value union stored in the keyspace, plus stream entry/id types.

use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    pub fn parse(s: &str) -> Option<StreamId> {
        let (ms_str, seq_str) = s.split_once('-')?;
        let ms = ms_str.parse().ok()?;
        let seq = seq_str.parse().ok()?;
        Some(StreamId { ms, seq })
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: StreamId,
    /// Preserves field insertion order; a `HashMap` would scramble XRANGE
    /// replies across runs.
    pub fields: Vec<(Bytes, Bytes)>,
    pub arrival_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    String,
    List,
    Set,
    Stream,
    None,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::String => "string",
            KeyType::List => "list",
            KeyType::Set => "set",
            KeyType::Stream => "stream",
            KeyType::None => "none",
        }
    }
}

/// A keyspace value. One variant per supported Redis type; handlers dispatch
/// on this tag rather than doing reflective lookups.
#[derive(Debug, Clone)]
pub enum Value {
    Str(Bytes),
    Int(i64),
    List(VecDeque<Bytes>),
    Set(HashSet<Bytes>),
    Stream(Vec<StreamEntry>),
}

impl Value {
    pub fn type_tag(&self) -> KeyType {
        match self {
            Value::Str(_) | Value::Int(_) => KeyType::String,
            Value::List(_) => KeyType::List,
            Value::Set(_) => KeyType::Set,
            Value::Stream(_) => KeyType::Stream,
        }
    }

    /// The decimal/textual rendering GET returns for String and Integer
    /// values.
    pub fn as_string_bytes(&self) -> Option<Bytes> {
        match self {
            Value::Str(b) => Some(b.clone()),
            Value::Int(n) => Some(Bytes::from(n.to_string())),
            _ => None,
        }
    }
}
