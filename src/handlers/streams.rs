use crate::command::Command;
use crate::errors::{RedisError, Result};
use crate::resp::Frame;
use crate::state::SharedState;
use crate::value::StreamId;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn xadd(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    let key = command.args.first().ok_or(RedisError::WrongArgCount("xadd"))?.clone();
    let id_spec = command.args.get(1).ok_or(RedisError::WrongArgCount("xadd"))?;
    let id_spec = std::str::from_utf8(id_spec).map_err(|_| RedisError::WrongArgCount("xadd"))?;

    let field_args = &command.args[2.min(command.args.len())..];
    if field_args.is_empty() || field_args.len() % 2 != 0 {
        return Err(RedisError::WrongArgCount("xadd"));
    }
    let fields: Vec<(Bytes, Bytes)> = field_args.chunks(2).map(|c| (c[0].clone(), c[1].clone())).collect();

    let mut core = state.core.lock().unwrap();
    let top = core.keyspace.stream_top(&key)?;
    let id = resolve_id(id_spec, top)?;

    if id <= StreamId::ZERO {
        return Err(RedisError::InvalidStreamId("The ID specified in XADD must be greater than 0-0"));
    }
    if id <= top {
        return Err(RedisError::InvalidStreamId(
            "The ID specified in XADD is equal or smaller than the target stream top item",
        ));
    }

    let arrival_ms = now_ms();
    core.keyspace.xadd(&key, id, fields, arrival_ms)?;
    core.stream_waiters.wake_one(&key);
    Ok(Frame::Bulk(Bytes::from(id.to_string())))
}

fn resolve_id(spec: &str, top: StreamId) -> Result<StreamId> {
    if spec == "*" {
        let ms = now_ms() as u64;
        let seq = derive_seq(top, ms);
        return Ok(StreamId::new(ms, seq));
    }
    let (ms_part, seq_part) = spec.split_once('-').ok_or(RedisError::InvalidStreamId(
        "The ID specified in XADD must be greater than 0-0",
    ))?;
    let ms: u64 = ms_part.parse().map_err(|_| RedisError::NotInteger)?;
    if seq_part == "*" {
        Ok(StreamId::new(ms, derive_seq(top, ms)))
    } else {
        let seq: u64 = seq_part.parse().map_err(|_| RedisError::NotInteger)?;
        Ok(StreamId::new(ms, seq))
    }
}

fn derive_seq(top: StreamId, ms: u64) -> u64 {
    if top.ms == ms {
        top.seq + 1
    } else if ms == 0 {
        1
    } else {
        0
    }
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

pub fn xrange(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    let key = command.args.first().ok_or(RedisError::WrongArgCount("xrange"))?;
    let start_spec = command.args.get(1).ok_or(RedisError::WrongArgCount("xrange"))?;
    let end_spec = command.args.get(2).ok_or(RedisError::WrongArgCount("xrange"))?;
    let count = match command.args.get(4) {
        Some(raw) => Some(std::str::from_utf8(raw).ok().and_then(|s| s.parse::<usize>().ok()).ok_or(RedisError::NotInteger)?),
        None => None,
    };

    let start = parse_range_bound(start_spec, StreamId::ZERO)?;
    let end = parse_range_bound(end_spec, StreamId::new(u64::MAX, u64::MAX))?;

    let mut core_guard = state.core.lock().unwrap();
    let entries = core_guard.keyspace.get_stream(key)?.cloned().unwrap_or_default();
    drop(core_guard);

    let mut matched: Vec<Frame> = entries
        .into_iter()
        .filter(|e| e.id >= start && e.id <= end)
        .map(|e| {
            let mut field_frames = Vec::with_capacity(e.fields.len() * 2);
            for (k, v) in e.fields {
                field_frames.push(Frame::Bulk(k));
                field_frames.push(Frame::Bulk(v));
            }
            Frame::Array(vec![Frame::Bulk(Bytes::from(e.id.to_string())), Frame::Array(field_frames)])
        })
        .collect();

    if let Some(n) = count {
        matched.truncate(n);
    }
    Ok(Frame::Array(matched))
}

fn parse_range_bound(raw: &Bytes, default_id: StreamId) -> Result<StreamId> {
    let text = std::str::from_utf8(raw).map_err(|_| RedisError::NotInteger)?;
    match text {
        "-" | "+" => Ok(default_id),
        _ => StreamId::parse(text)
            .or_else(|| text.parse::<u64>().ok().map(|ms| StreamId::new(ms, 0)))
            .ok_or(RedisError::NotInteger),
    }
}

pub fn xlen(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    let key = command.args.first().ok_or(RedisError::WrongArgCount("xlen"))?;
    let len = state.core.lock().unwrap().keyspace.get_stream(key)?.map(|e| e.len()).unwrap_or(0);
    Ok(Frame::Integer(len as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn cmd(name: &str, args: &[&str]) -> Command {
        Command { name: name.to_string(), args: args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect() }
    }

    #[test]
    fn xadd_with_explicit_id_then_duplicate_fails() {
        let state = Arc::new(SharedState::new(Config::default()));
        assert_eq!(
            xadd(&state, &cmd("XADD", &["s", "1-1", "k", "v"])).unwrap(),
            Frame::Bulk(Bytes::from_static(b"1-1"))
        );
        assert!(matches!(
            xadd(&state, &cmd("XADD", &["s", "1-1", "k", "v"])),
            Err(RedisError::InvalidStreamId(_))
        ));
    }

    #[test]
    fn xadd_rejects_zero_zero() {
        let state = Arc::new(SharedState::new(Config::default()));
        assert!(matches!(xadd(&state, &cmd("XADD", &["s", "0-0", "k", "v"])), Err(RedisError::InvalidStreamId(_))));
    }

    #[test]
    fn xadd_auto_seq_increments_within_same_ms() {
        let state = Arc::new(SharedState::new(Config::default()));
        xadd(&state, &cmd("XADD", &["s", "5-*", "k", "v"])).unwrap();
        assert_eq!(xadd(&state, &cmd("XADD", &["s", "5-*", "k", "v"])).unwrap(), Frame::Bulk(Bytes::from_static(b"5-1")));
    }

    #[test]
    fn xrange_returns_entries_in_order_with_full_span() {
        let state = Arc::new(SharedState::new(Config::default()));
        xadd(&state, &cmd("XADD", &["s", "1-1", "a", "1"])).unwrap();
        xadd(&state, &cmd("XADD", &["s", "1-2", "b", "2"])).unwrap();
        let result = xrange(&state, &cmd("XRANGE", &["s", "-", "+"])).unwrap();
        match result {
            Frame::Array(items) => assert_eq!(items.len(), 2),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn xlen_counts_entries() {
        let state = Arc::new(SharedState::new(Config::default()));
        xadd(&state, &cmd("XADD", &["s", "1-1", "a", "1"])).unwrap();
        xadd(&state, &cmd("XADD", &["s", "1-2", "b", "2"])).unwrap();
        assert_eq!(xlen(&state, &cmd("XLEN", &["s"])).unwrap(), Frame::Integer(2));
    }
}
