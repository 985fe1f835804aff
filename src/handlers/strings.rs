use crate::command::Command;
use crate::errors::{RedisError, Result};
use crate::resp::Frame;
use crate::state::SharedState;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn set(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    let key = command.args.first().ok_or(RedisError::WrongArgCount("set"))?.clone();
    let value = command.args.get(1).ok_or(RedisError::WrongArgCount("set"))?.clone();

    let mut expire_at = None;
    if let Some(opt) = command.args.get(2) {
        let opt = String::from_utf8_lossy(opt).to_ascii_uppercase();
        if opt == "PX" {
            let ms_bytes = command.args.get(3).ok_or(RedisError::WrongArgCount("set"))?;
            let ms: u64 = std::str::from_utf8(ms_bytes)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or(RedisError::NotInteger)?;
            expire_at = Some(Instant::now() + Duration::from_millis(ms));
        } else {
            return Err(RedisError::WrongArgCount("set"));
        }
    }

    state.core.lock().unwrap().keyspace.set(key, value, expire_at);
    Ok(Frame::Simple(Bytes::from_static(b"OK")))
}

pub fn get(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    let key = command.args.first().ok_or(RedisError::WrongArgCount("get"))?;
    let value = state.core.lock().unwrap().keyspace.get_string(key)?;
    Ok(match value {
        Some(v) => Frame::Bulk(v),
        None => Frame::NullBulk,
    })
}

pub fn incr(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    let key = command.args.first().ok_or(RedisError::WrongArgCount("incr"))?;
    let new_value = state.core.lock().unwrap().keyspace.incr(key)?;
    Ok(Frame::Integer(new_value))
}

pub fn type_of(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    let key = command.args.first().ok_or(RedisError::WrongArgCount("type"))?;
    let tag = state.core.lock().unwrap().keyspace.type_of(key);
    Ok(Frame::Simple(Bytes::from_static(tag.as_str().as_bytes())))
}

pub fn keys(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    let pattern = command.args.first().ok_or(RedisError::WrongArgCount("keys"))?;
    if pattern.as_ref() != b"*" {
        return Err(RedisError::UnsupportedPattern);
    }
    let keys = state.core.lock().unwrap().keyspace.keys();
    Ok(Frame::array_of_bulks(keys))
}
