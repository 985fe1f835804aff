use crate::command::Command;
use crate::errors::{RedisError, Result};
use crate::keyspace::Side;
use crate::resp::Frame;
use crate::state::SharedState;
use std::sync::Arc;

pub fn push(state: &Arc<SharedState>, command: &Command, side: Side) -> Result<Frame> {
    let key = command.args.first().ok_or(RedisError::WrongArgCount("push"))?.clone();
    if command.args.len() < 2 {
        return Err(RedisError::WrongArgCount("push"));
    }
    let values = &command.args[1..];

    let mut core = state.core.lock().unwrap();
    let new_len = core.keyspace.push(&key, values, side)?;
    core.list_waiters.wake_one(&key);
    Ok(Frame::Integer(new_len as i64))
}

pub fn pop(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    let key = command.args.first().ok_or(RedisError::WrongArgCount("lpop"))?;
    let count = match command.args.get(1) {
        None => None,
        Some(raw) => Some(
            std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or(RedisError::NotInteger)?,
        ),
    };

    let mut core = state.core.lock().unwrap();
    match count {
        None => {
            let popped = core.keyspace.pop_at(key, 1)?;
            Ok(match popped.into_iter().next() {
                Some(v) => Frame::Bulk(v),
                None => Frame::NullBulk,
            })
        }
        Some(n) => {
            let popped = core.keyspace.pop_at(key, n)?;
            Ok(Frame::array_of_bulks(popped))
        }
    }
}

pub fn len(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    let key = command.args.first().ok_or(RedisError::WrongArgCount("llen"))?;
    let len = state.core.lock().unwrap().keyspace.list_len(key)?;
    Ok(Frame::Integer(len as i64))
}

pub fn range(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    let key = command.args.first().ok_or(RedisError::WrongArgCount("lrange"))?;
    let start = parse_index(command.args.get(1))?;
    let stop = parse_index(command.args.get(2))?;
    let items = state.core.lock().unwrap().keyspace.lrange(key, start, stop)?;
    Ok(Frame::array_of_bulks(items))
}

fn parse_index(raw: Option<&bytes::Bytes>) -> Result<i64> {
    let raw = raw.ok_or(RedisError::WrongArgCount("lrange"))?;
    std::str::from_utf8(raw).ok().and_then(|s| s.parse().ok()).ok_or(RedisError::NotInteger)
}
