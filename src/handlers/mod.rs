//! Command handlers grouped by family. `execute` covers every command whose
//! semantics depend only on shared state — the common path used both for a
//! normal client request and for applying a replicated write on a replica.
//! Commands that need per-connection context (MULTI/EXEC queueing,
//! SUBSCRIBE's channel bookkeeping, blocking waits, the replication
//! handshake) are handled one level up, in `dispatcher`.

mod lists;
mod server;
mod streams;
mod strings;

use crate::command::Command;
use crate::errors::{RedisError, Result};
use crate::resp::Frame;
use crate::state::SharedState;
use std::sync::Arc;

pub async fn execute(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    match command.name.as_str() {
        "PING" => Ok(Frame::Simple(bytes::Bytes::from_static(b"PONG"))),
        "ECHO" => {
            let arg = command.args.first().ok_or(RedisError::WrongArgCount("echo"))?;
            Ok(Frame::Bulk(arg.clone()))
        }
        "SET" => strings::set(state, command),
        "GET" => strings::get(state, command),
        "INCR" => strings::incr(state, command),
        "TYPE" => strings::type_of(state, command),
        "KEYS" => strings::keys(state, command),
        "RPUSH" => lists::push(state, command, crate::keyspace::Side::Right),
        "LPUSH" => lists::push(state, command, crate::keyspace::Side::Left),
        "LPOP" => lists::pop(state, command),
        "LLEN" => lists::len(state, command),
        "LRANGE" => lists::range(state, command),
        "XADD" => streams::xadd(state, command),
        "XRANGE" => streams::xrange(state, command),
        "XLEN" => streams::xlen(state, command),
        "PUBLISH" => server::publish(state, command),
        "CONFIG" => server::config(state, command),
        "COMMAND" => Ok(Frame::Array(Vec::new())),
        "INFO" => server::info(state, command),
        other => Err(RedisError::UnknownCommand(other.to_string())),
    }
}
