use crate::command::Command;
use crate::errors::{RedisError, Result};
use crate::resp::Frame;
use crate::state::SharedState;
use bytes::Bytes;
use std::sync::Arc;

pub fn publish(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    let channel = command.args.first().ok_or(RedisError::WrongArgCount("publish"))?;
    let message = command.args.get(1).ok_or(RedisError::WrongArgCount("publish"))?.clone();
    // Subscriber connections write whatever bytes arrive on their channel
    // straight to the socket, so the payload handed to `pubsub.publish` must
    // already be a fully encoded RESP push frame, not the raw message body.
    let push = Frame::array_of_bulks(vec![
        Bytes::from_static(b"message"),
        channel.clone(),
        message,
    ])
    .encode_to_bytes()
    .freeze();
    let delivered = state.core.lock().unwrap().pubsub.publish(channel, push);
    Ok(Frame::Integer(delivered as i64))
}

pub fn config(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    let sub = command.arg_str(0).ok_or(RedisError::UnsupportedConfig)?.to_ascii_uppercase();
    match sub.as_str() {
        "GET" => {
            let param = command.arg_str(1).ok_or(RedisError::UnsupportedConfig)?;
            let value = state.config.lock().unwrap().get(&param).map(|s| s.to_string());
            match value {
                Some(v) => Ok(Frame::array_of_bulks(vec![param, v])),
                None => Ok(Frame::Array(Vec::new())),
            }
        }
        "SET" => {
            let field = command.arg_str(1).ok_or(RedisError::UnsupportedConfig)?;
            let value = command.arg_str(2).ok_or(RedisError::UnsupportedConfig)?;
            let ok = state.replication.lock().unwrap().config_set(&field, &value);
            if ok {
                Ok(Frame::Simple(Bytes::from_static(b"OK")))
            } else {
                Err(RedisError::UnsupportedConfig)
            }
        }
        _ => Err(RedisError::UnsupportedConfig),
    }
}

pub fn info(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    let section = command.arg_str(0).map(|s| s.to_ascii_lowercase());
    match section.as_deref() {
        None | Some("replication") | Some("") => {
            let lines = state.replication.lock().unwrap().info_lines();
            let body = lines.join("\r\n");
            Ok(Frame::Bulk(Bytes::from(body)))
        }
        Some(_) => Ok(Frame::Bulk(Bytes::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn cmd(name: &str, args: &[&str]) -> Command {
        Command { name: name.to_string(), args: args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect() }
    }

    #[test]
    fn publish_with_no_subscribers_delivers_zero() {
        let state = Arc::new(SharedState::new(Config::default()));
        assert_eq!(publish(&state, &cmd("PUBLISH", &["ch", "hi"])).unwrap(), Frame::Integer(0));
    }

    #[test]
    fn config_get_dir_returns_pair() {
        let mut config = Config::default();
        config.dir = "/data".to_string();
        let state = Arc::new(SharedState::new(config));
        assert_eq!(
            config_cmd_get(&state, "dir"),
            Frame::array_of_bulks(vec!["dir".to_string(), "/data".to_string()])
        );
    }

    fn config_cmd_get(state: &Arc<SharedState>, param: &str) -> Frame {
        config(state, &cmd("CONFIG", &["GET", param])).unwrap()
    }

    #[test]
    fn config_set_repl_role_updates_replication_state() {
        let state = Arc::new(SharedState::new(Config::default()));
        assert_eq!(config(&state, &cmd("CONFIG", &["SET", "REPL-ROLE", "slave"])).unwrap(), Frame::Simple(Bytes::from_static(b"OK")));
        assert!(!state.replication.lock().unwrap().is_master());
    }

    #[test]
    fn info_defaults_to_replication_section() {
        let state = Arc::new(SharedState::new(Config::default()));
        let frame = info(&state, &cmd("INFO", &[])).unwrap();
        match frame {
            Frame::Bulk(b) => assert!(String::from_utf8_lossy(&b).contains("role:master")),
            other => panic!("expected bulk, got {other:?}"),
        }
    }
}
