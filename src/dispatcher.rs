//! Routes a decoded command to its handler, enforcing subscriber and
//! transaction execution modes, and propagates write commands to replicas.
//! PSYNC is handled one level up in `connection.rs` since it needs to take
//! ownership of the socket's write half.

use crate::command::Command;
use crate::connection::ConnectionState;
use crate::errors::{RedisError, Result};
use crate::handlers;
use crate::protocol_constants::SUBSCRIBER_ALLOWED;
use crate::replication;
use crate::resp::Frame;
use crate::state::SharedState;
use crate::value::StreamId;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub enum OutgoingChunk {
    Frame(Frame),
    Raw(Bytes),
}

pub enum DispatchOutcome {
    Reply(Vec<OutgoingChunk>),
    NoReply,
}

pub async fn dispatch(
    state: &Arc<SharedState>,
    conn: &mut ConnectionState,
    subscriber_tx: &mpsc::UnboundedSender<Bytes>,
    command: Command,
) -> DispatchOutcome {
    if conn.is_subscriber() && !SUBSCRIBER_ALLOWED.contains(&command.name.as_str()) {
        return reply_err(RedisError::SubscriberContext(command.name));
    }

    if conn.is_in_transaction() && !matches!(command.name.as_str(), "EXEC" | "MULTI" | "DISCARD") {
        conn.transaction.as_mut().unwrap().push(command);
        return reply_ok_simple(b"QUEUED");
    }

    match command.name.as_str() {
        "MULTI" => {
            if conn.is_in_transaction() {
                return reply_err(RedisError::AlreadyInMulti);
            }
            conn.transaction = Some(Vec::new());
            reply_ok_simple(b"OK")
        }
        "DISCARD" => {
            if conn.transaction.take().is_none() {
                return reply_err(RedisError::DiscardWithoutMulti);
            }
            reply_ok_simple(b"OK")
        }
        "EXEC" => {
            let Some(queue) = conn.transaction.take() else {
                return reply_err(RedisError::NotInMulti);
            };
            let mut replies = Vec::with_capacity(queue.len());
            for queued in queue {
                replies.push(execute_queued(state, &queued).await);
            }
            DispatchOutcome::Reply(vec![OutgoingChunk::Frame(Frame::Array(replies))])
        }
        "PING" if conn.is_subscriber() => DispatchOutcome::Reply(vec![OutgoingChunk::Frame(Frame::Array(vec![
            Frame::Bulk(Bytes::from_static(b"pong")),
            Frame::Bulk(Bytes::new()),
        ]))]),
        "SUBSCRIBE" | "PSUBSCRIBE" => subscribe(state, conn, subscriber_tx, &command, command.name == "PSUBSCRIBE"),
        "UNSUBSCRIBE" | "PUNSUBSCRIBE" => unsubscribe(state, conn, &command, command.name == "PUNSUBSCRIBE"),
        "BLPOP" => match blpop(state, conn.client_id, &command).await {
            Ok(frame) => DispatchOutcome::Reply(vec![OutgoingChunk::Frame(frame)]),
            Err(err) => reply_err(err),
        },
        "XREAD" => match xread(state, conn.client_id, &command).await {
            Ok(frame) => DispatchOutcome::Reply(vec![OutgoingChunk::Frame(frame)]),
            Err(err) => reply_err(err),
        },
        "REPLCONF" => replconf(state, conn, &command),
        "WAIT" => match wait(state, &command).await {
            Ok(frame) => DispatchOutcome::Reply(vec![OutgoingChunk::Frame(frame)]),
            Err(err) => reply_err(err),
        },
        _ => {
            let is_write = command.is_write_command();
            match handlers::execute(state, &command).await {
                Ok(frame) => {
                    if is_write {
                        propagate(state, &command);
                    }
                    DispatchOutcome::Reply(vec![OutgoingChunk::Frame(frame)])
                }
                Err(err) => reply_err(err),
            }
        }
    }
}

fn reply_ok_simple(text: &'static [u8]) -> DispatchOutcome {
    DispatchOutcome::Reply(vec![OutgoingChunk::Frame(Frame::Simple(Bytes::from_static(text)))])
}

fn reply_err(err: RedisError) -> DispatchOutcome {
    DispatchOutcome::Reply(vec![OutgoingChunk::Frame(Frame::Error(Bytes::from(err.to_resp_message())))])
}

fn propagate(state: &Arc<SharedState>, command: &Command) {
    let frame = Frame::array_of_bulks(
        std::iter::once(Bytes::from(command.name.clone())).chain(command.args.iter().cloned()),
    );
    let bytes = frame.encode_to_bytes().freeze();
    state.replication.lock().unwrap().propagate(&bytes);
}

fn subscribe(
    state: &Arc<SharedState>,
    conn: &mut ConnectionState,
    subscriber_tx: &mpsc::UnboundedSender<Bytes>,
    command: &Command,
    is_pattern: bool,
) -> DispatchOutcome {
    let keyword: &'static [u8] = if is_pattern { b"psubscribe" } else { b"subscribe" };
    let mut chunks = Vec::new();
    for channel in &command.args {
        {
            let mut core = state.core.lock().unwrap();
            core.pubsub.subscribe(channel.clone(), conn.client_id, subscriber_tx.clone());
        }
        conn.subscribed_channels.insert(channel.clone());
        chunks.push(OutgoingChunk::Frame(Frame::Array(vec![
            Frame::Bulk(Bytes::from_static(keyword)),
            Frame::Bulk(channel.clone()),
            Frame::Integer(conn.subscribed_channels.len() as i64),
        ])));
    }
    DispatchOutcome::Reply(chunks)
}

fn unsubscribe(state: &Arc<SharedState>, conn: &mut ConnectionState, command: &Command, is_pattern: bool) -> DispatchOutcome {
    let keyword: &'static [u8] = if is_pattern { b"punsubscribe" } else { b"unsubscribe" };
    let channels: Vec<Bytes> = if command.args.is_empty() {
        conn.subscribed_channels.iter().cloned().collect()
    } else {
        command.args.clone()
    };
    let mut chunks = Vec::new();
    for channel in channels {
        {
            let mut core = state.core.lock().unwrap();
            core.pubsub.unsubscribe(&channel, conn.client_id);
        }
        conn.subscribed_channels.remove(&channel);
        chunks.push(OutgoingChunk::Frame(Frame::Array(vec![
            Frame::Bulk(Bytes::from_static(keyword)),
            Frame::Bulk(channel),
            Frame::Integer(conn.subscribed_channels.len() as i64),
        ])));
    }
    DispatchOutcome::Reply(chunks)
}

/// Runs a single command queued by MULTI. Commands that normally depend on
/// per-connection state (blocking waits, subscriptions) cannot keep that
/// behavior inside a transaction: BLPOP/XREAD make one non-blocking attempt
/// instead of suspending, and SUBSCRIBE/PSUBSCRIBE/UNSUBSCRIBE/PUNSUBSCRIBE
/// are rejected outright, matching real Redis's transaction restrictions.
async fn execute_queued(state: &Arc<SharedState>, command: &Command) -> Frame {
    let result = match command.name.as_str() {
        "BLPOP" => blpop_immediate(state, command),
        "XREAD" => xread_immediate(state, command),
        "SUBSCRIBE" => Err(RedisError::NotAllowedInTransaction("SUBSCRIBE")),
        "PSUBSCRIBE" => Err(RedisError::NotAllowedInTransaction("PSUBSCRIBE")),
        "UNSUBSCRIBE" => Err(RedisError::NotAllowedInTransaction("UNSUBSCRIBE")),
        "PUNSUBSCRIBE" => Err(RedisError::NotAllowedInTransaction("PUNSUBSCRIBE")),
        "WAIT" => wait(state, command).await,
        "REPLCONF" => match command.arg_str(0).map(|s| s.to_ascii_uppercase()).as_deref() {
            Some("LISTENING-PORT") | Some("CAPA") | Some("ACK") => Ok(Frame::Simple(Bytes::from_static(b"OK"))),
            _ => Err(RedisError::UnknownCommand("REPLCONF".to_string())),
        },
        _ => {
            let is_write = command.is_write_command();
            let result = handlers::execute(state, command).await;
            if is_write && result.is_ok() {
                propagate(state, command);
            }
            result
        }
    };
    match result {
        Ok(frame) => frame,
        Err(err) => Frame::Error(Bytes::from(err.to_resp_message())),
    }
}

fn blpop_immediate(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    let key = command.args.first().ok_or(RedisError::WrongArgCount("blpop"))?.clone();
    let popped = state.core.lock().unwrap().keyspace.pop_at(&key, 1)?;
    match popped.into_iter().next() {
        Some(value) => Ok(Frame::Array(vec![Frame::Bulk(key), Frame::Bulk(value)])),
        None => Ok(Frame::NullArray),
    }
}

fn xread_immediate(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    let (start_ids, count, _block_ms) = parse_xread_args(state, command)?;
    Ok(collect_xread_results(state, &start_ids, count)?.unwrap_or(Frame::NullArray))
}

async fn blpop(state: &Arc<SharedState>, client_id: u64, command: &Command) -> Result<Frame> {
    let key = command.args.first().ok_or(RedisError::WrongArgCount("blpop"))?.clone();
    let timeout_secs: f64 = command
        .arg_str(1)
        .ok_or(RedisError::WrongArgCount("blpop"))?
        .parse()
        .map_err(|_| RedisError::NotInteger)?;

    loop {
        let popped = {
            let mut core = state.core.lock().unwrap();
            core.keyspace.pop_at(&key, 1)?
        };
        if let Some(value) = popped.into_iter().next() {
            return Ok(Frame::Array(vec![Frame::Bulk(key), Frame::Bulk(value)]));
        }

        let rx = {
            let mut core = state.core.lock().unwrap();
            core.list_waiters.register(key.clone(), client_id)
        };

        if timeout_secs <= 0.0 {
            let _ = rx.await;
        } else {
            let deadline = Duration::from_secs_f64(timeout_secs);
            if tokio::time::timeout(deadline, rx).await.is_err() {
                state.core.lock().unwrap().list_waiters.unregister(&key, client_id);
                return Ok(Frame::NullArray);
            }
        }
    }
}

fn parse_xread_args(state: &Arc<SharedState>, command: &Command) -> Result<(Vec<(Bytes, StreamId)>, Option<usize>, Option<u64>)> {
    let mut count: Option<usize> = None;
    let mut block_ms: Option<u64> = None;
    let mut i = 0;
    loop {
        match command.arg_str(i).map(|s| s.to_ascii_uppercase()) {
            Some(ref s) if s == "COUNT" => {
                count = command.arg_str(i + 1).and_then(|v| v.parse().ok());
                i += 2;
            }
            Some(ref s) if s == "BLOCK" => {
                block_ms = Some(command.arg_str(i + 1).and_then(|v| v.parse().ok()).ok_or(RedisError::NotInteger)?);
                i += 2;
            }
            Some(ref s) if s == "STREAMS" => {
                i += 1;
                break;
            }
            _ => return Err(RedisError::WrongArgCount("xread")),
        }
    }
    let remaining = &command.args[i..];
    if remaining.is_empty() || remaining.len() % 2 != 0 {
        return Err(RedisError::WrongArgCount("xread"));
    }
    let n = remaining.len() / 2;
    let keys = &remaining[..n];
    let id_specs = &remaining[n..];

    let start_ids: Vec<(Bytes, StreamId)> = {
        let mut core = state.core.lock().unwrap();
        keys.iter()
            .zip(id_specs.iter())
            .map(|(k, spec)| {
                let spec_str = String::from_utf8_lossy(spec);
                let start = if spec_str == "$" {
                    core.keyspace.stream_top(k).unwrap_or(StreamId::ZERO)
                } else {
                    StreamId::parse(&spec_str).unwrap_or(StreamId::ZERO)
                };
                (k.clone(), start)
            })
            .collect()
    };
    Ok((start_ids, count, block_ms))
}

async fn xread(state: &Arc<SharedState>, client_id: u64, command: &Command) -> Result<Frame> {
    let (start_ids, count, block_ms) = parse_xread_args(state, command)?;

    loop {
        if let Some(frame) = collect_xread_results(state, &start_ids, count)? {
            return Ok(frame);
        }
        let Some(block_ms) = block_ms else {
            return Ok(Frame::NullArray);
        };
        let (first_key, _) = &start_ids[0];
        let rx = {
            let mut core = state.core.lock().unwrap();
            core.stream_waiters.register(first_key.clone(), client_id)
        };
        if block_ms == 0 {
            let _ = rx.await;
        } else if tokio::time::timeout(Duration::from_millis(block_ms), rx).await.is_err() {
            state.core.lock().unwrap().stream_waiters.unregister(first_key, client_id);
            return Ok(Frame::NullArray);
        }
    }
}

fn collect_xread_results(state: &Arc<SharedState>, start_ids: &[(Bytes, StreamId)], count: Option<usize>) -> Result<Option<Frame>> {
    let mut core = state.core.lock().unwrap();
    let mut per_key = Vec::new();
    for (key, start) in start_ids {
        let entries = core.keyspace.get_stream(key)?;
        let mut matching: Vec<Frame> = entries
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.id > *start)
                    .map(|e| {
                        let mut field_frames = Vec::with_capacity(e.fields.len() * 2);
                        for (k, v) in &e.fields {
                            field_frames.push(Frame::Bulk(k.clone()));
                            field_frames.push(Frame::Bulk(v.clone()));
                        }
                        Frame::Array(vec![Frame::Bulk(Bytes::from(e.id.to_string())), Frame::Array(field_frames)])
                    })
                    .collect()
            })
            .unwrap_or_default();
        if let Some(n) = count {
            matching.truncate(n);
        }
        if !matching.is_empty() {
            per_key.push(Frame::Array(vec![Frame::Bulk(key.clone()), Frame::Array(matching)]));
        }
    }
    Ok(if per_key.is_empty() { None } else { Some(Frame::Array(per_key)) })
}

fn replconf(state: &Arc<SharedState>, conn: &mut ConnectionState, command: &Command) -> DispatchOutcome {
    match command.arg_str(0).map(|s| s.to_ascii_uppercase()).as_deref() {
        Some("LISTENING-PORT") | Some("CAPA") => reply_ok_simple(b"OK"),
        Some("ACK") => {
            if let (Some(replica_id), Some(offset)) = (conn.replica_id, command.arg_str(1).and_then(|s| s.parse::<u64>().ok())) {
                state.replication.lock().unwrap().record_ack(replica_id, offset);
            }
            DispatchOutcome::NoReply
        }
        _ => reply_err(RedisError::UnknownCommand("REPLCONF".to_string())),
    }
}

async fn wait(state: &Arc<SharedState>, command: &Command) -> Result<Frame> {
    let numreplicas: usize = command.arg_str(0).ok_or(RedisError::WrongArgCount("wait"))?.parse().map_err(|_| RedisError::NotInteger)?;
    let timeout_ms: u64 = command.arg_str(1).ok_or(RedisError::WrongArgCount("wait"))?.parse().map_err(|_| RedisError::NotInteger)?;

    {
        let mut repl = state.replication.lock().unwrap();
        repl.send_getack_to_all();
    }

    let state_for_snapshot = Arc::clone(state);
    let state_for_poll = Arc::clone(state);
    let count = replication::wait_for_acks(
        numreplicas,
        timeout_ms,
        move || {
            let repl = state_for_snapshot.replication.lock().unwrap();
            (repl.offset, repl.notify_handle(), repl.connected_replica_count())
        },
        move |target| state_for_poll.replication.lock().unwrap().count_acked_at_least(target),
    )
    .await;
    Ok(Frame::Integer(count as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::net::SocketAddr;

    fn make_conn() -> ConnectionState {
        ConnectionState::new(1, "127.0.0.1:6379".parse::<SocketAddr>().unwrap())
    }

    fn cmd(name: &str, args: &[&str]) -> Command {
        Command { name: name.to_string(), args: args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect() }
    }

    #[tokio::test]
    async fn multi_queues_then_exec_runs_in_order() {
        let state = Arc::new(SharedState::new(Config::default()));
        let mut conn = make_conn();
        let (tx, _rx) = mpsc::unbounded_channel();

        matches_reply(dispatch(&state, &mut conn, &tx, cmd("MULTI", &[])).await, b"+OK\r\n");
        matches_reply(dispatch(&state, &mut conn, &tx, cmd("SET", &["k", "v"])).await, b"+QUEUED\r\n");
        matches_reply(dispatch(&state, &mut conn, &tx, cmd("GET", &["k"])).await, b"+QUEUED\r\n");

        match dispatch(&state, &mut conn, &tx, cmd("EXEC", &[])).await {
            DispatchOutcome::Reply(chunks) => {
                assert_eq!(chunks.len(), 1);
                if let OutgoingChunk::Frame(Frame::Array(items)) = &chunks[0] {
                    assert_eq!(items.len(), 2);
                    assert_eq!(items[0], Frame::Simple(Bytes::from_static(b"OK")));
                    assert_eq!(items[1], Frame::Bulk(Bytes::from_static(b"v")));
                } else {
                    panic!("expected array reply from EXEC");
                }
            }
            _ => panic!("expected reply"),
        }
    }

    #[tokio::test]
    async fn exec_without_multi_errors() {
        let state = Arc::new(SharedState::new(Config::default()));
        let mut conn = make_conn();
        let (tx, _rx) = mpsc::unbounded_channel();
        match dispatch(&state, &mut conn, &tx, cmd("EXEC", &[])).await {
            DispatchOutcome::Reply(chunks) => match &chunks[0] {
                OutgoingChunk::Frame(Frame::Error(msg)) => assert!(msg.starts_with(b"ERR EXEC")),
                _ => panic!("expected error frame"),
            },
            _ => panic!("expected reply"),
        }
    }

    #[tokio::test]
    async fn subscribe_then_non_allowed_command_is_rejected() {
        let state = Arc::new(SharedState::new(Config::default()));
        let mut conn = make_conn();
        let (tx, _rx) = mpsc::unbounded_channel();
        dispatch(&state, &mut conn, &tx, cmd("SUBSCRIBE", &["ch"])).await;
        match dispatch(&state, &mut conn, &tx, cmd("GET", &["k"])).await {
            DispatchOutcome::Reply(chunks) => match &chunks[0] {
                OutgoingChunk::Frame(Frame::Error(msg)) => assert!(msg.starts_with(b"ERR Can't execute")),
                _ => panic!("expected error"),
            },
            _ => panic!("expected reply"),
        }
    }

    #[tokio::test]
    async fn blpop_wakes_on_concurrent_push() {
        let state = Arc::new(SharedState::new(Config::default()));
        let state2 = Arc::clone(&state);
        let waiter = tokio::spawn(async move { blpop(&state2, 1, &cmd("BLPOP", &["q", "0"])).await.unwrap() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handlers::execute(&state, &cmd("RPUSH", &["q", "x"])).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(result, Frame::Array(vec![Frame::Bulk(Bytes::from_static(b"q")), Frame::Bulk(Bytes::from_static(b"x"))]));
    }

    #[tokio::test]
    async fn blpop_times_out_to_null_array() {
        let state = Arc::new(SharedState::new(Config::default()));
        let result = blpop(&state, 1, &cmd("BLPOP", &["q", "0.01"])).await.unwrap();
        assert_eq!(result, Frame::NullArray);
    }

    #[tokio::test]
    async fn ping_in_subscriber_mode_replies_with_push_array() {
        let state = Arc::new(SharedState::new(Config::default()));
        let mut conn = make_conn();
        let (tx, _rx) = mpsc::unbounded_channel();
        dispatch(&state, &mut conn, &tx, cmd("SUBSCRIBE", &["ch"])).await;
        matches_reply(
            dispatch(&state, &mut conn, &tx, cmd("PING", &[])).await,
            b"*2\r\n$4\r\npong\r\n$0\r\n\r\n",
        );
    }

    #[tokio::test]
    async fn subscribe_count_is_per_client_not_per_channel() {
        let state = Arc::new(SharedState::new(Config::default()));
        let mut conn_a = make_conn();
        let mut conn_b = ConnectionState::new(2, "127.0.0.1:6380".parse::<SocketAddr>().unwrap());
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();

        matches_reply(
            dispatch(&state, &mut conn_a, &tx_a, cmd("SUBSCRIBE", &["ch"])).await,
            b"*3\r\n$9\r\nsubscribe\r\n$2\r\nch\r\n:1\r\n",
        );
        // A second client subscribing to the same channel must still see its
        // own subscription count (1), not the channel's total (2).
        matches_reply(
            dispatch(&state, &mut conn_b, &tx_b, cmd("SUBSCRIBE", &["ch"])).await,
            b"*3\r\n$9\r\nsubscribe\r\n$2\r\nch\r\n:1\r\n",
        );
        matches_reply(
            dispatch(&state, &mut conn_a, &tx_a, cmd("SUBSCRIBE", &["other"])).await,
            b"*3\r\n$9\r\nsubscribe\r\n$5\r\nother\r\n:2\r\n",
        );
    }

    #[tokio::test]
    async fn exec_runs_blpop_as_a_single_non_blocking_attempt() {
        let state = Arc::new(SharedState::new(Config::default()));
        let mut conn = make_conn();
        let (tx, _rx) = mpsc::unbounded_channel();

        dispatch(&state, &mut conn, &tx, cmd("MULTI", &[])).await;
        dispatch(&state, &mut conn, &tx, cmd("BLPOP", &["q", "0"])).await;
        match dispatch(&state, &mut conn, &tx, cmd("EXEC", &[])).await {
            DispatchOutcome::Reply(chunks) => {
                if let OutgoingChunk::Frame(Frame::Array(items)) = &chunks[0] {
                    assert_eq!(items, &[Frame::NullArray]);
                } else {
                    panic!("expected array reply from EXEC");
                }
            }
            _ => panic!("expected reply"),
        }
    }

    #[tokio::test]
    async fn exec_rejects_queued_subscribe() {
        let state = Arc::new(SharedState::new(Config::default()));
        let mut conn = make_conn();
        let (tx, _rx) = mpsc::unbounded_channel();

        dispatch(&state, &mut conn, &tx, cmd("MULTI", &[])).await;
        dispatch(&state, &mut conn, &tx, cmd("SUBSCRIBE", &["ch"])).await;
        match dispatch(&state, &mut conn, &tx, cmd("EXEC", &[])).await {
            DispatchOutcome::Reply(chunks) => {
                if let OutgoingChunk::Frame(Frame::Array(items)) = &chunks[0] {
                    match &items[0] {
                        Frame::Error(msg) => assert!(msg.ends_with(b"not allowed in transactions")),
                        other => panic!("expected error element, got {other:?}"),
                    }
                } else {
                    panic!("expected array reply from EXEC");
                }
            }
            _ => panic!("expected reply"),
        }
    }

    fn matches_reply(outcome: DispatchOutcome, expected: &[u8]) {
        match outcome {
            DispatchOutcome::Reply(chunks) => {
                if let OutgoingChunk::Frame(frame) = &chunks[0] {
                    assert_eq!(&frame.encode_to_bytes()[..], expected);
                } else {
                    panic!("expected frame chunk");
                }
            }
            _ => panic!("expected reply"),
        }
    }
}
