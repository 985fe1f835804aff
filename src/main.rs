mod blocking;
mod command;
mod config;
mod connection;
mod dispatcher;
mod errors;
mod handlers;
mod keyspace;
mod protocol_constants;
mod pubsub;
mod rdb;
mod replication;
mod resp;
mod state;
mod value;

use bytes::{Bytes, BytesMut};
use config::Config;
use connection::ConnectionState;
use dispatcher::{DispatchOutcome, OutgoingChunk};
use resp::Frame;
use state::SharedState;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config = Config::parse(&args).map_err(|e| anyhow::anyhow!(e))?;
    let port = config.port;
    let replicaof = config.replicaof.clone();

    let state = Arc::new(SharedState::new(config));
    load_rdb_if_configured(&state).await;

    if let Some((host, master_port)) = replicaof {
        let state_for_replica = Arc::clone(&state);
        tokio::spawn(async move {
            replication::replica::run(state_for_replica, host, master_port, port).await;
        });
    }

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    println!("listening on port {port}");

    loop {
        let (socket, addr) = listener.accept().await?;
        let state = Arc::clone(&state);
        // A panic inside `handle_connection` is isolated to its own task by
        // tokio; awaiting the JoinHandle here just surfaces that panic (or a
        // plain I/O error) in the log instead of letting it vanish silently.
        let handle = tokio::spawn(async move { handle_connection(state, socket, addr).await });
        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => eprintln!("connection {addr} ended: {err}"),
                Err(join_err) => eprintln!("connection {addr} task panicked: {join_err}"),
            }
        });
    }
}

async fn load_rdb_if_configured(state: &Arc<SharedState>) {
    let path = { state.config.lock().unwrap().rdb_path() };
    let Some(path) = path else { return };
    match tokio::fs::File::open(&path).await {
        Ok(file) => {
            let mut keyspace = keyspace::Keyspace::new();
            match rdb::RdbLoader::new(file).load(&mut keyspace).await {
                Ok(()) => {
                    state.core.lock().unwrap().keyspace = keyspace;
                    println!("loaded RDB from {}", path.display());
                }
                Err(err) => eprintln!("failed to parse RDB at {}: {err}", path.display()),
            }
        }
        Err(err) => eprintln!("no RDB loaded from {}: {err}", path.display()),
    }
}

async fn handle_connection(state: Arc<SharedState>, socket: TcpStream, addr: std::net::SocketAddr) -> std::io::Result<()> {
    let client_id = state.next_client_id();
    let mut conn = ConnectionState::new(client_id, addr);
    let (mut read_half, mut write_half) = socket.into_split();
    let (subscriber_tx, mut subscriber_rx) = mpsc::unbounded_channel::<Bytes>();

    let mut buf = BytesMut::with_capacity(8 * 1024);
    let mut read_chunk = [0u8; 8192];

    loop {
        let frame = loop {
            if let Some((frame, _consumed)) = resp::try_parse(&mut buf).map_err(drop_on_protocol_error)? {
                break Some(frame);
            }
            tokio::select! {
                read = read_half.read(&mut read_chunk) => {
                    let n = read?;
                    if n == 0 {
                        break None;
                    }
                    buf.extend_from_slice(&read_chunk[..n]);
                }
                published = subscriber_rx.recv() => {
                    if let Some(bytes) = published {
                        write_half.write_all(&bytes).await?;
                    }
                }
            }
        };
        let Some(frame) = frame else { break };

        let Ok(args) = frame.into_command_args() else {
            write_half
                .write_all(&Frame::Error(Bytes::from_static(b"ERR Protocol error")).encode_to_bytes())
                .await?;
            break;
        };
        let Some(command) = command::Command::from_args(args) else { continue };

        if command.name == "PSYNC" {
            let fullresync = replication::master::fullresync_frame(&state.replication.lock().unwrap().replid);
            write_half.write_all(&fullresync.encode_to_bytes()).await?;
            write_half.write_all(&replication::master::rdb_payload_chunk()).await?;
            let replica_id = replication::master::promote_to_replica(&state, addr, write_half);
            conn.is_replica_link = true;
            conn.replica_id = Some(replica_id);
            return drain_replica_upstream(state, conn, read_half, buf).await;
        }

        match dispatcher::dispatch(&state, &mut conn, &subscriber_tx, command).await {
            DispatchOutcome::Reply(chunks) => {
                for chunk in chunks {
                    match chunk {
                        OutgoingChunk::Frame(frame) => write_half.write_all(&frame.encode_to_bytes()).await?,
                        OutgoingChunk::Raw(bytes) => write_half.write_all(&bytes).await?,
                    }
                }
            }
            DispatchOutcome::NoReply => {}
        }
    }

    cleanup_connection(&state, &conn);
    Ok(())
}

/// After PSYNC promotes this connection, the read half is no longer paired
/// with replies: the writer task owns the socket for propagation, and the
/// only traffic expected back from this connection is `REPLCONF ACK`.
async fn drain_replica_upstream(
    state: Arc<SharedState>,
    mut conn: ConnectionState,
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    mut buf: BytesMut,
) -> std::io::Result<()> {
    let (subscriber_tx, _unused_rx) = mpsc::unbounded_channel();
    let mut read_chunk = [0u8; 8192];
    loop {
        let frame = loop {
            if let Some((frame, _consumed)) = resp::try_parse(&mut buf).map_err(drop_on_protocol_error)? {
                break Some(frame);
            }
            let n = read_half.read(&mut read_chunk).await?;
            if n == 0 {
                break None;
            }
            buf.extend_from_slice(&read_chunk[..n]);
        };
        let Some(frame) = frame else { break };
        let Ok(args) = frame.into_command_args() else { break };
        let Some(command) = command::Command::from_args(args) else { continue };
        let _ = dispatcher::dispatch(&state, &mut conn, &subscriber_tx, command).await;
    }
    cleanup_connection(&state, &conn);
    Ok(())
}

/// Unsubscribes from pub/sub on disconnect. A client that disconnects while
/// blocked forever in BLPOP/XREAD (timeout 0) leaves a stale registry entry
/// until the next push/xadd on that key attempts to wake it and discards it
/// as dead, per `BlockingRegistry::wake_one`'s documented skip-dead-waiters
/// behavior — finite timeouts unregister themselves directly.
fn cleanup_connection(state: &Arc<SharedState>, conn: &ConnectionState) {
    state.core.lock().unwrap().pubsub.unsubscribe_all(conn.client_id);
}

fn drop_on_protocol_error(err: errors::RedisError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string())
}
