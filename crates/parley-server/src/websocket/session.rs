//! Per-connection session: history replay, inbound loop, disconnect.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parley_core::{ack_line, chat_line, left_line, ClientId, STORE_ERROR_LINE};
use parley_store::MessageStore;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ChatConnection;
use super::registry::ConnectionRegistry;

/// Everything a session needs, shared by all sessions of a server.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<dyn MessageStore>,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub shutdown: CancellationToken,
    /// Sessions whose socket is still held by a writer task.
    pub open_transports: Arc<AtomicUsize>,
}

/// How long a closing session waits for its writer to flush queued frames.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs the disconnect sequence exactly once, on every exit path of a session.
struct SessionGuard {
    registry: Arc<ConnectionRegistry>,
    conn: Arc<ChatConnection>,
    writer: AbortHandle,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.writer.abort();
        self.registry.deregister(&self.conn);
        let notified = self.registry.broadcast(&left_line(self.conn.client_id));
        info!(
            conn_id = %self.conn.id,
            client_id = %self.conn.client_id,
            notified,
            "client left"
        );
    }
}

/// Drive one WebSocket connection until it closes.
#[instrument(skip_all, fields(client_id = %client_id))]
pub async fn run_session(socket: WebSocket, client_id: ClientId, ctx: SessionContext) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel(ctx.max_send_queue.max(1));
    let conn = Arc::new(ChatConnection::new(client_id, tx));

    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        rx,
        Arc::clone(&conn),
        Arc::clone(&ctx.registry),
        ctx.heartbeat_interval,
        TransportLease::acquire(Arc::clone(&ctx.open_transports)),
    ));

    ctx.registry.register(Arc::clone(&conn));
    let _guard = SessionGuard {
        registry: Arc::clone(&ctx.registry),
        conn: Arc::clone(&conn),
        writer: writer.abort_handle(),
    };
    info!(conn_id = %conn.id, "client connected");

    replay_history(&ctx, &conn).await;

    loop {
        tokio::select! {
            _ = conn.closed() => {
                debug!(conn_id = %conn.id, "connection closed by server");
                break;
            }
            _ = ctx.shutdown.cancelled() => {
                debug!(conn_id = %conn.id, "server shutting down");
                break;
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_inbound(&ctx, &conn, text.as_str()).await;
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    debug!(conn_id = %conn.id, len = data.len(), "ignoring binary frame");
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong, answered by axum
                Some(Err(e)) => {
                    debug!(conn_id = %conn.id, error = %e, "receive failed");
                    break;
                }
            }
        }
    }

    // Bounded flush; the guard aborts a writer stuck on a peer that stopped reading.
    ctx.registry.deregister(&conn);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        debug!(conn_id = %conn.id, "writer did not drain in time, aborting");
    }
}

/// Counts a held socket for as long as the writer task owns it.
struct TransportLease(Arc<AtomicUsize>);

impl TransportLease {
    fn acquire(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for TransportLease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Unicast every stored message, then release broadcasts held during replay.
async fn replay_history(ctx: &SessionContext, conn: &ChatConnection) {
    match ctx.store.list_all().await {
        Ok(messages) => {
            let count = messages.len();
            for msg in messages {
                if conn.send_replay(msg.history_line()).await.is_err() {
                    ctx.registry.deregister(conn);
                    return;
                }
            }
            debug!(conn_id = %conn.id, count, "history replayed");
        }
        Err(e) => {
            warn!(conn_id = %conn.id, error = %e, kind = e.error_kind(), "history unavailable");
        }
    }

    if conn.finish_replay().await.is_err() {
        ctx.registry.deregister(conn);
    }
}

/// Persist one inbound message, acknowledge it, then broadcast it.
///
/// A store failure is reported to the sender only; nothing is broadcast.
async fn handle_inbound(ctx: &SessionContext, conn: &ChatConnection, data: &str) {
    match ctx.store.append(conn.client_id, data).await {
        Ok(msg) => {
            debug!(conn_id = %conn.id, message_id = msg.id, "message stored");
            if let Err(e) = ctx.registry.send_to(conn, ack_line(data)) {
                debug!(conn_id = %conn.id, error = %e, "ack failed");
                ctx.registry.deregister(conn);
            }
            ctx.registry.broadcast(&chat_line(conn.client_id, data));
        }
        Err(e) => {
            warn!(
                conn_id = %conn.id,
                client_id = %conn.client_id,
                error = %e,
                kind = e.error_kind(),
                "failed to store message"
            );
            if ctx.registry.send_to(conn, STORE_ERROR_LINE).is_err() {
                ctx.registry.deregister(conn);
            }
        }
    }
}

/// Forward queued frames to the socket and ping periodically.
///
/// On close, frames already queued are flushed before the close frame.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<Arc<String>>,
    conn: Arc<ChatConnection>,
    registry: Arc<ConnectionRegistry>,
    heartbeat_interval: Duration,
    _lease: TransportLease,
) {
    let mut ping_interval = tokio::time::interval(heartbeat_interval);
    ping_interval.tick().await; // consume first immediate tick

    loop {
        tokio::select! {
            biased;
            msg = rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(WsMessage::Text(text.to_string().into())).await.is_err() {
                    debug!(conn_id = %conn.id, "write failed");
                    registry.deregister(&conn);
                    return;
                }
            }
            _ = conn.closed() => {
                while let Ok(text) = rx.try_recv() {
                    if ws_tx.send(WsMessage::Text(text.to_string().into())).await.is_err() {
                        return;
                    }
                }
                break;
            }
            _ = ping_interval.tick() => {
                if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                    registry.deregister(&conn);
                    return;
                }
                tracing::trace!(conn_id = %conn.id, "sent ping");
            }
        }
    }

    let _ = ws_tx.send(WsMessage::Close(None)).await;
}
