//! Per-client connection state and outbound queue.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use parley_core::{ClientId, ConnectionId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a connection. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// Why a frame could not be queued for a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("connection is closed")]
    Closed,
    #[error("send queue full")]
    QueueFull,
}

/// A connected chat client.
///
/// Frames are queued whole into an `mpsc` channel drained by the connection's
/// writer task, so a receiver either gets the complete text or nothing.
pub struct ChatConnection {
    pub id: ConnectionId,
    pub client_id: ClientId,
    state: AtomicU8,
    tx: mpsc::Sender<Arc<String>>,
    /// Broadcasts held back while history is replayed. `None` once live.
    backlog: Mutex<Option<Vec<Arc<String>>>>,
    backlog_limit: usize,
    closed: CancellationToken,
}

impl ChatConnection {
    /// Create a connection in the `Connecting` state with history replay pending.
    pub fn new(client_id: ClientId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let backlog_limit = tx.max_capacity();
        Self {
            id: ConnectionId::new(),
            client_id,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            tx,
            backlog: Mutex::new(Some(Vec::new())),
            backlog_limit,
            closed: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// `Connecting -> Open`. Returns `false` if the connection was already closed.
    pub(crate) fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
            || self.is_open()
    }

    /// Move to `Closed` and wake everything waiting on [`closed`](Self::closed).
    /// Returns `true` only for the call that performed the transition.
    pub(crate) fn close(&self) -> bool {
        let prev = self
            .state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        self.closed.cancel();
        prev != ConnectionState::Closed as u8
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Queue a frame without waiting.
    ///
    /// While history replay is in progress the frame goes to the backlog and
    /// is delivered after the last history line.
    pub fn send(&self, text: Arc<String>) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }

        let mut backlog = self.backlog.lock();
        if let Some(pending) = backlog.as_mut() {
            if pending.len() >= self.backlog_limit {
                return Err(SendError::QueueFull);
            }
            pending.push(text);
            return Ok(());
        }
        drop(backlog);

        self.tx.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Queue a history line, waiting for queue capacity if the peer is slow.
    pub async fn send_replay(&self, text: String) -> Result<(), SendError> {
        if self.state() == ConnectionState::Closed {
            return Err(SendError::Closed);
        }
        tokio::select! {
            res = self.tx.send(Arc::new(text)) => res.map_err(|_| SendError::Closed),
            _ = self.closed.cancelled() => Err(SendError::Closed),
        }
    }

    /// End history replay: flush the backlog in arrival order, then switch to
    /// direct sends.
    pub async fn finish_replay(&self) -> Result<(), SendError> {
        loop {
            let batch = {
                let mut backlog = self.backlog.lock();
                let batch = match backlog.as_mut() {
                    None => return Ok(()),
                    Some(pending) => std::mem::take(pending),
                };
                if batch.is_empty() {
                    *backlog = None;
                    return Ok(());
                }
                batch
            };

            for text in batch {
                tokio::select! {
                    res = self.tx.send(text) => res.map_err(|_| SendError::Closed)?,
                    _ = self.closed.cancelled() => return Err(SendError::Closed),
                }
            }
        }
    }

    /// Whether history replay is still pending.
    pub fn is_replaying(&self) -> bool {
        self.backlog.lock().is_some()
    }
}
