use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ClientId;

/// Timestamp layout used in history lines, e.g. `2024-05-01 09:30:12.000123`.
pub const TIMESTAMP_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Line sent to a sender whose message could not be persisted.
pub const STORE_ERROR_LINE: &str = "Error: message could not be saved";

/// A persisted chat message. Immutable once the store returns it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub client_id: ClientId,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// `Client #<client_id> at <timestamp>: <body>`, sent during history replay.
    pub fn history_line(&self) -> String {
        format!(
            "Client #{} at {}: {}",
            self.client_id,
            self.timestamp.format(TIMESTAMP_DISPLAY_FORMAT),
            self.body
        )
    }
}

/// Personal acknowledgment for the sender.
pub fn ack_line(body: &str) -> String {
    format!("You wrote: {body}")
}

/// Broadcast line for a newly persisted message.
pub fn chat_line(client_id: ClientId, body: &str) -> String {
    format!("Client #{client_id} says: {body}")
}

/// Broadcast line announcing a departed client.
pub fn left_line(client_id: ClientId) -> String {
    format!("Client #{client_id} left the chat")
}
