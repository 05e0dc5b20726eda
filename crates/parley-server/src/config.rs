//! Server and store configuration.
//!
//! Loading order: compiled defaults, then environment overrides, then CLI
//! flags applied by the binary.

use serde::{Deserialize, Serialize};

/// Default database location, relative to the working directory.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://parley.db";

/// Configuration for the chat server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `8000`, `0` to auto-assign).
    pub port: u16,
    /// Outbound frames buffered per connection before it counts as failed.
    pub max_send_queue: usize,
    /// Interval between server pings, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            max_message_size: 64 * 1024,
        }
    }
}

impl ServerConfig {
    /// Defaults with `PARLEY_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| std::env::var(key).ok());
        cfg
    }

    /// Apply overrides from a key lookup. Invalid values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = read_string(&lookup, "PARLEY_HOST") {
            self.host = v;
        }
        if let Some(v) = read_u64(&lookup, "PARLEY_PORT", 0, u64::from(u16::MAX)) {
            self.port = v as u16;
        }
        if let Some(v) = read_u64(&lookup, "PARLEY_MAX_SEND_QUEUE", 1, 1 << 20) {
            self.max_send_queue = v as usize;
        }
        if let Some(v) = read_u64(&lookup, "PARLEY_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
            self.heartbeat_interval_secs = v;
        }
        if let Some(v) = read_u64(&lookup, "PARLEY_MAX_MESSAGE_SIZE", 1, 64 * 1024 * 1024) {
            self.max_message_size = v as usize;
        }
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for the message store's backing database.
///
/// `DATABASE_URL` wins. Without it, `DATABASE_NAME` names the SQLite file.
/// `DATABASE_HOST`, `DATABASE_USER` and `DATABASE_PASS` have no meaning for
/// an embedded database and are ignored with a warning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `sqlite://path`, `sqlite:path`, a bare path, or `:memory:`.
    pub database_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.into(),
        }
    }
}

impl StoreConfig {
    /// Defaults with `DATABASE_URL` applied.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| std::env::var(key).ok());
        cfg
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for key in ["DATABASE_HOST", "DATABASE_USER", "DATABASE_PASS"] {
            if read_string(&lookup, key).is_some() {
                tracing::warn!(key, "ignored for sqlite storage");
            }
        }
        if let Some(v) = read_string(&lookup, "DATABASE_URL") {
            self.database_url = v;
        } else if let Some(name) = read_string(&lookup, "DATABASE_NAME") {
            self.database_url = format!("sqlite://{}", name.trim());
        }
    }
}

fn read_string(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|v| !v.trim().is_empty())
}

fn read_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    min: u64,
    max: u64,
) -> Option<u64> {
    let val = lookup(name)?;
    let result = val.trim().parse::<u64>().ok().filter(|v| (min..=max).contains(v));
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid numeric env var, ignoring");
    }
    result
}
