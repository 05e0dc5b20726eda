use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use rusqlite::OptionalExtension;
use tracing::instrument;

use parley_core::{ClientId, Message};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Durable, append-only chat log.
///
/// `append` returns only after the message is committed; `list_all` observes
/// every append that completed before it was called.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, client_id: ClientId, body: &str) -> Result<Message, StoreError>;

    /// All messages, ascending by timestamp then id.
    async fn list_all(&self) -> Result<Vec<Message>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

/// Synchronous repository over the `messages` table.
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert one message in its own transaction.
    ///
    /// The timestamp is taken at call time but never earlier than the latest
    /// stored one, so `(timestamp, id)` order matches insertion order even if
    /// the wall clock steps backwards.
    #[instrument(skip(self, body), fields(client_id = %client_id, body_len = body.len()))]
    pub fn append(&self, client_id: ClientId, body: &str) -> Result<Message, StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let latest: Option<String> = tx
                .query_row(
                    "SELECT timestamp FROM messages ORDER BY timestamp DESC, id DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            let mut timestamp = Utc::now().trunc_subsecs(6);
            if let Some(raw) = latest {
                let latest = row_helpers::parse_timestamp(&raw, "messages", "timestamp")?;
                if latest > timestamp {
                    timestamp = latest;
                }
            }

            tx.execute(
                "INSERT INTO messages (client_id, message, timestamp) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    client_id.get(),
                    body,
                    row_helpers::format_timestamp(&timestamp),
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;

            Ok(Message {
                id,
                client_id,
                body: body.to_string(),
                timestamp,
            })
        })
    }

    #[instrument(skip(self))]
    pub fn list_all(&self) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, client_id, message, timestamp
                 FROM messages
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let mut rows = stmt.query([])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    let raw_ts: String = row_helpers::get(row, 3, "messages", "timestamp")?;
    Ok(Message {
        id: row_helpers::get(row, 0, "messages", "id")?,
        client_id: ClientId(row_helpers::get(row, 1, "messages", "client_id")?),
        body: row_helpers::get(row, 2, "messages", "message")?,
        timestamp: row_helpers::parse_timestamp(&raw_ts, "messages", "timestamp")?,
    })
}

/// [`MessageStore`] backed by SQLite. Each call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteMessageStore {
    repo: Arc<MessageRepo>,
}

impl SqliteMessageStore {
    pub fn new(db: Database) -> Self {
        Self {
            repo: Arc::new(MessageRepo::new(db)),
        }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(&self, client_id: ClientId, body: &str) -> Result<Message, StoreError> {
        let repo = Arc::clone(&self.repo);
        let body = body.to_string();
        tokio::task::spawn_blocking(move || repo.append(client_id, &body)).await?
    }

    async fn list_all(&self) -> Result<Vec<Message>, StoreError> {
        let repo = Arc::clone(&self.repo);
        tokio::task::spawn_blocking(move || repo.list_all()).await?
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let repo = Arc::clone(&self.repo);
        tokio::task::spawn_blocking(move || repo.count()).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn setup() -> (Database, SqliteMessageStore) {
        let db = Database::in_memory().unwrap();
        let store = SqliteMessageStore::new(db.clone());
        (db, store)
    }

    #[tokio::test]
    async fn append_assigns_id_and_timestamp() {
        let (_db, store) = setup();
        let before = Utc::now() - Duration::seconds(1);

        let msg = store.append(ClientId(1), "hi").await.unwrap();
        assert_eq!(msg.id, 1);
        assert_eq!(msg.client_id, ClientId(1));
        assert_eq!(msg.body, "hi");
        assert!(msg.timestamp >= before);
    }

    #[tokio::test]
    async fn list_all_reads_back_exactly_what_append_returned() {
        let (_db, store) = setup();
        let a = store.append(ClientId(1), "first").await.unwrap();
        let b = store.append(ClientId(2), "second").await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all, vec![a, b]);
    }

    #[tokio::test]
    async fn list_all_on_empty_store() {
        let (_db, store) = setup();
        assert!(store.list_all().await.unwrap().is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_get_distinct_increasing_ids() {
        let (_db, store) = setup();
        let n = 64;

        let mut handles = Vec::new();
        for i in 0..n {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append(ClientId(i % 4), &format!("msg {i}")).await.unwrap()
            }));
        }
        let mut appended = Vec::new();
        for h in handles {
            appended.push(h.await.unwrap());
        }

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), n as usize);
        for w in all.windows(2) {
            assert!(w[0].id < w[1].id, "ids not increasing: {} >= {}", w[0].id, w[1].id);
            assert!(w[0].timestamp <= w[1].timestamp);
        }

        appended.sort_by_key(|m| m.id);
        assert_eq!(all, appended);
    }

    #[tokio::test]
    async fn timestamp_never_goes_backwards() {
        let (db, store) = setup();
        let future = Utc.with_ymd_and_hms(2999, 1, 1, 0, 0, 0).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (client_id, message, timestamp) VALUES (9, 'from the future', ?1)",
                [row_helpers::format_timestamp(&future)],
            )?;
            Ok(())
        })
        .unwrap();

        let msg = store.append(ClientId(1), "now").await.unwrap();
        assert_eq!(msg.timestamp, future);

        let all = store.list_all().await.unwrap();
        assert_eq!(all.last().unwrap().id, msg.id);
    }

    #[tokio::test]
    async fn append_fails_when_table_is_gone() {
        let (db, store) = setup();
        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE messages")?;
            Ok(())
        })
        .unwrap();

        let err = store.append(ClientId(1), "lost").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.list_all().await.is_err());
    }

    #[tokio::test]
    async fn corrupt_timestamp_is_reported() {
        let (db, store) = setup();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (client_id, message, timestamp) VALUES (1, 'x', 'garbage')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let err = store.list_all().await.unwrap_err();
        assert!(matches!(err, StoreError::CorruptRow { column: "timestamp", .. }));
    }

    #[tokio::test]
    async fn messages_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");
        {
            let store = SqliteMessageStore::new(Database::open(&path).unwrap());
            store.append(ClientId(1), "persisted").await.unwrap();
        }

        let store = SqliteMessageStore::new(Database::open(&path).unwrap());
        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].body, "persisted");
    }
}
