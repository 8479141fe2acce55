//! Message history persistence.
//!
//! Every accepted webhook event that carries a `for_user_id` is appended to
//! a SQLite table and can later be paged through, newest first.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE messages (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     user_id TEXT NOT NULL,
//!     message_data TEXT NOT NULL,
//!     created_at DATETIME DEFAULT CURRENT_TIMESTAMP
//! )
//! ```
//!
//! `created_at` has one-second resolution, so ordering falls back to the
//! autoincrement id to keep insertion order within the same second.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::EventRecord;

/// Largest page a query may request.
pub const MAX_PAGE_SIZE: u32 = 25;

/// Page size used when the caller does not specify one.
pub const DEFAULT_PAGE_SIZE: u32 = MAX_PAGE_SIZE;

/// Connection string for a private in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

const MAX_CONNECTIONS: u32 = 5;

/// Errors raised by the message store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected an operation.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The database directory could not be prepared.
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),

    /// An event could not be encoded for storage.
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of a persist call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The event was stored under the given row id.
    Stored { id: i64, user_id: String },
    /// The event carried no `for_user_id` and was not stored.
    Skipped,
}

/// A validated page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    size: u32,
    cursor: u32,
}

/// Reasons a page request is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PageError {
    #[error("'size' must be a number between 1 and 25")]
    InvalidSize,

    #[error("'cursor' must be a non-negative number")]
    InvalidCursor,
}

impl Page {
    /// Builds a page from raw query values.
    ///
    /// `size` defaults to [`DEFAULT_PAGE_SIZE`] and must be within
    /// `1..=MAX_PAGE_SIZE`; `cursor` defaults to 0 and must be non-negative.
    pub fn new(size: Option<i64>, cursor: Option<i64>) -> Result<Self, PageError> {
        let size = match size {
            None => DEFAULT_PAGE_SIZE,
            Some(size) => u32::try_from(size)
                .ok()
                .filter(|size| (1..=MAX_PAGE_SIZE).contains(size))
                .ok_or(PageError::InvalidSize)?,
        };

        let cursor = match cursor {
            None => 0,
            Some(cursor) => u32::try_from(cursor).map_err(|_| PageError::InvalidCursor)?,
        };

        Ok(Self { size, cursor })
    }

    /// Number of records requested.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Offset of the first record, counted from the newest.
    pub fn cursor(&self) -> u32 {
        self.cursor
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            size: DEFAULT_PAGE_SIZE,
            cursor: 0,
        }
    }
}

/// Append/query store for webhook events.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Appends an event. Events without `for_user_id` are skipped.
    async fn persist(&self, event: &EventRecord) -> Result<PersistOutcome, StoreError>;

    /// Returns a page of a user's events, newest first.
    async fn query(&self, user_id: &str, page: Page) -> Result<Vec<EventRecord>, StoreError>;
}

/// SQLite-backed [`MessageStore`].
#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// The parent directory is created when missing. Passing
    /// [`IN_MEMORY_PATH`] opens a private in-memory database instead.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if path.as_os_str() == IN_MEMORY_PATH {
            return Self::in_memory().await;
        }

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize_schema().await?;
        info!(path = %path.display(), "Message store opened");
        Ok(store)
    }

    /// Opens a private in-memory database.
    ///
    /// Uses a single connection that is never recycled, since each SQLite
    /// in-memory connection is its own database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize_schema().await?;
        debug!("In-memory message store opened");
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                message_data TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_user_id ON messages(user_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_created_at ON messages(created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Closes the underlying connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Message store closed");
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn persist(&self, event: &EventRecord) -> Result<PersistOutcome, StoreError> {
        let Some(user_id) = event.for_user_id() else {
            warn!("Event missing for_user_id, skipping persistence");
            return Ok(PersistOutcome::Skipped);
        };

        let message_data = serde_json::to_string(event)?;

        let result = sqlx::query("INSERT INTO messages (user_id, message_data) VALUES (?, ?)")
            .bind(user_id.as_str())
            .bind(message_data.as_str())
            .execute(&self.pool)
            .await?;

        let id = result.last_insert_rowid();
        debug!(user_id = %user_id, id, "Persisted event");

        Ok(PersistOutcome::Stored { id, user_id })
    }

    async fn query(&self, user_id: &str, page: Page) -> Result<Vec<EventRecord>, StoreError> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT message_data FROM messages WHERE user_id = ? \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(user_id)
        .bind(i64::from(page.size()))
        .bind(i64::from(page.cursor()))
        .fetch_all(&self.pool)
        .await?;

        let events = rows
            .into_iter()
            .filter_map(|row| match serde_json::from_str(&row) {
                Ok(value) => Some(EventRecord::new(value)),
                Err(err) => {
                    warn!(user_id = %user_id, error = %err, "Skipping unreadable stored event");
                    None
                }
            })
            .collect();

        Ok(events)
    }
}
