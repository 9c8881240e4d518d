//! Message status ledger backed by SQLite.
//!
//! Maps provider message ids to their last known delivery status. Rows are
//! upserted in place and never deleted. Each write is a single statement,
//! so SQLite serializes updates to the same id while reads go through the
//! pool concurrently.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{trace, warn};

/// How long a writer waits on a locked database before failing.
const BUSY_TIMEOUT_SECS: u64 = 5;

/// Pool size; SQLite allows one writer, the rest serve reads.
const MAX_CONNECTIONS: u32 = 4;

/// Upsert that always takes the incoming status.
const UPSERT_OVERWRITE: &str = "INSERT INTO messages (id, status, updated_at) VALUES (?1, ?2, ?3) \
     ON CONFLICT(id) DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at";

/// Upsert that never lowers precedence (SENT < DELIVERED < READ).
const UPSERT_MONOTONIC: &str = "INSERT INTO messages (id, status, updated_at) VALUES (?1, ?2, ?3) \
     ON CONFLICT(id) DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at \
     WHERE (CASE excluded.status WHEN 'READ' THEN 3 WHEN 'DELIVERED' THEN 2 WHEN 'SENT' THEN 1 ELSE 0 END) \
        >= (CASE messages.status WHEN 'READ' THEN 3 WHEN 'DELIVERED' THEN 2 WHEN 'SENT' THEN 1 ELSE 0 END)";

/// Delivery status of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    /// Accepted by the network.
    Sent,
    /// Reached the recipient device.
    Delivered,
    /// Opened by the recipient.
    Read,
    /// Not tracked.
    Unknown,
}

impl MessageStatus {
    /// Stored and wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Read => "READ",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Ordering used by [`ReceiptPolicy::Monotonic`].
    pub fn precedence(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SENT" => Ok(Self::Sent),
            "DELIVERED" => Ok(Self::Delivered),
            "READ" => Ok(Self::Read),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(format!("unknown message status: {other}")),
        }
    }
}

/// How receipts that arrive out of order are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptPolicy {
    /// Last write wins by arrival order.
    #[default]
    Overwrite,
    /// A lower-precedence status never replaces a higher one.
    Monotonic,
}

/// Ledger construction options.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerOptions {
    /// Receipt ordering policy.
    pub receipt_policy: ReceiptPolicy,
    /// Fail `record_sent` for ids that already exist.
    pub strict_ids: bool,
}

/// A stored status row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRecord {
    /// Provider message id.
    pub id: String,
    /// Last known status.
    pub status: MessageStatus,
    /// When the status was last written.
    pub updated_at: DateTime<Utc>,
}

/// Errors from the status ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The backing store could not be reached or written.
    #[error("ledger unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    /// The ledger directory could not be created.
    #[error("ledger directory unavailable: {0}")]
    Io(#[from] std::io::Error),

    /// Strict mode rejected a repeated id.
    #[error("message id already recorded: {0}")]
    DuplicateId(String),

    /// A stored row could not be decoded.
    #[error("corrupt ledger row for {id}: {reason}")]
    Corrupt {
        /// Offending message id.
        id: String,
        /// Decode failure.
        reason: String,
    },
}

/// Durable message-id -> status store.
#[derive(Debug, Clone)]
pub struct StatusLedger {
    pool: SqlitePool,
    options: LedgerOptions,
}

impl StatusLedger {
    /// Open (or create) the ledger at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory, database, or migration fails.
    pub async fn open(path: &Path, options: LedgerOptions) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let connect = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))
            .pragma("trusted_schema", "OFF");

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(connect)
            .await?;

        Self::with_pool(pool, options).await
    }

    /// Wrap an existing pool, applying the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the migration fails.
    pub async fn with_pool(pool: SqlitePool, options: LedgerOptions) -> Result<Self, LedgerError> {
        let migration_sql = include_str!("../../migrations/001_ledger.sql");
        sqlx::raw_sql(migration_sql).execute(&pool).await?;
        Ok(Self { pool, options })
    }

    /// Record a freshly sent message with status `SENT`.
    ///
    /// Re-sends that reuse an id overwrite the existing row unless
    /// [`LedgerOptions::strict_ids`] is set.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateId`] in strict mode, or
    /// [`LedgerError::Unavailable`] if the write fails.
    pub async fn record_sent(&self, id: &str) -> Result<(), LedgerError> {
        let now = Utc::now().to_rfc3339();
        if self.options.strict_ids {
            let result = sqlx::query("INSERT INTO messages (id, status, updated_at) VALUES (?1, ?2, ?3)")
                .bind(id)
                .bind(MessageStatus::Sent.as_str())
                .bind(&now)
                .execute(&self.pool)
                .await;
            return match result {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    Err(LedgerError::DuplicateId(id.to_owned()))
                }
                Err(e) => Err(e.into()),
            };
        }

        sqlx::query(UPSERT_OVERWRITE)
            .bind(id)
            .bind(MessageStatus::Sent.as_str())
            .bind(&now)
            .execute(&self.pool)
            .await?;
        trace!(message_id = id, "send recorded");
        Ok(())
    }

    /// Set the status of `id`, creating the row if it is not tracked yet.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Unavailable`] if the write fails.
    pub async fn update_status(&self, id: &str, status: MessageStatus) -> Result<(), LedgerError> {
        let sql = match self.options.receipt_policy {
            ReceiptPolicy::Overwrite => UPSERT_OVERWRITE,
            ReceiptPolicy::Monotonic => UPSERT_MONOTONIC,
        };
        let result = sqlx::query(sql)
            .bind(id)
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            trace!(message_id = id, %status, "lower-precedence receipt ignored");
        } else {
            trace!(message_id = id, %status, "status updated");
        }
        Ok(())
    }

    /// Last known status of `id`, or [`MessageStatus::Unknown`].
    ///
    /// Never fails: storage errors are logged and reported as unknown.
    pub async fn get_status(&self, id: &str) -> MessageStatus {
        match self.get_record(id).await {
            Ok(Some(record)) => record.status,
            Ok(None) => MessageStatus::Unknown,
            Err(e) => {
                warn!(message_id = id, error = %e, "ledger read failed, reporting unknown");
                MessageStatus::Unknown
            }
        }
    }

    /// Full stored row for `id`, if tracked.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the row cannot be decoded.
    pub async fn get_record(&self, id: &str) -> Result<Option<StatusRecord>, LedgerError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT status, updated_at FROM messages WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((status, updated_at)) = row else {
            return Ok(None);
        };
        let corrupt = |reason: String| LedgerError::Corrupt {
            id: id.to_owned(),
            reason,
        };
        let status = status.parse::<MessageStatus>().map_err(corrupt)?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| corrupt(e.to_string()))?
            .with_timezone(&Utc);

        Ok(Some(StatusRecord {
            id: id.to_owned(),
            status,
            updated_at,
        }))
    }

    /// Ledger options in effect.
    pub fn options(&self) -> LedgerOptions {
        self.options
    }
}
