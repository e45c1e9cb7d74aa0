//! SQLite-backed ledger store

use crate::entry::{AuditEntry, ChainHead};
use crate::error::{LedgerError, LedgerResult};
use crate::store::LedgerStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use uuid::Uuid;

/// Durable store over the `audit_ledger` table
///
/// `PRIMARY KEY (org_id, seq)` makes a second writer for the same position
/// fail instead of forking the chain.
#[derive(Clone)]
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    /// Wrap an existing pool (call [`init`](Self::init) before use)
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) a database file and initialize the schema
    pub async fn open(db_path: impl AsRef<Path>) -> LedgerResult<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        Self::connect(&db_url).await
    }

    /// Connect with a sqlx url and initialize the schema
    ///
    /// In-memory databases are private per connection, so they get a single
    /// connection pool.
    pub async fn connect(url: &str) -> LedgerResult<Self> {
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self::new(pool);
        store.init().await?;
        Ok(store)
    }

    /// Initialize the schema
    pub async fn init(&self) -> LedgerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_ledger (
                org_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                actor_user_id TEXT NULL,
                actor_agent_id TEXT NULL,
                event_type TEXT NOT NULL,
                payload BLOB NOT NULL,
                prev_hash TEXT NOT NULL,
                this_hash TEXT NOT NULL,
                event_time TEXT NOT NULL,
                PRIMARY KEY (org_id, seq)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn decode_row(org: Uuid, row: &SqliteRow) -> LedgerResult<AuditEntry> {
        let seq: i64 = row.try_get("seq")?;
        let seq = u64::try_from(seq)
            .map_err(|_| LedgerError::decode(org, format!("negative seq {}", seq)))?;

        let event_time: String = row.try_get("event_time")?;
        let event_time = DateTime::parse_from_rfc3339(&event_time)
            .map_err(|e| LedgerError::decode(org, format!("event_time at seq {}: {}", seq, e)))?
            .with_timezone(&Utc);

        Ok(AuditEntry {
            org_id: org,
            seq,
            actor_user: parse_actor(org, seq, row.try_get("actor_user_id")?)?,
            actor_agent: parse_actor(org, seq, row.try_get("actor_agent_id")?)?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            prev_hash: row.try_get("prev_hash")?,
            this_hash: row.try_get("this_hash")?,
            event_time,
        })
    }
}

fn parse_actor(org: Uuid, seq: u64, raw: Option<String>) -> LedgerResult<Option<Uuid>> {
    raw.map(|s| {
        Uuid::parse_str(&s)
            .map_err(|e| LedgerError::decode(org, format!("actor at seq {}: {}", seq, e)))
    })
    .transpose()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn head(&self, org: Uuid) -> LedgerResult<Option<ChainHead>> {
        let row = sqlx::query(
            r#"
            SELECT seq, this_hash
            FROM audit_ledger
            WHERE org_id = ?
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(org.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let seq: i64 = row.try_get("seq")?;
                Ok(Some(ChainHead {
                    seq: u64::try_from(seq)
                        .map_err(|_| LedgerError::decode(org, format!("negative seq {}", seq)))?,
                    this_hash: row.try_get("this_hash")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn insert(&self, entry: &AuditEntry) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_ledger
                (org_id, seq, actor_user_id, actor_agent_id, event_type, payload, prev_hash, this_hash, event_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.org_id.to_string())
        .bind(entry.seq as i64)
        .bind(entry.actor_user.map(|id| id.to_string()))
        .bind(entry.actor_agent.map(|id| id.to_string()))
        .bind(&entry.event_type)
        .bind(&entry.payload)
        .bind(&entry.prev_hash)
        .bind(&entry.this_hash)
        .bind(entry.event_time.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(LedgerError::Conflict {
                org: entry.org_id,
                seq: entry.seq,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn scan(&self, org: Uuid, limit: usize) -> LedgerResult<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, actor_user_id, actor_agent_id, event_type, payload, prev_hash, this_hash, event_time
            FROM audit_ledger
            WHERE org_id = ?
            ORDER BY seq ASC
            LIMIT ?
            "#,
        )
        .bind(org.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| Self::decode_row(org, row)).collect()
    }

    async fn recent(&self, org: Uuid, limit: usize) -> LedgerResult<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, actor_user_id, actor_agent_id, event_type, payload, prev_hash, this_hash, event_time
            FROM audit_ledger
            WHERE org_id = ?
            ORDER BY seq DESC
            LIMIT ?
            "#,
        )
        .bind(org.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| Self::decode_row(org, row)).collect()
    }
}
