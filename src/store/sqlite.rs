//! SQLite-backed [`LogStore`] and [`CredentialProvider`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::{CredentialProvider, LogStore};
use crate::error::Result;
use crate::models::NormalizedRecord;

/// Wraps a [`SqlitePool`] opened with [`db::connect`](crate::db::connect).
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

/// Latest stored record, for status output.
#[derive(Debug, Clone)]
pub struct LatestRecord {
    pub id_message: String,
    pub timestamp: String,
    pub created_at: i64,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap round-trip used as a connectivity check.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM auth_tokens")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    /// Store a new credential; it supersedes all earlier ones.
    pub async fn add_token(&self, token: &str) -> Result<()> {
        sqlx::query("INSERT INTO auth_tokens (token, created_at) VALUES (?, ?)")
            .bind(token)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_records(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM channel_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn latest_record(&self) -> Result<Option<LatestRecord>> {
        let row: Option<(String, String, i64)> = sqlx::query_as(
            "SELECT id_message, timestamp, created_at FROM channel_logs ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id_message, timestamp, created_at)| LatestRecord {
            id_message,
            timestamp,
            created_at,
        }))
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn upsert(&self, records: &[NormalizedRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO channel_logs (created_at, content, timestamp, id_message)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id_message) DO NOTHING
                "#,
            )
            .bind(now)
            .bind(&record.content)
            .bind(&record.timestamp)
            .bind(&record.id_message)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn last_record_id(&self) -> Result<Option<String>> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT id_message FROM channel_logs ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn has_records_since(&self, since: DateTime<Utc>) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM channel_logs WHERE created_at >= ?)",
        )
        .bind(since.timestamp())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

#[async_trait]
impl CredentialProvider for SqliteStore {
    async fn credential(&self) -> Result<Option<String>> {
        let token: Option<String> = sqlx::query_scalar(
            "SELECT token FROM auth_tokens ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(token.filter(|t| !t.trim().is_empty()))
    }
}
