//! Storage abstraction for chanlog.
//!
//! The ingest pipeline talks to its backing store through two small traits:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`LogStore`] | upsert records with `id_message` dedup, cursor and session queries |
//! | [`CredentialProvider`] | supply the bearer credential for the message source |
//!
//! [`SqliteStore`] implements both against the schema created by
//! [`migrate`](crate::migrate). Unit tests use a lock-guarded in-memory
//! implementation from the test-only `memory` module.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

#[cfg(test)]
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::NormalizedRecord;

#[cfg(test)]
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Insert records, skipping any whose `id_message` already exists.
    ///
    /// Returns how many rows were newly inserted. Duplicates are not errors.
    /// A failed call must leave none of its records visible.
    async fn upsert(&self, records: &[NormalizedRecord]) -> Result<u64>;

    /// `id_message` of the most recently created record.
    async fn last_record_id(&self) -> Result<Option<String>>;

    /// Whether any record was created at or after `since`.
    async fn has_records_since(&self, since: DateTime<Utc>) -> Result<bool>;
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// The most recently stored credential, if any.
    async fn credential(&self) -> Result<Option<String>>;
}
