//! In-memory [`LogStore`] and [`CredentialProvider`] for tests.
//!
//! Uses `Vec` behind `std::sync::RwLock` for thread safety. Record creation
//! times come from an explicit clock value so session-window behaviour can be
//! exercised deterministically.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CredentialProvider, LogStore};
use crate::error::{IngestError, Result};
use crate::models::NormalizedRecord;

struct StoredRecord {
    record: NormalizedRecord,
    created_at: DateTime<Utc>,
}

pub struct MemoryStore {
    records: RwLock<Vec<StoredRecord>>,
    token: RwLock<Option<String>>,
    now: RwLock<DateTime<Utc>>,
    fail_upserts: AtomicBool,
    upsert_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            token: RwLock::new(None),
            now: RwLock::new(Utc::now()),
            fail_upserts: AtomicBool::new(false),
            upsert_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        *self.token.write().unwrap() = Some(token.into());
        self
    }

    /// Creation time stamped on records inserted from now on.
    pub fn set_now(&self, now: DateTime<Utc>) {
        *self.now.write().unwrap() = now;
    }

    /// Make every subsequent [`LogStore::upsert`] call fail.
    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        self.records
            .read()
            .unwrap()
            .iter()
            .map(|s| s.record.id_message.clone())
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn upsert(&self, records: &[NormalizedRecord]) -> Result<u64> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(IngestError::Store(sqlx::Error::Protocol(
                "injected upsert failure".into(),
            )));
        }

        let now = *self.now.read().unwrap();
        let mut stored = self.records.write().unwrap();
        let mut seen: HashSet<String> = stored
            .iter()
            .map(|s| s.record.id_message.clone())
            .collect();

        let mut inserted = 0u64;
        for record in records {
            if seen.insert(record.id_message.clone()) {
                stored.push(StoredRecord {
                    record: record.clone(),
                    created_at: now,
                });
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn last_record_id(&self) -> Result<Option<String>> {
        // Later pushes win ties, matching the SQLite ordering on rowid.
        let stored = self.records.read().unwrap();
        Ok(stored
            .iter()
            .enumerate()
            .max_by_key(|(i, s)| (s.created_at, *i))
            .map(|(_, s)| s.record.id_message.clone()))
    }

    async fn has_records_since(&self, since: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .records
            .read()
            .unwrap()
            .iter()
            .any(|s| s.created_at >= since))
    }
}

#[async_trait]
impl CredentialProvider for MemoryStore {
    async fn credential(&self) -> Result<Option<String>> {
        Ok(self.token.read().unwrap().clone())
    }
}
