//! Core data models used throughout chanlog.
//!
//! These types represent the messages, records, and run summaries that flow
//! through the fetch → normalize → store pipeline.

use serde::{Deserialize, Serialize};

/// Author reference attached to a channel message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
}

/// A message as delivered by the channel message source.
///
/// Ids are snowflakes: opaque strings that increase monotonically on the
/// source side.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author: Author,
}

impl RawMessage {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            ..Default::default()
        }
    }
}

/// A log line ready to be stored.
///
/// `id_message` is the conflict key: the raw message id for a single-line
/// message, `{raw id}_{line index}` for one line of a composite message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRecord {
    pub content: String,
    /// `YYYY-MM-DD HH:MM:SS`
    pub timestamp: String,
    pub id_message: String,
}

/// Where an ingest run starts and how far it may page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartPoint {
    /// `None` fetches the most recent page.
    pub cursor: Option<String>,
    pub page_limit: usize,
}

/// Outcome of one ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Raw messages retrieved from the source.
    pub total: u64,
    /// Records newly inserted into the store.
    pub saved: u64,
}

/// Strip the composite-line suffix from a stored `id_message`.
///
/// `"1234_2"` → `"1234"`; ids without a suffix are returned unchanged.
pub fn raw_message_id(id_message: &str) -> &str {
    id_message.split('_').next().unwrap_or(id_message)
}
