//! Message parsing.
//!
//! Log lines carry their event time as a backtick-quoted token:
//!
//! ```text
//! `25/01/2024 20:15:30` Player killed Monster
//! ```
//!
//! [`extract_timestamp`] pulls that token out and rewrites it as
//! `YYYY-MM-DD HH:MM:SS`; [`normalize`] turns a message into the records to
//! store. Neither function performs I/O. A line without a timestamp is not an
//! error, it simply produces no record.

use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::LazyLock;

use crate::models::{NormalizedRecord, RawMessage};

static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"`(\d{2}/\d{2}/\d{4})\s+(\d{2}:\d{2}:\d{2})`").expect("valid timestamp regex")
});

static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n").expect("valid line break regex"));

/// Extract the first `` `DD/MM/YYYY HH:MM:SS` `` token of a line as
/// `YYYY-MM-DD HH:MM:SS`.
///
/// Tokens naming an impossible calendar date (month 13, 31 February…) are
/// treated as absent.
pub fn extract_timestamp(line: &str) -> Option<String> {
    let caps = TIMESTAMP.captures(line)?;
    let token = format!("{} {}", &caps[1], &caps[2]);
    NaiveDateTime::parse_from_str(&token, "%d/%m/%Y %H:%M:%S")
        .ok()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Turn one message into zero or more records.
///
/// A single non-blank line keeps the whole content and the raw id. Several
/// lines make a composite message: each line with a timestamp becomes its own
/// record keyed `{id}_{index}`, where `index` counts non-blank lines only.
pub fn normalize(raw: &RawMessage) -> Vec<NormalizedRecord> {
    if raw.id.is_empty() || raw.content.is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = LINE_BREAK
        .split(&raw.content)
        .filter(|line| !line.trim().is_empty())
        .collect();

    match lines.len() {
        0 => Vec::new(),
        1 => extract_timestamp(&raw.content)
            .map(|timestamp| NormalizedRecord {
                content: raw.content.clone(),
                timestamp,
                id_message: raw.id.clone(),
            })
            .into_iter()
            .collect(),
        n => {
            tracing::debug!(id = %raw.id, lines = n, "composite message");
            lines
                .iter()
                .enumerate()
                .filter_map(|(index, line)| {
                    extract_timestamp(line).map(|timestamp| NormalizedRecord {
                        content: (*line).to_string(),
                        timestamp,
                        id_message: format!("{}_{}", raw.id, index),
                    })
                })
                .collect()
        }
    }
}

/// Normalize a batch of messages, preserving their order.
pub fn normalize_all(messages: &[RawMessage]) -> Vec<NormalizedRecord> {
    messages.iter().flat_map(normalize).collect()
}
