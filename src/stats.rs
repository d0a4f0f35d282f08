//! Store status overview.
//!
//! Gives a quick summary of what has been collected: record counts, the
//! newest record, whether the current session has started filling, and
//! whether a credential is available. Used by `chanlog stats`.

use anyhow::Result;
use chrono::Utc;

use crate::config::Config;
use crate::{db, migrate};
use crate::store::{CredentialProvider, LogStore, SqliteStore};

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store = SqliteStore::new(pool.clone());
    let window = config.schedule.window();
    let now = Utc::now();

    let total = store.count_records().await?;
    let latest = store.latest_record().await?;
    let session_start = window.session_start(now);
    let session_active = store.has_records_since(session_start).await?;
    let has_token = store.credential().await?.is_some();

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("chanlog — Store Stats");
    println!("=====================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Channel:     {}", config.discord.channel_id);
    println!(
        "  Credential:  {}",
        if has_token { "present" } else { "missing" }
    );
    println!();
    println!("  Records:     {}", total);
    match latest {
        Some(rec) => {
            println!("  Last id:     {}", rec.id_message);
            println!("  Last event:  {}", rec.timestamp);
            println!("  Stored:      {}", format_ts_relative(rec.created_at));
        }
        None => println!("  Last id:     none"),
    }
    println!();
    println!(
        "  Window:      {} (UTC{:+})",
        window.describe(),
        config.schedule.utc_offset_hours
    );
    println!(
        "  Session:     {} (since {})",
        if session_active {
            "continuing"
        } else {
            "not started"
        },
        window.local(session_start).format("%Y-%m-%d %H:%M")
    );
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
