//! Layered configuration.
//!
//! Values are merged in this order, later sources overriding earlier ones:
//!
//! 1. Compiled defaults (via `#[serde(default)]`)
//! 2. The TOML file passed with `--config` (a missing file is skipped)
//! 3. Environment variables
//!
//! ```toml
//! [db]
//! path = "./data/chanlog.sqlite"
//!
//! [discord]
//! channel_id = "1409880028958822490"
//!
//! [schedule]
//! start_hour = 20
//! end_hour = 23
//! end_minute = 59
//! utc_offset_hours = -3
//! polling_interval_ms = 5000
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! secret = "change-me"
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Key |
//! |----------|-----|
//! | `DATABASE_PATH` | `db.path` |
//! | `DISCORD_CHANNEL_ID` | `discord.channel_id` |
//! | `DISCORD_API_BASE` | `discord.api_base` |
//! | `DISCORD_TIMEOUT_SECS` | `discord.timeout_secs` |
//! | `START_HOUR` | `schedule.start_hour` |
//! | `END_HOUR` | `schedule.end_hour` |
//! | `END_MINUTE` | `schedule.end_minute` |
//! | `UTC_OFFSET_HOURS` | `schedule.utc_offset_hours` |
//! | `POLLING_INTERVAL` | `schedule.polling_interval_ms` |
//! | `BIND_ADDR` | `server.bind` |
//! | `CRON_SECRET` | `server.secret` |
//! | `LOG_LEVEL` | `logging.level` |

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::SessionWindow;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscordConfig {
    #[serde(default = "default_channel_id")]
    pub channel_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            channel_id: default_channel_id(),
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_channel_id() -> String {
    "1409880028958822490".to_string()
}
fn default_api_base() -> String {
    "https://discord.com/api/v9".to_string()
}
fn default_timeout_secs() -> u64 {
    15
}

/// Daily session window and polling cadence.
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    #[serde(default = "default_end_minute")]
    pub end_minute: u32,
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            end_minute: default_end_minute(),
            utc_offset_hours: default_utc_offset_hours(),
            polling_interval_ms: default_polling_interval_ms(),
        }
    }
}

fn default_start_hour() -> u32 {
    20
}
fn default_end_hour() -> u32 {
    23
}
fn default_end_minute() -> u32 {
    59
}
fn default_utc_offset_hours() -> i32 {
    -3
}
fn default_polling_interval_ms() -> u64 {
    5000
}

impl ScheduleConfig {
    /// Build the session window described by this section.
    ///
    /// Only valid after [`load_config`] validation has passed.
    pub fn window(&self) -> SessionWindow {
        SessionWindow::new(
            self.start_hour,
            self.end_hour,
            self.end_minute,
            self.utc_offset_hours,
        )
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Shared secret for the HTTP trigger endpoints.
    #[serde(default)]
    pub secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            secret: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// String-typed settings. Read verbatim so values such as `007123` or
/// `true` are never reinterpreted as numbers or booleans.
const STRING_ENV_KEYS: &[(&str, &str)] = &[
    ("DATABASE_PATH", "db.path"),
    ("DISCORD_CHANNEL_ID", "discord.channel_id"),
    ("DISCORD_API_BASE", "discord.api_base"),
    ("BIND_ADDR", "server.bind"),
    ("CRON_SECRET", "server.secret"),
    ("LOG_LEVEL", "logging.level"),
];

/// Numeric settings, parsed by figment.
const NUMERIC_ENV_KEYS: &[(&str, &str)] = &[
    ("DISCORD_TIMEOUT_SECS", "discord.timeout_secs"),
    ("START_HOUR", "schedule.start_hour"),
    ("END_HOUR", "schedule.end_hour"),
    ("END_MINUTE", "schedule.end_minute"),
    ("UTC_OFFSET_HOURS", "schedule.utc_offset_hours"),
    ("POLLING_INTERVAL", "schedule.polling_interval_ms"),
];

fn string_env() -> Figment {
    STRING_ENV_KEYS
        .iter()
        .filter_map(|(name, key)| std::env::var(name).ok().map(|value| (*key, value)))
        .fold(Figment::new(), |figment, (key, value)| {
            figment.merge(Serialized::default(key, value))
        })
}

fn numeric_env() -> Env {
    let names: Vec<&str> = NUMERIC_ENV_KEYS.iter().map(|(name, _)| *name).collect();
    Env::raw().only(&names).map(|key| {
        match NUMERIC_ENV_KEYS
            .iter()
            .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
        {
            Some((_, dotted)) => (*dotted).into(),
            None => key.as_str().into(),
        }
    })
}

/// The figment used by [`load_config`], before extraction.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Toml::file(path))
        .merge(string_env())
        .merge(numeric_env())
}

pub fn load_config(path: &Path) -> Result<Config> {
    extract(figment(path))
}

/// Extract and validate a [`Config`] from an already-built figment.
pub fn extract(figment: Figment) -> Result<Config> {
    let config: Config = figment
        .extract()
        .with_context(|| "Failed to load configuration (is DATABASE_PATH set?)")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.path.as_os_str().is_empty() {
        bail!("db.path must not be empty");
    }

    if config.discord.channel_id.trim().is_empty() {
        bail!("discord.channel_id must not be empty");
    }

    let schedule = &config.schedule;
    if schedule.start_hour > 23 {
        bail!("schedule.start_hour must be in [0, 23]");
    }
    if schedule.end_hour > 23 {
        bail!("schedule.end_hour must be in [0, 23]");
    }
    if schedule.end_minute > 59 {
        bail!("schedule.end_minute must be in [0, 59]");
    }
    if !(-12..=14).contains(&schedule.utc_offset_hours) {
        bail!("schedule.utc_offset_hours must be in [-12, 14]");
    }
    if schedule.polling_interval_ms < 100 {
        bail!("schedule.polling_interval_ms must be >= 100");
    }

    if let Some(secret) = &config.server.secret {
        if secret.is_empty() {
            bail!("server.secret must not be empty when set");
        }
    }

    Ok(())
}
