//! Session windows and start-cursor resolution.
//!
//! A session is a fixed daily interval in a fixed-offset civil timezone
//! (default `20:00–23:59` at UTC-3). Every scheduling decision, whether to
//! poll at all or whether a run is the first of the day, goes through
//! [`SessionWindow`].
//!
//! The first run of a session fetches only the newest page, so a cold start
//! never backfills the whole channel. Later runs continue from the last
//! stored message and may page forward to catch up.

use chrono::{DateTime, Days, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Timelike, Utc};
#[cfg(test)]
use std::sync::RwLock;

use crate::error::Result;
use crate::models::{raw_message_id, StartPoint};
use crate::store::LogStore;

/// Pages fetched on the first run of a session.
pub const FIRST_RUN_PAGES: usize = 1;
/// Pages a continuation run may fetch.
pub const CONTINUATION_PAGES: usize = 10;

/// Minutes after local midnight still attributed to the previous session.
const MIDNIGHT_GRACE_MINUTES: u32 = 59;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[cfg(test)]
pub struct ManualClock(RwLock<DateTime<Utc>>);

#[cfg(test)]
impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(RwLock::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.write().unwrap() = now;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.read().unwrap()
    }
}

/// Daily interval `[start_hour:00, end_hour:end_minute]`, inclusive, in a
/// fixed UTC offset.
///
/// When the end is earlier than the start the window wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    start_hour: u32,
    end_hour: u32,
    end_minute: u32,
    offset_secs: i32,
}

impl SessionWindow {
    pub fn new(start_hour: u32, end_hour: u32, end_minute: u32, utc_offset_hours: i32) -> Self {
        Self {
            start_hour: start_hour.min(23),
            end_hour: end_hour.min(23),
            end_minute: end_minute.min(59),
            offset_secs: utc_offset_hours * 3600,
        }
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.offset_secs).unwrap_or_else(|| Utc.fix())
    }

    fn start_minutes(&self) -> u32 {
        self.start_hour * 60
    }

    fn end_minutes(&self) -> u32 {
        self.end_hour * 60 + self.end_minute
    }

    pub fn local(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.offset())
    }

    /// Whether `now` falls inside the window.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = self.local(now);
        let minutes = local.hour() * 60 + local.minute();
        let (start, end) = (self.start_minutes(), self.end_minutes());
        if start <= end {
            (start..=end).contains(&minutes)
        } else {
            minutes >= start || minutes <= end
        }
    }

    /// Start of the session `now` belongs to.
    ///
    /// Shortly after local midnight (up to 00:59, or up to the window end for
    /// a window that wraps past midnight) that is the previous day's start.
    /// At any other time before the start hour it is today's upcoming start,
    /// so no records can have been created since.
    pub fn session_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = self.local(now);
        let minutes = local.hour() * 60 + local.minute();
        let mut date = local.date_naive();
        if minutes < self.start_minutes() && minutes <= self.after_midnight_tail() {
            date = date - Days::new(1);
        }
        self.start_on(date)
    }

    /// Last minute of the day that still belongs to the previous session.
    fn after_midnight_tail(&self) -> u32 {
        if self.end_minutes() < self.start_minutes() {
            self.end_minutes().max(MIDNIGHT_GRACE_MINUTES)
        } else {
            MIDNIGHT_GRACE_MINUTES
        }
    }

    /// First window start strictly after `now`.
    pub fn next_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = self.start_on(self.local(now).date_naive());
        if today > now {
            today
        } else {
            today + Duration::days(1)
        }
    }

    fn start_on(&self, date: NaiveDate) -> DateTime<Utc> {
        let start = NaiveTime::MIN + Duration::hours(i64::from(self.start_hour));
        let local = date.and_time(start);
        (local - Duration::seconds(i64::from(self.offset_secs))).and_utc()
    }

    /// Human-readable window, e.g. `20:00 - 23:59`.
    pub fn describe(&self) -> String {
        format!(
            "{:02}:00 - {:02}:{:02}",
            self.start_hour, self.end_hour, self.end_minute
        )
    }

    /// Local wall-clock time as `HH:MM`.
    pub fn local_clock(&self, now: DateTime<Utc>) -> String {
        self.local(now).format("%H:%M").to_string()
    }
}

/// Picks the cursor and page budget for the next run.
#[derive(Debug, Clone)]
pub struct SessionResolver {
    window: SessionWindow,
    first_run_pages: usize,
    continuation_pages: usize,
}

impl SessionResolver {
    pub fn new(window: SessionWindow) -> Self {
        Self {
            window,
            first_run_pages: FIRST_RUN_PAGES,
            continuation_pages: CONTINUATION_PAGES,
        }
    }

    pub fn window(&self) -> &SessionWindow {
        &self.window
    }

    pub async fn resolve<S: LogStore + ?Sized>(
        &self,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<StartPoint> {
        let session_start = self.window.session_start(now);

        if !store.has_records_since(session_start).await? {
            tracing::info!(
                session_start = %session_start,
                pages = self.first_run_pages,
                "first run of the session, fetching the newest page only"
            );
            return Ok(StartPoint {
                cursor: None,
                page_limit: self.first_run_pages,
            });
        }

        let cursor = store
            .last_record_id()
            .await?
            .map(|id| raw_message_id(&id).to_string())
            .filter(|id| !id.is_empty());

        tracing::info!(
            cursor = cursor.as_deref().unwrap_or("-"),
            pages = self.continuation_pages,
            "continuing session"
        );
        Ok(StartPoint {
            cursor,
            page_limit: self.continuation_pages,
        })
    }
}
