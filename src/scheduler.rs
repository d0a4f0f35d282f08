//! Scheduled polling.
//!
//! A [`Poller`] owns the polling state for one session:
//!
//! ```text
//!          start()                 window closed
//!   Idle ───────────▶ Running ───────────────────▶ Idle
//!                        │   auth failure / shutdown
//!                        └────────────────────────▶ Idle
//! ```
//!
//! While running it triggers an ingest run every polling interval. Ticks are
//! awaited sequentially, so the poller itself never overlaps runs.
//! [`supervise`] keeps a poller alive across days: it sleeps until the next
//! window opens, polls until it closes, and repeats until shutdown.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::IngestError;
use crate::ingest::IngestService;
use crate::session::{Clock, SessionWindow, SystemClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
}

/// Why a running poller went back to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    WindowClosed,
    AuthFailure,
    Shutdown,
}

/// Counters for the current polling session; reset on every start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub total_messages: u64,
    pub saved_messages: u64,
    pub errors: u64,
    pub last_update: Option<DateTime<Utc>>,
}

pub struct Poller {
    service: Arc<IngestService>,
    window: SessionWindow,
    interval: Duration,
    clock: Arc<dyn Clock>,
    state: PollerState,
    stats: PollerStats,
}

impl Poller {
    pub fn new(service: Arc<IngestService>, window: SessionWindow, interval: Duration) -> Self {
        Self {
            service,
            window,
            interval,
            clock: Arc::new(SystemClock),
            state: PollerState::Idle,
            stats: PollerStats::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn stats(&self) -> &PollerStats {
        &self.stats
    }

    /// Idle → Running. Refused when already running or outside the window.
    pub fn start(&mut self) -> bool {
        if self.state == PollerState::Running {
            tracing::warn!("poller already running");
            return false;
        }
        if !self.window.contains(self.clock.now()) {
            tracing::info!(window = %self.window.describe(), "outside the session window, not starting");
            return false;
        }

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            window = %self.window.describe(),
            "polling started"
        );
        self.state = PollerState::Running;
        self.stats = PollerStats::default();
        true
    }

    /// Running → Idle, logging the session counters.
    pub fn stop(&mut self, cause: StopCause) {
        if self.state == PollerState::Idle {
            return;
        }
        self.state = PollerState::Idle;
        tracing::info!(
            cause = ?cause,
            total_messages = self.stats.total_messages,
            saved_messages = self.stats.saved_messages,
            errors = self.stats.errors,
            last_update = ?self.stats.last_update,
            "polling stopped"
        );
    }

    /// Perform one poll. Returns the cause when polling must stop.
    pub async fn tick(&mut self) -> Option<StopCause> {
        let now = self.clock.now();
        if !self.window.contains(now) {
            tracing::info!(window = %self.window.describe(), "session window closed");
            return Some(StopCause::WindowClosed);
        }

        match self.service.run().await {
            Ok(summary) => {
                self.stats.total_messages += summary.total;
                self.stats.saved_messages += summary.saved;
                self.stats.last_update = Some(self.clock.now());
                if summary.saved > 0 {
                    tracing::info!(saved = summary.saved, "new records stored");
                }
                None
            }
            Err(IngestError::Busy) => {
                tracing::debug!("previous run still in flight, skipping tick");
                None
            }
            Err(e) => {
                self.stats.errors += 1;
                tracing::error!(error = %e, "poll failed");
                if e.is_auth() {
                    tracing::error!("credential rejected or missing, stopping polling");
                    Some(StopCause::AuthFailure)
                } else {
                    None
                }
            }
        }
    }

    /// Start and poll every interval until the window closes, the credential
    /// fails, or `shutdown` is cancelled. The first poll happens immediately.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> StopCause {
        if !self.start() {
            return StopCause::WindowClosed;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    self.stop(StopCause::Shutdown);
                    return StopCause::Shutdown;
                }
                _ = ticker.tick() => {}
            }

            if let Some(cause) = self.tick().await {
                self.stop(cause);
                return cause;
            }
        }
    }
}

/// Poll during every session window until `shutdown` is cancelled.
///
/// After the window closes or the credential fails, waits for the next
/// window start before polling again.
pub async fn supervise(
    service: Arc<IngestService>,
    window: SessionWindow,
    interval: Duration,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
) {
    loop {
        if window.contains(clock.now()) {
            let mut poller =
                Poller::new(service.clone(), window, interval).with_clock(clock.clone());
            if poller.run(&shutdown).await == StopCause::Shutdown {
                return;
            }
        }

        let now = clock.now();
        let next = window.next_start(now);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        tracing::info!(
            next_start = %window.local(next).format("%Y-%m-%d %H:%M %:z"),
            "waiting for the next session window"
        );

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discord::MessageSource;
    use crate::error::Result;
    use crate::models::RawMessage;
    use crate::session::{ManualClock, SessionResolver};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{FixedOffset, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a short page, or an auth failure, on every call.
    struct FixedSource {
        calls: AtomicUsize,
        auth_fails: bool,
    }

    impl FixedSource {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                auth_fails: false,
            }
        }

        fn rejecting() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                auth_fails: true,
            }
        }
    }

    #[async_trait]
    impl MessageSource for FixedSource {
        async fn fetch_page(&self, _limit: usize, _after: Option<&str>) -> Result<Vec<RawMessage>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.auth_fails {
                return Err(IngestError::Auth("401: Unauthorized".into()));
            }
            Ok(vec![RawMessage::new(
                n.to_string(),
                format!("`25/01/2024 20:15:{:02}` tick", n % 60),
            )])
        }
    }

    fn window() -> SessionWindow {
        SessionWindow::new(20, 23, 59, -3)
    }

    fn local(h: u32, m: u32) -> DateTime<Utc> {
        FixedOffset::west_opt(3 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 25, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn poller(source: Arc<FixedSource>, clock: Arc<ManualClock>) -> Poller {
        let store = Arc::new(MemoryStore::new());
        store.set_now(clock.now());
        let service = IngestService::new(source, store, SessionResolver::new(window()))
            .with_clock(clock.clone());
        Poller::new(Arc::new(service), window(), Duration::from_secs(5)).with_clock(clock)
    }

    #[test]
    fn test_start_refused_outside_window() {
        let clock = Arc::new(ManualClock::new(local(12, 0)));
        let mut p = poller(Arc::new(FixedSource::ok()), clock);
        assert!(!p.start());
        assert_eq!(p.state(), PollerState::Idle);
    }

    #[test]
    fn test_start_twice_is_refused() {
        let clock = Arc::new(ManualClock::new(local(21, 0)));
        let mut p = poller(Arc::new(FixedSource::ok()), clock);
        assert!(p.start());
        assert!(!p.start());
        assert_eq!(p.state(), PollerState::Running);
        p.stop(StopCause::Shutdown);
        assert_eq!(p.state(), PollerState::Idle);
    }

    #[tokio::test]
    async fn test_tick_accumulates_stats() {
        let clock = Arc::new(ManualClock::new(local(21, 0)));
        let mut p = poller(Arc::new(FixedSource::ok()), clock);
        assert!(p.start());

        assert_eq!(p.tick().await, None);
        assert_eq!(p.tick().await, None);

        let stats = p.stats();
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.saved_messages, 2);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.last_update, Some(local(21, 0)));
    }

    #[tokio::test]
    async fn test_tick_reports_window_close() {
        let clock = Arc::new(ManualClock::new(local(21, 0)));
        let mut p = poller(Arc::new(FixedSource::ok()), clock.clone());
        assert!(p.start());
        clock.set(local(23, 59) + chrono::Duration::minutes(1));
        assert_eq!(p.tick().await, Some(StopCause::WindowClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_auth_failure() {
        let clock = Arc::new(ManualClock::new(local(21, 0)));
        let source = Arc::new(FixedSource::rejecting());
        let mut p = poller(source.clone(), clock);

        let cause = p.run(&CancellationToken::new()).await;
        assert_eq!(cause, StopCause::AuthFailure);
        assert_eq!(p.state(), PollerState::Idle);
        assert_eq!(p.stats().errors, 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_each_interval_until_shutdown() {
        let clock = Arc::new(ManualClock::new(local(21, 0)));
        let source = Arc::new(FixedSource::ok());
        let mut p = poller(source.clone(), clock);

        let token = CancellationToken::new();
        tokio::spawn({
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(12)).await;
                token.cancel();
            }
        });

        let cause = p.run(&token).await;
        assert_eq!(cause, StopCause::Shutdown);
        // Ticks at 0s, 5s and 10s
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(p.stats().total_messages, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_outside_window_never_polls() {
        let clock = Arc::new(ManualClock::new(local(8, 0)));
        let source = Arc::new(FixedSource::ok());
        let mut p = poller(source.clone(), clock);

        assert_eq!(
            p.run(&CancellationToken::new()).await,
            StopCause::WindowClosed
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervise_returns_on_shutdown_while_waiting() {
        let clock = Arc::new(ManualClock::new(local(8, 0)));
        let source = Arc::new(FixedSource::ok());
        let store = Arc::new(MemoryStore::new());
        let service = Arc::new(
            IngestService::new(source.clone(), store, SessionResolver::new(window()))
                .with_clock(clock.clone()),
        );

        let token = CancellationToken::new();
        token.cancel();
        supervise(service, window(), Duration::from_secs(5), clock, token).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
