//! Ingest pipeline orchestration.
//!
//! Coordinates one run: session resolution → paged fetch → normalization →
//! batched upsert. Each run is bounded twice: by a page budget chosen by the
//! [`SessionResolver`] and by a soft wall-clock budget checked between pages.
//! Running out of either is not an error; the next run continues from the
//! last stored message.
//!
//! ```text
//! resolve start ─▶ fetch page ─▶ empty? ──────────────┐
//!                     ▲            │ no               │
//!                     │         short page? ─ yes ────┤
//!                     │            │ no               ▼
//!                     └─ pause ◀─ cursor = last id   normalize ─▶ upsert batches
//! ```
//!
//! Fetch failures abort the run. A failed batch upsert counts as zero saved
//! and the remaining batches are still attempted.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::Config;
use crate::discord::{DiscordClient, MessageSource, MAX_PAGE_SIZE};
use crate::error::{IngestError, Result};
use crate::models::{IngestSummary, NormalizedRecord, RawMessage, StartPoint};
use crate::parser::normalize_all;
use crate::session::{Clock, SessionResolver, SystemClock};
use crate::store::{LogStore, SqliteStore};

/// Tunables for a single run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Messages requested per page, at most [`MAX_PAGE_SIZE`].
    pub page_size: usize,
    /// Soft limit on time spent paging.
    pub time_budget: Duration,
    /// Pause between consecutive page requests.
    pub page_pause: Duration,
    /// Records per upsert call.
    pub batch_size: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            time_budget: Duration::from_secs(25),
            page_pause: Duration::from_millis(100),
            batch_size: 500,
        }
    }
}

/// Why the paging loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EmptyPage,
    ShortPage,
    PageLimit,
    TimeBudget,
}

/// Messages gathered by [`fetch_pages`].
#[derive(Debug)]
pub struct FetchOutcome {
    pub messages: Vec<RawMessage>,
    pub pages: usize,
    pub stop: StopReason,
}

/// Page through the source starting at `start`.
///
/// Stops at the first empty page, the first short page, after
/// `start.page_limit` pages, or once the time budget is exceeded. The budget
/// is only checked between pages, so a slow request can overrun it.
pub async fn fetch_pages<M: MessageSource + ?Sized>(
    source: &M,
    start: &StartPoint,
    options: &IngestOptions,
) -> Result<FetchOutcome> {
    let started = Instant::now();
    let page_size = options.page_size.clamp(1, MAX_PAGE_SIZE);
    let mut cursor = start.cursor.clone();
    let mut messages = Vec::new();
    let mut pages = 0usize;

    let stop = loop {
        if pages >= start.page_limit {
            break StopReason::PageLimit;
        }
        if started.elapsed() > options.time_budget {
            tracing::info!(
                pages,
                "time budget reached, remaining messages left for the next run"
            );
            break StopReason::TimeBudget;
        }

        pages += 1;
        let page = source.fetch_page(page_size, cursor.as_deref()).await?;
        tracing::debug!(page = pages, received = page.len(), "fetched page");

        if page.is_empty() {
            break StopReason::EmptyPage;
        }

        let full = page.len() >= page_size;
        let last_id = page.last().map(|m| m.id.clone());
        messages.extend(page);

        if !full {
            break StopReason::ShortPage;
        }

        cursor = last_id;
        if pages < start.page_limit {
            tokio::time::sleep(options.page_pause).await;
        }
    };

    Ok(FetchOutcome {
        messages,
        pages,
        stop,
    })
}

/// Upsert `records` in batches of `batch_size`, returning how many were new.
///
/// A failing batch is logged and counted as zero.
pub async fn persist<S: LogStore + ?Sized>(
    store: &S,
    records: &[NormalizedRecord],
    batch_size: usize,
) -> u64 {
    let mut saved = 0u64;
    for (i, batch) in records.chunks(batch_size.max(1)).enumerate() {
        match store.upsert(batch).await {
            Ok(n) => {
                tracing::debug!(batch = i + 1, saved = n, "batch stored");
                saved += n;
            }
            Err(e) => {
                tracing::warn!(batch = i + 1, records = batch.len(), error = %e, "batch upsert failed");
            }
        }
    }
    saved
}

/// Runs the pipeline, at most one run at a time per service.
pub struct IngestService {
    source: Arc<dyn MessageSource>,
    store: Arc<dyn LogStore>,
    resolver: SessionResolver,
    clock: Arc<dyn Clock>,
    options: IngestOptions,
    in_flight: Mutex<()>,
}

impl IngestService {
    pub fn new(
        source: Arc<dyn MessageSource>,
        store: Arc<dyn LogStore>,
        resolver: SessionResolver,
    ) -> Self {
        Self {
            source,
            store,
            resolver,
            clock: Arc::new(SystemClock),
            options: IngestOptions::default(),
            in_flight: Mutex::new(()),
        }
    }

    /// Wire the service to the Discord API and a SQLite store, which also
    /// provides the credential.
    pub fn from_config(config: &Config, store: SqliteStore) -> Result<Self> {
        let store = Arc::new(store);
        let source = DiscordClient::new(&config.discord, store.clone())?;
        Ok(Self::new(
            Arc::new(source),
            store,
            SessionResolver::new(config.schedule.window()),
        ))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn resolver(&self) -> &SessionResolver {
        &self.resolver
    }

    /// Run the pipeline once.
    ///
    /// Returns [`IngestError::Busy`] without doing any work when another run
    /// of this service is still in flight.
    pub async fn run(&self) -> Result<IngestSummary> {
        let _guard = self.in_flight.try_lock().map_err(|_| IngestError::Busy)?;

        let start = self
            .resolver
            .resolve(self.store.as_ref(), self.clock.now())
            .await?;

        let fetched = fetch_pages(self.source.as_ref(), &start, &self.options).await?;
        if fetched.messages.is_empty() {
            tracing::info!("no new messages");
            return Ok(IngestSummary::default());
        }

        let records = normalize_all(&fetched.messages);
        tracing::info!(
            messages = fetched.messages.len(),
            pages = fetched.pages,
            stop = ?fetched.stop,
            records = records.len(),
            "messages fetched"
        );

        let saved = persist(self.store.as_ref(), &records, self.options.batch_size).await;
        let summary = IngestSummary {
            total: fetched.messages.len() as u64,
            saved,
        };
        tracing::info!(total = summary.total, saved = summary.saved, "ingest run finished");
        Ok(summary)
    }
}
