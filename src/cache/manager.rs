//! Dataset cache manager
//!
//! Provides a `DatasetCache` that fills itself from a [`PageSource`] in bounded
//! waves of concurrent page fetches and serves the resulting snapshot until it
//! expires.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use futures::future::try_join_all;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::data::{PageSource, Record, UpstreamError};

/// Tuning knobs for the dataset cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Maximum snapshot age before it is considered stale
    pub ttl: Duration,
    /// Records requested per upstream page during a refill
    pub page_size: u64,
    /// Pages fetched concurrently in one wave
    pub concurrency: usize,
    /// Hard ceiling on the number of records held
    pub max_records: usize,
    /// After a failed refill, how long a stale snapshot is served without retrying
    pub failure_cooldown: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(1),
            page_size: 1000,
            concurrency: 5,
            max_records: 50_000,
            failure_cooldown: Duration::seconds(30),
        }
    }
}

/// A complete copy of the upstream dataset at one point in time
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// All records, in upstream order
    pub records: Arc<Vec<Record>>,
    /// When the refill that produced this snapshot completed
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    /// Number of records in the snapshot
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the upstream dataset was empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Default)]
struct CacheState {
    snapshot: Option<Snapshot>,
    last_failure: Option<DateTime<Utc>>,
    /// Error of the most recent refill, cleared on success
    last_error: Option<UpstreamError>,
    /// Bumped every time a refill completes, successfully or not
    refills: u64,
}

/// Process-wide cache of the full appraisal dataset
///
/// The snapshot is only ever replaced as a whole, under the write lock, once a
/// refill has fetched every page. At most one refill runs at a time; requests
/// that find a refill in flight are served the previous snapshot, or wait for
/// the refill when there is nothing to serve yet.
pub struct DatasetCache<S> {
    /// Where pages come from
    source: Arc<S>,
    settings: CacheSettings,
    state: RwLock<CacheState>,
    /// Single-flight guard for refills
    refill_lock: Mutex<()>,
}

impl<S: PageSource> DatasetCache<S> {
    /// Creates an empty cache over the given page source
    pub fn new(source: Arc<S>, settings: CacheSettings) -> Self {
        Self {
            source,
            settings,
            state: RwLock::new(CacheState::default()),
            refill_lock: Mutex::new(()),
        }
    }

    /// Returns the settings this cache was built with
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Returns the current snapshot without triggering any fetch
    pub async fn peek(&self) -> Option<Snapshot> {
        self.state.read().await.snapshot.clone()
    }

    /// Returns true if there is no snapshot or it has outlived the TTL
    pub async fn is_stale(&self) -> bool {
        let state = self.state.read().await;
        self.snapshot_is_stale(state.snapshot.as_ref(), Utc::now())
    }

    fn snapshot_is_stale(&self, snapshot: Option<&Snapshot>, now: DateTime<Utc>) -> bool {
        match snapshot {
            Some(snapshot) => now - snapshot.fetched_at > self.settings.ttl,
            None => true,
        }
    }

    /// Returns a snapshot that may be served without contacting upstream
    ///
    /// That is a fresh snapshot, or a stale one while a recent refill failure
    /// is cooling down.
    fn servable(&self, state: &CacheState) -> Option<Snapshot> {
        let now = Utc::now();
        let snapshot = state.snapshot.as_ref()?;

        if !self.snapshot_is_stale(Some(snapshot), now) {
            return Some(snapshot.clone());
        }

        match state.last_failure {
            Some(failed_at) if now - failed_at <= self.settings.failure_cooldown => {
                debug!(
                    age_secs = (now - snapshot.fetched_at).num_seconds(),
                    "serving stale snapshot during refill cooldown"
                );
                Some(snapshot.clone())
            }
            _ => None,
        }
    }

    /// Returns the full dataset, refilling it first if it is stale
    ///
    /// Callers that wait on a refill started by someone else get that refill's
    /// outcome, including its error, instead of starting one of their own.
    ///
    /// # Returns
    /// * `Ok(Snapshot)` - A complete snapshot (possibly stale, see type docs)
    /// * `Err(UpstreamError)` - The refill this call performed or waited on failed
    pub async fn get_all(&self) -> Result<Snapshot, UpstreamError> {
        let observed = {
            let state = self.state.read().await;
            if let Some(snapshot) = self.servable(&state) {
                return Ok(snapshot);
            }
            state.refills
        };

        let guard = match self.refill_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                if let Some(snapshot) = self.peek().await {
                    debug!("refill in flight, serving previous snapshot");
                    return Ok(snapshot);
                }
                self.refill_lock.lock().await
            }
        };

        {
            let state = self.state.read().await;
            // Another caller may have refilled while we waited for the lock.
            if let Some(snapshot) = self.servable(&state) {
                return Ok(snapshot);
            }
            if state.refills != observed {
                if let Some(err) = &state.last_error {
                    debug!(error = %err, "sharing outcome of the refill we waited on");
                    return Err(err.clone());
                }
            }
        }

        self.refill_locked(&guard).await
    }

    /// Unconditionally refetches the dataset and swaps it in
    ///
    /// Waits for any refill already in flight, then performs a new one.
    pub async fn refill(&self) -> Result<Snapshot, UpstreamError> {
        let guard = self.refill_lock.lock().await;
        self.refill_locked(&guard).await
    }

    async fn refill_locked(&self, _guard: &MutexGuard<'_, ()>) -> Result<Snapshot, UpstreamError> {
        let started = Instant::now();
        info!(
            page_size = self.settings.page_size,
            concurrency = self.settings.concurrency,
            "refilling dataset cache"
        );

        match self.fetch_all().await {
            Ok(records) => {
                let snapshot = Snapshot {
                    records: Arc::new(records),
                    fetched_at: Utc::now(),
                };
                let mut state = self.state.write().await;
                state.snapshot = Some(snapshot.clone());
                state.last_failure = None;
                state.last_error = None;
                state.refills = state.refills.wrapping_add(1);
                info!(
                    records = snapshot.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "dataset cache refilled"
                );
                Ok(snapshot)
            }
            Err(err) => {
                let mut state = self.state.write().await;
                state.last_failure = Some(Utc::now());
                state.last_error = Some(err.clone());
                state.refills = state.refills.wrapping_add(1);
                error!(
                    offset = err.offset(),
                    attempts = err.attempts(),
                    kept_previous = state.snapshot.is_some(),
                    error = %err,
                    "dataset cache refill failed"
                );
                Err(err)
            }
        }
    }

    /// Fetches every page of the dataset
    ///
    /// The first page is fetched alone to learn the upstream total; the rest
    /// are requested in waves of `concurrency`. Within a wave results are
    /// appended in offset order; the fill ends at the first short page, once
    /// the upstream total is covered, or at `max_records`. Any page failure
    /// aborts the whole fill.
    async fn fetch_all(&self) -> Result<Vec<Record>, UpstreamError> {
        let page_size = self.settings.page_size.max(1);
        let concurrency = self.settings.concurrency.max(1) as u64;
        let ceiling = self.settings.max_records as u64;

        let mut records: Vec<Record> = Vec::new();
        let mut total: Option<u64> = None;
        let mut offset: u64 = 0;

        loop {
            let width = if offset == 0 { 1 } else { concurrency };
            let wave: Vec<u64> = (0..width)
                .map_while(|i| i.checked_mul(page_size).and_then(|d| offset.checked_add(d)))
                .filter(|o| *o < ceiling && total.map_or(true, |t| *o < t))
                .collect();
            if wave.is_empty() {
                break;
            }

            let pages = try_join_all(
                wave.iter()
                    .map(|&page_offset| self.source.fetch_page(page_offset, page_size, None)),
            )
            .await?;

            let mut reached_end = false;
            for page in pages {
                if page.total.is_some() {
                    total = page.total;
                }
                let short = (page.len() as u64) < page_size;
                records.extend(page.records);
                if short {
                    reached_end = true;
                    break;
                }
            }
            offset = offset.saturating_add((wave.len() as u64).saturating_mul(page_size));

            if records.len() as u64 >= ceiling {
                if records.len() as u64 > ceiling || !reached_end {
                    warn!(
                        max_records = self.settings.max_records,
                        "dataset exceeds record ceiling, truncating"
                    );
                }
                records.truncate(self.settings.max_records);
                break;
            }
            if reached_end || total.is_some_and(|t| offset >= t) {
                break;
            }
        }

        Ok(records)
    }
}
