use analysis_core::{CancelSignal, MarketDataError, MarketDataSource, MarketResult, MarketSnapshot};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// One cached snapshot. Entries are replaced on refresh, never mutated.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Arc<MarketSnapshot>,
    pub cached_at: Instant,
}

impl CacheEntry {
    fn new(snapshot: MarketSnapshot) -> Self {
        Self {
            value: Arc::new(snapshot),
            cached_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.cached_at.elapsed()
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }
}

/// Outcome of a [`MarketDataCache::refresh_all`] batch
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub succeeded: Vec<String>,
    /// (key, error message)
    pub failed: Vec<(String, String)>,
    /// Set when the batch stopped early on cancellation
    pub cancelled: bool,
}

impl RefreshReport {
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }
}

/// Time-expiring store of market snapshots keyed by provider asset id.
///
/// Reads and writes go through a `DashMap`, so unrelated keys never wait on each
/// other. Fetches are single-flight per key: a per-key async lock makes
/// concurrent misses for the same asset wait for one upstream call and then
/// read its result.
pub struct MarketDataCache {
    source: Arc<dyn MarketDataSource>,
    entries: DashMap<String, CacheEntry>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
    refresh_delay: Duration,
}

const DEFAULT_REFRESH_DELAY: Duration = Duration::from_millis(1200);

impl MarketDataCache {
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self {
            source,
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            refresh_delay: DEFAULT_REFRESH_DELAY,
        }
    }

    /// Pause between consecutive keys in [`refresh_all`](Self::refresh_all)
    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn source_name(&self) -> &'static str {
        self.source.source_name()
    }

    /// Cached snapshot if younger than `ttl`, otherwise a synchronous fetch.
    ///
    /// A hit never fails. A miss whose fetch fails returns `FetchFailed` and
    /// leaves any previous entry in place.
    pub async fn get(&self, key: &str, ttl: Duration) -> MarketResult<Arc<MarketSnapshot>> {
        self.get_with_cancel(key, ttl, &CancelSignal::never()).await
    }

    pub async fn get_with_cancel(
        &self,
        key: &str,
        ttl: Duration,
        cancel: &CancelSignal,
    ) -> MarketResult<Arc<MarketSnapshot>> {
        let id = self.source.canonical_id(key);

        if let Some(hit) = self.fresh(&id, ttl) {
            tracing::debug!("Cache hit for {}", id);
            return Ok(hit);
        }

        let _guard = self.acquire_flight(&id, cancel).await?;

        // Another caller may have filled the entry while we waited on the lock.
        if let Some(hit) = self.fresh(&id, ttl) {
            tracing::debug!("Cache hit for {} after waiting on in-flight fetch", id);
            return Ok(hit);
        }

        tracing::debug!("Cache miss for {}, fetching from {}", id, self.source.source_name());
        match self.fetch(&id, cancel).await {
            Ok(snapshot) => Ok(self.store(&id, snapshot)),
            Err(MarketDataError::Cancelled) => Err(MarketDataError::Cancelled),
            Err(e) => {
                tracing::warn!("Fetch for {} failed: {}", id, e);
                Err(MarketDataError::fetch_failed(id, e))
            }
        }
    }

    /// Fetch and replace the entry for `key` regardless of age.
    ///
    /// On failure the previous entry is left untouched.
    pub async fn force_refresh(&self, key: &str) -> MarketResult<Arc<MarketSnapshot>> {
        self.force_refresh_with_cancel(key, &CancelSignal::never()).await
    }

    pub async fn force_refresh_with_cancel(
        &self,
        key: &str,
        cancel: &CancelSignal,
    ) -> MarketResult<Arc<MarketSnapshot>> {
        let id = self.source.canonical_id(key);
        let _guard = self.acquire_flight(&id, cancel).await?;

        match self.fetch(&id, cancel).await {
            Ok(snapshot) => {
                tracing::debug!("Refreshed {}", id);
                Ok(self.store(&id, snapshot))
            }
            Err(MarketDataError::Cancelled) => Err(MarketDataError::Cancelled),
            Err(e) => {
                tracing::warn!("Refresh for {} failed, keeping previous entry: {}", id, e);
                Err(MarketDataError::fetch_failed(id, e))
            }
        }
    }

    /// Refresh `keys` one at a time, pausing between keys for the upstream rate limit.
    ///
    /// Individual failures are counted and logged; the batch always continues.
    pub async fn refresh_all(&self, keys: &[String]) -> RefreshReport {
        self.refresh_all_with_cancel(keys, &CancelSignal::never()).await
    }

    pub async fn refresh_all_with_cancel(&self, keys: &[String], cancel: &CancelSignal) -> RefreshReport {
        let mut report = RefreshReport::default();
        tracing::info!("Refreshing {} assets", keys.len());

        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.refresh_delay) => {}
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                }
            }

            match self.force_refresh_with_cancel(key, cancel).await {
                Ok(_) => report.succeeded.push(key.clone()),
                Err(MarketDataError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => report.failed.push((key.clone(), e.to_string())),
            }
        }

        if report.cancelled {
            tracing::warn!(
                "Refresh cancelled after {} succeeded, {} failed",
                report.success_count(),
                report.failure_count()
            );
        } else {
            tracing::info!(
                "Refresh complete: {} succeeded, {} failed",
                report.success_count(),
                report.failure_count()
            );
        }

        report
    }

    /// Drop entries older than `ttl`. Returns how many were removed.
    pub fn cleanup_expired(&self, ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.age() <= ttl);
        let removed = before.saturating_sub(self.entries.len());

        self.prune_idle_locks();
        tracing::info!("Cache cleanup removed {} expired entries ({} remain)", removed, self.entries.len());
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.prune_idle_locks();
        tracing::info!("Cache cleared");
    }

    /// Current entry for `key` whatever its age, without fetching.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        let id = self.source.canonical_id(key);
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    fn fresh(&self, id: &str, ttl: Duration) -> Option<Arc<MarketSnapshot>> {
        self.entries
            .get(id)
            .filter(|entry| entry.is_fresh(ttl))
            .map(|entry| Arc::clone(&entry.value))
    }

    fn store(&self, id: &str, snapshot: MarketSnapshot) -> Arc<MarketSnapshot> {
        let entry = CacheEntry::new(snapshot);
        let value = Arc::clone(&entry.value);
        self.entries.insert(id.to_string(), entry);
        value
    }

    async fn acquire_flight(
        &self,
        id: &str,
        cancel: &CancelSignal,
    ) -> MarketResult<tokio::sync::OwnedMutexGuard<()>> {
        let lock = self
            .in_flight
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        tokio::select! {
            guard = lock.lock_owned() => Ok(guard),
            _ = cancel.cancelled() => Err(MarketDataError::Cancelled),
        }
    }

    async fn fetch(&self, id: &str, cancel: &CancelSignal) -> MarketResult<MarketSnapshot> {
        if cancel.is_cancelled() {
            return Err(MarketDataError::Cancelled);
        }
        tokio::select! {
            result = self.source.fetch(id) => result,
            _ = cancel.cancelled() => Err(MarketDataError::Cancelled),
        }
    }

    fn prune_idle_locks(&self) {
        // A lock held only by the map itself has no waiter and no running fetch.
        self.in_flight
            .retain(|id, lock| Arc::strong_count(lock) > 1 || self.entries.contains_key(id));
    }
}
