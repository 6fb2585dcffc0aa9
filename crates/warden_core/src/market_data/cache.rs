use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::book::{CacheEntry, OrderBook};
use super::config::MdCacheConfig;
use super::metrics::{CacheMetrics, MetricsSummary, SummaryBase};
use super::source::{OrderbookSource, RefreshError};
use crate::clock::Clock;

/// Upper bound on the synchronous refresh of a fresh-only read.
pub const FRESH_ONLY_TIMEOUT_MS: u64 = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum UseCase {
    #[default]
    General,
    Pricing,
    Guards,
}

impl UseCase {
    pub fn as_str(self) -> &'static str {
        match self {
            UseCase::General => "general",
            UseCase::Pricing => "pricing",
            UseCase::Guards => "guards",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookRequest {
    pub symbol: String,
    pub depth: u32,
    /// Overrides the configured TTL for this read.
    pub max_age_ms: Option<u64>,
    /// Never serve stale data unless the bounded refresh times out.
    pub fresh_only: bool,
    pub expected_update_id: Option<u64>,
    pub use_case: UseCase,
}

impl BookRequest {
    pub fn new(symbol: impl Into<String>, depth: u32) -> Self {
        Self {
            symbol: symbol.into(),
            depth,
            max_age_ms: None,
            fresh_only: false,
            expected_update_id: None,
            use_case: UseCase::General,
        }
    }

    pub fn max_age_ms(mut self, max_age_ms: u64) -> Self {
        self.max_age_ms = Some(max_age_ms);
        self
    }

    pub fn fresh_only(mut self) -> Self {
        self.fresh_only = true;
        self
    }

    pub fn expected_update_id(mut self, update_id: u64) -> Self {
        self.expected_update_id = Some(update_id);
        self
    }

    pub fn use_case(mut self, use_case: UseCase) -> Self {
        self.use_case = use_case;
        self
    }
}

/// Flags describing how a read was served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadMeta {
    pub cache_hit: bool,
    /// Age of the cached entry at read time; 0 when there was none.
    pub age_ms: u64,
    /// The returned book is older than the freshness bound of this read.
    pub used_stale: bool,
    pub depth_miss: bool,
    pub sequence_gap: bool,
    pub rewind: bool,
    /// Pricing should skip this tick; no book is returned.
    pub skip_pricing: bool,
    pub refresh_failed: bool,
    pub refresh_timed_out: bool,
    /// A background refresh was started by this read.
    pub background_refresh: bool,
}

#[derive(Debug, Clone)]
pub struct BookRead {
    pub orderbook: Option<Arc<OrderBook>>,
    pub meta: ReadMeta,
}

impl BookRead {
    fn found(orderbook: Arc<OrderBook>, meta: ReadMeta) -> Self {
        Self {
            orderbook: Some(orderbook),
            meta,
        }
    }

    fn empty(meta: ReadMeta) -> Self {
        Self {
            orderbook: None,
            meta,
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, Arc<CacheEntry>>,
    // Background refreshes in flight per symbol.
    inflight: HashMap<String, usize>,
}

struct Inner {
    config: MdCacheConfig,
    source: Arc<dyn OrderbookSource>,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
    metrics: Mutex<CacheMetrics>,
}

/// Order-book cache with TTL, stale-while-refresh and per-symbol refresh backpressure.
///
/// Cheap to clone; clones share the same map. The map lock is held only for
/// lookups and replacements, never across a source fetch.
#[derive(Clone)]
pub struct MarketDataCache {
    inner: Arc<Inner>,
}

impl fmt::Debug for MarketDataCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarketDataCache")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl MarketDataCache {
    pub fn new(
        config: MdCacheConfig,
        source: Arc<dyn OrderbookSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = config.sanitized();
        info!(
            enabled = config.enabled,
            ttl_ms = config.ttl_ms,
            stale_ok = config.stale_ok,
            fresh_ms_for_pricing = config.fresh_ms_for_pricing,
            "md cache initialized"
        );
        Self {
            inner: Arc::new(Inner {
                config,
                source,
                clock,
                state: Mutex::new(CacheState::default()),
                metrics: Mutex::new(CacheMetrics::default()),
            }),
        }
    }

    pub fn config(&self) -> &MdCacheConfig {
        &self.inner.config
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        let started = Instant::now();
        let (guard, contended) = match self.inner.state.try_lock() {
            Some(guard) => (guard, false),
            None => (self.inner.state.lock(), true),
        };
        let wait_ms = started.elapsed().as_secs_f64() * 1_000.0;
        self.inner.metrics.lock().record_lock_wait(wait_ms, contended);
        guard
    }

    fn record_hit(&self, symbol: &str) {
        self.inner.metrics.lock().record_hit(symbol);
    }

    fn record_miss(&self, symbol: &str) {
        self.inner.metrics.lock().record_miss(symbol);
    }

    fn clamp_depth(&self, depth: u32) -> u32 {
        depth.clamp(1, self.inner.config.max_depth)
    }

    /// Read a book, from the cache when the entry satisfies the request.
    ///
    /// Never fails: refresh errors surface as a missing book plus flags in
    /// [`ReadMeta`], and never remove the previous entry.
    pub async fn get_orderbook(&self, request: &BookRequest) -> BookRead {
        let mut meta = ReadMeta::default();
        let config = self.inner.config;
        let symbol = request.symbol.as_str();
        let depth = self.clamp_depth(request.depth);
        let expected = request.expected_update_id;

        if !config.enabled {
            self.record_miss(symbol);
            return match self.fetch_timed(symbol, depth).await {
                Ok(book) => BookRead::found(Arc::new(book), meta),
                Err(_) => {
                    meta.refresh_failed = true;
                    BookRead::empty(meta)
                }
            };
        }

        let cached = self.lock_state().entries.get(symbol).cloned();
        let Some(entry) = cached else {
            self.record_miss(symbol);
            debug!(symbol, depth, "md cache miss");
            return self.refresh_into(symbol, depth, expected, meta).await;
        };

        let age_ms = entry.age_ms(self.inner.clock.now_ms());
        meta.age_ms = age_ms;

        // A shallower snapshot never satisfies a deeper request.
        if entry.depth < depth {
            meta.depth_miss = true;
            self.record_miss(symbol);
            debug!(symbol, cached_depth = entry.depth, depth, "md cache depth miss");
            return self.refresh_into(symbol, depth, expected, meta).await;
        }
        // Refreshes from here on replace a deeper entry, so keep its depth.
        let depth = entry.depth;

        if let (Some(expected_id), Some(cached_id)) = (expected, entry.update_id) {
            if expected_id > cached_id.saturating_add(1) {
                meta.sequence_gap = true;
                self.record_miss(symbol);
                warn!(symbol, expected_id, cached_id, "md cache sequence gap, forcing refresh");
                return self.refresh_into(symbol, depth, expected, meta).await;
            }
            if expected_id < cached_id {
                meta.rewind = true;
                warn!(symbol, expected_id, cached_id, "md cache rewind, invalidating");
                self.invalidate(symbol, "rewind");
                self.record_miss(symbol);
                return self.refresh_into(symbol, depth, expected, meta).await;
            }
        }

        let ttl_ms = request.max_age_ms.unwrap_or(match request.use_case {
            UseCase::Pricing => config.fresh_ms_for_pricing,
            UseCase::General | UseCase::Guards => config.ttl_ms,
        });
        if age_ms <= ttl_ms {
            meta.cache_hit = true;
            self.record_hit(symbol);
            debug!(symbol, age_ms, ttl_ms, "md cache hit");
            return BookRead::found(Arc::clone(&entry.orderbook), meta);
        }

        if request.fresh_only {
            self.record_miss(symbol);
            warn!(
                symbol,
                age_ms,
                use_case = request.use_case.as_str(),
                "md cache stale on fresh-only read, refreshing"
            );
            let timeout = Duration::from_millis(FRESH_ONLY_TIMEOUT_MS);
            return match tokio::time::timeout(timeout, self.refresh(symbol, depth, expected)).await {
                Ok(Ok(book)) => BookRead::found(book, meta),
                Ok(Err(_)) => {
                    meta.refresh_failed = true;
                    BookRead::empty(meta)
                }
                Err(_) => {
                    error!(
                        symbol,
                        timeout_ms = FRESH_ONLY_TIMEOUT_MS,
                        "fresh-only refresh timed out, serving stale"
                    );
                    meta.used_stale = true;
                    meta.refresh_timed_out = true;
                    BookRead::found(Arc::clone(&entry.orderbook), meta)
                }
            };
        }

        if request.use_case == UseCase::Pricing && age_ms > config.fresh_ms_for_pricing {
            self.record_miss(symbol);
            meta.background_refresh = self.trigger_background_refresh(symbol, depth, expected);
            info!(
                symbol,
                age_ms,
                fresh_ms_for_pricing = config.fresh_ms_for_pricing,
                skip = config.skip_pricing_on_stale,
                "md cache stale for pricing"
            );
            if config.skip_pricing_on_stale {
                meta.skip_pricing = true;
                return BookRead::empty(meta);
            }
            meta.used_stale = true;
            return BookRead::found(Arc::clone(&entry.orderbook), meta);
        }

        if config.stale_ok {
            self.record_miss(symbol);
            meta.used_stale = true;
            meta.background_refresh = self.trigger_background_refresh(symbol, depth, expected);
            debug!(symbol, age_ms, ttl_ms, "md cache stale, serving while refreshing");
            return BookRead::found(Arc::clone(&entry.orderbook), meta);
        }

        self.record_miss(symbol);
        debug!(symbol, age_ms, ttl_ms, "md cache stale, refreshing synchronously");
        self.refresh_into(symbol, depth, expected, meta).await
    }

    async fn refresh_into(
        &self,
        symbol: &str,
        depth: u32,
        expected: Option<u64>,
        mut meta: ReadMeta,
    ) -> BookRead {
        match self.refresh(symbol, depth, expected).await {
            Ok(book) => BookRead::found(book, meta),
            Err(_) => {
                meta.refresh_failed = true;
                BookRead::empty(meta)
            }
        }
    }

    async fn fetch_timed(&self, symbol: &str, depth: u32) -> Result<OrderBook, RefreshError> {
        let started = tokio::time::Instant::now();
        let result = self.inner.source.fetch(symbol, depth).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
        match &result {
            Ok(_) => {
                self.inner.metrics.lock().record_refresh(symbol, latency_ms);
                debug!(symbol, depth, latency_ms, "md cache refreshed");
            }
            Err(e) => {
                self.inner.metrics.lock().record_refresh_error();
                warn!(symbol, depth, latency_ms, error = %e, "md cache refresh failed");
            }
        }
        result
    }

    /// Fetch from the source and store the result.
    async fn refresh(
        &self,
        symbol: &str,
        depth: u32,
        expected: Option<u64>,
    ) -> Result<Arc<OrderBook>, RefreshError> {
        let book = self.fetch_timed(symbol, depth).await?;
        let update_id = book.update_id.or(expected);
        let orderbook = Arc::new(book);
        self.store(symbol, Arc::clone(&orderbook), depth, update_id);
        Ok(orderbook)
    }

    /// Replace the entry unless the cached one carries a newer update id.
    fn store(
        &self,
        symbol: &str,
        orderbook: Arc<OrderBook>,
        depth: u32,
        update_id: Option<u64>,
    ) -> bool {
        let entry = Arc::new(CacheEntry {
            symbol: symbol.to_string(),
            orderbook,
            timestamp_ms: self.inner.clock.now_ms(),
            depth,
            update_id,
        });
        let mut state = self.lock_state();
        let cached_id = state.entries.get(symbol).and_then(|e| e.update_id);
        if matches!((cached_id, update_id), (Some(cached), Some(new)) if new < cached) {
            debug!(symbol, ?cached_id, ?update_id, "md cache kept newer entry");
            return false;
        }
        state.entries.insert(symbol.to_string(), entry);
        true
    }

    /// Store a snapshot pushed by the WS feed. Returns false when a newer
    /// snapshot is already cached.
    pub fn insert(&self, symbol: &str, book: OrderBook, depth: u32) -> bool {
        let update_id = book.update_id;
        let depth = self.clamp_depth(depth);
        self.store(symbol, Arc::new(book), depth, update_id)
    }

    /// Start a background refresh unless `symbol` already has
    /// `max_inflight_refresh` of them running.
    fn trigger_background_refresh(&self, symbol: &str, depth: u32, expected: Option<u64>) -> bool {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(symbol, error = %e, "no runtime for background refresh");
                return false;
            }
        };
        {
            let mut state = self.lock_state();
            let max_inflight = self.inner.config.max_inflight_refresh;
            let inflight = state.inflight.entry(symbol.to_string()).or_insert(0);
            if *inflight >= max_inflight {
                debug!(symbol, inflight = *inflight, "md cache refresh already in flight");
                return false;
            }
            *inflight += 1;
        }
        let slot = InflightSlot {
            cache: self.clone(),
            symbol: symbol.to_string(),
        };
        let cache = self.clone();
        let symbol = symbol.to_string();
        handle.spawn(async move {
            let _slot = slot;
            // Errors are logged and counted in fetch_timed.
            let _ = cache.refresh(&symbol, depth, expected).await;
        });
        true
    }

    pub fn invalidate(&self, symbol: &str, reason: &str) -> bool {
        let removed = self.lock_state().entries.remove(symbol).is_some();
        if removed {
            info!(symbol, reason, "md cache invalidated");
        }
        removed
    }

    pub fn invalidate_all(&self, reason: &str) -> usize {
        let count = {
            let mut state = self.lock_state();
            let count = state.entries.len();
            state.entries.clear();
            count
        };
        info!(count, reason, "md cache invalidated all");
        count
    }

    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cache_age_ms(&self, symbol: &str) -> Option<u64> {
        let entry = self.lock_state().entries.get(symbol).cloned()?;
        Some(entry.age_ms(self.inner.clock.now_ms()))
    }

    pub fn inflight_refreshes(&self) -> usize {
        self.lock_state().inflight.values().sum()
    }

    pub fn hit_ratio(&self, symbol: Option<&str>) -> f64 {
        self.inner.metrics.lock().hit_ratio(symbol)
    }

    pub fn refresh_latency_p95_ms(&self, symbol: Option<&str>) -> f64 {
        self.inner.metrics.lock().refresh_latency_p95_ms(symbol)
    }

    pub fn get_metrics_summary(&self) -> MetricsSummary {
        let base = {
            let state = self.lock_state();
            let mut symbols_cached: Vec<String> = state.entries.keys().cloned().collect();
            symbols_cached.sort_unstable();
            SummaryBase {
                enabled: self.inner.config.enabled,
                cache_size: state.entries.len(),
                inflight_refreshes: state.inflight.values().sum(),
                symbols_cached,
            }
        };
        self.inner.metrics.lock().summary(base)
    }
}

/// Releases one in-flight slot when the refresh task ends, including by panic.
struct InflightSlot {
    cache: MarketDataCache,
    symbol: String,
}

impl Drop for InflightSlot {
    fn drop(&mut self) {
        let mut state = self.cache.lock_state();
        let finished = match state.inflight.get_mut(&self.symbol) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if finished {
            state.inflight.remove(&self.symbol);
        }
    }
}
