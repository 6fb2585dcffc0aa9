use std::collections::{BTreeMap, HashMap, VecDeque};

pub const REFRESH_LATENCY_SAMPLES_MAX: usize = 1_024;
pub const LOCK_WAIT_SAMPLES_MAX: usize = 4_096;

/// Counters owned by one cache instance. Always locked after the state map,
/// never before it.
#[derive(Debug, Default)]
pub(crate) struct CacheMetrics {
    hits: HashMap<String, u64>,
    misses: HashMap<String, u64>,
    refresh_latencies_ms: HashMap<String, VecDeque<f64>>,
    refresh_errors_total: u64,
    lock_acquisitions: u64,
    lock_contended: u64,
    lock_waits_ms: VecDeque<f64>,
}

impl CacheMetrics {
    pub(crate) fn record_hit(&mut self, symbol: &str) {
        bump(&mut self.hits, symbol);
    }

    pub(crate) fn record_miss(&mut self, symbol: &str) {
        bump(&mut self.misses, symbol);
    }

    pub(crate) fn record_refresh(&mut self, symbol: &str, latency_ms: f64) {
        let samples = match self.refresh_latencies_ms.get_mut(symbol) {
            Some(samples) => samples,
            None => self.refresh_latencies_ms.entry(symbol.to_string()).or_default(),
        };
        if samples.len() >= REFRESH_LATENCY_SAMPLES_MAX {
            samples.pop_front();
        }
        samples.push_back(latency_ms);
    }

    pub(crate) fn record_refresh_error(&mut self) {
        self.refresh_errors_total += 1;
    }

    pub(crate) fn record_lock_wait(&mut self, wait_ms: f64, contended: bool) {
        self.lock_acquisitions += 1;
        if contended {
            self.lock_contended += 1;
        }
        if self.lock_waits_ms.len() >= LOCK_WAIT_SAMPLES_MAX {
            self.lock_waits_ms.pop_front();
        }
        self.lock_waits_ms.push_back(wait_ms);
    }

    pub(crate) fn hit_ratio(&self, symbol: Option<&str>) -> f64 {
        let (hits, misses) = match symbol {
            Some(s) => (
                self.hits.get(s).copied().unwrap_or(0),
                self.misses.get(s).copied().unwrap_or(0),
            ),
            None => (self.hits.values().sum(), self.misses.values().sum()),
        };
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }

    pub(crate) fn refresh_latency_p95_ms(&self, symbol: Option<&str>) -> f64 {
        match symbol {
            Some(s) => self
                .refresh_latencies_ms
                .get(s)
                .map(|samples| p95(samples.iter().copied()))
                .unwrap_or(0.0),
            None => p95(self.refresh_latencies_ms.values().flatten().copied()),
        }
    }

    pub(crate) fn summary(&self, base: SummaryBase) -> MetricsSummary {
        let symbols = self.hits.keys().chain(self.misses.keys());
        let per_symbol_hit_ratio = symbols
            .map(|s| (s.clone(), self.hit_ratio(Some(s))))
            .collect();
        let lock_contention_rate = if self.lock_acquisitions == 0 {
            0.0
        } else {
            self.lock_contended as f64 / self.lock_acquisitions as f64
        };
        MetricsSummary {
            enabled: base.enabled,
            hit_ratio_global: self.hit_ratio(None),
            cache_size: base.cache_size,
            inflight_refreshes: base.inflight_refreshes,
            total_hits: self.hits.values().sum(),
            total_misses: self.misses.values().sum(),
            refresh_latency_p95_ms: self.refresh_latency_p95_ms(None),
            refresh_errors_total: self.refresh_errors_total,
            lock_contention_rate,
            lock_contention_count: self.lock_contended,
            lock_wait_p95_ms: p95(self.lock_waits_ms.iter().copied()),
            symbols_cached: base.symbols_cached,
            per_symbol_hit_ratio,
        }
    }
}

/// Figures read from the state map before the metrics lock is taken.
pub(crate) struct SummaryBase {
    pub(crate) enabled: bool,
    pub(crate) cache_size: usize,
    pub(crate) inflight_refreshes: usize,
    pub(crate) symbols_cached: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSummary {
    pub enabled: bool,
    pub hit_ratio_global: f64,
    pub cache_size: usize,
    pub inflight_refreshes: usize,
    pub total_hits: u64,
    pub total_misses: u64,
    pub refresh_latency_p95_ms: f64,
    pub refresh_errors_total: u64,
    pub lock_contention_rate: f64,
    pub lock_contention_count: u64,
    pub lock_wait_p95_ms: f64,
    /// Sorted.
    pub symbols_cached: Vec<String>,
    pub per_symbol_hit_ratio: BTreeMap<String, f64>,
}

fn bump(counts: &mut HashMap<String, u64>, symbol: &str) {
    match counts.get_mut(symbol) {
        Some(count) => *count += 1,
        None => {
            counts.insert(symbol.to_string(), 1);
        }
    }
}

/// Nearest-rank p95 (`floor(n * 0.95)`, clamped to the last sample).
fn p95(samples: impl Iterator<Item = f64>) -> f64 {
    let mut values: Vec<f64> = samples.collect();
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let idx = ((values.len() as f64 * 0.95) as usize).min(values.len() - 1);
    values[idx]
}
