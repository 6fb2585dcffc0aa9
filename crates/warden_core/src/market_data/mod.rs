pub mod book;
pub mod cache;
pub mod config;
pub mod invalidator;
pub mod metrics;
pub mod source;

pub use book::{CacheEntry, Level, OrderBook};
pub use cache::{BookRead, BookRequest, FRESH_ONLY_TIMEOUT_MS, MarketDataCache, ReadMeta, UseCase};
pub use config::MdCacheConfig;
pub use invalidator::{DEFAULT_TICK_FRACTION, Invalidator};
pub use metrics::{LOCK_WAIT_SAMPLES_MAX, MetricsSummary, REFRESH_LATENCY_SAMPLES_MAX};
pub use source::{OrderbookSource, RefreshError};
