use std::collections::HashMap;

use tracing::{debug, warn};

use super::cache::MarketDataCache;

/// Fallback tick size as a fraction of the bid when none is configured.
pub const DEFAULT_TICK_FRACTION: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Quote {
    bid: f64,
    ask: f64,
}

/// Watches WS gaps and quote jumps and invalidates the cache when they exceed
/// the configured bounds.
#[derive(Debug)]
pub struct Invalidator {
    cache: MarketDataCache,
    invalidate_on_ws_gap_ms: u64,
    price_jump_max_ticks: f64,
    last_quotes: HashMap<String, Quote>,
    tick_sizes: HashMap<String, f64>,
}

impl Invalidator {
    pub fn new(cache: MarketDataCache) -> Self {
        let config = *cache.config();
        Self {
            cache,
            invalidate_on_ws_gap_ms: config.invalidate_on_ws_gap_ms,
            price_jump_max_ticks: config.price_jump_max_ticks,
            last_quotes: HashMap::new(),
            tick_sizes: HashMap::new(),
        }
    }

    /// Exchange tick size for `symbol`. Non-positive values are ignored.
    pub fn set_tick_size(&mut self, symbol: &str, tick_size: f64) {
        if !tick_size.is_finite() || tick_size <= 0.0 {
            warn!(symbol, tick_size, "invalid tick size ignored");
            return;
        }
        self.tick_sizes.insert(symbol.to_string(), tick_size);
    }

    /// Clears the whole cache when `gap_ms` exceeds the configured bound.
    pub fn check_ws_gap(&self, gap_ms: u64) -> bool {
        if gap_ms <= self.invalidate_on_ws_gap_ms {
            return false;
        }
        warn!(
            gap_ms,
            limit_ms = self.invalidate_on_ws_gap_ms,
            "ws gap over limit, invalidating md cache"
        );
        self.cache.invalidate_all("ws_gap");
        true
    }

    /// Clears `symbol` when the bid or ask moved more than `price_jump_max_ticks`
    /// since the previous observation. The first observation only records.
    pub fn check_price_jump(&mut self, symbol: &str, bid: f64, ask: f64) -> bool {
        if !bid.is_finite() || !ask.is_finite() {
            warn!(symbol, bid, ask, "non-finite quote ignored");
            return false;
        }
        let current = Quote { bid, ask };
        let Some(last) = self.last_quotes.insert(symbol.to_string(), current) else {
            debug!(symbol, bid, ask, "first quote recorded");
            return false;
        };

        let tick = self
            .tick_sizes
            .get(symbol)
            .copied()
            .unwrap_or(bid.abs() * DEFAULT_TICK_FRACTION);
        if tick <= 0.0 {
            return false;
        }
        let bid_ticks = (bid - last.bid).abs() / tick;
        let ask_ticks = (ask - last.ask).abs() / tick;
        if bid_ticks <= self.price_jump_max_ticks && ask_ticks <= self.price_jump_max_ticks {
            return false;
        }
        warn!(
            symbol,
            bid_ticks,
            ask_ticks,
            max_ticks = self.price_jump_max_ticks,
            "price jump, invalidating md cache entry"
        );
        self.cache.invalidate(symbol, "price_jump");
        true
    }
}
