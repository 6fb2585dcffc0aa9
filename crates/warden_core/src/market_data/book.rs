use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    pub price: f64,
    pub size: f64,
}

/// Order-book snapshot as returned by the exchange connector.
/// Shared read-only through `Arc` once cached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderBook {
    /// Best first.
    pub bids: Vec<Level>,
    /// Best first.
    pub asks: Vec<Level>,
    /// Exchange sequence number of the snapshot, when known.
    pub update_id: Option<u64>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid(&self) -> Option<f64> {
        Some((self.best_bid()? + self.best_ask()?) / 2.0)
    }
}

/// One cached snapshot. Replaced wholesale on refresh, never mutated.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub symbol: String,
    pub orderbook: Arc<OrderBook>,
    /// Cache clock reading at write time.
    pub timestamp_ms: u64,
    /// Depth the snapshot was fetched at.
    pub depth: u32,
    pub update_id: Option<u64>,
}

impl CacheEntry {
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp_ms)
    }
}
