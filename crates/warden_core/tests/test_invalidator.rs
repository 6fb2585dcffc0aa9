use std::sync::Arc;

use async_trait::async_trait;
use warden_core::ManualClock;
use warden_core::market_data::{
    Invalidator, Level, MarketDataCache, MdCacheConfig, OrderBook, OrderbookSource, RefreshError,
};

struct NoSource;

#[async_trait]
impl OrderbookSource for NoSource {
    async fn fetch(&self, symbol: &str, _depth: u32) -> Result<OrderBook, RefreshError> {
        Err(RefreshError::EmptyBook {
            symbol: symbol.to_string(),
        })
    }
}

fn book(bid: f64) -> OrderBook {
    OrderBook {
        bids: vec![Level { price: bid, size: 1.0 }],
        asks: vec![Level {
            price: bid + 0.5,
            size: 1.0,
        }],
        update_id: None,
    }
}

fn cache_with(symbols: &[&str]) -> MarketDataCache {
    let cache = MarketDataCache::new(
        MdCacheConfig::default(),
        Arc::new(NoSource),
        Arc::new(ManualClock::new(0)),
    );
    for symbol in symbols {
        cache.insert(symbol, book(100.0), 50);
    }
    cache
}

#[test]
fn test_ws_gap_over_limit_clears_everything() {
    let cache = cache_with(&["BTCUSDT", "ETHUSDT"]);
    let invalidator = Invalidator::new(cache.clone());

    assert!(!invalidator.check_ws_gap(300), "gap equal to the limit is tolerated");
    assert_eq!(cache.len(), 2);

    assert!(invalidator.check_ws_gap(301));
    assert!(cache.is_empty());
}

#[test]
fn test_first_quote_only_records() {
    let cache = cache_with(&["BTCUSDT"]);
    let mut invalidator = Invalidator::new(cache.clone());

    assert!(!invalidator.check_price_jump("BTCUSDT", 100.0, 100.5));
    assert_eq!(cache.len(), 1);
}

/// Default tick is 0.1% of the bid: 0.1 at 100.0, so 5 ticks = 0.5.
#[test]
fn test_jump_beyond_max_ticks_invalidates_symbol_only() {
    let cache = cache_with(&["BTCUSDT", "ETHUSDT"]);
    let mut invalidator = Invalidator::new(cache.clone());
    invalidator.check_price_jump("BTCUSDT", 100.0, 100.5);

    assert!(!invalidator.check_price_jump("BTCUSDT", 100.3, 100.8));
    assert_eq!(cache.len(), 2);

    assert!(invalidator.check_price_jump("BTCUSDT", 101.5, 102.0));
    assert_eq!(cache.len(), 1);
    assert!(cache.cache_age_ms("ETHUSDT").is_some(), "other symbols untouched");
}

#[test]
fn test_configured_tick_size_is_used() {
    let cache = cache_with(&["BTCUSDT"]);
    let mut invalidator = Invalidator::new(cache.clone());
    invalidator.set_tick_size("BTCUSDT", 0.01);
    invalidator.check_price_jump("BTCUSDT", 100.0, 100.5);

    // 0.1 / 0.01 = 10 ticks > 5
    assert!(invalidator.check_price_jump("BTCUSDT", 100.1, 100.5));
    assert!(cache.is_empty());
}

#[test]
fn test_invalid_tick_size_is_ignored() {
    let cache = cache_with(&["BTCUSDT"]);
    let mut invalidator = Invalidator::new(cache.clone());
    invalidator.set_tick_size("BTCUSDT", 0.0);
    invalidator.check_price_jump("BTCUSDT", 100.0, 100.5);

    // Falls back to 0.1: a 0.2 move is 2 ticks
    assert!(!invalidator.check_price_jump("BTCUSDT", 100.2, 100.7));
    assert_eq!(cache.len(), 1);
}
