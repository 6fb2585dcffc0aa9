use async_trait::async_trait;
use thiserror::Error;

use super::book::OrderBook;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("orderbook source unavailable for {symbol}: {detail}")]
    Unavailable { symbol: String, detail: String },
    #[error("orderbook source returned an empty book for {symbol}")]
    EmptyBook { symbol: String },
    #[error("orderbook refresh for {symbol} timed out after {timeout_ms} ms")]
    Timeout { symbol: String, timeout_ms: u64 },
}

/// Upstream order-book fetcher, supplied by the exchange connector.
#[async_trait]
pub trait OrderbookSource: Send + Sync {
    async fn fetch(&self, symbol: &str, depth: u32) -> Result<OrderBook, RefreshError>;
}
