use async_trait::async_trait;
use thiserror::Error;

use crate::errors::JobError;
use crate::models::{Candle, SymbolTicker};

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("network error: {0}")]
    Network(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<MarketDataError> for JobError {
    fn from(e: MarketDataError) -> Self {
        JobError::Failed(format!("market data: {}", e))
    }
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Spot USDT symbols ordered by 24h turnover, largest first
    async fn top_symbols_by_turnover(&self, n: usize) -> Result<Vec<SymbolTicker>, MarketDataError>;

    /// Most recent `limit` candles of `interval` (Bybit interval codes: "3",
    /// "60", "D", ...), newest first
    async fn klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>, MarketDataError>;
}
