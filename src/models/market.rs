use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 24h ticker of a spot symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolTicker {
    pub symbol: String,
    pub last_price: f64,
    /// 24h price change as a percentage
    pub change_24h_pct: f64,
    pub turnover_24h: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub start_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub turnover: f64,
}

impl Candle {
    pub fn is_green(&self) -> bool {
        self.close > self.open
    }

    pub fn is_red(&self) -> bool {
        self.close < self.open
    }

    /// Absolute body size as a percentage of the open price
    pub fn body_pct(&self) -> f64 {
        if self.open == 0.0 {
            return 0.0;
        }
        ((self.close - self.open) / self.open).abs() * 100.0
    }
}
