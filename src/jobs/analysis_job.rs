//! Market Analysis Job
//!
//! Ranks the most traded spot symbols by recent performance. Runs daily at
//! 00:00 UTC by default and on demand with custom `top_n` / `lookback_days`.
//!
//! # Processing Strategy
//!
//! 1. Fetch the `top_n` USDT symbols by 24h turnover
//! 2. For each symbol, fetch `lookback_days` daily candles
//! 3. Compute the 7-day return, the return over the whole window and the
//!    standard deviation of daily returns
//! 4. Score each symbol by the mean percentile rank of its two return
//!    columns and sort descending
//!
//! # Error Handling
//!
//! - A symbol whose candles cannot be fetched keeps its ticker data with
//!   empty metrics and ranks last; it does not fail the job
//! - Failing to fetch the symbol list fails the job

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::JobError;
use crate::external::market_data::MarketDataProvider;
use crate::jobs::{unexpected_params, Job, JobContext};
use crate::models::{AnalysisReport, AnalysisRow, Candle, JobParams, JobType, SymbolTicker, TaskResult};

const DAILY_INTERVAL: &str = "D";

pub struct AnalysisJob {
    market: Arc<dyn MarketDataProvider>,
}

impl AnalysisJob {
    pub fn new(market: Arc<dyn MarketDataProvider>) -> Self {
        Self { market }
    }
}

#[async_trait]
impl Job for AnalysisJob {
    async fn run(&self, ctx: JobContext) -> Result<TaskResult, JobError> {
        let params = match &ctx.params {
            JobParams::Analysis(p) => p.clone(),
            other => return Err(unexpected_params(JobType::Analysis, other)),
        };

        ctx.checkpoint(0.05, format!("Fetching top {} symbols by turnover", params.top_n))?;
        let tickers = self.market.top_symbols_by_turnover(params.top_n).await?;
        info!("📊 Analysing {} symbols over {} days", tickers.len(), params.lookback_days);

        let total = tickers.len().max(1);
        let mut rows = Vec::with_capacity(tickers.len());
        for (i, ticker) in tickers.into_iter().enumerate() {
            ctx.checkpoint(
                0.1 + 0.8 * i as f64 / total as f64,
                format!("Fetching daily candles {}/{}: {}", i + 1, total, ticker.symbol),
            )?;

            let candles = match self
                .market
                .klines(&ticker.symbol, DAILY_INTERVAL, params.lookback_days)
                .await
            {
                Ok(candles) => candles,
                Err(e) => {
                    warn!("Skipping metrics for {}: {}", ticker.symbol, e);
                    Vec::new()
                }
            };
            rows.push(analyse(ticker, &candles));
        }

        ctx.checkpoint(0.95, "Ranking symbols")?;
        rank(&mut rows);

        Ok(TaskResult::Analysis(AnalysisReport {
            count: rows.len(),
            data: rows,
        }))
    }
}

/// Simple returns between consecutive closes, oldest first
fn daily_returns(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .rev()
        .filter(|w| w[1].close != 0.0)
        .map(|w| w[0].close / w[1].close - 1.0)
        .collect()
}

/// `candles` are newest first
fn analyse(ticker: SymbolTicker, candles: &[Candle]) -> AnalysisRow {
    let return_over = |days: usize| -> Option<f64> {
        let latest = candles.first()?.close;
        let base = candles.get(days)?.close;
        (base != 0.0).then(|| latest / base - 1.0)
    };

    let return_7d = return_over(7);
    let return_30d = candles.len().checked_sub(1).filter(|n| *n > 0).and_then(|n| return_over(n));

    let returns = daily_returns(candles);
    let volatility = (returns.len() >= 2).then(|| {
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
        var.sqrt()
    });

    AnalysisRow {
        symbol: ticker.symbol,
        last_price: ticker.last_price,
        change_24h_pct: ticker.change_24h_pct,
        turnover_24h: ticker.turnover_24h,
        return_7d,
        return_30d,
        volatility,
        score: 0.0,
    }
}

/// Percentile rank of `value` among `column`, in [0, 1]; ties share the
/// average rank
fn percentile(column: &[f64], value: f64) -> f64 {
    if column.len() < 2 {
        return 1.0;
    }
    let below = column.iter().filter(|v| **v < value).count() as f64;
    let equal = column.iter().filter(|v| **v == value).count() as f64;
    (below + (equal - 1.0) / 2.0) / (column.len() - 1) as f64
}

fn rank(rows: &mut [AnalysisRow]) {
    let short: Vec<f64> = rows.iter().filter_map(|r| r.return_7d).collect();
    let long: Vec<f64> = rows.iter().filter_map(|r| r.return_30d).collect();

    for row in rows.iter_mut() {
        let ranks: Vec<f64> = [
            row.return_7d.map(|v| percentile(&short, v)),
            row.return_30d.map(|v| percentile(&long, v)),
        ]
        .into_iter()
        .flatten()
        .collect();

        row.score = if ranks.is_empty() {
            0.0
        } else {
            ranks.iter().sum::<f64>() / ranks.len() as f64
        };
    }

    rows.sort_by(|a, b| b.score.total_cmp(&a.score));
}
