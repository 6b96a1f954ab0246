//! Timeframe Review Job
//!
//! Picks the symbols and kline intervals the signal strategy watches until
//! the next review. Intervals are ranked by the mean candle body of the top
//! symbols: the larger the typical move, the more room a pattern has to pay.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::JobError;
use crate::external::market_data::MarketDataProvider;
use crate::jobs::{unexpected_params, Job, JobContext};
use crate::models::{JobParams, JobType, TaskResult, TimeframeReviewReport, TimeframeScore};

const CANDLES_PER_TIMEFRAME: usize = 50;

pub struct TimeframeReviewJob {
    market: Arc<dyn MarketDataProvider>,
}

impl TimeframeReviewJob {
    pub fn new(market: Arc<dyn MarketDataProvider>) -> Self {
        Self { market }
    }
}

#[async_trait]
impl Job for TimeframeReviewJob {
    async fn run(&self, ctx: JobContext) -> Result<TaskResult, JobError> {
        let params = match &ctx.params {
            JobParams::TimeframeReview(p) => p.clone(),
            other => return Err(unexpected_params(JobType::TimeframeReview, other)),
        };

        ctx.checkpoint(0.05, format!("Fetching top {} symbols by turnover", params.top_n))?;
        let symbols: Vec<String> = self
            .market
            .top_symbols_by_turnover(params.top_n)
            .await?
            .into_iter()
            .map(|t| t.symbol)
            .collect();

        // timeframe -> body sizes across all symbols
        let mut bodies: HashMap<&str, Vec<f64>> = HashMap::new();
        let total = symbols.len().max(1);
        for (i, symbol) in symbols.iter().enumerate() {
            ctx.checkpoint(
                0.1 + 0.8 * i as f64 / total as f64,
                format!("Reviewing timeframes {}/{}: {}", i + 1, total, symbol),
            )?;

            for timeframe in &params.candidate_timeframes {
                match self.market.klines(symbol, timeframe, CANDLES_PER_TIMEFRAME).await {
                    Ok(candles) => bodies
                        .entry(timeframe.as_str())
                        .or_default()
                        .extend(candles.iter().map(|c| c.body_pct())),
                    Err(e) => warn!("Skipping {} {}m candles: {}", symbol, timeframe, e),
                }
            }
        }

        ctx.checkpoint(0.95, "Selecting timeframes")?;
        let scores: Vec<TimeframeScore> = params
            .candidate_timeframes
            .iter()
            .filter_map(|timeframe| {
                let values = bodies.get(timeframe.as_str()).filter(|v| !v.is_empty())?;
                Some(TimeframeScore {
                    timeframe: timeframe.clone(),
                    mean_body_pct: values.iter().sum::<f64>() / values.len() as f64,
                })
            })
            .collect();

        let selected_timeframes = select_timeframes(&scores, params.select);
        info!("🕒 Selected timeframes {:?} for {} symbols", selected_timeframes, symbols.len());

        Ok(TaskResult::TimeframeReview(TimeframeReviewReport {
            trading_symbols: symbols,
            selected_timeframes,
            scores,
        }))
    }
}

/// The `select` timeframes with the largest mean body, returned shortest
/// interval first
fn select_timeframes(scores: &[TimeframeScore], select: usize) -> Vec<String> {
    let mut ranked: Vec<&TimeframeScore> = scores.iter().collect();
    ranked.sort_by(|a, b| b.mean_body_pct.total_cmp(&a.mean_body_pct));

    let mut selected: Vec<String> = ranked.into_iter().take(select).map(|s| s.timeframe.clone()).collect();
    selected.sort_by_key(|tf| tf.parse::<u32>().unwrap_or(u32::MAX));
    selected
}
