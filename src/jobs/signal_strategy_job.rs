//! Signal Strategy Job
//!
//! Scans short-interval candles of the watched symbols for two patterns and
//! reports a signal for each hit. Symbols and timeframes come from the latest
//! completed timeframe review; without one, the top symbols by turnover and
//! the configured timeframes are used. Signals are reported, never traded.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::JobError;
use crate::external::market_data::MarketDataProvider;
use crate::jobs::{unexpected_params, Job, JobContext};
use crate::models::{
    Candle, CandlePattern, JobParams, JobType, SignalSide, SignalStrategyReport, TaskResult, TradeSignal,
};

const CANDLES_PER_SCAN: usize = 50;
const PATTERN_LEN: usize = 13;

pub struct SignalStrategyJob {
    market: Arc<dyn MarketDataProvider>,
}

impl SignalStrategyJob {
    pub fn new(market: Arc<dyn MarketDataProvider>) -> Self {
        Self { market }
    }
}

#[async_trait]
impl Job for SignalStrategyJob {
    async fn run(&self, ctx: JobContext) -> Result<TaskResult, JobError> {
        let params = match &ctx.params {
            JobParams::SignalStrategy(p) => p.clone(),
            other => return Err(unexpected_params(JobType::SignalStrategy, other)),
        };

        ctx.checkpoint(0.1, "Loading watched symbols and timeframes")?;
        let (symbols, timeframes) = match ctx.latest_result(JobType::TimeframeReview) {
            Some(TaskResult::TimeframeReview(review))
                if !review.trading_symbols.is_empty() && !review.selected_timeframes.is_empty() =>
            {
                (review.trading_symbols, review.selected_timeframes)
            }
            _ => {
                debug!("No timeframe review available, falling back to top {} symbols", params.fallback_top_n);
                let symbols = self
                    .market
                    .top_symbols_by_turnover(params.fallback_top_n)
                    .await?
                    .into_iter()
                    .map(|t| t.symbol)
                    .collect();
                (symbols, params.timeframes.clone())
            }
        };

        let total = symbols.len().max(1);
        let mut signals = Vec::new();
        for (i, symbol) in symbols.iter().enumerate() {
            ctx.checkpoint(
                0.3 + 0.6 * i as f64 / total as f64,
                format!("Scanning {} ({}/{})", symbol, i + 1, total),
            )?;

            for timeframe in &timeframes {
                let candles = match self.market.klines(symbol, timeframe, CANDLES_PER_SCAN).await {
                    Ok(candles) => candles,
                    Err(e) => {
                        warn!("Skipping {} {}m: {}", symbol, timeframe, e);
                        continue;
                    }
                };

                if let Some((pattern, side)) = detect_pattern(&candles) {
                    let price = candles[0].close;
                    info!("📈 {:?} signal on {} {}m at {}: {:?}", side, symbol, timeframe, price, pattern);
                    signals.push(TradeSignal {
                        symbol: symbol.clone(),
                        timeframe: timeframe.clone(),
                        pattern,
                        side,
                        price,
                    });
                }
            }
        }

        Ok(TaskResult::SignalStrategy(SignalStrategyReport {
            analyzed_symbols: symbols.len(),
            selected_timeframes: timeframes,
            signals,
        }))
    }
}

/// No three consecutive candles of the same colour
fn is_sideways(candles: &[Candle]) -> bool {
    !candles.windows(3).any(|w| {
        w.iter().all(Candle::is_green) || w.iter().all(Candle::is_red)
    })
}

/// Newest first: ten sideways candles, preceded by three green ones
fn three_green_then_sideways(candles: &[Candle]) -> bool {
    candles.len() >= PATTERN_LEN && is_sideways(&candles[..10]) && candles[10..13].iter().all(Candle::is_green)
}

/// Newest first: three red candles, preceded by ten sideways ones
fn sideways_then_three_red(candles: &[Candle]) -> bool {
    candles.len() >= PATTERN_LEN && candles[..3].iter().all(Candle::is_red) && is_sideways(&candles[3..13])
}

fn detect_pattern(candles: &[Candle]) -> Option<(CandlePattern, SignalSide)> {
    if three_green_then_sideways(candles) {
        Some((CandlePattern::ThreeGreenThenSideways, SignalSide::Buy))
    } else if sideways_then_three_red(candles) {
        // Three red closes out of a range is a breakdown, so this side is a sell.
        Some((CandlePattern::SidewaysThenThreeRed, SignalSide::Sell))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::{candles, context, FakeMarket};
    use crate::models::{SignalStrategyParams, TaskUpdate, TimeframeReviewReport};

    #[test]
    fn test_sideways() {
        assert!(is_sideways(&candles("grgrrgdggr")));
        assert!(!is_sideways(&candles("grgggr")));
        assert!(!is_sideways(&candles("rrr")));
        // doji breaks a run
        assert!(is_sideways(&candles("ggdgg")));
    }

    #[test]
    fn test_three_green_then_sideways() {
        assert!(three_green_then_sideways(&candles("grgrrgrgdrggg")));
        assert!(three_green_then_sideways(&candles("grgrrgrgdrgggrr")));
        // too short
        assert!(!three_green_then_sideways(&candles("grgrrgrgdrgg")));
        // run of three inside the sideways window
        assert!(!three_green_then_sideways(&candles("rrrgrgrgdrggg")));
        assert!(!three_green_then_sideways(&candles("grgrrgrgdrggr")));
    }

    #[test]
    fn test_sideways_then_three_red() {
        assert!(sideways_then_three_red(&candles("rrrgrgrgdrgrg")));
        assert!(!sideways_then_three_red(&candles("rrgrgrgrgdrgrg")));
        assert!(!sideways_then_three_red(&candles("rrrgggrgdrgrg")));
        assert!(!sideways_then_three_red(&candles("rrrgrg")));
    }

    #[test]
    fn test_detect_pattern_sides() {
        assert_eq!(
            detect_pattern(&candles("grgrrgrgdrggg")),
            Some((CandlePattern::ThreeGreenThenSideways, SignalSide::Buy))
        );
        assert_eq!(
            detect_pattern(&candles("rrrgrgrgdrgrg")),
            Some((CandlePattern::SidewaysThenThreeRed, SignalSide::Sell))
        );
        assert_eq!(detect_pattern(&candles("ggggggggggggg")), None);
    }

    #[tokio::test]
    async fn test_fallback_to_top_symbols() {
        let market = FakeMarket::with_symbols(&["BTCUSDT", "ETHUSDT"])
            .candles("BTCUSDT", "5", candles("grgrrgrgdrggg"))
            .candles("ETHUSDT", "5", candles("ggggggggggggg"));
        let job = SignalStrategyJob::new(Arc::new(market));
        let params = JobParams::SignalStrategy(SignalStrategyParams {
            fallback_top_n: 2,
            timeframes: vec!["5".into()],
        });
        let (_registry, ctx, _cancel) = context(params);

        let report = match job.run(ctx).await.unwrap() {
            TaskResult::SignalStrategy(report) => report,
            other => panic!("unexpected result: {:?}", other),
        };

        assert_eq!(report.analyzed_symbols, 2);
        assert_eq!(report.selected_timeframes, vec!["5"]);
        assert_eq!(report.signals.len(), 1);
        assert_eq!(report.signals[0].symbol, "BTCUSDT");
        assert_eq!(report.signals[0].side, SignalSide::Buy);
        assert_eq!(report.signals[0].price, 101.0);
    }

    #[tokio::test]
    async fn test_uses_latest_timeframe_review() {
        let market = FakeMarket::with_symbols(&["BTCUSDT"])
            .candles("SOLUSDT", "15", candles("rrrgrgrgdrgrg"));
        let job = SignalStrategyJob::new(Arc::new(market));
        let (registry, ctx, _cancel) = context(JobParams::default_for(JobType::SignalStrategy));

        let review = registry.create(JobType::TimeframeReview, JobParams::default_for(JobType::TimeframeReview));
        registry.update(review.id, TaskUpdate::running("go")).unwrap();
        registry
            .update(
                review.id,
                TaskUpdate::completed(TaskResult::TimeframeReview(TimeframeReviewReport {
                    trading_symbols: vec!["SOLUSDT".into()],
                    selected_timeframes: vec!["15".into()],
                    scores: vec![],
                })),
            )
            .unwrap();

        let report = match job.run(ctx).await.unwrap() {
            TaskResult::SignalStrategy(report) => report,
            other => panic!("unexpected result: {:?}", other),
        };

        assert_eq!(report.analyzed_symbols, 1);
        assert_eq!(report.selected_timeframes, vec!["15"]);
        assert_eq!(report.signals.len(), 1);
        assert_eq!(report.signals[0].symbol, "SOLUSDT");
        assert_eq!(report.signals[0].pattern, CandlePattern::SidewaysThenThreeRed);
    }
}
