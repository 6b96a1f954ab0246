use serde::{Deserialize, Serialize};

use crate::models::task::JobType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRow {
    pub symbol: String,
    pub last_price: f64,
    pub change_24h_pct: f64,
    pub turnover_24h: f64,
    /// Return over the last 7 daily candles, as a fraction
    pub return_7d: Option<f64>,
    /// Return over the whole lookback window, as a fraction
    pub return_30d: Option<f64>,
    /// Standard deviation of daily returns
    pub volatility: Option<f64>,
    /// Mean percentile rank of the return columns, in [0, 1]
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub data: Vec<AnalysisRow>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolNewsEvaluation {
    pub symbol: String,
    pub news_count: usize,
    pub overall_score: f64,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsEvaluationSummary {
    pub total_symbols: usize,
    pub total_news: usize,
    pub evaluation_model: String,
    pub top_performer: Option<String>,
    pub average_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsEvaluationReport {
    pub data: Vec<SymbolNewsEvaluation>,
    pub count: usize,
    pub summary: NewsEvaluationSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandlePattern {
    /// Three green candles followed by ten sideways candles
    ThreeGreenThenSideways,
    /// Ten sideways candles followed by three red candles
    SidewaysThenThreeRed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub symbol: String,
    pub timeframe: String,
    pub pattern: CandlePattern,
    pub side: SignalSide,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalStrategyReport {
    pub analyzed_symbols: usize,
    pub selected_timeframes: Vec<String>,
    pub signals: Vec<TradeSignal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeScore {
    pub timeframe: String,
    /// Mean absolute candle body as a percentage of the open price
    pub mean_body_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeReviewReport {
    pub trading_symbols: Vec<String>,
    pub selected_timeframes: Vec<String>,
    pub scores: Vec<TimeframeScore>,
}

/// Result payload of a completed task, keyed by job type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum TaskResult {
    Analysis(AnalysisReport),
    NewsEvaluation(NewsEvaluationReport),
    SignalStrategy(SignalStrategyReport),
    TimeframeReview(TimeframeReviewReport),
}

impl TaskResult {
    pub fn job_type(&self) -> JobType {
        match self {
            TaskResult::Analysis(_) => JobType::Analysis,
            TaskResult::NewsEvaluation(_) => JobType::NewsEvaluation,
            TaskResult::SignalStrategy(_) => JobType::SignalStrategy,
            TaskResult::TimeframeReview(_) => JobType::TimeframeReview,
        }
    }

    /// Human-readable completion message stored on the task
    pub fn summary_line(&self) -> String {
        match self {
            TaskResult::Analysis(r) => format!("Analysis completed, {} results", r.count),
            TaskResult::NewsEvaluation(r) => format!(
                "News evaluation completed, {} symbols, {} news items",
                r.count, r.summary.total_news
            ),
            TaskResult::SignalStrategy(r) => format!(
                "Signal strategy completed, {} symbols checked, {} signals",
                r.analyzed_symbols,
                r.signals.len()
            ),
            TaskResult::TimeframeReview(r) => format!(
                "Timeframe review completed, selected {}",
                r.selected_timeframes.join(", ")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_is_tagged_by_type() {
        let result = TaskResult::TimeframeReview(TimeframeReviewReport {
            trading_symbols: vec!["BTCUSDT".into()],
            selected_timeframes: vec!["5".into()],
            scores: vec![],
        });

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["type"], "timeframe_review");
        assert_eq!(json["payload"]["trading_symbols"][0], "BTCUSDT");
        assert_eq!(result.job_type(), JobType::TimeframeReview);
    }

    #[test]
    fn test_summary_line_mentions_counts() {
        let result = TaskResult::Analysis(AnalysisReport { data: vec![], count: 0 });
        assert_eq!(result.summary_line(), "Analysis completed, 0 results");
    }
}
