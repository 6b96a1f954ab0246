use serde::{Deserialize, Serialize};

use crate::models::task::JobType;

pub const DEFAULT_NEWS_MODEL: &str = "gpt-oss-120b";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    /// Number of symbols ranked by 24h turnover to analyse
    pub top_n: usize,
    /// Daily candles fetched per symbol
    pub lookback_days: usize,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self { top_n: 20, lookback_days: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsEvaluationParams {
    pub top_n: usize,
    pub news_per_symbol: usize,
    pub model: String,
}

impl Default for NewsEvaluationParams {
    fn default() -> Self {
        Self {
            top_n: 10,
            news_per_symbol: 3,
            model: DEFAULT_NEWS_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalStrategyParams {
    /// Symbols used when no timeframe review result is available
    pub fallback_top_n: usize,
    /// Kline intervals in minutes used when no timeframe review result is available
    pub timeframes: Vec<String>,
}

impl Default for SignalStrategyParams {
    fn default() -> Self {
        Self {
            fallback_top_n: 5,
            timeframes: vec!["3".into(), "5".into(), "15".into(), "30".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeframeReviewParams {
    pub top_n: usize,
    pub candidate_timeframes: Vec<String>,
    /// How many of the candidates to keep
    pub select: usize,
}

impl Default for TimeframeReviewParams {
    fn default() -> Self {
        Self {
            top_n: 5,
            candidate_timeframes: vec!["3".into(), "5".into(), "15".into(), "30".into(), "60".into()],
            select: 4,
        }
    }
}

/// Job-specific parameters, tagged by job type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobParams {
    Analysis(AnalysisParams),
    NewsEvaluation(NewsEvaluationParams),
    SignalStrategy(SignalStrategyParams),
    TimeframeReview(TimeframeReviewParams),
}

impl JobParams {
    /// Parameters used by automatic (timer-driven) triggers
    pub fn default_for(job_type: JobType) -> Self {
        match job_type {
            JobType::Analysis => JobParams::Analysis(AnalysisParams::default()),
            JobType::NewsEvaluation => JobParams::NewsEvaluation(NewsEvaluationParams::default()),
            JobType::SignalStrategy => JobParams::SignalStrategy(SignalStrategyParams::default()),
            JobType::TimeframeReview => JobParams::TimeframeReview(TimeframeReviewParams::default()),
        }
    }

    /// Builds the parameters for `job_type` from an optional request body.
    ///
    /// Missing fields take their defaults; numbers outside the accepted range
    /// are clamped rather than rejected.
    pub fn from_request(job_type: JobType, body: Option<serde_json::Value>) -> Result<Self, String> {
        let body = match body {
            None | Some(serde_json::Value::Null) => return Ok(Self::default_for(job_type)),
            Some(body) => body,
        };

        let parse_err = |e: serde_json::Error| format!("invalid {} parameters: {}", job_type, e);

        let params = match job_type {
            JobType::Analysis => JobParams::Analysis(serde_json::from_value(body).map_err(parse_err)?),
            JobType::NewsEvaluation => JobParams::NewsEvaluation(serde_json::from_value(body).map_err(parse_err)?),
            JobType::SignalStrategy => JobParams::SignalStrategy(serde_json::from_value(body).map_err(parse_err)?),
            JobType::TimeframeReview => JobParams::TimeframeReview(serde_json::from_value(body).map_err(parse_err)?),
        };

        Ok(params.normalized())
    }

    pub fn job_type(&self) -> JobType {
        match self {
            JobParams::Analysis(_) => JobType::Analysis,
            JobParams::NewsEvaluation(_) => JobType::NewsEvaluation,
            JobParams::SignalStrategy(_) => JobType::SignalStrategy,
            JobParams::TimeframeReview(_) => JobType::TimeframeReview,
        }
    }

    pub fn normalized(self) -> Self {
        match self {
            JobParams::Analysis(p) => JobParams::Analysis(AnalysisParams {
                top_n: p.top_n.clamp(1, 100),
                lookback_days: p.lookback_days.clamp(7, 200),
            }),
            JobParams::NewsEvaluation(p) => JobParams::NewsEvaluation(NewsEvaluationParams {
                top_n: p.top_n.clamp(1, 20),
                news_per_symbol: p.news_per_symbol.clamp(1, 10),
                model: if p.model.trim().is_empty() {
                    DEFAULT_NEWS_MODEL.to_string()
                } else {
                    p.model
                },
            }),
            JobParams::SignalStrategy(p) => {
                let timeframes = if p.timeframes.is_empty() {
                    SignalStrategyParams::default().timeframes
                } else {
                    p.timeframes
                };
                JobParams::SignalStrategy(SignalStrategyParams {
                    fallback_top_n: p.fallback_top_n.clamp(1, 20),
                    timeframes,
                })
            }
            JobParams::TimeframeReview(p) => {
                let candidates = if p.candidate_timeframes.is_empty() {
                    TimeframeReviewParams::default().candidate_timeframes
                } else {
                    p.candidate_timeframes
                };
                let select = p.select.clamp(1, candidates.len());
                JobParams::TimeframeReview(TimeframeReviewParams {
                    top_n: p.top_n.clamp(1, 20),
                    candidate_timeframes: candidates,
                    select,
                })
            }
        }
    }
}
