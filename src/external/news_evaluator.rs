use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::errors::JobError;

#[derive(Debug, Error)]
pub enum NewsEvaluatorError {
    #[error("network error: {0}")]
    Network(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<NewsEvaluatorError> for JobError {
    fn from(e: NewsEvaluatorError) -> Self {
        JobError::Failed(format!("news evaluator: {}", e))
    }
}

/// Score of the recent news of one symbol
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewsEvaluation {
    pub news_count: usize,
    /// 0 (very negative) to 10 (very positive)
    pub overall_score: f64,
    #[serde(default)]
    pub summary: String,
}

#[async_trait]
pub trait NewsEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        symbol: &str,
        news_per_symbol: usize,
        model: &str,
    ) -> Result<NewsEvaluation, NewsEvaluatorError>;
}

#[derive(Debug, Serialize)]
struct EvaluateRequest<'a> {
    symbol: &'a str,
    news_per_symbol: usize,
    model: &'a str,
}

/// Delegates fetching and language-model scoring to an HTTP service
pub struct HttpNewsEvaluator {
    client: reqwest::Client,
    url: String,
}

impl HttpNewsEvaluator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NewsEvaluatorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NewsEvaluatorError::Network(e.to_string()))?;

        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl NewsEvaluator for HttpNewsEvaluator {
    async fn evaluate(
        &self,
        symbol: &str,
        news_per_symbol: usize,
        model: &str,
    ) -> Result<NewsEvaluation, NewsEvaluatorError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&EvaluateRequest {
                symbol,
                news_per_symbol,
                model,
            })
            .send()
            .await
            .map_err(|e| NewsEvaluatorError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NewsEvaluatorError::BadResponse(format!(
                "evaluator returned HTTP {} for {}",
                resp.status(),
                symbol
            )));
        }

        let evaluation: NewsEvaluation = resp
            .json()
            .await
            .map_err(|e| NewsEvaluatorError::Parse(e.to_string()))?;

        if !evaluation.overall_score.is_finite() {
            return Err(NewsEvaluatorError::BadResponse(format!("non-finite score for {}", symbol)));
        }

        Ok(evaluation)
    }
}
