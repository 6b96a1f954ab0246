//! News Evaluation Job
//!
//! Scores the recent news of the top symbols by turnover. Fetching and
//! language-model scoring happen behind [`NewsEvaluator`]; this job only
//! drives it symbol by symbol and aggregates the scores.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::JobError;
use crate::external::market_data::MarketDataProvider;
use crate::external::news_evaluator::NewsEvaluator;
use crate::jobs::{unexpected_params, Job, JobContext};
use crate::models::{
    JobParams, JobType, NewsEvaluationReport, NewsEvaluationSummary, SymbolNewsEvaluation, TaskResult,
};

pub struct NewsEvaluationJob {
    market: Arc<dyn MarketDataProvider>,
    evaluator: Arc<dyn NewsEvaluator>,
}

impl NewsEvaluationJob {
    pub fn new(market: Arc<dyn MarketDataProvider>, evaluator: Arc<dyn NewsEvaluator>) -> Self {
        Self { market, evaluator }
    }
}

#[async_trait]
impl Job for NewsEvaluationJob {
    async fn run(&self, ctx: JobContext) -> Result<TaskResult, JobError> {
        let params = match &ctx.params {
            JobParams::NewsEvaluation(p) => p.clone(),
            other => return Err(unexpected_params(JobType::NewsEvaluation, other)),
        };

        ctx.checkpoint(0.1, format!("Fetching top {} symbols by turnover", params.top_n))?;
        let symbols: Vec<String> = self
            .market
            .top_symbols_by_turnover(params.top_n)
            .await?
            .into_iter()
            .map(|t| t.symbol)
            .collect();

        info!("📰 Evaluating news for {} symbols with {}", symbols.len(), params.model);

        let total = symbols.len().max(1);
        let mut rows = Vec::with_capacity(symbols.len());
        for (i, symbol) in symbols.into_iter().enumerate() {
            ctx.checkpoint(
                0.3 + 0.6 * i as f64 / total as f64,
                format!("Evaluating {} news ({}/{})", symbol, i + 1, total),
            )?;

            let row = match self
                .evaluator
                .evaluate(&symbol, params.news_per_symbol, &params.model)
                .await
            {
                Ok(evaluation) => SymbolNewsEvaluation {
                    symbol,
                    news_count: evaluation.news_count,
                    overall_score: evaluation.overall_score,
                    summary: evaluation.summary,
                },
                Err(e) => {
                    warn!("News evaluation failed for {}: {}", symbol, e);
                    SymbolNewsEvaluation {
                        summary: format!("Evaluation failed: {}", e),
                        symbol,
                        news_count: 0,
                        overall_score: 0.0,
                    }
                }
            };
            rows.push(row);
        }

        ctx.checkpoint(0.95, "Summarising evaluations")?;
        Ok(TaskResult::NewsEvaluation(summarise(rows, &params.model)))
    }
}

fn summarise(mut rows: Vec<SymbolNewsEvaluation>, model: &str) -> NewsEvaluationReport {
    rows.sort_by(|a, b| b.overall_score.total_cmp(&a.overall_score));

    let average_score = if rows.is_empty() {
        0.0
    } else {
        rows.iter().map(|r| r.overall_score).sum::<f64>() / rows.len() as f64
    };

    let summary = NewsEvaluationSummary {
        total_symbols: rows.len(),
        total_news: rows.iter().map(|r| r.news_count).sum(),
        evaluation_model: model.to_string(),
        top_performer: rows.first().map(|r| r.symbol.clone()),
        average_score,
    };

    NewsEvaluationReport {
        count: rows.len(),
        data: rows,
        summary,
    }
}
