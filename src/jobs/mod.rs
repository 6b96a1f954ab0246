//! Background Jobs Module
//!
//! Long-running units of work started by the scheduler, either on their
//! recurrence or on demand. Every job implements [`Job`] and receives a
//! [`JobContext`] carrying its parameters, a progress sink and a
//! cancellation token.
//!
//! # Available Jobs
//!
//! - `analysis_job` - Ranks the top symbols by turnover using recent daily candles
//! - `news_evaluation_job` - Scores recent news per symbol through an external evaluator
//! - `signal_strategy_job` - Scans short-interval candles for entry/exit patterns
//! - `timeframe_review_job` - Selects the symbols and timeframes the strategy watches
//!
//! # Cancellation
//!
//! Cancellation is cooperative. Jobs call [`JobContext::checkpoint`] at least
//! once per symbol, so the latency between a stop request and the job exiting
//! is bounded by one external round trip (the HTTP clients time out after
//! 10 seconds). A job that never checks is terminated by the runner's
//! watchdog once its maximum runtime elapses.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::errors::{AppError, JobError};
use crate::models::{JobParams, JobType, TaskId, TaskResult, TaskUpdate};
use crate::services::task_registry::TaskRegistry;

pub mod analysis_job;
pub mod news_evaluation_job;
pub mod signal_strategy_job;
pub mod timeframe_review_job;

#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self, ctx: JobContext) -> Result<TaskResult, JobError>;
}

/// Progress sink bound to one task record
#[derive(Clone)]
pub struct ProgressReporter {
    registry: Arc<TaskRegistry>,
    task_id: TaskId,
}

impl ProgressReporter {
    pub fn new(registry: Arc<TaskRegistry>, task_id: TaskId) -> Self {
        Self { registry, task_id }
    }

    /// Values are clamped to [0, 1]; backward movement is ignored
    pub fn report(&self, progress: f64, message: impl Into<String>) {
        let _ = self
            .registry
            .update(self.task_id, TaskUpdate::progress(progress, message));
    }
}

pub struct JobContext {
    pub task_id: TaskId,
    pub params: JobParams,
    progress: ProgressReporter,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(task_id: TaskId, params: JobParams, progress: ProgressReporter, cancel: CancellationToken) -> Self {
        Self {
            task_id,
            params,
            progress,
            cancel,
        }
    }

    pub fn report(&self, progress: f64, message: impl Into<String>) {
        self.progress.report(progress, message);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once a stop has been requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Reports progress, or returns `JobError::Cancelled` if a stop was requested
    pub fn checkpoint(&self, progress: f64, message: impl Into<String>) -> Result<(), JobError> {
        if self.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        self.report(progress, message);
        Ok(())
    }

    /// Latest completed result of another job type
    pub fn latest_result(&self, job_type: JobType) -> Option<TaskResult> {
        self.progress
            .registry
            .latest_completed(job_type)
            .and_then(|record| record.result)
    }
}

/// Jobs registered per type
#[derive(Clone, Default)]
pub struct JobCatalog {
    jobs: HashMap<JobType, Arc<dyn Job>>,
}

impl JobCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, job_type: JobType, job: impl Job + 'static) -> Self {
        self.jobs.insert(job_type, Arc::new(job));
        self
    }

    pub fn get(&self, job_type: JobType) -> Result<Arc<dyn Job>, AppError> {
        self.jobs
            .get(&job_type)
            .cloned()
            .ok_or(AppError::NotConfigured(job_type))
    }

    pub fn contains(&self, job_type: JobType) -> bool {
        self.jobs.contains_key(&job_type)
    }
}

/// Fails with a descriptive error when a job receives another type's parameters
pub(crate) fn unexpected_params(expected: JobType, params: &JobParams) -> JobError {
    JobError::Failed(format!(
        "{} job received {} parameters",
        expected,
        params.job_type()
    ))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::external::market_data::{MarketDataError, MarketDataProvider};
    use crate::models::{Candle, SymbolTicker};
    use crate::services::status_broadcaster::EventPublisher;

    /// Registry plus a running record, for driving a job outside the runner
    pub fn context(params: JobParams) -> (Arc<TaskRegistry>, JobContext, CancellationToken) {
        let registry = Arc::new(TaskRegistry::new(EventPublisher::new(256), 100));
        let record = registry.create(params.job_type(), params.clone());
        registry.update(record.id, TaskUpdate::running("test")).unwrap();

        let cancel = CancellationToken::new();
        let ctx = JobContext::new(
            record.id,
            params,
            ProgressReporter::new(registry.clone(), record.id),
            cancel.clone(),
        );
        (registry, ctx, cancel)
    }

    /// Canned market data keyed by `(symbol, interval)`
    #[derive(Default)]
    pub struct FakeMarket {
        pub tickers: Vec<SymbolTicker>,
        pub klines: HashMap<(String, String), Vec<Candle>>,
        pub failing_symbols: Vec<String>,
    }

    impl FakeMarket {
        pub fn with_symbols(symbols: &[&str]) -> Self {
            let tickers = symbols
                .iter()
                .enumerate()
                .map(|(i, symbol)| SymbolTicker {
                    symbol: symbol.to_string(),
                    last_price: 100.0,
                    change_24h_pct: 0.0,
                    turnover_24h: 1_000_000.0 / (i + 1) as f64,
                })
                .collect();
            Self {
                tickers,
                ..Self::default()
            }
        }

        pub fn candles(mut self, symbol: &str, interval: &str, candles: Vec<Candle>) -> Self {
            self.klines.insert((symbol.to_string(), interval.to_string()), candles);
            self
        }

        pub fn failing(mut self, symbol: &str) -> Self {
            self.failing_symbols.push(symbol.to_string());
            self
        }
    }

    #[async_trait]
    impl MarketDataProvider for FakeMarket {
        async fn top_symbols_by_turnover(&self, n: usize) -> Result<Vec<SymbolTicker>, MarketDataError> {
            Ok(self.tickers.iter().take(n).cloned().collect())
        }

        async fn klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>, MarketDataError> {
            if self.failing_symbols.iter().any(|s| s == symbol) {
                return Err(MarketDataError::Network("connection reset".into()));
            }
            Ok(self
                .klines
                .get(&(symbol.to_string(), interval.to_string()))
                .map(|candles| candles.iter().take(limit).cloned().collect())
                .unwrap_or_default())
        }
    }

    /// Newest-first candles from a colour string: `g` green, `r` red, `d` doji
    pub fn candles(colours: &str) -> Vec<Candle> {
        let now = chrono::Utc::now();
        colours
            .chars()
            .enumerate()
            .map(|(i, c)| {
                let (open, close) = match c {
                    'g' => (100.0, 101.0),
                    'r' => (101.0, 100.0),
                    _ => (100.0, 100.0),
                };
                Candle {
                    start_time: now - chrono::Duration::minutes(i as i64),
                    open,
                    high: 102.0,
                    low: 99.0,
                    close,
                    volume: 1.0,
                    turnover: close,
                }
            })
            .collect()
    }
}
