use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use cryptoscope_backend::app;
use cryptoscope_backend::config::AppConfig;
use cryptoscope_backend::external::bybit::BybitProvider;
use cryptoscope_backend::external::market_data::MarketDataProvider;
use cryptoscope_backend::external::news_evaluator::HttpNewsEvaluator;
use cryptoscope_backend::jobs::analysis_job::AnalysisJob;
use cryptoscope_backend::jobs::news_evaluation_job::NewsEvaluationJob;
use cryptoscope_backend::jobs::signal_strategy_job::SignalStrategyJob;
use cryptoscope_backend::jobs::timeframe_review_job::TimeframeReviewJob;
use cryptoscope_backend::jobs::JobCatalog;
use cryptoscope_backend::logging::{init_logging, LoggingConfig};
use cryptoscope_backend::models::{JobType, StopOutcome, StopTarget};
use cryptoscope_backend::services::job_scheduler_service::JobSchedulerService;
use cryptoscope_backend::state::AppState;

/// Per-symbol evaluation involves fetching news and a model call
const NEWS_EVALUATOR_TIMEOUT: Duration = Duration::from_secs(120);

/// How long stopped tasks get to reach `cancelled` before the process exits
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize logging FIRST
    init_logging(LoggingConfig::from_env())?;

    let config = AppConfig::from_env()?;

    let market: Arc<dyn MarketDataProvider> = Arc::new(BybitProvider::new(&config.bybit_base_url)?);
    tracing::info!("📊 Using market data from {}", config.bybit_base_url);

    let mut catalog = JobCatalog::new()
        .register(JobType::Analysis, AnalysisJob::new(market.clone()))
        .register(JobType::SignalStrategy, SignalStrategyJob::new(market.clone()))
        .register(JobType::TimeframeReview, TimeframeReviewJob::new(market.clone()));

    match &config.news_evaluator_url {
        Some(url) => {
            tracing::info!("📰 Using news evaluator at {}", url);
            let evaluator = Arc::new(HttpNewsEvaluator::new(url, NEWS_EVALUATOR_TIMEOUT)?);
            catalog = catalog.register(JobType::NewsEvaluation, NewsEvaluationJob::new(market, evaluator));
        }
        None => tracing::warn!("⚠️  NEWS_EVALUATOR_URL not set, news evaluation is disabled"),
    }

    let scheduler = Arc::new(JobSchedulerService::new(&config.scheduler, catalog));
    scheduler.start().await?;

    let state = AppState {
        scheduler: scheduler.clone(),
    };
    let app = app::create_app(state, config.cors_allow_any);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("🚀 Cryptoscope backend running at http://{}/", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler.clone()))
        .await?;

    if let StopOutcome::Stopping { task_ids } = scheduler.stop_tasks(StopTarget::All)? {
        tracing::info!("Waiting up to {}s for {} task(s) to stop", SHUTDOWN_GRACE.as_secs(), task_ids.len());
        scheduler.wait_until_idle(SHUTDOWN_GRACE).await;
    }
    tracing::info!("👋 Shutdown complete");

    Ok(())
}

/// Resolves on Ctrl-C after stopping the scheduler, which also closes the
/// open SSE streams so the server can drain.
async fn shutdown_signal(scheduler: Arc<JobSchedulerService>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Ctrl-C received, shutting down");

    if let Err(e) = scheduler.stop().await {
        tracing::error!("Failed to stop job scheduler: {}", e);
    }
}
