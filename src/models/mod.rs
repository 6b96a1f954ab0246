pub mod job_params;
pub mod market;
pub mod schedule;
pub mod task;
pub mod task_result;

pub use job_params::{
    AnalysisParams, JobParams, NewsEvaluationParams, SignalStrategyParams, TimeframeReviewParams,
};
pub use market::{Candle, SymbolTicker};
pub use schedule::{
    Recurrence, SchedulerEvent, SchedulerSlot, SchedulerSnapshot, SlotSnapshot, StopOutcome, StopTarget,
};
pub use task::{JobType, TaskId, TaskRecord, TaskStatus, TaskUpdate};
pub use task_result::{
    AnalysisReport, AnalysisRow, CandlePattern, NewsEvaluationReport, NewsEvaluationSummary, SignalSide,
    SignalStrategyReport, SymbolNewsEvaluation, TaskResult, TimeframeReviewReport, TimeframeScore, TradeSignal,
};
