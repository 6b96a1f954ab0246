use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::job_params::JobParams;
use crate::models::task_result::TaskResult;

pub type TaskId = Uuid;

/// Closed set of job kinds the scheduler knows how to run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Market-wide symbol analysis (momentum/volatility ranking)
    Analysis,

    /// News sentiment evaluation through an external evaluator
    NewsEvaluation,

    /// Short-interval candle pattern strategy
    SignalStrategy,

    /// Periodic review selecting symbols and timeframes for the strategy
    TimeframeReview,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::Analysis,
        JobType::NewsEvaluation,
        JobType::SignalStrategy,
        JobType::TimeframeReview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Analysis => "analysis",
            JobType::NewsEvaluation => "news_evaluation",
            JobType::SignalStrategy => "signal_strategy",
            JobType::TimeframeReview => "timeframe_review",
        }
    }

    /// Suffix used for per-type environment variables (`SCHEDULE_ANALYSIS`, ...)
    pub fn env_key(&self) -> String {
        self.as_str().to_uppercase()
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown job type: {}", s))
    }
}

/// Lifecycle state of a task: `pending -> running -> {completed | failed | cancelled}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One execution attempt of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: TaskStatus,
    /// Always within [0.0, 1.0]; never decreases
    pub progress: f64,
    pub message: String,
    pub params: JobParams,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Present only when `status = completed`
    pub result: Option<TaskResult>,
    /// Present only when `status` is `failed` or `cancelled`
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn new(job_type: JobType, params: JobParams) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            status: TaskStatus::Pending,
            progress: 0.0,
            message: format!("{} task queued", job_type),
            params,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Partial update applied atomically to a `TaskRecord` by the registry
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn running(message: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Running),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn progress(progress: f64, message: impl Into<String>) -> Self {
        Self {
            progress: Some(progress),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn completed(result: TaskResult) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            progress: Some(1.0),
            message: Some(result.summary_line()),
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            status: Some(TaskStatus::Failed),
            message: Some(format!("Task failed: {}", error)),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn cancelled(reason: Option<String>) -> Self {
        Self {
            status: Some(TaskStatus::Cancelled),
            message: Some("Task cancelled".to_string()),
            error: reason,
            ..Default::default()
        }
    }
}
