use std::collections::HashMap;
use std::time::Duration;

use crate::models::{JobType, Recurrence};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_BYBIT_BASE_URL: &str = "https://api.bybit.com";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub bybit_base_url: String,
    pub news_evaluator_url: Option<String>,
    pub cors_allow_any: bool,
    pub scheduler: SchedulerConfig,
}

/// Scheduling knobs, per job type where it matters
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub enabled: bool,
    pub recurrences: HashMap<JobType, Option<Recurrence>>,
    pub max_runtime: HashMap<JobType, Duration>,
    pub retention: usize,
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            enabled: true,
            recurrences: JobType::ALL
                .iter()
                .map(|job_type| (*job_type, Some(default_recurrence(*job_type))))
                .collect(),
            max_runtime: JobType::ALL
                .iter()
                .map(|job_type| (*job_type, default_max_runtime(*job_type)))
                .collect(),
            retention: 500,
            event_capacity: 1024,
        }
    }
}

impl SchedulerConfig {
    pub fn recurrence(&self, job_type: JobType) -> Option<Recurrence> {
        self.recurrences.get(&job_type).copied().flatten()
    }
}

pub fn default_recurrence(job_type: JobType) -> Recurrence {
    match job_type {
        JobType::Analysis => Recurrence::DailyAt { hour: 0, minute: 0 },
        JobType::NewsEvaluation => Recurrence::DailyAt { hour: 0, minute: 0 },
        JobType::TimeframeReview => Recurrence::DailyAt { hour: 0, minute: 15 },
        JobType::SignalStrategy => Recurrence::Every { seconds: 180 },
    }
}

pub fn default_max_runtime(job_type: JobType) -> Duration {
    match job_type {
        JobType::Analysis | JobType::NewsEvaluation => Duration::from_secs(3600),
        JobType::TimeframeReview => Duration::from_secs(900),
        // Must finish before the next 180s trigger comes due.
        JobType::SignalStrategy => Duration::from_secs(170),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut scheduler = SchedulerConfig::default();

        if let Some(secs) = lookup("SCHEDULER_TICK_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| format!("SCHEDULER_TICK_SECS must be an integer, got '{}'", secs))?;
            scheduler.tick_interval = Duration::from_secs(secs);
        }
        if let Some(enabled) = lookup("SCHEDULER_ENABLED") {
            scheduler.enabled = parse_bool("SCHEDULER_ENABLED", &enabled)?;
        }
        if let Some(retention) = lookup("TASK_RETENTION") {
            scheduler.retention = retention
                .parse()
                .map_err(|_| format!("TASK_RETENTION must be an integer, got '{}'", retention))?;
        }

        for job_type in JobType::ALL {
            let key = format!("SCHEDULE_{}", job_type.env_key());
            if let Some(value) = lookup(&key) {
                let recurrence = match value.trim() {
                    "off" | "" => None,
                    rule => Some(rule.parse::<Recurrence>().map_err(|e| format!("{}: {}", key, e))?),
                };
                scheduler.recurrences.insert(job_type, recurrence);
            }

            let key = format!("MAX_RUNTIME_{}_SECS", job_type.env_key());
            if let Some(value) = lookup(&key) {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| format!("{} must be an integer, got '{}'", key, value))?;
                scheduler.max_runtime.insert(job_type, Duration::from_secs(secs));
            }
        }

        let config = Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            bybit_base_url: lookup("BYBIT_BASE_URL").unwrap_or_else(|| DEFAULT_BYBIT_BASE_URL.to_string()),
            news_evaluator_url: lookup("NEWS_EVALUATOR_URL").filter(|url| !url.trim().is_empty()),
            cors_allow_any: match lookup("CORS_ALLOW_ANY") {
                Some(value) => parse_bool("CORS_ALLOW_ANY", &value)?,
                None => false,
            },
            scheduler,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.scheduler.tick_interval.is_zero() {
            return Err("SCHEDULER_TICK_SECS must be greater than zero".to_string());
        }
        if self.scheduler.retention == 0 {
            return Err("TASK_RETENTION must be greater than zero".to_string());
        }
        if let Some((job_type, _)) = self.scheduler.max_runtime.iter().find(|(_, d)| d.is_zero()) {
            return Err(format!("MAX_RUNTIME_{}_SECS must be greater than zero", job_type.env_key()));
        }
        url::Url::parse(&self.bybit_base_url).map_err(|e| format!("BYBIT_BASE_URL is invalid: {}", e))?;
        if let Some(news_url) = &self.news_evaluator_url {
            url::Url::parse(news_url).map_err(|e| format!("NEWS_EVALUATOR_URL is invalid: {}", e))?;
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(format!("{} must be true or false, got '{}'", key, other)),
    }
}
