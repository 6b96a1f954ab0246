use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::models::task::{JobType, TaskId, TaskRecord};

/// Recurrence rule of a job type.
///
/// Textual form: `daily@HH:MM` (UTC) or `every@<seconds>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Recurrence {
    DailyAt { hour: u32, minute: u32 },
    Every { seconds: u64 },
}

/// Longest accepted `every@` interval: one year
pub const MAX_INTERVAL_SECS: u64 = 366 * 24 * 60 * 60;

impl Recurrence {
    /// First trigger instant strictly after `after`, or `None` when it falls
    /// outside the representable date range.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Recurrence::DailyAt { hour, minute } => {
                let candidate = after
                    .date_naive()
                    .and_hms_opt(hour, minute, 0)
                    .map(|naive| Utc.from_utc_datetime(&naive))
                    .unwrap_or(after);
                if candidate > after {
                    Some(candidate)
                } else {
                    candidate.checked_add_signed(Duration::days(1))
                }
            }
            Recurrence::Every { seconds } => {
                let interval = Duration::try_seconds(i64::try_from(seconds).ok()?)?;
                after.checked_add_signed(interval)
            }
        }
    }
}

impl std::fmt::Display for Recurrence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recurrence::DailyAt { hour, minute } => write!(f, "daily@{:02}:{:02}", hour, minute),
            Recurrence::Every { seconds } => write!(f, "every@{}", seconds),
        }
    }
}

impl FromStr for Recurrence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s
            .trim()
            .split_once('@')
            .ok_or_else(|| format!("invalid recurrence '{}': expected daily@HH:MM or every@SECONDS", s))?;

        match kind {
            "daily" => {
                let (h, m) = value
                    .split_once(':')
                    .ok_or_else(|| format!("invalid daily time '{}': expected HH:MM", value))?;
                let hour: u32 = h.parse().map_err(|_| format!("invalid hour '{}'", h))?;
                let minute: u32 = m.parse().map_err(|_| format!("invalid minute '{}'", m))?;
                if hour > 23 || minute > 59 {
                    return Err(format!("daily time out of range: {}", value));
                }
                Ok(Recurrence::DailyAt { hour, minute })
            }
            "every" => {
                let seconds: u64 = value
                    .parse()
                    .map_err(|_| format!("invalid interval '{}'", value))?;
                if seconds == 0 {
                    return Err("interval must be greater than zero".to_string());
                }
                if seconds > MAX_INTERVAL_SECS {
                    return Err(format!("interval {}s exceeds the maximum of {}s", seconds, MAX_INTERVAL_SECS));
                }
                Ok(Recurrence::Every { seconds })
            }
            other => Err(format!("unknown recurrence kind '{}'", other)),
        }
    }
}

impl From<Recurrence> for String {
    fn from(value: Recurrence) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Recurrence {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Per-type scheduling state. Tracks at most one occupying task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSlot {
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Gates timer-driven starts only; manual starts ignore it
    pub enabled: bool,
    /// `None` means the type is only ever started on demand
    pub recurrence: Option<Recurrence>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub current_task_id: Option<TaskId>,
}

impl SchedulerSlot {
    pub fn new(job_type: JobType, recurrence: Option<Recurrence>, enabled: bool, now: DateTime<Utc>) -> Self {
        Self {
            job_type,
            enabled,
            recurrence,
            last_run_at: None,
            next_run_at: recurrence.and_then(|r| r.next_after(now)),
            current_task_id: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.map_or(false, |next| now >= next)
    }
}

/// Slot state plus the records it refers to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotSnapshot {
    #[serde(flatten)]
    pub slot: SchedulerSlot,
    /// The occupying task while it is pending or running
    pub current_task: Option<TaskRecord>,
    /// Most recent task of this type, whatever its state
    pub last_task: Option<TaskRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub scheduler_running: bool,
    pub generated_at: DateTime<Utc>,
    pub slots: Vec<SlotSnapshot>,
}

impl SchedulerSnapshot {
    pub fn slot(&self, job_type: JobType) -> Option<&SlotSnapshot> {
        self.slots.iter().find(|s| s.slot.job_type == job_type)
    }
}

/// Push-channel message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SchedulerEvent {
    Snapshot(SchedulerSnapshot),
    Task(TaskRecord),
    Slot(SchedulerSlot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTarget {
    Type(JobType),
    Task(TaskId),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    /// Cancellation was signalled; the tasks reach `cancelled` asynchronously
    Stopping { task_ids: Vec<TaskId> },
    NothingToStop,
}
