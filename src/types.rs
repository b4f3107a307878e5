//! Core data structures for runner job state and fleet demand
//!
//! Persisted shapes (see `/sql/`):
//! - `workflow_jobs` → `JobRecord`, keyed on (id, created_at)
//! - `queue_time_durations` → queue wait samples, keyed on (job_id, job_created_at, recorded_at)
//! - `historical_entries` → `HistoricalEntry`, keyed on timestamp
//! - `*_runner_stats` → `RollupRow` (maintained outside the engine)

use crate::error::InvalidPeriod;
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Label that marks a job as running on self-hosted infrastructure
pub const SELF_HOSTED_LABEL: &str = "self-hosted";

/// Source of "now" for snapshot timestamps and window boundaries
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Wall clock backed by `chrono::Utc::now()`
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Lifecycle status of a job, taken verbatim from the event action.
///
/// Unrecognized actions (e.g. `waiting`) are kept as opaque strings rather
/// than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Other(String),
}

impl JobStatus {
    pub fn from_action(action: &str) -> Self {
        match action {
            "queued" => JobStatus::Queued,
            "in_progress" => JobStatus::InProgress,
            "completed" => JobStatus::Completed,
            other => JobStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Other(s) => s,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution environment a job runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerCategory {
    GithubHosted,
    SelfHosted,
}

impl RunnerCategory {
    /// Presence of the `self-hosted` label decides the category; anything
    /// else runs on vendor-hosted runners.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        if labels.iter().any(|l| l.as_ref() == SELF_HOSTED_LABEL) {
            RunnerCategory::SelfHosted
        } else {
            RunnerCategory::GithubHosted
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerCategory::GithubHosted => "github-hosted",
            RunnerCategory::SelfHosted => "self-hosted",
        }
    }
}

/// Current lifecycle state of one job occurrence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub id: i64,
    pub status: JobStatus,
    pub category: RunnerCategory,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Time spent waiting for a runner (started_at - created_at).
    ///
    /// `None` when the job has not started. A start reported before creation
    /// (sender clock skew) counts as zero wait.
    pub fn queue_wait(&self) -> Option<Duration> {
        let started_at = self.started_at?;
        Some((started_at - self.created_at).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Verified `workflow_job` lifecycle event as delivered by the webhook sender
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkflowJobEvent {
    pub action: String,
    #[serde(rename = "workflow_job", alias = "job")]
    pub job: WorkflowJobPayload,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkflowJobPayload {
    pub id: i64,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowJobEvent {
    /// Map the event onto the job record it describes
    pub fn to_job_record(&self) -> JobRecord {
        JobRecord {
            id: self.job.id,
            status: JobStatus::from_action(&self.action),
            category: RunnerCategory::from_labels(&self.job.labels),
            created_at: self.job.created_at,
            started_at: self.job.started_at,
            completed_at: self.job.completed_at,
        }
    }
}

/// Demand counts at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoricalEntry {
    pub timestamp: DateTime<Utc>,
    pub count_self_hosted: i64,
    pub count_github_hosted: i64,
    pub count_queued: i64,
}

impl HistoricalEntry {
    /// Additive demand: running on either category plus waiting in queue
    pub fn total(&self) -> i64 {
        self.count_self_hosted + self.count_github_hosted + self.count_queued
    }
}

/// One bucket of a rollup view (hourly/6-hourly/daily averages and peak)
#[derive(Debug, Clone, PartialEq)]
pub struct RollupRow {
    pub bucket: DateTime<Utc>,
    pub avg_self_hosted: f64,
    pub avg_github_hosted: f64,
    pub avg_queued: f64,
    pub peak_total: i64,
}

impl RollupRow {
    /// Bucket averages rounded to the nearest whole job
    pub fn to_entry(&self) -> HistoricalEntry {
        HistoricalEntry {
            timestamp: self.bucket,
            count_self_hosted: self.avg_self_hosted.round() as i64,
            count_github_hosted: self.avg_github_hosted.round() as i64,
            count_queued: self.avg_queued.round() as i64,
        }
    }
}

/// Highest additive demand in a window and when it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeakDemand {
    pub total: i64,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PeakDemand {
    /// No data in the window
    pub fn none() -> Self {
        Self {
            total: 0,
            timestamp: None,
        }
    }
}

/// Selectable historical window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Hour,
    Day,
    Week,
    Month,
}

/// Periods served from pre-aggregated rollup tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollupPeriod {
    Day,
    Week,
    Month,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Hour => "hour",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
        }
    }

    /// Start of the trailing window ("last 1 unit of the period")
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Period::Hour => now - chrono::Duration::hours(1),
            Period::Day => now - chrono::Duration::days(1),
            Period::Week => now - chrono::Duration::weeks(1),
            Period::Month => now
                .checked_sub_months(Months::new(1))
                .unwrap_or_else(|| now - chrono::Duration::days(30)),
        }
    }

    /// Rollup view backing this period, `None` for the live hourly path
    pub fn rollup(&self) -> Option<RollupPeriod> {
        match self {
            Period::Hour => None,
            Period::Day => Some(RollupPeriod::Day),
            Period::Week => Some(RollupPeriod::Week),
            Period::Month => Some(RollupPeriod::Month),
        }
    }
}

impl FromStr for Period {
    type Err = InvalidPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(Period::Hour),
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            other => Err(InvalidPeriod(other.to_string())),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RollupPeriod {
    pub const ALL: [RollupPeriod; 3] = [RollupPeriod::Day, RollupPeriod::Week, RollupPeriod::Month];

    pub fn period(&self) -> Period {
        match self {
            RollupPeriod::Day => Period::Day,
            RollupPeriod::Week => Period::Week,
            RollupPeriod::Month => Period::Month,
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            RollupPeriod::Day => "daily_runner_stats",
            RollupPeriod::Week => "weekly_runner_stats",
            RollupPeriod::Month => "monthly_runner_stats",
        }
    }

    /// Bucket width in milliseconds: 1h for day, 6h for week, 1d for month
    pub fn bucket_millis(&self) -> i64 {
        const HOUR_MS: i64 = 60 * 60 * 1000;
        match self {
            RollupPeriod::Day => HOUR_MS,
            RollupPeriod::Week => 6 * HOUR_MS,
            RollupPeriod::Month => 24 * HOUR_MS,
        }
    }
}

/// Composite "current demand" view returned by the aggregation engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemandSnapshot {
    pub current_count_github_hosted: i64,
    pub current_count_self_hosted: i64,
    pub current_queued_count: i64,
    pub historical_data: Vec<HistoricalEntry>,
    pub avg_queue_time_ms: u64,
    pub peak_demand: i64,
    #[serde(serialize_with = "serialize_optional_timestamp")]
    pub peak_demand_timestamp: Option<DateTime<Utc>>,
    pub period: String,
}

/// Absent timestamps render as an empty string on the wire
fn serialize_optional_timestamp<S>(
    value: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
        None => serializer.serialize_str(""),
    }
}
