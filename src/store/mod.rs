//! Storage capability for job state, queue latency and demand history
//!
//! Tables (see `/sql/` directory):
//! - `workflow_jobs` - UPSERT on (id, created_at)
//! - `queue_time_durations` - INSERT (append-only, not deduplicated)
//! - `historical_entries` - INSERT (append-only, one row per ingested event)
//! - `daily_runner_stats` / `weekly_runner_stats` / `monthly_runner_stats` -
//!   read-only here, maintained by the rollup refresher
//!
//! The store is constructed once at startup and shared as
//! `Arc<dyn DemandStore>` by the ingestion pipeline, the history resolver and
//! the aggregation engine.

pub mod memory;
pub mod retry;
pub mod sqlite;

use crate::error::PersistenceError;
use crate::types::{HistoricalEntry, JobRecord, RollupPeriod, RollupRow, RunnerCategory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub use memory::{InMemoryDemandStore, StoreOp};
pub use retry::RetryPolicy;
pub use sqlite::{run_schema_migrations, SqliteDemandStore};

#[async_trait]
pub trait DemandStore: Send + Sync {
    /// Insert the job if (id, created_at) is unseen, otherwise overwrite
    /// status, category, started_at and completed_at in place.
    ///
    /// Retries transient backend failures (3 attempts by default). On `Err`
    /// the caller must not assume the write happened.
    async fn upsert_job(&self, job: &JobRecord) -> Result<(), PersistenceError>;

    /// Number of jobs with status `queued`
    async fn count_queued(&self) -> Result<i64, PersistenceError>;

    /// Identifiers of `in_progress` jobs running in `category`
    async fn list_running(&self, category: RunnerCategory) -> Result<Vec<i64>, PersistenceError>;

    /// Append one queue wait sample (millisecond resolution, recorded now)
    async fn record_queue_sample(
        &self,
        job_id: i64,
        created_at: DateTime<Utc>,
        wait: Duration,
    ) -> Result<(), PersistenceError>;

    /// Mean queue wait across all samples; zero when there are none
    async fn average_queue_time(&self) -> Result<Duration, PersistenceError>;

    /// Append one demand snapshot
    async fn append_snapshot(&self, entry: &HistoricalEntry) -> Result<(), PersistenceError>;

    /// Raw snapshots at or after `since`, oldest first
    async fn snapshots_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistoricalEntry>, PersistenceError>;

    /// Rollup buckets at or after `since`, oldest first
    async fn rollups_since(
        &self,
        period: RollupPeriod,
        since: DateTime<Utc>,
    ) -> Result<Vec<RollupRow>, PersistenceError>;
}
