//! In-memory `DemandStore` with failure injection
//!
//! Mirrors the SQLite store's semantics (natural-key upsert, append-only
//! samples and snapshots, ordered window reads) so the ingestion pipeline and
//! aggregation engine can be exercised without a database. Rollup rows are
//! seeded directly, standing in for the external materializer.

use super::{DemandStore, RetryPolicy};
use crate::error::PersistenceError;
use crate::types::{
    system_clock, Clock, HistoricalEntry, JobRecord, JobStatus, RollupPeriod, RollupRow,
    RunnerCategory,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Store operation, used to target injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    UpsertJob,
    CountQueued,
    ListRunning(RunnerCategory),
    RecordQueueSample,
    AverageQueueTime,
    AppendSnapshot,
    SnapshotsSince,
    RollupsSince,
}

impl StoreOp {
    fn name(&self) -> &'static str {
        match self {
            StoreOp::UpsertJob => "upsert_job",
            StoreOp::CountQueued => "count_queued",
            StoreOp::ListRunning(_) => "list_running",
            StoreOp::RecordQueueSample => "record_queue_sample",
            StoreOp::AverageQueueTime => "average_queue_time",
            StoreOp::AppendSnapshot => "append_snapshot",
            StoreOp::SnapshotsSince => "snapshots_since",
            StoreOp::RollupsSince => "rollups_since",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    Always,
    Transient { remaining: u32 },
}

/// Recorded queue wait sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSample {
    pub job_id: i64,
    pub job_created_at: DateTime<Utc>,
    pub wait: Duration,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    jobs: BTreeMap<(i64, DateTime<Utc>), JobRecord>,
    samples: Vec<QueueSample>,
    snapshots: Vec<HistoricalEntry>,
    rollups: HashMap<RollupPeriod, Vec<RollupRow>>,
    failures: HashMap<StoreOp, Failure>,
    calls: HashMap<StoreOp, u32>,
}

pub struct InMemoryDemandStore {
    state: Mutex<MemoryState>,
    retry: RetryPolicy,
    clock: Clock,
}

impl Default for InMemoryDemandStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            retry: RetryPolicy::default(),
            clock: system_clock(),
        }
    }
}

impl InMemoryDemandStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Clock stamping queue samples as they are recorded
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn lock(&self, op: StoreOp) -> Result<MutexGuard<'_, MemoryState>, PersistenceError> {
        self.state
            .lock()
            .map_err(|_| PersistenceError::transient(op.name(), "store mutex poisoned"))
    }

    /// Count the call and apply any injected failure
    fn enter(&self, op: StoreOp) -> Result<MutexGuard<'_, MemoryState>, PersistenceError> {
        let mut state = self.lock(op)?;
        *state.calls.entry(op).or_insert(0) += 1;

        match state.failures.get(&op).copied() {
            Some(Failure::Always) => Err(PersistenceError::new(op.name(), "injected failure")),
            Some(Failure::Transient { remaining }) if remaining > 0 => {
                state
                    .failures
                    .insert(op, Failure::Transient { remaining: remaining - 1 });
                Err(PersistenceError::transient(op.name(), "injected transient failure"))
            }
            _ => Ok(state),
        }
    }

    /// Make every call to `op` fail with a permanent error
    pub fn fail_operation(&self, op: StoreOp) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.insert(op, Failure::Always);
        }
    }

    /// Make the next `times` calls to `op` fail with a transient error
    pub fn fail_transiently(&self, op: StoreOp, times: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.insert(op, Failure::Transient { remaining: times });
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.clear();
        }
    }

    /// Seed a rollup bucket as the external materializer would
    pub fn insert_rollup(&self, period: RollupPeriod, row: RollupRow) {
        if let Ok(mut state) = self.state.lock() {
            let rows = state.rollups.entry(period).or_default();
            rows.retain(|r| r.bucket != row.bucket);
            rows.push(row);
            rows.sort_by_key(|r| r.bucket);
        }
    }

    /// Number of times `op` was invoked, including failed attempts
    pub fn calls(&self, op: StoreOp) -> u32 {
        self.state
            .lock()
            .map(|s| s.calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        self.state
            .lock()
            .map(|s| s.jobs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn queue_samples(&self) -> Vec<QueueSample> {
        self.state
            .lock()
            .map(|s| s.samples.clone())
            .unwrap_or_default()
    }

    pub fn snapshots(&self) -> Vec<HistoricalEntry> {
        self.state
            .lock()
            .map(|s| s.snapshots.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DemandStore for InMemoryDemandStore {
    async fn upsert_job(&self, job: &JobRecord) -> Result<(), PersistenceError> {
        self.retry
            .run(move || async move {
                let mut state = self.enter(StoreOp::UpsertJob)?;
                state.jobs.insert((job.id, job.created_at), job.clone());
                Ok(())
            })
            .await
    }

    async fn count_queued(&self) -> Result<i64, PersistenceError> {
        let state = self.enter(StoreOp::CountQueued)?;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .count() as i64)
    }

    async fn list_running(&self, category: RunnerCategory) -> Result<Vec<i64>, PersistenceError> {
        let state = self.enter(StoreOp::ListRunning(category))?;
        let mut ids: Vec<i64> = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::InProgress && j.category == category)
            .map(|j| j.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn record_queue_sample(
        &self,
        job_id: i64,
        created_at: DateTime<Utc>,
        wait: Duration,
    ) -> Result<(), PersistenceError> {
        let recorded_at = (self.clock)();
        let mut state = self.enter(StoreOp::RecordQueueSample)?;
        state.samples.push(QueueSample {
            job_id,
            job_created_at: created_at,
            wait: Duration::from_millis(wait.as_millis() as u64),
            recorded_at,
        });
        Ok(())
    }

    async fn average_queue_time(&self) -> Result<Duration, PersistenceError> {
        let state = self.enter(StoreOp::AverageQueueTime)?;
        if state.samples.is_empty() {
            return Ok(Duration::ZERO);
        }
        let total_ms: u128 = state.samples.iter().map(|s| s.wait.as_millis()).sum();
        let avg_ms = total_ms / state.samples.len() as u128;
        Ok(Duration::from_millis(avg_ms as u64))
    }

    async fn append_snapshot(&self, entry: &HistoricalEntry) -> Result<(), PersistenceError> {
        let mut state = self.enter(StoreOp::AppendSnapshot)?;
        state.snapshots.push(entry.clone());
        Ok(())
    }

    async fn snapshots_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistoricalEntry>, PersistenceError> {
        let state = self.enter(StoreOp::SnapshotsSince)?;
        let mut entries: Vec<HistoricalEntry> = state
            .snapshots
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }

    async fn rollups_since(
        &self,
        period: RollupPeriod,
        since: DateTime<Utc>,
    ) -> Result<Vec<RollupRow>, PersistenceError> {
        let state = self.enter(StoreOp::RollupsSince)?;
        Ok(state
            .rollups
            .get(&period)
            .map(|rows| rows.iter().filter(|r| r.bucket >= since).cloned().collect())
            .unwrap_or_default())
    }
}
