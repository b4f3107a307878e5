//! Event ingestion - workflow job event → job state → demand snapshot
//!
//! Each event runs four ordered stages against the shared store:
//! 1. Upsert the job record (retried by the store on transient failures)
//! 2. Record a queue wait sample when the job moved to `in_progress` (best effort)
//! 3. Read current running/queued counts
//! 4. Append a demand snapshot stamped with the pipeline clock
//!
//! Stages commit independently. A failure aborts the remaining stages and
//! leaves earlier effects in place.

use crate::error::{IngestionFailed, IngestionStage, PersistenceError};
use crate::store::DemandStore;
use crate::types::{system_clock, Clock, HistoricalEntry, JobStatus, RunnerCategory, WorkflowJobEvent};
use std::sync::Arc;

pub struct IngestionPipeline {
    store: Arc<dyn DemandStore>,
    clock: Clock,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn DemandStore>) -> Self {
        Self::with_clock(store, system_clock())
    }

    pub fn with_clock(store: Arc<dyn DemandStore>, clock: Clock) -> Self {
        Self { store, clock }
    }

    /// Process one verified event, returning the snapshot it appended
    pub async fn ingest(&self, event: &WorkflowJobEvent) -> Result<HistoricalEntry, IngestionFailed> {
        let job = event.to_job_record();

        log::debug!(
            "job {} ({}) → {} on {}",
            job.id,
            job.created_at,
            job.status,
            job.category.as_str()
        );

        self.store
            .upsert_job(&job)
            .await
            .map_err(|source| stage_failed(IngestionStage::State, source))?;

        if job.status == JobStatus::InProgress {
            match job.queue_wait() {
                Some(wait) => {
                    log::debug!("job {} waited {}ms in queue", job.id, wait.as_millis());
                    if let Err(e) = self
                        .store
                        .record_queue_sample(job.id, job.created_at, wait)
                        .await
                    {
                        log::warn!("⚠️  Failed to record queue time for job {}: {}", job.id, e);
                    }
                }
                None => {
                    log::debug!("job {} in progress without started_at, no queue sample", job.id);
                }
            }
        }

        let self_hosted = self
            .store
            .list_running(RunnerCategory::SelfHosted)
            .await
            .map_err(|source| stage_failed(IngestionStage::Counts, source))?;
        let github_hosted = self
            .store
            .list_running(RunnerCategory::GithubHosted)
            .await
            .map_err(|source| stage_failed(IngestionStage::Counts, source))?;
        let queued = self
            .store
            .count_queued()
            .await
            .map_err(|source| stage_failed(IngestionStage::Counts, source))?;

        let entry = HistoricalEntry {
            timestamp: (self.clock)(),
            count_self_hosted: self_hosted.len() as i64,
            count_github_hosted: github_hosted.len() as i64,
            count_queued: queued,
        };

        self.store
            .append_snapshot(&entry)
            .await
            .map_err(|source| stage_failed(IngestionStage::Snapshot, source))?;

        log::debug!(
            "📊 snapshot: self-hosted={} github-hosted={} queued={}",
            entry.count_self_hosted,
            entry.count_github_hosted,
            entry.count_queued
        );

        Ok(entry)
    }
}

fn stage_failed(stage: IngestionStage, source: PersistenceError) -> IngestionFailed {
    log::error!("❌ Ingestion failed at stage {}: {}", stage, source);
    IngestionFailed { stage, source }
}
