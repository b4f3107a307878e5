//! Current demand view - six concurrent reads, all or nothing
//!
//! Reads issued per request:
//! - historical series for the period
//! - average queue time
//! - peak demand for the period
//! - running jobs (github-hosted)
//! - running jobs (self-hosted)
//! - queued jobs
//!
//! Each read runs on its own task. The first failure discards every other
//! result; callers see either a complete `DemandSnapshot` or
//! `AggregationFailed`.

use super::history::PeriodHistory;
use crate::error::AggregationFailed;
use crate::store::DemandStore;
use crate::types::{DemandSnapshot, RunnerCategory};
use std::fmt::Display;
use std::sync::Arc;
use tokio::task::JoinError;

/// Period alias served by the live hourly path
pub const ALL_PERIODS_ALIAS: &str = "all";

pub struct AggregationEngine {
    store: Arc<dyn DemandStore>,
    history: Arc<dyn PeriodHistory>,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn DemandStore>, history: Arc<dyn PeriodHistory>) -> Self {
        Self { store, history }
    }

    /// Build the composite demand view; `period` is echoed back unchanged
    pub async fn get_snapshot(&self, period: &str) -> Result<DemandSnapshot, AggregationFailed> {
        let lookup = if period == ALL_PERIODS_ALIAS {
            "hour".to_string()
        } else {
            period.to_string()
        };

        let historical = {
            let history = self.history.clone();
            let lookup = lookup.clone();
            tokio::spawn(async move { history.query_by_period(&lookup).await })
        };
        let avg_queue_time = {
            let store = self.store.clone();
            tokio::spawn(async move { store.average_queue_time().await })
        };
        let peak = {
            let history = self.history.clone();
            tokio::spawn(async move { history.calculate_peak_demand(&lookup).await })
        };
        let github_hosted = {
            let store = self.store.clone();
            tokio::spawn(async move { store.list_running(RunnerCategory::GithubHosted).await })
        };
        let self_hosted = {
            let store = self.store.clone();
            tokio::spawn(async move { store.list_running(RunnerCategory::SelfHosted).await })
        };
        let queued = {
            let store = self.store.clone();
            tokio::spawn(async move { store.count_queued().await })
        };

        let (historical, avg_queue_time, peak, github_hosted, self_hosted, queued) =
            tokio::join!(historical, avg_queue_time, peak, github_hosted, self_hosted, queued);

        let assemble = || -> Result<DemandSnapshot, AggregationFailed> {
            let historical_data = settle("historical_data", historical)?;
            let avg_queue_time = settle("avg_queue_time", avg_queue_time)?;
            let peak = settle("peak_demand", peak)?;
            let github_hosted = settle("running_github_hosted", github_hosted)?;
            let self_hosted = settle("running_self_hosted", self_hosted)?;
            let queued = settle("queued_count", queued)?;

            Ok(DemandSnapshot {
                current_count_github_hosted: github_hosted.len() as i64,
                current_count_self_hosted: self_hosted.len() as i64,
                current_queued_count: queued,
                historical_data,
                avg_queue_time_ms: avg_queue_time.as_millis() as u64,
                peak_demand: peak.total,
                peak_demand_timestamp: peak.timestamp,
                period: period.to_string(),
            })
        };

        assemble().map_err(|e| {
            log::error!("❌ Demand snapshot for period {:?} failed: {}", period, e);
            e
        })
    }
}

fn settle<T, E: Display>(
    read: &'static str,
    joined: Result<Result<T, E>, JoinError>,
) -> Result<T, AggregationFailed> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(AggregationFailed {
            read,
            reason: e.to_string(),
        }),
        Err(e) => Err(AggregationFailed {
            read,
            reason: format!("read task aborted: {}", e),
        }),
    }
}
