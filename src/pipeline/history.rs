//! Period-scoped demand history and peak demand
//!
//! `hour` reads raw snapshots from the trailing 60 minutes; `day`, `week` and
//! `month` read the matching rollup table over the trailing unit. Unknown
//! period strings are rejected, never mapped onto a default.

use crate::error::{HistoryError, PersistenceError};
use crate::store::DemandStore;
use crate::types::{system_clock, Clock, HistoricalEntry, PeakDemand, Period};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Period-keyed history reads consumed by the aggregation engine
#[async_trait]
pub trait PeriodHistory: Send + Sync {
    async fn query_by_period(&self, period: &str) -> Result<Vec<HistoricalEntry>, HistoryError>;

    async fn calculate_peak_demand(&self, period: &str) -> Result<PeakDemand, HistoryError>;
}

pub struct HistoryResolver {
    store: Arc<dyn DemandStore>,
    clock: Clock,
}

impl HistoryResolver {
    pub fn new(store: Arc<dyn DemandStore>) -> Self {
        Self::with_clock(store, system_clock())
    }

    pub fn with_clock(store: Arc<dyn DemandStore>, clock: Clock) -> Self {
        Self { store, clock }
    }

    /// Demand series for a period name, oldest first
    pub async fn query_by_period(&self, period: &str) -> Result<Vec<HistoricalEntry>, HistoryError> {
        let period: Period = period.parse()?;
        Ok(self.query(period).await?)
    }

    pub async fn query(&self, period: Period) -> Result<Vec<HistoricalEntry>, PersistenceError> {
        let since = period.window_start((self.clock)());

        match period.rollup() {
            None => self.store.snapshots_since(since).await,
            Some(rollup) => Ok(self
                .store
                .rollups_since(rollup, since)
                .await?
                .iter()
                .map(|row| row.to_entry())
                .collect()),
        }
    }

    /// Highest additive demand for a period name
    pub async fn calculate_peak_demand(&self, period: &str) -> Result<PeakDemand, HistoryError> {
        let period: Period = period.parse()?;
        Ok(self.peak_demand(period).await?)
    }

    /// Peak over the trailing window; `PeakDemand::none()` when it holds no rows.
    ///
    /// Equal peaks resolve to the earliest timestamp.
    pub async fn peak_demand(&self, period: Period) -> Result<PeakDemand, PersistenceError> {
        let since = period.window_start((self.clock)());

        let candidates: Vec<(i64, DateTime<Utc>)> = match period.rollup() {
            None => self
                .store
                .snapshots_since(since)
                .await?
                .iter()
                .map(|e| (e.total(), e.timestamp))
                .collect(),
            Some(rollup) => self
                .store
                .rollups_since(rollup, since)
                .await?
                .iter()
                .map(|row| (row.peak_total, row.bucket))
                .collect(),
        };

        Ok(select_peak(candidates))
    }
}

#[async_trait]
impl PeriodHistory for HistoryResolver {
    async fn query_by_period(&self, period: &str) -> Result<Vec<HistoricalEntry>, HistoryError> {
        HistoryResolver::query_by_period(self, period).await
    }

    async fn calculate_peak_demand(&self, period: &str) -> Result<PeakDemand, HistoryError> {
        HistoryResolver::calculate_peak_demand(self, period).await
    }
}

fn select_peak<I>(candidates: I) -> PeakDemand
where
    I: IntoIterator<Item = (i64, DateTime<Utc>)>,
{
    let mut peak: Option<(i64, DateTime<Utc>)> = None;

    for (total, at) in candidates {
        peak = match peak {
            Some((best, best_at)) if best > total || (best == total && best_at <= at) => {
                Some((best, best_at))
            }
            _ => Some((total, at)),
        };
    }

    match peak {
        Some((total, at)) => PeakDemand {
            total,
            timestamp: Some(at),
        },
        None => PeakDemand::none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvalidPeriod;
    use crate::store::{InMemoryDemandStore, StoreOp};
    use crate::types::{RollupPeriod, RollupRow};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 24, 12, 0, 0).unwrap()
    }

    fn setup() -> (Arc<InMemoryDemandStore>, HistoryResolver) {
        let store = Arc::new(InMemoryDemandStore::new());
        let at = now();
        let resolver = HistoryResolver::with_clock(store.clone(), Arc::new(move || at));
        (store, resolver)
    }

    async fn snapshot(store: &InMemoryDemandStore, minutes_ago: i64, counts: (i64, i64, i64)) {
        store
            .append_snapshot(&HistoricalEntry {
                timestamp: now() - chrono::Duration::minutes(minutes_ago),
                count_self_hosted: counts.0,
                count_github_hosted: counts.1,
                count_queued: counts.2,
            })
            .await
            .unwrap();
    }

    fn rollup(hours_ago: i64, avg: f64, peak_total: i64) -> RollupRow {
        RollupRow {
            bucket: now() - chrono::Duration::hours(hours_ago),
            avg_self_hosted: avg,
            avg_github_hosted: avg,
            avg_queued: 0.0,
            peak_total,
        }
    }

    #[tokio::test]
    async fn test_hour_returns_only_trailing_sixty_minutes() {
        let (store, resolver) = setup();
        snapshot(&store, 90, (9, 9, 9)).await;
        snapshot(&store, 30, (1, 0, 0)).await;
        snapshot(&store, 45, (2, 0, 0)).await;

        let entries = resolver.query_by_period("hour").await.unwrap();

        assert_eq!(entries.len(), 2);
        // Ascending by time
        assert_eq!(entries[0].count_self_hosted, 2);
        assert_eq!(entries[1].count_self_hosted, 1);
    }

    #[tokio::test]
    async fn test_unknown_period_rejected() {
        let (_store, resolver) = setup();

        for period in ["invalid", "all", "", "HOUR"] {
            match resolver.query_by_period(period).await {
                Err(HistoryError::InvalidPeriod(InvalidPeriod(p))) => assert_eq!(p, period),
                other => panic!("expected InvalidPeriod for {:?}, got {:?}", period, other),
            }
        }
        assert!(matches!(
            resolver.calculate_peak_demand("year").await,
            Err(HistoryError::InvalidPeriod(_))
        ));
    }

    #[tokio::test]
    async fn test_day_reads_rounded_rollups() {
        let (store, resolver) = setup();
        store.insert_rollup(RollupPeriod::Day, rollup(30, 4.0, 10));
        store.insert_rollup(RollupPeriod::Day, rollup(2, 2.5, 7));
        store.insert_rollup(RollupPeriod::Week, rollup(3, 100.0, 200));

        let entries = resolver.query_by_period("day").await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].count_self_hosted, 3);
        assert_eq!(entries[0].timestamp, now() - chrono::Duration::hours(2));
    }

    #[tokio::test]
    async fn test_peak_from_raw_snapshots() {
        let (store, resolver) = setup();
        snapshot(&store, 50, (1, 1, 1)).await;
        snapshot(&store, 40, (2, 2, 2)).await;
        snapshot(&store, 10, (1, 0, 0)).await;

        let peak = resolver.calculate_peak_demand("hour").await.unwrap();

        assert_eq!(peak.total, 6);
        assert_eq!(peak.timestamp, Some(now() - chrono::Duration::minutes(40)));
    }

    #[tokio::test]
    async fn test_peak_tie_resolves_to_earliest() {
        let (store, resolver) = setup();
        snapshot(&store, 20, (3, 0, 0)).await;
        snapshot(&store, 50, (0, 3, 0)).await;
        snapshot(&store, 35, (0, 0, 3)).await;

        let peak = resolver.peak_demand(Period::Hour).await.unwrap();

        assert_eq!(peak.total, 3);
        assert_eq!(peak.timestamp, Some(now() - chrono::Duration::minutes(50)));
    }

    #[tokio::test]
    async fn test_peak_reads_rollup_peak_column() {
        let (store, resolver) = setup();
        store.insert_rollup(RollupPeriod::Week, rollup(48, 1.0, 12));
        store.insert_rollup(RollupPeriod::Week, rollup(24, 5.0, 9));

        let peak = resolver.calculate_peak_demand("week").await.unwrap();

        assert_eq!(peak.total, 12);
        assert_eq!(peak.timestamp, Some(now() - chrono::Duration::hours(48)));
    }

    #[tokio::test]
    async fn test_peak_with_empty_window() {
        let (store, resolver) = setup();
        snapshot(&store, 120, (5, 5, 5)).await;

        assert_eq!(
            resolver.calculate_peak_demand("hour").await.unwrap(),
            PeakDemand::none()
        );
        assert_eq!(
            resolver.calculate_peak_demand("month").await.unwrap(),
            PeakDemand::none()
        );
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let (store, resolver) = setup();
        store.fail_operation(StoreOp::SnapshotsSince);

        assert!(matches!(
            resolver.query_by_period("hour").await,
            Err(HistoryError::Persistence(_))
        ));
        assert!(resolver.peak_demand(Period::Hour).await.is_err());
    }
}
