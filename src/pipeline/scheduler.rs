//! Background rollup refresh
//!
//! Rebuilds the day/week/month rollup tables from raw snapshots on a fixed
//! interval. The query side only ever reads those tables.

use crate::store::SqliteDemandStore;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Rollup scheduler task - periodically refresh rollup buckets
///
/// Runs indefinitely until cancelled. Refresh failures are logged and the
/// next tick tries again.
pub async fn rollup_scheduler_task(store: Arc<SqliteDemandStore>, refresh_interval_ms: u64) {
    log::info!("⏰ Starting rollup scheduler (interval: {}ms)", refresh_interval_ms);

    let mut timer = interval(Duration::from_millis(refresh_interval_ms));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        timer.tick().await;

        let started = std::time::Instant::now();
        match store.refresh_rollups(Utc::now()).await {
            Ok(buckets) => {
                log::debug!(
                    "✅ Refreshed {} rollup buckets in {}ms",
                    buckets,
                    started.elapsed().as_millis()
                );
            }
            Err(e) => {
                log::error!("❌ Rollup refresh failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{run_schema_migrations, DemandStore};
    use crate::types::{HistoricalEntry, RollupPeriod};
    use rusqlite::Connection;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_scheduler_populates_rollups() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut conn = Connection::open(temp_file.path()).unwrap();
        run_schema_migrations(&mut conn, "sql").unwrap();
        let store = Arc::new(SqliteDemandStore::from_connection(conn));

        store
            .append_snapshot(&HistoricalEntry {
                timestamp: Utc::now() - chrono::Duration::minutes(1),
                count_self_hosted: 2,
                count_github_hosted: 3,
                count_queued: 1,
            })
            .await
            .unwrap();

        let handle = tokio::spawn(rollup_scheduler_task(store.clone(), 10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        let rows = store
            .rollups_since(RollupPeriod::Day, Utc::now() - chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].peak_total, 6);
    }
}
