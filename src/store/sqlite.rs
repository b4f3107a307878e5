//! SQLite implementation of `DemandStore` with rusqlite
//!
//! A single connection is shared behind a mutex; every call runs on the
//! blocking pool so async callers (including the six-way aggregation
//! fan-out) never stall the runtime. SQLite serializes access itself, with a
//! busy timeout as the backend-level bound on waiting.

use super::{DemandStore, RetryPolicy};
use crate::error::PersistenceError;
use crate::types::{
    system_clock, Clock, HistoricalEntry, JobRecord, JobStatus, RollupPeriod, RollupRow,
    RunnerCategory,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const UPSERT_JOB_SQL: &str = r#"
    INSERT INTO workflow_jobs (id, created_at, status, runner_type, started_at, completed_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(id, created_at) DO UPDATE SET
        status = excluded.status,
        runner_type = excluded.runner_type,
        started_at = excluded.started_at,
        completed_at = excluded.completed_at
"#;

/// Run schema migrations from SQL files
///
/// Reads all .sql files from `schema_dir` in filename order (01_, 02_, ...)
/// and executes them. Every file uses `IF NOT EXISTS`, so running this on
/// each startup is safe.
pub fn run_schema_migrations(
    conn: &mut Connection,
    schema_dir: impl AsRef<Path>,
) -> Result<(), PersistenceError> {
    const OP: &str = "run_schema_migrations";
    let schema_path = schema_dir.as_ref();

    if !schema_path.is_dir() {
        return Err(PersistenceError::new(
            OP,
            format!("schema directory not found: {}", schema_path.display()),
        ));
    }

    let mode: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .map_err(|e| PersistenceError::from_sqlite(OP, e))?;
    log::info!("📊 SQLite journal mode: {}", mode);

    let io_err = |e: std::io::Error| PersistenceError::new(OP, e.to_string());

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)
        .map_err(io_err)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_path.display());

    for entry in sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().into_owned();

        let sql_content = fs::read_to_string(&path).map_err(io_err)?;
        conn.execute_batch(&sql_content)
            .map_err(|e| PersistenceError::from_sqlite(OP, e))?;

        log::info!("   ├─ ✅ {}", filename);
    }

    log::info!("✅ All schema migrations completed successfully");

    Ok(())
}

/// SQLite-backed job state, queue latency and demand history
pub struct SqliteDemandStore {
    conn: Arc<Mutex<Connection>>,
    retry: RetryPolicy,
    clock: Clock,
}

impl SqliteDemandStore {
    /// Open (or create) the database file
    ///
    /// Does NOT create the schema; run `run_schema_migrations` first.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        const OP: &str = "open";
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                PersistenceError::new(
                    OP,
                    format!("failed to create database directory {}: {}", parent.display(), e),
                )
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| PersistenceError::from_sqlite(OP, e))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| PersistenceError::from_sqlite(OP, e))?;

        log::info!("✅ SQLite demand store opened: {}", db_path.display());

        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            retry: RetryPolicy::default(),
            clock: system_clock(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Clock stamping `recorded_at` on queue samples
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run `f` against the shared connection on the blocking pool
    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| PersistenceError::transient(op, "connection mutex poisoned"))?;
            f(&guard).map_err(|e| PersistenceError::from_sqlite(op, e))
        })
        .await
        .map_err(|e| PersistenceError::transient(op, format!("blocking task failed: {}", e)))?
    }

    /// Recompute rollup buckets from raw snapshots
    ///
    /// Covers the trailing unit of each rollup period, starting at the first
    /// bucket boundary at or after the window start. Buckets are replaced
    /// wholesale, so repeated refreshes converge. Returns the number of bucket rows written.
    ///
    /// This is the external materialization the history reads depend on;
    /// event ingestion never calls it.
    pub async fn refresh_rollups(&self, now: DateTime<Utc>) -> Result<usize, PersistenceError> {
        self.with_conn("refresh_rollups", move |conn| {
            let mut written = 0;

            for rollup in RollupPeriod::ALL {
                let bucket_ms = rollup.bucket_millis();
                let window_start = rollup.period().window_start(now).timestamp_millis();
                // First whole bucket inside the window; the partial one is never read
                let first_bucket = (window_start + bucket_ms - 1).div_euclid(bucket_ms) * bucket_ms;

                let sql = format!(
                    r#"
                    INSERT OR REPLACE INTO {} (
                        bucket, avg_self_hosted, avg_github_hosted, avg_queued, peak_total
                    )
                    SELECT
                        (timestamp / ?1) * ?1 AS bucket,
                        AVG(count_self_hosted),
                        AVG(count_github_hosted),
                        AVG(count_queued),
                        MAX(count_self_hosted + count_github_hosted + count_queued)
                    FROM historical_entries
                    WHERE timestamp >= ?2
                    GROUP BY bucket
                    "#,
                    rollup.table_name()
                );

                written += conn.execute(&sql, params![bucket_ms, first_bucket])?;
            }

            Ok(written)
        })
        .await
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

#[async_trait]
impl DemandStore for SqliteDemandStore {
    async fn upsert_job(&self, job: &JobRecord) -> Result<(), PersistenceError> {
        self.retry
            .run(move || {
                let job = job.clone();
                self.with_conn("upsert_job", move |conn| {
                    conn.execute(
                        UPSERT_JOB_SQL,
                        params![
                            job.id,
                            to_millis(job.created_at),
                            job.status.as_str(),
                            job.category.as_str(),
                            job.started_at.map(to_millis),
                            job.completed_at.map(to_millis),
                        ],
                    )?;
                    Ok(())
                })
            })
            .await
    }

    async fn count_queued(&self) -> Result<i64, PersistenceError> {
        self.with_conn("count_queued", |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM workflow_jobs WHERE status = ?1",
                params![JobStatus::Queued.as_str()],
                |row| row.get(0),
            )
        })
        .await
    }

    async fn list_running(&self, category: RunnerCategory) -> Result<Vec<i64>, PersistenceError> {
        self.with_conn("list_running", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM workflow_jobs
                 WHERE runner_type = ?1 AND status = ?2
                 ORDER BY id",
            )?;
            let ids = stmt
                .query_map(
                    params![category.as_str(), JobStatus::InProgress.as_str()],
                    |row| row.get(0),
                )?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            Ok(ids)
        })
        .await
    }

    async fn record_queue_sample(
        &self,
        job_id: i64,
        created_at: DateTime<Utc>,
        wait: Duration,
    ) -> Result<(), PersistenceError> {
        let duration_ms = i64::try_from(wait.as_millis()).unwrap_or(i64::MAX);
        let recorded_at = to_millis((self.clock)());

        self.with_conn("record_queue_sample", move |conn| {
            conn.execute(
                "INSERT INTO queue_time_durations (job_id, job_created_at, duration_ms, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![job_id, to_millis(created_at), duration_ms, recorded_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn average_queue_time(&self) -> Result<Duration, PersistenceError> {
        let avg_ms: Option<f64> = self
            .with_conn("average_queue_time", |conn| {
                conn.query_row("SELECT AVG(duration_ms) FROM queue_time_durations", [], |row| {
                    row.get(0)
                })
            })
            .await?;

        Ok(avg_ms
            .map(|ms| Duration::from_millis(ms.max(0.0) as u64))
            .unwrap_or(Duration::ZERO))
    }

    async fn append_snapshot(&self, entry: &HistoricalEntry) -> Result<(), PersistenceError> {
        let entry = entry.clone();

        self.with_conn("append_snapshot", move |conn| {
            conn.execute(
                "INSERT INTO historical_entries
                    (timestamp, count_self_hosted, count_github_hosted, count_queued)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    to_millis(entry.timestamp),
                    entry.count_self_hosted,
                    entry.count_github_hosted,
                    entry.count_queued,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn snapshots_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistoricalEntry>, PersistenceError> {
        self.with_conn("snapshots_since", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, count_self_hosted, count_github_hosted, count_queued
                 FROM historical_entries
                 WHERE timestamp >= ?1
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let entries = stmt
                .query_map(params![to_millis(since)], |row| {
                    Ok(HistoricalEntry {
                        timestamp: from_millis(0, row.get(0)?)?,
                        count_self_hosted: row.get(1)?,
                        count_github_hosted: row.get(2)?,
                        count_queued: row.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
        .await
    }

    async fn rollups_since(
        &self,
        period: RollupPeriod,
        since: DateTime<Utc>,
    ) -> Result<Vec<RollupRow>, PersistenceError> {
        let sql = format!(
            "SELECT bucket, avg_self_hosted, avg_github_hosted, avg_queued, peak_total
             FROM {}
             WHERE bucket >= ?1
             ORDER BY bucket ASC",
            period.table_name()
        );

        self.with_conn("rollups_since", move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![to_millis(since)], |row| {
                    Ok(RollupRow {
                        bucket: from_millis(0, row.get(0)?)?,
                        avg_self_hosted: row.get(1)?,
                        avg_github_hosted: row.get(2)?,
                        avg_queued: row.get(3)?,
                        peak_total: row.get(4)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}
