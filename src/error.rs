//! Error taxonomy for job state ingestion and demand queries

use std::fmt;
use thiserror::Error;

/// Backend failure while reading or writing demand state.
///
/// `transient` marks connection-level failures (busy/locked database, handle
/// unavailable). Only the job upsert path retries on these.
#[derive(Debug, Clone, Error)]
#[error("{op} failed: {message}")]
pub struct PersistenceError {
    pub op: &'static str,
    pub message: String,
    pub transient: bool,
}

impl PersistenceError {
    pub fn new(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            message: message.into(),
            transient: true,
        }
    }

    /// Classify a rusqlite error for the given operation
    pub fn from_sqlite(op: &'static str, err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        let transient = matches!(
            &err,
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(
                    e.code,
                    ErrorCode::DatabaseBusy
                        | ErrorCode::DatabaseLocked
                        | ErrorCode::CannotOpen
                        | ErrorCode::SystemIoFailure
                )
        );

        Self {
            op,
            message: err.to_string(),
            transient,
        }
    }
}

/// Caller supplied a period outside hour/day/week/month
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid period: {0:?}")]
pub struct InvalidPeriod(pub String);

/// Failure of a period-scoped historical read
#[derive(Debug, Clone, Error)]
pub enum HistoryError {
    #[error(transparent)]
    InvalidPeriod(#[from] InvalidPeriod),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Ordered stages of the ingestion pipeline that can abort it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStage {
    State,
    Counts,
    Snapshot,
}

impl IngestionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStage::State => "state",
            IngestionStage::Counts => "counts",
            IngestionStage::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for IngestionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pipeline stage failed. Effects of earlier stages stay committed.
#[derive(Debug, Clone, Error)]
#[error("ingestion failed at stage {stage}: {source}")]
pub struct IngestionFailed {
    pub stage: IngestionStage,
    #[source]
    pub source: PersistenceError,
}

/// One of the concurrent demand reads failed; no partial result is returned.
#[derive(Debug, Clone, Error)]
#[error("aggregation failed on {read}: {reason}")]
pub struct AggregationFailed {
    pub read: &'static str,
    pub reason: String,
}

/// Invalid process configuration value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value for {var}: {value:?}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_database_is_transient() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        let classified = PersistenceError::from_sqlite("upsert_job", err);
        assert!(classified.transient);
        assert_eq!(classified.op, "upsert_job");
    }

    #[test]
    fn test_constraint_violation_is_not_transient() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        );
        assert!(!PersistenceError::from_sqlite("append_snapshot", err).transient);
        assert!(!PersistenceError::from_sqlite("count_queued", rusqlite::Error::QueryReturnedNoRows).transient);
    }

    #[test]
    fn test_ingestion_failed_names_stage() {
        let err = IngestionFailed {
            stage: IngestionStage::Counts,
            source: PersistenceError::new("count_queued", "disk I/O error"),
        };
        assert_eq!(
            err.to_string(),
            "ingestion failed at stage counts: count_queued failed: disk I/O error"
        );
    }
}
