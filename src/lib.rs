//! runnerflow - CI runner job state and demand aggregation
//!
//! Tracks workflow job lifecycle events and serves current and historical
//! runner demand (running per category, queued, queue wait, peak).

pub mod config;
pub mod error;
pub mod pipeline;
pub mod server;
pub mod store;
pub mod types;

pub use config::ServerConfig;
pub use error::{AggregationFailed, IngestionFailed, InvalidPeriod, PersistenceError};
pub use pipeline::{AggregationEngine, HistoryResolver, IngestionPipeline};
pub use store::{DemandStore, InMemoryDemandStore, SqliteDemandStore};
pub use types::{DemandSnapshot, HistoricalEntry, JobRecord, Period, WorkflowJobEvent};
