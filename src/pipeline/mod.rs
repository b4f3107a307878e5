//! # Job state & demand pipeline
//!
//! Write side: `IngestionPipeline` turns verified workflow job events into
//! job state, queue wait samples and demand snapshots.
//!
//! Read side:
//! - `HistoryResolver` - period-scoped series and peak demand
//! - `AggregationEngine` - the composite "current demand" view
//!
//! Background: `rollup_scheduler_task` keeps the day/week/month rollup
//! tables current for the read side.
//!
//! All components share one `Arc<dyn DemandStore>` built at startup.

pub mod aggregation;
pub mod history;
pub mod ingestion;
pub mod scheduler;

pub use aggregation::AggregationEngine;
pub use history::{HistoryResolver, PeriodHistory};
pub use ingestion::IngestionPipeline;
pub use scheduler::rollup_scheduler_task;
