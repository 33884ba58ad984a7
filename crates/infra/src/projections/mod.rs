//! Projection implementations (read model builders).
//!
//! Projections turn stored events into query-optimized rows. They are:
//! - **Rebuildable**: an empty read model plus the full log reproduces every row
//! - **Idempotent**: an event id is applied at most once

pub mod account_summary;

pub use account_summary::{apply_event, project, summarize, ApplyOutcome, ProjectionError};
