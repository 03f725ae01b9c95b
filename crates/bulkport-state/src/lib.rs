//! Import state persistence for bulkport.
//!
//! Provides the [`StateBackend`] and [`ProcessedCache`] traits and a
//! [`SqliteStateBackend`] implementation for entities, trackers, failure
//! records and idempotency bookkeeping.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::{ProcessedCache, StateBackend};
pub use error::StateError;
pub use sqlite::SqliteStateBackend;

/// Convenience re-exports for backend users.
pub mod prelude {
    pub use crate::backend::{ProcessedCache, StateBackend};
    pub use crate::error::StateError;
    pub use crate::sqlite::SqliteStateBackend;
    pub use bulkport_types::failure::{FailureRecord, PipelineStep, Timestamp};
    pub use bulkport_types::state::{
        Entity, EntityId, EntityStatus, NewEntity, PipelineName, Tracker, TrackerId,
        TrackerStatus,
    };
}
