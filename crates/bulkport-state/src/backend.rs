//! State backend trait definitions.
//!
//! [`StateBackend`] is the storage contract for entities, trackers and
//! failure records. [`ProcessedCache`] is the idempotency store. Model types
//! live in [`bulkport_types::state`] and [`bulkport_types::failure`].

use std::collections::BTreeSet;

use bulkport_types::failure::FailureRecord;
use bulkport_types::state::{
    Entity, EntityId, EntityStatus, NewEntity, PipelineName, Tracker, TrackerId, TrackerStatus,
};

use crate::error;

/// Storage contract for import state.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
pub trait StateBackend: Send + Sync {
    /// Insert a new entity in `created` status.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn create_entity(&self, entity: &NewEntity) -> error::Result<Entity>;

    /// Look up an entity by its natural key within an import job.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn find_entity(
        &self,
        bulk_import_id: &str,
        source_full_path: &str,
    ) -> error::Result<Option<Entity>>;

    /// Read an entity by id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotFound`](crate::error::StateError::NotFound)
    /// when the entity does not exist.
    fn get_entity(&self, id: EntityId) -> error::Result<Entity>;

    /// All entities of an import job, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_entities(&self, bulk_import_id: &str) -> error::Result<Vec<Entity>>;

    /// Transition an entity.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotFound`](crate::error::StateError::NotFound)
    /// when the entity does not exist.
    fn set_entity_status(&self, id: EntityId, status: EntityStatus) -> error::Result<()>;

    /// Return the tracker for (entity, pipeline), inserting an `enqueued` one if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn ensure_tracker(&self, entity: EntityId, pipeline: &PipelineName) -> error::Result<Tracker>;

    /// Read a tracker by id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotFound`](crate::error::StateError::NotFound)
    /// when the tracker does not exist.
    fn get_tracker(&self, id: TrackerId) -> error::Result<Tracker>;

    /// All trackers of an entity, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_trackers(&self, entity: EntityId) -> error::Result<Vec<Tracker>>;

    /// Transition a tracker.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotFound`](crate::error::StateError::NotFound)
    /// when the tracker does not exist.
    fn set_tracker_status(&self, id: TrackerId, status: TrackerStatus) -> error::Result<()>;

    /// Persist pagination progress after a batch has been fully handled.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotFound`](crate::error::StateError::NotFound)
    /// when the tracker does not exist.
    fn update_tracker_page(
        &self,
        id: TrackerId,
        has_next_page: bool,
        next_page: Option<&str>,
    ) -> error::Result<()>;

    /// Bump the tracker's network retry counter and return the new value.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotFound`](crate::error::StateError::NotFound)
    /// when the tracker does not exist.
    fn increment_retry_count(&self, id: TrackerId) -> error::Result<u32>;

    /// Persist a failure record, returning its row id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn insert_failure(&self, record: &FailureRecord) -> error::Result<i64>;

    /// Failure records of an entity, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_failures(&self, entity: EntityId) -> error::Result<Vec<FailureRecord>>;
}

/// Set-valued cache recording which batch indices were already loaded.
///
/// Writes must be idempotent merges: marking an index twice is not an error.
pub trait ProcessedCache: Send + Sync {
    /// Membership test for `index` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn is_processed(&self, key: &str, index: u64) -> error::Result<bool>;

    /// Add `index` to the set under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn mark_processed(&self, key: &str, index: u64) -> error::Result<()>;

    /// Every index recorded under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn processed_indices(&self, key: &str) -> error::Result<BTreeSet<u64>>;
}
