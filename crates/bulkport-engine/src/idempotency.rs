//! Idempotency strategies for replayed batches.
//!
//! The runner asks whether `(raw_entry, index)` was already loaded before
//! transforming it, and records it after a successful load. Which strategy is
//! used is decided once, when the runner is built.

use std::sync::Arc;

use bulkport_state::ProcessedCache;

use crate::context::Context;
use crate::errors::PipelineError;

/// Strategy deciding whether a raw entry of the current batch was already loaded.
pub trait IdempotencyTracker<R>: Send + Sync {
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the backing store cannot be read.
    fn already_processed(&self, ctx: &Context, raw: &R, index: usize)
        -> Result<bool, PipelineError>;

    /// # Errors
    ///
    /// Returns [`PipelineError`] when the backing store cannot be written.
    fn save_processed_entry(&self, ctx: &Context, raw: &R, index: usize)
        -> Result<(), PipelineError>;
}

/// Tracking disabled: nothing is ever considered processed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIdempotency;

impl<R> IdempotencyTracker<R> for NoopIdempotency {
    fn already_processed(&self, _: &Context, _: &R, _: usize) -> Result<bool, PipelineError> {
        Ok(false)
    }

    fn save_processed_entry(&self, _: &Context, _: &R, _: usize) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Tracking backed by a set-valued [`ProcessedCache`].
///
/// Every index of one batch shares a single cache entry, keyed by
/// [`cache_key`].
#[derive(Clone)]
pub struct CacheIdempotency {
    cache: Arc<dyn ProcessedCache>,
}

impl CacheIdempotency {
    #[must_use]
    pub fn new(cache: Arc<dyn ProcessedCache>) -> Self {
        Self { cache }
    }
}

impl std::fmt::Debug for CacheIdempotency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheIdempotency").finish_non_exhaustive()
    }
}

impl<R> IdempotencyTracker<R> for CacheIdempotency {
    fn already_processed(
        &self,
        ctx: &Context,
        _raw: &R,
        index: usize,
    ) -> Result<bool, PipelineError> {
        Ok(self.cache.is_processed(&cache_key(ctx), index as u64)?)
    }

    fn save_processed_entry(
        &self,
        ctx: &Context,
        _raw: &R,
        index: usize,
    ) -> Result<(), PipelineError> {
        self.cache.mark_processed(&cache_key(ctx), index as u64)?;
        Ok(())
    }
}

/// `<pipeline-name>/<entity-id>/<batch-number>`; the record index is not part of the key.
///
/// Pages after the first append `/<cursor>`, since record indices restart on
/// every page.
#[must_use]
pub fn cache_key(ctx: &Context) -> String {
    let key = format!("{}/{}/{}", ctx.pipeline, ctx.entity.id, ctx.batch_number());
    match &ctx.page {
        Some(cursor) => format!("{key}/{cursor}"),
        None => key,
    }
}
