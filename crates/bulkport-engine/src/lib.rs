//! Pipeline runner and import scheduler for bulkport.
//!
//! A [`Pipeline`] is a value: one extractor, an ordered transformer chain and a
//! loader. [`PipelineRunner`] drives it page by page against a tracker, and
//! [`run_import`] schedules every configured entity.

pub mod builtin;
pub mod config;
pub mod context;
pub mod errors;
pub(crate) mod failure;
pub mod idempotency;
pub(crate) mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod result;
pub mod runner;

// Re-export public API for convenience
pub use context::{Context, ContextExtra};
pub use errors::PipelineError;
pub use idempotency::{CacheIdempotency, IdempotencyTracker, NoopIdempotency};
pub use orchestrator::run_import;
pub use pipeline::{Extractor, Loader, Pipeline, Transformer};
pub use result::{EntitySummary, ImportSummary, PipelineSummary, RunOutcome, RunReport, RunStats};
pub use runner::PipelineRunner;
