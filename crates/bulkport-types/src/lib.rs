//! Shared bulkport data model and error types.
//!
//! This crate is dependency-boundary-safe for the state backend, the engine,
//! and third-party collaborators implementing extractors or loaders.

pub mod batch;
pub mod error;
pub mod failure;
pub mod retry;
pub mod state;
