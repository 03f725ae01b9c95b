//! Runner error model and retry delay policy helpers.

use std::time::Duration;

use bulkport_state::StateError;
use bulkport_types::error::StepError;
use bulkport_types::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// PipelineError: errors that escape a run
// ---------------------------------------------------------------------------

/// Error returned by the runner or scheduler itself.
///
/// Step errors never appear here: they are classified into a
/// [`RunOutcome`](crate::result::RunOutcome). What remains is the runner
/// failing to read or write its own state, or infrastructure around it
/// (building collaborators, task joins).
#[derive(Debug)]
pub enum PipelineError {
    /// State backend failure while reading or recording progress.
    State(StateError),
    /// Infrastructure error (collaborator setup, task panics, etc.)
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::State(e) => write!(f, "state backend: {e}"),
            Self::Infrastructure(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::State(e) => Some(e),
            Self::Infrastructure(e) => Some(&**e),
        }
    }
}

impl From<StateError> for PipelineError {
    fn from(e: StateError) -> Self {
        Self::State(e)
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

/// Delay before a retriable step error should be retried.
///
/// A source-provided `Retry-After` hint wins over the policy default; either
/// is capped at `max_delay_secs`.
#[must_use]
pub fn compute_retry_delay(err: &StepError, policy: &RetryPolicy) -> Duration {
    let secs = err
        .retry_after_secs
        .unwrap_or(policy.default_delay_secs)
        .min(policy.max_delay_secs);
    Duration::from_secs(secs)
}
