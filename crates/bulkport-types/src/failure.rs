//! Persisted failure records.
//!
//! One [`FailureRecord`] is written for every unrecoverable step error so
//! operators can query what went wrong after the run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::state::{EntityId, PipelineName, UnknownStatus};

/// Maximum stored length of `exception_message`, in characters.
pub const MAX_EXCEPTION_MESSAGE_CHARS: usize = 255;

const OMISSION: &str = "...";

/// Pipeline step in which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Extractor,
    Transformer,
    Loader,
    AfterRun,
}

impl PipelineStep {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extractor => "extractor",
            Self::Transformer => "transformer",
            Self::Loader => "loader",
            Self::AfterRun => "after_run",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStep {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extractor" => Ok(Self::Extractor),
            "transformer" => Ok(Self::Transformer),
            "loader" => Ok(Self::Loader),
            "after_run" => Ok(Self::AfterRun),
            other => Err(UnknownStatus {
                kind: "pipeline step",
                value: other.to_string(),
            }),
        }
    }
}

/// ISO-8601 formatted timestamp string.
///
/// No format validation; callers provide valid ISO-8601 strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    #[must_use]
    pub fn new(iso8601: impl Into<String>) -> Self {
        Self(iso8601.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unrecoverable step error, as stored by the state backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub entity_id: EntityId,
    pub pipeline_class: PipelineName,
    pub pipeline_step: PipelineStep,
    /// Name of the collaborator that raised the error, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_class: Option<String>,
    pub exception_class: String,
    /// At most [`MAX_EXCEPTION_MESSAGE_CHARS`] characters.
    pub exception_message: String,
    pub correlation_id: String,
    pub created_at: Timestamp,
}

/// Truncate `message` to [`MAX_EXCEPTION_MESSAGE_CHARS`] characters.
///
/// Longer messages are cut on a char boundary and end in `...`; the result
/// including the omission marker never exceeds the limit.
#[must_use]
pub fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_EXCEPTION_MESSAGE_CHARS {
        return message.to_string();
    }
    let keep = MAX_EXCEPTION_MESSAGE_CHARS - OMISSION.len();
    let mut out: String = message.chars().take(keep).collect();
    out.push_str(OMISSION);
    out
}
