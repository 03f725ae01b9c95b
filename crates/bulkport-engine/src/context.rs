//! Per-run context handed to every collaborator.

use std::collections::BTreeMap;
use std::fmt;

use bulkport_types::state::{Entity, PipelineName, TrackerId};

/// Structured extras attached to a run.
///
/// `batch_number` is the only key the runner interprets (it partitions the
/// idempotency cache). `labels` are carried into log lines untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextExtra {
    pub batch_number: Option<u64>,
    pub labels: BTreeMap<String, String>,
}

impl ContextExtra {
    #[must_use]
    pub fn with_batch_number(batch_number: u64) -> Self {
        Self {
            batch_number: Some(batch_number),
            labels: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch_number.is_none() && self.labels.is_empty()
    }
}

impl fmt::Display for ContextExtra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        if let Some(batch_number) = self.batch_number {
            write!(f, "batch_number={batch_number}")?;
            first = false;
        }
        for (key, value) in &self.labels {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// Immutable bundle describing one pipeline run.
///
/// The entity here is a snapshot taken when the run was scheduled; the runner
/// re-reads its status from the state backend before every step.
#[derive(Debug, Clone)]
pub struct Context {
    pub entity: Entity,
    pub tracker_id: TrackerId,
    pub pipeline: PipelineName,
    pub extra: ContextExtra,
    /// Ties log lines and failure records of one run together.
    pub correlation_id: String,
    /// Cursor of the page being processed; `None` on the first page.
    pub page: Option<String>,
}

impl Context {
    #[must_use]
    pub fn new(
        entity: Entity,
        tracker_id: TrackerId,
        pipeline: PipelineName,
        extra: ContextExtra,
    ) -> Self {
        Self {
            entity,
            tracker_id,
            pipeline,
            extra,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            page: None,
        }
    }

    /// Same run, scoped to the page that starts at `cursor`.
    #[must_use]
    pub fn for_page(&self, cursor: Option<&str>) -> Self {
        Self {
            page: cursor.map(str::to_string),
            ..self.clone()
        }
    }

    /// Job id of the owning import.
    #[must_use]
    pub fn bulk_import_id(&self) -> &str {
        &self.entity.bulk_import_id
    }

    #[must_use]
    pub fn batch_number(&self) -> u64 {
        self.extra.batch_number.unwrap_or(0)
    }
}
