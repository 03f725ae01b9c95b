//! Run outcomes, per-run counters, and import summaries.

use std::time::Duration;

use bulkport_types::error::StepError;
use bulkport_types::failure::PipelineStep;
use bulkport_types::state::{EntityId, EntityStatus, PipelineName, TrackerStatus};

/// How a single pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every page was processed; tracker is `finished`.
    Completed,
    /// The owning entity had failed; tracker is `skipped`.
    Skipped,
    /// A retriable network error; re-invoke the whole run after `delay`.
    RetryRequested { delay: Duration },
    /// A fatal step error was recorded; tracker is `failed`.
    Failed {
        step: PipelineStep,
        error: StepError,
    },
}

impl RunOutcome {
    #[must_use]
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::RetryRequested { .. })
    }
}

/// Record counters for a single run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub pages: u64,
    pub records_extracted: u64,
    pub records_loaded: u64,
    /// Records a transformer dropped.
    pub records_dropped: u64,
    /// Records skipped because an earlier attempt already loaded them.
    pub records_skipped: u64,
}

impl RunStats {
    /// Fold another attempt's counters into this one.
    pub fn absorb(&mut self, other: &RunStats) {
        self.pages += other.pages;
        self.records_extracted += other.records_extracted;
        self.records_loaded += other.records_loaded;
        self.records_dropped += other.records_dropped;
        self.records_skipped += other.records_skipped;
    }
}

/// Outcome plus counters of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub stats: RunStats,
}

/// Final state of one pipeline of an entity.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub pipeline: PipelineName,
    pub status: TrackerStatus,
    pub stats: RunStats,
    /// Runs started for this pipeline (1 + retries).
    pub attempts: u32,
}

/// Final state of one entity.
#[derive(Debug, Clone)]
pub struct EntitySummary {
    pub entity_id: EntityId,
    pub source_full_path: String,
    pub status: EntityStatus,
    pub pipelines: Vec<PipelineSummary>,
    pub failures: usize,
}

/// Result of [`run_import`](crate::orchestrator::run_import).
#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub import: String,
    pub entities: Vec<EntitySummary>,
    pub duration_secs: f64,
}

impl ImportSummary {
    #[must_use]
    pub fn records_loaded(&self) -> u64 {
        self.entities
            .iter()
            .flat_map(|e| &e.pipelines)
            .map(|p| p.stats.records_loaded)
            .sum()
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.entities.iter().map(|e| e.failures).sum()
    }

    #[must_use]
    pub fn entities_with_status(&self, status: EntityStatus) -> usize {
        self.entities.iter().filter(|e| e.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_adds_counters() {
        let mut total = RunStats {
            pages: 1,
            records_loaded: 3,
            ..RunStats::default()
        };
        total.absorb(&RunStats {
            pages: 2,
            records_extracted: 5,
            records_loaded: 4,
            records_dropped: 1,
            records_skipped: 0,
        });
        assert_eq!(total.pages, 3);
        assert_eq!(total.records_loaded, 7);
        assert_eq!(total.records_dropped, 1);
    }

    #[test]
    fn retry_outcome_is_retry() {
        assert!(RunOutcome::RetryRequested {
            delay: Duration::ZERO
        }
        .is_retry());
        assert!(!RunOutcome::Completed.is_retry());
    }

    #[test]
    fn summary_aggregates() {
        let summary = ImportSummary {
            import: "job".into(),
            entities: vec![
                EntitySummary {
                    entity_id: EntityId::new(1),
                    source_full_path: "a".into(),
                    status: EntityStatus::Finished,
                    pipelines: vec![PipelineSummary {
                        pipeline: "issues".into(),
                        status: TrackerStatus::Finished,
                        stats: RunStats {
                            records_loaded: 4,
                            ..RunStats::default()
                        },
                        attempts: 1,
                    }],
                    failures: 0,
                },
                EntitySummary {
                    entity_id: EntityId::new(2),
                    source_full_path: "b".into(),
                    status: EntityStatus::Failed,
                    pipelines: vec![],
                    failures: 2,
                },
            ],
            duration_secs: 0.5,
        };
        assert_eq!(summary.records_loaded(), 4);
        assert_eq!(summary.failure_count(), 2);
        assert_eq!(summary.entities_with_status(EntityStatus::Failed), 1);
    }
}
