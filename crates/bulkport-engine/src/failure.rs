//! Failure-record persistence used by the runner.

use bulkport_state::StateBackend;
use bulkport_types::error::StepError;
use bulkport_types::failure::{truncate_message, FailureRecord, PipelineStep, Timestamp};

use crate::context::Context;
use crate::errors::PipelineError;

/// Build the persisted form of a fatal step error.
pub(crate) fn failure_record(
    ctx: &Context,
    step: PipelineStep,
    step_class: Option<&str>,
    err: &StepError,
) -> FailureRecord {
    FailureRecord {
        entity_id: ctx.entity.id,
        pipeline_class: ctx.pipeline.clone(),
        pipeline_step: step,
        step_class: step_class.map(str::to_string),
        exception_class: err.exception_class.clone(),
        exception_message: truncate_message(&err.message),
        correlation_id: ctx.correlation_id.clone(),
        created_at: Timestamp::new(chrono::Utc::now().to_rfc3339()),
    }
}

/// Persist one failure record and log it with full exception detail.
pub(crate) fn record_failure(
    state: &dyn StateBackend,
    ctx: &Context,
    step: PipelineStep,
    step_class: Option<&str>,
    err: &StepError,
) -> Result<i64, PipelineError> {
    tracing::error!(
        pipeline_step = %step,
        step_class,
        exception_class = %err.exception_class,
        error_category = %err.category,
        exception_message = %err.message,
        details = err.details.as_ref().map(tracing::field::display),
        "An object of a pipeline failed to import"
    );

    let record = failure_record(ctx, step, step_class, err);
    match state.insert_failure(&record) {
        Ok(id) => Ok(id),
        Err(e) => {
            tracing::error!(
                pipeline_step = %step,
                error = %e,
                "Failed to persist import failure"
            );
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextExtra;
    use bulkport_state::SqliteStateBackend;
    use bulkport_types::state::NewEntity;

    #[test]
    fn record_is_truncated_and_persisted() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let entity = backend
            .create_entity(&NewEntity {
                bulk_import_id: "job".into(),
                source_type: "project_entity".into(),
                source_full_path: "g/p".into(),
                source_version: None,
            })
            .unwrap();
        let tracker = backend.ensure_tracker(entity.id, &"labels".into()).unwrap();
        let ctx = Context::new(entity.clone(), tracker.id, "labels".into(), ContextExtra::default());
        let err = StepError::load("x".repeat(600));

        record_failure(&backend, &ctx, PipelineStep::Loader, Some("jsonl_loader"), &err).unwrap();

        let failures = backend.list_failures(entity.id).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].exception_message.chars().count(), 255);
        assert_eq!(failures[0].correlation_id, ctx.correlation_id);
        assert_eq!(failures[0].step_class.as_deref(), Some("jsonl_loader"));
    }
}
