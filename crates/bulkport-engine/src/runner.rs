//! Pipeline runner: extract -> transform -> load -> tracker update, page by page.
//!
//! Every step goes through [`PipelineRunner::run_step`], which re-checks the
//! owning entity, logs the transition, and classifies step errors into a
//! [`RunOutcome`]. Step errors never escape [`PipelineRunner::run`]; only
//! failures of the state backend itself do.

use std::sync::Arc;
use std::time::Duration;

use bulkport_state::StateBackend;
use bulkport_types::error::StepError;
use bulkport_types::failure::PipelineStep;
use bulkport_types::retry::RetryPolicy;
use bulkport_types::state::{EntityStatus, TrackerStatus};

use crate::context::Context;
use crate::errors::{compute_retry_delay, PipelineError};
use crate::failure::record_failure;
use crate::idempotency::{IdempotencyTracker, NoopIdempotency};
use crate::logging::{run_span, IMPORTER};
use crate::pipeline::Pipeline;
use crate::result::{RunOutcome, RunReport, RunStats};

const SKIP_MESSAGE: &str = "Skipping pipeline due to failed entity";

/// Result of running one wrapped step.
enum Step<T> {
    /// The step produced a value; keep going.
    Continue(T),
    /// The run must stop with this outcome.
    Halt(RunOutcome),
}

/// Drives one [`Pipeline`] against one tracker.
pub struct PipelineRunner<R> {
    pipeline: Pipeline<R>,
    state: Arc<dyn StateBackend>,
    idempotency: Box<dyn IdempotencyTracker<R>>,
    retry_policy: RetryPolicy,
}

impl<R> PipelineRunner<R>
where
    R: Clone,
{
    /// Runner with idempotency tracking disabled and the default retry policy.
    #[must_use]
    pub fn new(pipeline: Pipeline<R>, state: Arc<dyn StateBackend>) -> Self {
        Self {
            pipeline,
            state,
            idempotency: Box::new(NoopIdempotency),
            retry_policy: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_idempotency(mut self, idempotency: Box<dyn IdempotencyTracker<R>>) -> Self {
        self.idempotency = idempotency;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline<R> {
        &self.pipeline
    }

    /// Run the pipeline until the extractor reports no further pages.
    ///
    /// Continuation is an explicit loop: each iteration extracts the page at
    /// the tracker's persisted cursor.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the state backend fails or when `ctx`
    /// belongs to a different pipeline. Step errors are reported through
    /// [`RunReport::outcome`].
    pub fn run(&self, ctx: &Context) -> Result<RunReport, PipelineError> {
        if ctx.pipeline != *self.pipeline.name() {
            return Err(PipelineError::Infrastructure(anyhow::anyhow!(
                "context is for pipeline '{}' but runner drives '{}'",
                ctx.pipeline.as_str(),
                self.pipeline.name().as_str()
            )));
        }
        let span = run_span(ctx);
        let _guard = span.enter();
        let mut stats = RunStats::default();

        if self.entity_failed(ctx)? {
            self.skip(ctx, None, None)?;
            return Ok(report(RunOutcome::Skipped, stats));
        }

        self.state
            .set_tracker_status(ctx.tracker_id, TrackerStatus::Started)?;
        tracing::info!("Pipeline started");

        loop {
            match self.run_page(ctx, &mut stats)? {
                Step::Continue(true) => {}
                Step::Continue(false) => break,
                Step::Halt(outcome) => return Ok(report(outcome, stats)),
            }
        }

        self.state
            .set_tracker_status(ctx.tracker_id, TrackerStatus::Finished)?;
        tracing::info!(
            pages = stats.pages,
            records_loaded = stats.records_loaded,
            records_dropped = stats.records_dropped,
            records_skipped = stats.records_skipped,
            "Pipeline finished"
        );
        Ok(report(RunOutcome::Completed, stats))
    }

    /// Process one page. `Continue(true)` means another page follows.
    fn run_page(&self, ctx: &Context, stats: &mut RunStats) -> Result<Step<bool>, PipelineError> {
        let cursor = self.state.get_tracker(ctx.tracker_id)?.next_page;
        let page_ctx = ctx.for_page(cursor.as_deref());
        let ctx = &page_ctx;
        let extractor = &self.pipeline.extractor;

        let batch = match self.run_step(ctx, PipelineStep::Extractor, Some(extractor.name()), || {
            extractor.extract(ctx, cursor.as_deref())
        })? {
            Step::Continue(Some(batch)) => batch,
            Step::Continue(None) => return Ok(Step::Continue(false)),
            Step::Halt(outcome) => return Ok(Step::Halt(outcome)),
        };

        stats.pages += 1;
        stats.records_extracted += batch.records.len() as u64;
        let has_next_page = batch.has_next_page;
        let next_page = batch.next_page;

        for (index, entry) in batch.records.into_iter().enumerate() {
            if let Step::Halt(outcome) = self.process_entry(ctx, index, entry, stats)? {
                return Ok(Step::Halt(outcome));
            }
        }

        self.state
            .update_tracker_page(ctx.tracker_id, has_next_page, next_page.as_deref())?;

        self.run_step(ctx, PipelineStep::AfterRun, None, || Ok(has_next_page))
    }

    /// Idempotency gate, transformer chain, loader, then mark processed.
    fn process_entry(
        &self,
        ctx: &Context,
        index: usize,
        entry: R,
        stats: &mut RunStats,
    ) -> Result<Step<()>, PipelineError> {
        let raw_entry = entry.clone();

        if self.idempotency.already_processed(ctx, &raw_entry, index)? {
            tracing::debug!(index, "Entry already processed, skipping");
            stats.records_skipped += 1;
            return Ok(Step::Continue(()));
        }

        let mut current = Some(entry);
        for transformer in &self.pipeline.transformers {
            let Some(record) = current.take() else {
                break;
            };
            match self.run_step(ctx, PipelineStep::Transformer, Some(transformer.name()), || {
                transformer.transform(ctx, record)
            })? {
                Step::Continue(next) => current = next,
                Step::Halt(outcome) => return Ok(Step::Halt(outcome)),
            }
        }

        let Some(record) = current else {
            tracing::debug!(index, "Entry dropped by transformer");
            stats.records_dropped += 1;
            return Ok(Step::Continue(()));
        };

        let loader = &self.pipeline.loader;
        if let Step::Halt(outcome) =
            self.run_step(ctx, PipelineStep::Loader, Some(loader.name()), || {
                loader.load(ctx, record)
            })?
        {
            return Ok(Step::Halt(outcome));
        }
        stats.records_loaded += 1;

        self.idempotency
            .save_processed_entry(ctx, &raw_entry, index)?;
        Ok(Step::Continue(()))
    }

    /// Uniform wrapper around every pipeline step.
    fn run_step<T>(
        &self,
        ctx: &Context,
        step: PipelineStep,
        step_class: Option<&str>,
        f: impl FnOnce() -> Result<T, StepError>,
    ) -> Result<Step<T>, PipelineError> {
        if self.entity_failed(ctx)? {
            self.skip(ctx, Some(step), step_class)?;
            return Ok(Step::Halt(RunOutcome::Skipped));
        }

        tracing::info!(pipeline_step = %step, step_class, "Running pipeline step");

        match f() {
            Ok(value) => Ok(Step::Continue(value)),
            Err(err) => self
                .classify_error(ctx, step, step_class, err)
                .map(Step::Halt),
        }
    }

    /// Retriable network errors become a retry request; everything else is fatal.
    fn classify_error(
        &self,
        ctx: &Context,
        step: PipelineStep,
        step_class: Option<&str>,
        err: StepError,
    ) -> Result<RunOutcome, PipelineError> {
        if err.is_network() {
            if let Some(delay) = self.retry_delay(ctx, &err)? {
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = delay.as_millis() as u64;
                tracing::warn!(
                    pipeline_step = %step,
                    step_class,
                    delay_ms,
                    exception_message = %err.message,
                    "Retriable network error, requesting pipeline retry"
                );
                return Ok(RunOutcome::RetryRequested { delay });
            }
        }

        self.log_and_fail(ctx, step, step_class, err)
    }

    /// Consume one unit of the tracker's retry budget if the error qualifies.
    fn retry_delay(&self, ctx: &Context, err: &StepError) -> Result<Option<Duration>, PipelineError> {
        if !err.has_retriable_kind() {
            return Ok(None);
        }
        let attempt = self.state.increment_retry_count(ctx.tracker_id)?;
        if self.retry_policy.allows(attempt) {
            Ok(Some(compute_retry_delay(err, &self.retry_policy)))
        } else {
            tracing::warn!(
                attempt,
                max_retries = self.retry_policy.max_retries,
                "Retry budget exhausted"
            );
            Ok(None)
        }
    }

    fn log_and_fail(
        &self,
        ctx: &Context,
        step: PipelineStep,
        step_class: Option<&str>,
        err: StepError,
    ) -> Result<RunOutcome, PipelineError> {
        record_failure(self.state.as_ref(), ctx, step, step_class, &err)?;
        self.state
            .set_tracker_status(ctx.tracker_id, TrackerStatus::Failed)?;

        if self.pipeline.abort_on_failure {
            tracing::warn!("Aborting entity migration due to pipeline failure");
            self.state
                .set_entity_status(ctx.entity.id, EntityStatus::Failed)?;
        }

        Ok(RunOutcome::Failed { step, error: err })
    }

    fn skip(
        &self,
        ctx: &Context,
        step: Option<PipelineStep>,
        step_class: Option<&str>,
    ) -> Result<(), PipelineError> {
        tracing::warn!(
            pipeline_step = step.map(PipelineStep::as_str),
            step_class,
            importer = IMPORTER,
            "{SKIP_MESSAGE}"
        );
        self.state
            .set_tracker_status(ctx.tracker_id, TrackerStatus::Skipped)?;
        Ok(())
    }

    fn entity_failed(&self, ctx: &Context) -> Result<bool, PipelineError> {
        Ok(self.state.get_entity(ctx.entity.id)?.is_failed())
    }
}

fn report(outcome: RunOutcome, stats: RunStats) -> RunReport {
    RunReport { outcome, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextExtra;
    use crate::pipeline::{Extractor, Loader, Transformer};
    use bulkport_state::SqliteStateBackend;
    use bulkport_types::batch::ExtractedBatch;
    use bulkport_types::state::NewEntity;
    use std::sync::Mutex;

    struct OnePage(Vec<u32>);

    impl Extractor<u32> for OnePage {
        fn name(&self) -> &str {
            "one_page"
        }

        fn extract(
            &self,
            _: &Context,
            _: Option<&str>,
        ) -> Result<Option<ExtractedBatch<u32>>, StepError> {
            Ok(Some(ExtractedBatch::last(self.0.clone())))
        }
    }

    struct Double;

    impl Transformer<u32> for Double {
        fn name(&self) -> &str {
            "double"
        }

        fn transform(&self, _: &Context, record: u32) -> Result<Option<u32>, StepError> {
            Ok(Some(record * 2))
        }
    }

    #[derive(Default)]
    struct Collect(Arc<Mutex<Vec<u32>>>);

    impl Loader<u32> for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        fn load(&self, _: &Context, record: u32) -> Result<(), StepError> {
            self.0.lock().unwrap().push(record);
            Ok(())
        }
    }

    fn setup() -> (Arc<SqliteStateBackend>, Context) {
        let backend = Arc::new(SqliteStateBackend::in_memory().unwrap());
        let entity = backend
            .create_entity(&NewEntity {
                bulk_import_id: "job".into(),
                source_type: "project_entity".into(),
                source_full_path: "g/p".into(),
                source_version: Some("16.4.0".into()),
            })
            .unwrap();
        let tracker = backend
            .ensure_tracker(entity.id, &"numbers".into())
            .unwrap();
        let ctx = Context::new(entity, tracker.id, "numbers".into(), ContextExtra::default());
        (backend, ctx)
    }

    #[test]
    fn runs_single_page_through_chain() {
        let (backend, ctx) = setup();
        let loaded = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(
            "numbers",
            Box::new(OnePage(vec![1, 2, 3])),
            Box::new(Collect(loaded.clone())),
        )
        .with_transformer(Box::new(Double));

        let runner = PipelineRunner::new(pipeline, backend.clone());
        let report = runner.run(&ctx).unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.stats.pages, 1);
        assert_eq!(report.stats.records_loaded, 3);
        assert_eq!(*loaded.lock().unwrap(), vec![2, 4, 6]);
        let tracker = backend.get_tracker(ctx.tracker_id).unwrap();
        assert_eq!(tracker.status, TrackerStatus::Finished);
    }

    #[test]
    fn empty_chain_loads_raw_records() {
        let (backend, ctx) = setup();
        let loaded = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(
            "numbers",
            Box::new(OnePage(vec![7])),
            Box::new(Collect(loaded.clone())),
        );

        let report = PipelineRunner::new(pipeline, backend).run(&ctx).unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(*loaded.lock().unwrap(), vec![7]);
    }

    #[test]
    fn rejects_context_of_another_pipeline() {
        let (backend, ctx) = setup();
        let loaded = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(
            "labels",
            Box::new(OnePage(vec![1])),
            Box::new(Collect(loaded.clone())),
        );

        let err = PipelineRunner::new(pipeline, backend.clone())
            .run(&ctx)
            .unwrap_err();

        assert!(matches!(err, PipelineError::Infrastructure(_)));
        assert!(err.to_string().contains("'numbers'"));
        assert!(loaded.lock().unwrap().is_empty());
        let tracker = backend.get_tracker(ctx.tracker_id).unwrap();
        assert_eq!(tracker.status, TrackerStatus::Enqueued);
        assert!(backend.list_failures(ctx.entity.id).unwrap().is_empty());
    }
}
