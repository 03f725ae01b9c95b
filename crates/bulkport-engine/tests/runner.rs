//! Runner behaviour against an in-memory state backend with scripted
//! collaborators.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bulkport_engine::{
    CacheIdempotency, Context, ContextExtra, Extractor, Loader, Pipeline, PipelineRunner,
    RunOutcome, Transformer,
};
use bulkport_state::{SqliteStateBackend, StateBackend};
use bulkport_types::batch::ExtractedBatch;
use bulkport_types::error::{NetworkErrorKind, StepError};
use bulkport_types::failure::PipelineStep;
use bulkport_types::retry::RetryPolicy;
use bulkport_types::state::{EntityStatus, NewEntity, TrackerStatus};
use rstest::rstest;

// ---------------------------------------------------------------------------
// Test collaborators
// ---------------------------------------------------------------------------

/// Serves pages keyed by cursor and records every cursor it was asked for.
#[derive(Default)]
struct PagedExtractor {
    pages: HashMap<Option<String>, ExtractedBatch<u32>>,
    error: Mutex<Option<StepError>>,
    cursors: Arc<Mutex<Vec<Option<String>>>>,
}

impl PagedExtractor {
    fn single(records: Vec<u32>) -> Self {
        let mut pages = HashMap::new();
        pages.insert(None, ExtractedBatch::last(records));
        Self {
            pages,
            ..Self::default()
        }
    }

    fn failing(error: StepError) -> Self {
        Self {
            error: Mutex::new(Some(error)),
            ..Self::default()
        }
    }
}

impl Extractor<u32> for PagedExtractor {
    fn name(&self) -> &str {
        "paged_extractor"
    }

    fn extract(
        &self,
        _ctx: &Context,
        cursor: Option<&str>,
    ) -> Result<Option<ExtractedBatch<u32>>, StepError> {
        self.cursors.lock().unwrap().push(cursor.map(str::to_string));
        if let Some(err) = self.error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.pages.get(&cursor.map(str::to_string)).cloned())
    }
}

struct DropRecord(u32);

impl Transformer<u32> for DropRecord {
    fn name(&self) -> &str {
        "drop_record"
    }

    fn transform(&self, _ctx: &Context, record: u32) -> Result<Option<u32>, StepError> {
        Ok((record != self.0).then_some(record))
    }
}

struct AddTen;

impl Transformer<u32> for AddTen {
    fn name(&self) -> &str {
        "add_ten"
    }

    fn transform(&self, _ctx: &Context, record: u32) -> Result<Option<u32>, StepError> {
        Ok(Some(record + 10))
    }
}

/// Collects loaded records; optionally fails once on a given record.
#[derive(Default)]
struct RecordingLoader {
    loaded: Arc<Mutex<Vec<u32>>>,
    fail_on: Mutex<Option<(u32, StepError)>>,
}

impl RecordingLoader {
    fn failing_on(record: u32, error: StepError) -> Self {
        Self {
            fail_on: Mutex::new(Some((record, error))),
            ..Self::default()
        }
    }
}

impl Loader<u32> for RecordingLoader {
    fn name(&self) -> &str {
        "recording_loader"
    }

    fn load(&self, _ctx: &Context, record: u32) -> Result<(), StepError> {
        let mut fail_on = self.fail_on.lock().unwrap();
        if fail_on.as_ref().is_some_and(|(r, _)| *r == record) {
            let (_, err) = fail_on.take().unwrap();
            return Err(err);
        }
        self.loaded.lock().unwrap().push(record);
        Ok(())
    }
}

/// Loads the first record and then fails the owning entity behind the runner's back.
struct EntityKillingLoader {
    state: Arc<SqliteStateBackend>,
    calls: Arc<Mutex<u32>>,
}

impl Loader<u32> for EntityKillingLoader {
    fn name(&self) -> &str {
        "entity_killing_loader"
    }

    fn load(&self, ctx: &Context, _record: u32) -> Result<(), StepError> {
        *self.calls.lock().unwrap() += 1;
        self.state
            .set_entity_status(ctx.entity.id, EntityStatus::Failed)
            .map_err(|e| StepError::internal(e.to_string()))
    }
}

fn setup() -> (Arc<SqliteStateBackend>, Context) {
    setup_with_extra(ContextExtra::default())
}

fn setup_with_extra(extra: ContextExtra) -> (Arc<SqliteStateBackend>, Context) {
    let state = Arc::new(SqliteStateBackend::in_memory().unwrap());
    let entity = state
        .create_entity(&NewEntity {
            bulk_import_id: "import-1".into(),
            source_type: "project_entity".into(),
            source_full_path: "group/project".into(),
            source_version: Some("16.4.0".into()),
        })
        .unwrap();
    state
        .set_entity_status(entity.id, EntityStatus::Started)
        .unwrap();
    let tracker = state.ensure_tracker(entity.id, &"issues".into()).unwrap();
    let ctx = Context::new(entity, tracker.id, "issues".into(), extra);
    (state, ctx)
}

// ---------------------------------------------------------------------------
// Fail-fast
// ---------------------------------------------------------------------------

#[test]
fn failed_entity_skips_without_touching_collaborators() {
    let (state, ctx) = setup();
    state
        .set_entity_status(ctx.entity.id, EntityStatus::Failed)
        .unwrap();

    let extractor = PagedExtractor::single(vec![1, 2]);
    let cursors = extractor.cursors.clone();
    let loader = RecordingLoader::default();
    let loaded = loader.loaded.clone();
    let runner = PipelineRunner::new(
        Pipeline::new("issues", Box::new(extractor), Box::new(loader)),
        state.clone(),
    );

    let report = runner.run(&ctx).unwrap();

    assert_eq!(report.outcome, RunOutcome::Skipped);
    assert!(cursors.lock().unwrap().is_empty());
    assert!(loaded.lock().unwrap().is_empty());
    assert_eq!(
        state.get_tracker(ctx.tracker_id).unwrap().status,
        TrackerStatus::Skipped
    );
}

#[test]
fn entity_failing_mid_run_skips_remaining_steps() {
    let (state, ctx) = setup();
    let calls = Arc::new(Mutex::new(0));
    let loader = EntityKillingLoader {
        state: state.clone(),
        calls: calls.clone(),
    };
    let runner = PipelineRunner::new(
        Pipeline::new(
            "issues",
            Box::new(PagedExtractor::single(vec![1, 2, 3])),
            Box::new(loader),
        ),
        state.clone(),
    );

    let report = runner.run(&ctx).unwrap();

    assert_eq!(report.outcome, RunOutcome::Skipped);
    assert_eq!(*calls.lock().unwrap(), 1);
    let tracker = state.get_tracker(ctx.tracker_id).unwrap();
    assert_eq!(tracker.status, TrackerStatus::Skipped);
    assert!(state.list_failures(ctx.entity.id).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Extraction, transformation, continuation
// ---------------------------------------------------------------------------

#[test]
fn two_pages_are_extracted_in_sequence() {
    let (state, ctx) = setup();
    let mut pages = HashMap::new();
    pages.insert(None, ExtractedBatch::with_next(vec![1, 2], "page-2"));
    pages.insert(Some("page-2".to_string()), ExtractedBatch::last(vec![3]));
    let extractor = PagedExtractor {
        pages,
        ..PagedExtractor::default()
    };
    let cursors = extractor.cursors.clone();
    let loader = RecordingLoader::default();
    let loaded = loader.loaded.clone();

    let report = PipelineRunner::new(
        Pipeline::new("issues", Box::new(extractor), Box::new(loader)),
        state.clone(),
    )
    .run(&ctx)
    .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.stats.pages, 2);
    assert_eq!(
        *cursors.lock().unwrap(),
        vec![None, Some("page-2".to_string())]
    );
    assert_eq!(*loaded.lock().unwrap(), vec![1, 2, 3]);

    let tracker = state.get_tracker(ctx.tracker_id).unwrap();
    assert_eq!(tracker.status, TrackerStatus::Finished);
    assert!(!tracker.has_next_page);
    assert_eq!(tracker.next_page, None);
}

#[test]
fn dropped_record_never_reaches_loader() {
    let (state, ctx) = setup();
    let loader = RecordingLoader::default();
    let loaded = loader.loaded.clone();
    let pipeline = Pipeline::new(
        "issues",
        Box::new(PagedExtractor::single(vec![1, 2, 3])),
        Box::new(loader),
    )
    .with_transformer(Box::new(DropRecord(2)));

    let report = PipelineRunner::new(pipeline, state).run(&ctx).unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(*loaded.lock().unwrap(), vec![1, 3]);
    assert_eq!(report.stats.records_dropped, 1);
    assert_eq!(report.stats.records_loaded, 2);
}

#[test]
fn drop_short_circuits_later_transformers() {
    let (state, ctx) = setup();
    let loader = RecordingLoader::default();
    let loaded = loader.loaded.clone();
    let pipeline = Pipeline::new(
        "issues",
        Box::new(PagedExtractor::single(vec![1, 2, 3])),
        Box::new(loader),
    )
    .with_transformer(Box::new(AddTen))
    .with_transformer(Box::new(DropRecord(12)));

    let report = PipelineRunner::new(pipeline, state).run(&ctx).unwrap();

    assert_eq!(*loaded.lock().unwrap(), vec![11, 13]);
    assert_eq!(report.stats.records_dropped, 1);
    assert_eq!(report.stats.records_loaded, 2);
}

#[test]
fn empty_batch_still_updates_tracker() {
    let (state, ctx) = setup();
    let report = PipelineRunner::new(
        Pipeline::new(
            "issues",
            Box::new(PagedExtractor::single(Vec::new())),
            Box::new(RecordingLoader::default()),
        ),
        state.clone(),
    )
    .run(&ctx)
    .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.stats.pages, 1);
    assert_eq!(report.stats.records_extracted, 0);
    assert_eq!(
        state.get_tracker(ctx.tracker_id).unwrap().status,
        TrackerStatus::Finished
    );
}

#[test]
fn nothing_to_extract_finishes_immediately() {
    let (state, ctx) = setup();
    let report = PipelineRunner::new(
        Pipeline::new(
            "issues",
            Box::new(PagedExtractor::default()),
            Box::new(RecordingLoader::default()),
        ),
        state.clone(),
    )
    .run(&ctx)
    .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.stats.pages, 0);
}

// ---------------------------------------------------------------------------
// Retry classification
// ---------------------------------------------------------------------------

#[rstest]
#[case::timeout(StepError::network(NetworkErrorKind::Timeout, "read timeout"), 30)]
#[case::rate_limited(StepError::http(429, "slow down", Some(120)), 120)]
#[case::capped(StepError::http(429, "slow down", Some(900)), 300)]
fn retriable_error_requests_retry(#[case] error: StepError, #[case] expected_secs: u64) {
    let (state, ctx) = setup();
    let runner = PipelineRunner::new(
        Pipeline::new(
            "issues",
            Box::new(PagedExtractor::failing(error)),
            Box::new(RecordingLoader::default()),
        ),
        state.clone(),
    );

    let report = runner.run(&ctx).unwrap();

    assert_eq!(
        report.outcome,
        RunOutcome::RetryRequested {
            delay: Duration::from_secs(expected_secs)
        }
    );
    assert!(state.list_failures(ctx.entity.id).unwrap().is_empty());
    let tracker = state.get_tracker(ctx.tracker_id).unwrap();
    assert_eq!(tracker.retry_count, 1);
    assert_eq!(tracker.status, TrackerStatus::Started);
}

#[test]
fn exhausted_retry_budget_is_fatal() {
    let (state, ctx) = setup();
    let runner = PipelineRunner::new(
        Pipeline::new(
            "issues",
            Box::new(PagedExtractor::failing(StepError::network(
                NetworkErrorKind::ConnectionReset,
                "reset by peer",
            ))),
            Box::new(RecordingLoader::default()),
        ),
        state.clone(),
    )
    .with_retry_policy(RetryPolicy {
        max_retries: 2,
        ..RetryPolicy::default()
    });

    assert!(runner.run(&ctx).unwrap().outcome.is_retry());
    assert!(runner.run(&ctx).unwrap().outcome.is_retry());
    let last = runner.run(&ctx).unwrap();

    assert!(matches!(
        last.outcome,
        RunOutcome::Failed {
            step: PipelineStep::Extractor,
            ..
        }
    ));
    assert_eq!(state.list_failures(ctx.entity.id).unwrap().len(), 1);
    assert_eq!(
        state.get_tracker(ctx.tracker_id).unwrap().status,
        TrackerStatus::Failed
    );
}

#[test]
fn non_retriable_http_status_fails_without_consuming_budget() {
    let (state, ctx) = setup();
    let runner = PipelineRunner::new(
        Pipeline::new(
            "issues",
            Box::new(PagedExtractor::failing(StepError::http(404, "not found", None))),
            Box::new(RecordingLoader::default()),
        ),
        state.clone(),
    );

    let report = runner.run(&ctx).unwrap();

    assert!(matches!(report.outcome, RunOutcome::Failed { .. }));
    let tracker = state.get_tracker(ctx.tracker_id).unwrap();
    assert_eq!(tracker.retry_count, 0);
    assert_eq!(tracker.status, TrackerStatus::Failed);
}

// ---------------------------------------------------------------------------
// Fatal errors
// ---------------------------------------------------------------------------

#[rstest]
#[case::keeps_entity(false, EntityStatus::Started)]
#[case::aborts_entity(true, EntityStatus::Failed)]
fn fatal_loader_error_records_one_failure(
    #[case] abort_on_failure: bool,
    #[case] entity_status: EntityStatus,
) {
    let (state, ctx) = setup();
    let long_message = "constraint violated ".repeat(40);
    let loader = RecordingLoader::failing_on(2, StepError::load(long_message));
    let loaded = loader.loaded.clone();
    let pipeline = Pipeline::new(
        "issues",
        Box::new(PagedExtractor::single(vec![1, 2, 3])),
        Box::new(loader),
    )
    .abort_on_failure(abort_on_failure);

    let report = PipelineRunner::new(pipeline, state.clone())
        .run(&ctx)
        .unwrap();

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed {
            step: PipelineStep::Loader,
            ..
        }
    ));
    assert_eq!(*loaded.lock().unwrap(), vec![1]);

    let failures = state.list_failures(ctx.entity.id).unwrap();
    assert_eq!(failures.len(), 1);
    let failure = &failures[0];
    assert!(failure.exception_message.chars().count() <= 255);
    assert!(failure.exception_message.ends_with("..."));
    assert_eq!(failure.pipeline_step, PipelineStep::Loader);
    assert_eq!(failure.step_class.as_deref(), Some("recording_loader"));
    assert_eq!(failure.correlation_id, ctx.correlation_id);

    assert_eq!(
        state.get_tracker(ctx.tracker_id).unwrap().status,
        TrackerStatus::Failed
    );
    assert_eq!(state.get_entity(ctx.entity.id).unwrap().status, entity_status);
}

// ---------------------------------------------------------------------------
// Idempotency
// ---------------------------------------------------------------------------

#[test]
fn replay_after_retry_loads_only_unmarked_records() {
    let (state, ctx) = setup_with_extra(ContextExtra::with_batch_number(3));
    let loader = RecordingLoader::failing_on(
        3,
        StepError::network(NetworkErrorKind::Timeout, "upstream timeout"),
    );
    let loaded = loader.loaded.clone();
    let runner = PipelineRunner::new(
        Pipeline::new(
            "issues",
            Box::new(PagedExtractor::single(vec![1, 2, 3])),
            Box::new(loader),
        ),
        state.clone(),
    )
    .with_idempotency(Box::new(CacheIdempotency::new(state.clone())));

    let first = runner.run(&ctx).unwrap();
    assert!(first.outcome.is_retry());
    assert_eq!(*loaded.lock().unwrap(), vec![1, 2]);

    let second = runner.run(&ctx).unwrap();
    assert_eq!(second.outcome, RunOutcome::Completed);
    assert_eq!(second.stats.records_skipped, 2);
    assert_eq!(*loaded.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn replay_resumes_second_page_without_reloading_marked_records() {
    let (state, ctx) = setup_with_extra(ContextExtra::with_batch_number(3));
    let mut pages = HashMap::new();
    pages.insert(None, ExtractedBatch::with_next(vec![1, 2], "page-2"));
    pages.insert(Some("page-2".to_string()), ExtractedBatch::last(vec![3, 4]));
    let extractor = PagedExtractor {
        pages,
        ..PagedExtractor::default()
    };
    let cursors = extractor.cursors.clone();
    let loader = RecordingLoader::failing_on(
        4,
        StepError::network(NetworkErrorKind::Timeout, "upstream timeout"),
    );
    let loaded = loader.loaded.clone();
    let runner = PipelineRunner::new(
        Pipeline::new("issues", Box::new(extractor), Box::new(loader)),
        state.clone(),
    )
    .with_idempotency(Box::new(CacheIdempotency::new(state.clone())));

    let first = runner.run(&ctx).unwrap();
    assert!(first.outcome.is_retry());
    // Record 3 shares index 0 with record 1 but lives on another page.
    assert_eq!(*loaded.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(first.stats.records_skipped, 0);

    let second = runner.run(&ctx).unwrap();
    assert_eq!(second.outcome, RunOutcome::Completed);
    assert_eq!(second.stats.pages, 1);
    assert_eq!(second.stats.records_skipped, 1);
    assert_eq!(*loaded.lock().unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(
        *cursors.lock().unwrap(),
        vec![None, Some("page-2".to_string()), Some("page-2".to_string())]
    );
}

#[test]
fn without_idempotency_replay_reloads_everything() {
    let (state, ctx) = setup();
    let loader = RecordingLoader::default();
    let loaded = loader.loaded.clone();
    let runner = PipelineRunner::new(
        Pipeline::new(
            "issues",
            Box::new(PagedExtractor::single(vec![1, 2])),
            Box::new(loader),
        ),
        state,
    );

    runner.run(&ctx).unwrap();
    runner.run(&ctx).unwrap();

    assert_eq!(*loaded.lock().unwrap(), vec![1, 2, 1, 2]);
}
