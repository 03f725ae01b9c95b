//! Import scheduler: registers entities, runs their pipelines, and reschedules
//! pipelines that request a retry.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use bulkport_state::{SqliteStateBackend, StateBackend};
use bulkport_types::state::{
    Entity, EntityStatus, NewEntity, PipelineName, Tracker, TrackerStatus,
};
use serde_json::Value;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::Instrument;

use crate::builtin::build_pipeline;
use crate::config::types::{ImportConfig, PipelineSpec};
use crate::context::{Context, ContextExtra};
use crate::errors::PipelineError;
use crate::idempotency::CacheIdempotency;
use crate::pipeline::Pipeline;
use crate::result::{EntitySummary, ImportSummary, PipelineSummary, RunOutcome, RunStats};
use crate::runner::PipelineRunner;

const DEFAULT_STATE_PATH: &str = "bulkport_state.db";

/// Builds the pipeline for one spec; swapped out in tests.
pub type PipelineFactory =
    Arc<dyn Fn(&PipelineSpec) -> anyhow::Result<Pipeline<Value>> + Send + Sync>;

/// Open the state database named by the import's `state` section.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or initialised.
pub fn open_state_backend(config: &ImportConfig) -> anyhow::Result<Arc<SqliteStateBackend>> {
    let path = config
        .state
        .connection
        .as_deref()
        .unwrap_or(DEFAULT_STATE_PATH);
    let backend = SqliteStateBackend::open(Path::new(path))
        .with_context(|| format!("Failed to open state database '{path}'"))?;
    Ok(Arc::new(backend))
}

/// Run every entity of an import with the built-in collaborators.
///
/// # Errors
///
/// Returns a `PipelineError` if the state backend fails or a pipeline cannot
/// be built. Step failures are recorded and reported in the summary instead.
pub async fn run_import(config: &ImportConfig) -> Result<ImportSummary, PipelineError> {
    let state = open_state_backend(config)?;
    run_import_with(config, state, Arc::new(build_pipeline)).await
}

/// Run an import against an explicit state backend and pipeline factory.
///
/// # Errors
///
/// See [`run_import`].
pub async fn run_import_with(
    config: &ImportConfig,
    state: Arc<SqliteStateBackend>,
    factory: PipelineFactory,
) -> Result<ImportSummary, PipelineError> {
    let start = Instant::now();
    tracing::info!(
        import = config.import,
        entities = config.entities.len(),
        concurrency = config.concurrency,
        "Starting import"
    );

    let settings = Arc::new(config.clone());
    let entities = {
        let settings = settings.clone();
        let state = state.clone();
        blocking("register_entities", move || {
            register_entities(&settings, state.as_ref())
        })
        .await?
    };

    let semaphore = Arc::new(tokio::sync::Semaphore::new(config.concurrency.max(1)));
    let mut entity_join_set: JoinSet<Result<EntitySummary, PipelineError>> = JoinSet::new();

    for (index, entity) in entities.into_iter().enumerate() {
        let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
            PipelineError::Infrastructure(anyhow::anyhow!("Semaphore closed: {e}"))
        })?;
        let span = tracing::info_span!(
            "entity",
            entity_id = %entity.id,
            source_full_path = %entity.source_full_path
        );
        let settings = settings.clone();
        let state = state.clone();
        let factory = factory.clone();

        entity_join_set.spawn(
            async move {
                let result = run_entity(&settings, index, entity, state, factory).await;
                drop(permit);
                result
            }
            .instrument(span),
        );
    }

    let mut summaries = collect_entity_results(entity_join_set).await?;
    summaries.sort_by_key(|s| s.entity_id);

    let summary = ImportSummary {
        import: config.import.clone(),
        entities: summaries,
        duration_secs: start.elapsed().as_secs_f64(),
    };
    tracing::info!(
        import = summary.import,
        records_loaded = summary.records_loaded(),
        failures = summary.failure_count(),
        finished = summary.entities_with_status(EntityStatus::Finished),
        failed = summary.entities_with_status(EntityStatus::Failed),
        duration_secs = summary.duration_secs,
        "Import complete"
    );
    Ok(summary)
}

async fn collect_entity_results(
    mut entity_join_set: JoinSet<Result<EntitySummary, PipelineError>>,
) -> Result<Vec<EntitySummary>, PipelineError> {
    let mut summaries = Vec::new();
    let mut first_error: Option<PipelineError> = None;

    while let Some(joined) = entity_join_set.join_next().await {
        match joined {
            Ok(Ok(summary)) if first_error.is_none() => summaries.push(summary),
            Ok(Ok(_)) => {}
            Ok(Err(error)) => {
                tracing::error!("Entity migration aborted: {}", error);
                if first_error.is_none() {
                    first_error = Some(error);
                    entity_join_set.abort_all();
                }
            }
            Err(join_err) if join_err.is_cancelled() && first_error.is_some() => {
                // Expected: siblings cancelled after the first infrastructure error.
            }
            Err(join_err) => {
                return Err(PipelineError::Infrastructure(anyhow::anyhow!(
                    "Entity task panicked: {join_err}"
                )));
            }
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(summaries),
    }
}

/// Find or create one entity per configured source path, in config order.
fn register_entities(
    config: &ImportConfig,
    state: &dyn StateBackend,
) -> Result<Vec<Entity>, PipelineError> {
    config
        .entities
        .iter()
        .map(|entity_cfg| {
            if let Some(existing) =
                state.find_entity(&config.import, &entity_cfg.source_full_path)?
            {
                tracing::debug!(
                    entity_id = %existing.id,
                    status = %existing.status,
                    source_full_path = entity_cfg.source_full_path,
                    "Resuming existing entity"
                );
                return Ok(existing);
            }
            let entity = state.create_entity(&NewEntity {
                bulk_import_id: config.import.clone(),
                source_type: entity_cfg.source_type.clone(),
                source_full_path: entity_cfg.source_full_path.clone(),
                source_version: config.source_version.clone(),
            })?;
            tracing::info!(
                entity_id = %entity.id,
                source_full_path = entity_cfg.source_full_path,
                "Registered entity"
            );
            Ok(entity)
        })
        .collect()
}

async fn run_entity(
    settings: &ImportConfig,
    index: usize,
    entity: Entity,
    state: Arc<SqliteStateBackend>,
    factory: PipelineFactory,
) -> Result<EntitySummary, PipelineError> {
    let entity_cfg = &settings.entities[index];

    if entity.status.is_terminal() {
        tracing::info!(status = %entity.status, "Entity already processed, not re-running");
        let trackers = state.list_trackers(entity.id)?;
        let pipelines = trackers
            .into_iter()
            .map(|t| PipelineSummary {
                pipeline: t.pipeline,
                status: t.status,
                stats: RunStats::default(),
                attempts: 0,
            })
            .collect();
        return entity_summary(state.as_ref(), &entity, pipelines);
    }

    if entity.status == EntityStatus::Created {
        state.set_entity_status(entity.id, EntityStatus::Started)?;
    }
    tracing::info!(source_type = entity.source_type, "Entity migration started");

    let deadline = settings
        .entity_timeout_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut timed_out = false;
    let mut pipelines = Vec::with_capacity(entity_cfg.pipelines.len());

    for spec in &entity_cfg.pipelines {
        let tracker = state.ensure_tracker(entity.id, &PipelineName::new(spec.name.as_str()))?;

        if tracker.status.is_terminal() {
            tracing::debug!(pipeline = spec.name, status = %tracker.status, "Pipeline already done");
            pipelines.push(idle_summary(tracker));
            continue;
        }

        if !timed_out && deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::warn!(
                timeout_secs = settings.entity_timeout_secs,
                "Entity migration timed out, skipping remaining pipelines"
            );
            // A failed entity stays failed; only a running one times out.
            if state.get_entity(entity.id)?.status == EntityStatus::Started {
                state.set_entity_status(entity.id, EntityStatus::Timeout)?;
            }
            timed_out = true;
        }
        if timed_out {
            state.set_tracker_status(tracker.id, TrackerStatus::Skipped)?;
            pipelines.push(PipelineSummary {
                status: TrackerStatus::Skipped,
                ..idle_summary(tracker)
            });
            continue;
        }

        let pipeline = factory(spec)
            .with_context(|| format!("Failed to build pipeline '{}'", spec.name))?;
        pipelines.push(run_pipeline(settings, spec, pipeline, &entity, &tracker, &state).await?);
    }

    let current = state.get_entity(entity.id)?;
    if current.status == EntityStatus::Started {
        state.set_entity_status(entity.id, EntityStatus::Finished)?;
    }
    let summary = entity_summary(state.as_ref(), &entity, pipelines)?;
    tracing::info!(status = %summary.status, failures = summary.failures, "Entity migration ended");
    Ok(summary)
}

/// Run one pipeline, sleeping and re-running while it requests retries.
async fn run_pipeline(
    settings: &ImportConfig,
    spec: &PipelineSpec,
    pipeline: Pipeline<Value>,
    entity: &Entity,
    tracker: &Tracker,
    state: &Arc<SqliteStateBackend>,
) -> Result<PipelineSummary, PipelineError> {
    let backend: Arc<dyn StateBackend> = state.clone();
    let mut runner = PipelineRunner::new(pipeline, backend).with_retry_policy(settings.retry);
    if settings.idempotency.enabled {
        runner = runner.with_idempotency(Box::new(CacheIdempotency::new(state.clone())));
    }
    let runner = Arc::new(runner);
    let extra = spec
        .batch_number
        .map_or_else(ContextExtra::default, ContextExtra::with_batch_number);

    let mut stats = RunStats::default();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let ctx = Context::new(entity.clone(), tracker.id, tracker.pipeline.clone(), extra.clone());
        let runner_task = runner.clone();
        let report = blocking("pipeline_run", move || runner_task.run(&ctx)).await?;
        stats.absorb(&report.stats);

        match report.outcome {
            RunOutcome::RetryRequested { delay } => {
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = delay.as_millis() as u64;
                tracing::info!(
                    pipeline = spec.name,
                    attempt = attempts,
                    delay_ms,
                    "Rescheduling pipeline after retry request"
                );
                tokio::time::sleep(delay).await;
            }
            _ => break,
        }
    }

    let status = state.get_tracker(tracker.id)?.status;
    Ok(PipelineSummary {
        pipeline: tracker.pipeline.clone(),
        status,
        stats,
        attempts,
    })
}

fn idle_summary(tracker: Tracker) -> PipelineSummary {
    PipelineSummary {
        pipeline: tracker.pipeline,
        status: tracker.status,
        stats: RunStats::default(),
        attempts: 0,
    }
}

fn entity_summary(
    state: &dyn StateBackend,
    entity: &Entity,
    pipelines: Vec<PipelineSummary>,
) -> Result<EntitySummary, PipelineError> {
    Ok(EntitySummary {
        entity_id: entity.id,
        source_full_path: entity.source_full_path.clone(),
        status: state.get_entity(entity.id)?.status,
        pipelines,
        failures: state.list_failures(entity.id)?.len(),
    })
}

async fn blocking<T, F>(what: &'static str, f: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        PipelineError::Infrastructure(anyhow::anyhow!("{what} task panicked: {e}"))
    })?
}
