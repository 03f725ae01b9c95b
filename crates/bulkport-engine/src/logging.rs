//! Structured log fields shared by every event of a pipeline run.

use crate::context::Context;

/// Fixed tag identifying this importer in log lines.
pub(crate) const IMPORTER: &str = "gitlab_migration";

/// `None` for blank values so tracing omits the field entirely.
pub(crate) fn non_blank(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Span wrapping one pipeline run; events inside inherit its fields.
pub(crate) fn run_span(ctx: &Context) -> tracing::Span {
    let extra = ctx.extra.to_string();
    tracing::info_span!(
        "pipeline_run",
        bulk_import_id = non_blank(ctx.bulk_import_id()),
        bulk_import_entity_id = ctx.entity.id.get(),
        bulk_import_entity_type = non_blank(&ctx.entity.source_type),
        source_full_path = non_blank(&ctx.entity.source_full_path),
        pipeline_class = non_blank(ctx.pipeline.as_str()),
        context_extra = non_blank(&extra),
        source_version = ctx.entity.source_version.as_deref().and_then(non_blank),
        correlation_id = %ctx.correlation_id,
        importer = IMPORTER,
    )
}
