use std::path::Path;

use anyhow::Result;
use bulkport_engine::orchestrator;
use bulkport_types::state::EntityStatus;

/// Execute the `run` command: parse, validate, and run an import.
pub async fn execute(import_path: &Path) -> Result<()> {
    let config = super::load_import(import_path)?;

    tracing::info!(
        import = config.import,
        entities = config.entities.len(),
        idempotency = config.idempotency.enabled,
        "Import validated"
    );

    let summary = orchestrator::run_import(&config).await?;

    println!("Import '{}' finished in {:.2}s.", summary.import, summary.duration_secs);
    println!("  Records loaded:   {}", summary.records_loaded());
    println!("  Failures:         {}", summary.failure_count());
    println!(
        "  Entities:         {} finished, {} failed, {} timed out",
        summary.entities_with_status(EntityStatus::Finished),
        summary.entities_with_status(EntityStatus::Failed),
        summary.entities_with_status(EntityStatus::Timeout),
    );
    for entity in &summary.entities {
        println!(
            "  [{}] {} ({})",
            entity.entity_id, entity.source_full_path, entity.status
        );
        for pipeline in &entity.pipelines {
            println!(
                "      {:<24} {:<9} loaded={} dropped={} skipped={} attempts={}",
                pipeline.pipeline.as_str(),
                pipeline.status.as_str(),
                pipeline.stats.records_loaded,
                pipeline.stats.records_dropped,
                pipeline.stats.records_skipped,
                pipeline.attempts,
            );
        }
    }

    if summary.entities_with_status(EntityStatus::Failed) > 0 {
        anyhow::bail!("Import '{}' finished with failed entities", summary.import);
    }
    Ok(())
}
