use std::path::Path;

use anyhow::Result;
use bulkport_engine::orchestrator;
use bulkport_state::StateBackend;

/// Execute the `status` command: print entities and their trackers.
pub fn execute(import_path: &Path) -> Result<()> {
    let config = super::load_import(import_path)?;
    let state = orchestrator::open_state_backend(&config)?;

    let entities = state.list_entities(&config.import)?;
    if entities.is_empty() {
        println!("Import '{}' has not been run yet.", config.import);
        return Ok(());
    }

    println!("Import '{}':", config.import);
    for entity in entities {
        println!(
            "  [{}] {} {} ({})",
            entity.id, entity.source_type, entity.source_full_path, entity.status
        );
        for tracker in state.list_trackers(entity.id)? {
            let cursor = tracker.next_page.as_deref().unwrap_or("-");
            println!(
                "      {:<24} {:<9} next_page={} retries={}",
                tracker.pipeline.as_str(),
                tracker.status.as_str(),
                cursor,
                tracker.retry_count,
            );
        }
    }
    Ok(())
}
