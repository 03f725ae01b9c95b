use std::path::Path;

use anyhow::{bail, Result};
use bulkport_engine::orchestrator;
use bulkport_state::StateBackend;
use bulkport_types::state::EntityId;

/// Execute the `failures` command: print recorded failures, optionally for one entity.
pub fn execute(import_path: &Path, entity: Option<EntityId>) -> Result<()> {
    let config = super::load_import(import_path)?;
    let state = orchestrator::open_state_backend(&config)?;

    let entities = state.list_entities(&config.import)?;
    let selected: Vec<_> = match entity {
        Some(id) => {
            let Some(found) = entities.into_iter().find(|e| e.id == id) else {
                bail!("Entity {id} does not belong to import '{}'", config.import);
            };
            vec![found]
        }
        None => entities,
    };

    let mut total = 0usize;
    for entity in &selected {
        for failure in state.list_failures(entity.id)? {
            total += 1;
            println!(
                "[{}] {} {} {}/{}: {}: {}",
                failure.created_at.as_str(),
                entity.source_full_path,
                failure.pipeline_class,
                failure.pipeline_step,
                failure.step_class.as_deref().unwrap_or("-"),
                failure.exception_class,
                failure.exception_message,
            );
            println!("    correlation_id={}", failure.correlation_id);
        }
    }
    println!("{total} failure(s)");
    Ok(())
}
