pub mod failures;
pub mod run;
pub mod status;

use std::path::Path;

use anyhow::{Context, Result};
use bulkport_engine::config::parser;
use bulkport_engine::config::types::ImportConfig;
use bulkport_engine::config::validator;

/// Parse and validate an import definition.
pub(crate) fn load_import(import_path: &Path) -> Result<ImportConfig> {
    let config = parser::parse_import(import_path)
        .with_context(|| format!("Failed to parse import: {}", import_path.display()))?;
    validator::validate_import(&config)?;
    Ok(config)
}
