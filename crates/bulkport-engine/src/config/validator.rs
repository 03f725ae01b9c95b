//! Semantic validation for parsed import definitions.

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::Regex;

use crate::config::types::{
    EntityConfig, ExtractorSpec, ImportConfig, LoaderSpec, PipelineSpec, TransformerSpec,
};

static TABLE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid table name regex"));

fn validate_pipeline_spec(spec: &PipelineSpec, context: &str, errors: &mut Vec<String>) {
    match &spec.extractor {
        ExtractorSpec::Jsonl { page_size, .. } => {
            if *page_size == 0 {
                errors.push(format!("{context}: extractor page_size must be at least 1"));
            }
        }
    }

    for (i, transformer) in spec.transformers.iter().enumerate() {
        let t_context = format!("{context}.transformers[{i}]");
        match transformer {
            TransformerSpec::RenameField { from, to } => {
                if from.trim().is_empty() || to.trim().is_empty() {
                    errors.push(format!("{t_context}: rename_field needs non-empty 'from' and 'to'"));
                } else if from == to {
                    errors.push(format!("{t_context}: rename_field 'from' and 'to' are both '{from}'"));
                }
            }
            TransformerSpec::RemoveFields { fields } => {
                if fields.is_empty() {
                    errors.push(format!("{t_context}: remove_fields needs at least one field"));
                }
            }
            TransformerSpec::SetField { field, .. }
            | TransformerSpec::RequireField { field }
            | TransformerSpec::PrefixField { field, .. } => {
                if field.trim().is_empty() {
                    errors.push(format!("{t_context}: field must not be empty"));
                }
            }
        }
    }

    if let LoaderSpec::Sqlite { table, .. } = &spec.loader {
        if !TABLE_NAME_RE.is_match(table) {
            errors.push(format!("{context}: invalid sqlite table name '{table}'"));
        }
    }
}

fn validate_entity(entity: &EntityConfig, index: usize, errors: &mut Vec<String>) {
    let context = if entity.source_full_path.trim().is_empty() {
        format!("entities[{index}]")
    } else {
        format!("entity '{}'", entity.source_full_path)
    };

    if entity.source_type.trim().is_empty() {
        errors.push(format!("{context}: source_type must not be empty"));
    }
    if entity.source_full_path.trim().is_empty() {
        errors.push(format!("{context}: source_full_path must not be empty"));
    }
    if entity.pipelines.is_empty() {
        errors.push(format!("{context}: must define at least one pipeline"));
    }

    let mut seen = HashSet::new();
    for (i, spec) in entity.pipelines.iter().enumerate() {
        if spec.name.trim().is_empty() {
            errors.push(format!("{context}: pipeline {i} has an empty name"));
            continue;
        }
        if !seen.insert(spec.name.as_str()) {
            errors.push(format!("{context}: duplicate pipeline '{}'", spec.name));
        }
        validate_pipeline_spec(spec, &format!("{context}.{}", spec.name), errors);
    }
}

/// Validate a parsed import definition.
///
/// # Errors
///
/// Returns an error listing every validation failure found.
pub fn validate_import(config: &ImportConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported import version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.import.trim().is_empty() {
        errors.push("Import id must not be empty".to_string());
    }

    if config.concurrency == 0 {
        errors.push("concurrency must be at least 1".to_string());
    }

    if config.entity_timeout_secs == Some(0) {
        errors.push("entity_timeout_secs must be > 0".to_string());
    }

    if config.retry.default_delay_secs > config.retry.max_delay_secs {
        errors.push(format!(
            "retry.default_delay_secs ({}) exceeds retry.max_delay_secs ({})",
            config.retry.default_delay_secs, config.retry.max_delay_secs
        ));
    }

    if config.entities.is_empty() {
        errors.push("Import must define at least one entity".to_string());
    }

    let mut paths = HashSet::new();
    for (i, entity) in config.entities.iter().enumerate() {
        if !entity.source_full_path.trim().is_empty()
            && !paths.insert(entity.source_full_path.as_str())
        {
            errors.push(format!(
                "Duplicate entity source_full_path '{}'",
                entity.source_full_path
            ));
        }
        validate_entity(entity, i, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Import validation failed:\n  - {}", errors.join("\n  - "));
    }
}
