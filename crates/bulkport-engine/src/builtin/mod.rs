//! Built-in collaborators over `serde_json::Value` records, and the factory
//! that assembles a [`Pipeline`] from its YAML spec.

mod jsonl;
mod sqlite;
mod transform;

pub use jsonl::{JsonlExtractor, JsonlLoader};
pub use sqlite::SqliteLoader;
pub use transform::{PrefixField, RemoveFields, RenameField, RequireField, SetField};

use anyhow::{Context as _, Result};
use serde_json::Value;

use crate::config::types::{ExtractorSpec, LoaderSpec, PipelineSpec, TransformerSpec};
use crate::pipeline::{Extractor, Loader, Pipeline, Transformer};

/// Build a runnable pipeline from its configuration.
///
/// # Errors
///
/// Returns an error if a loader target cannot be opened.
pub fn build_pipeline(spec: &PipelineSpec) -> Result<Pipeline<Value>> {
    let extractor: Box<dyn Extractor<Value>> = match &spec.extractor {
        ExtractorSpec::Jsonl { path, page_size } => {
            Box::new(JsonlExtractor::new(path.clone(), *page_size))
        }
    };

    let loader: Box<dyn Loader<Value>> = match &spec.loader {
        LoaderSpec::Jsonl { path } => Box::new(JsonlLoader::new(path.clone())),
        LoaderSpec::Sqlite { path, table } => Box::new(
            SqliteLoader::open(path, table)
                .with_context(|| format!("Failed to open sqlite loader for '{}'", spec.name))?,
        ),
    };

    let mut pipeline =
        Pipeline::new(spec.name.as_str(), extractor, loader).abort_on_failure(spec.abort_on_failure);
    for transformer in &spec.transformers {
        pipeline = pipeline.with_transformer(build_transformer(transformer));
    }
    Ok(pipeline)
}

fn build_transformer(spec: &TransformerSpec) -> Box<dyn Transformer<Value>> {
    match spec.clone() {
        TransformerSpec::RenameField { from, to } => Box::new(RenameField { from, to }),
        TransformerSpec::RemoveFields { fields } => Box::new(RemoveFields { fields }),
        TransformerSpec::SetField { field, value } => Box::new(SetField { field, value }),
        TransformerSpec::RequireField { field } => Box::new(RequireField { field }),
        TransformerSpec::PrefixField { field, prefix } => Box::new(PrefixField { field, prefix }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_import_str;

    #[test]
    fn builds_chain_in_declared_order() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            r#"
version: "1.0"
import: t
entities:
  - source_type: project_entity
    source_full_path: g/p
    pipelines:
      - name: issues
        abort_on_failure: true
        extractor: {{ type: jsonl, path: issues.jsonl, page_size: 10 }}
        transformers:
          - {{ type: require_field, field: iid }}
          - {{ type: rename_field, from: author, to: author_username }}
        loader: {{ type: sqlite, path: "{}", table: issues }}
"#,
            dir.path().join("target.db").display()
        );
        let config = parse_import_str(&yaml).unwrap();
        let pipeline = build_pipeline(&config.entities[0].pipelines[0]).unwrap();

        assert_eq!(pipeline.name().as_str(), "issues");
        assert!(pipeline.aborts_on_failure());
        assert_eq!(pipeline.transformer_names(), vec!["require_field", "rename_field"]);
    }
}
