//! Serde types for the import YAML.

use std::path::PathBuf;

use bulkport_types::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

const DEFAULT_PAGE_SIZE: usize = 100;
const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportConfig {
    pub version: String,
    /// Import job id; entities are keyed by (import, source_full_path).
    pub import: String,
    #[serde(default)]
    pub source_version: Option<String>,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    /// Wall-clock budget per entity; pipelines not started in time are skipped.
    #[serde(default)]
    pub entity_timeout_secs: Option<u64>,
    /// Maximum entities migrated at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    pub entities: Vec<EntityConfig>,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackendKind {
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    #[serde(default = "default_backend")]
    pub backend: StateBackendKind,
    /// Database path; defaults to `bulkport_state.db` in the working directory.
    #[serde(default)]
    pub connection: Option<String>,
}

fn default_backend() -> StateBackendKind {
    StateBackendKind::Sqlite
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            connection: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdempotencyConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityConfig {
    /// e.g. `project_entity` or `group_entity`.
    pub source_type: String,
    pub source_full_path: String,
    pub pipelines: Vec<PipelineSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSpec {
    pub name: String,
    #[serde(default)]
    pub abort_on_failure: bool,
    #[serde(default)]
    pub batch_number: Option<u64>,
    pub extractor: ExtractorSpec,
    #[serde(default)]
    pub transformers: Vec<TransformerSpec>,
    pub loader: LoaderSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractorSpec {
    /// Newline-delimited JSON dump, paged by record offset.
    Jsonl {
        path: PathBuf,
        #[serde(default = "default_page_size")]
        page_size: usize,
    },
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformerSpec {
    RenameField { from: String, to: String },
    RemoveFields { fields: Vec<String> },
    SetField { field: String, value: serde_json::Value },
    /// Drop records where `field` is missing or null.
    RequireField { field: String },
    PrefixField { field: String, prefix: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoaderSpec {
    Jsonl { path: PathBuf },
    Sqlite { path: PathBuf, table: String },
}
