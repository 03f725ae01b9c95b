//! Newline-delimited JSON extractor and loader.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use bulkport_types::batch::ExtractedBatch;
use bulkport_types::error::StepError;
use serde_json::Value;

use crate::context::Context;
use crate::pipeline::{Extractor, Loader};

/// Pages through a JSONL dump. The cursor is the line offset of the next page.
#[derive(Debug, Clone)]
pub struct JsonlExtractor {
    path: PathBuf,
    page_size: usize,
}

impl JsonlExtractor {
    #[must_use]
    pub fn new(path: PathBuf, page_size: usize) -> Self {
        Self {
            path,
            page_size: page_size.max(1),
        }
    }
}

fn parse_cursor(cursor: Option<&str>) -> Result<usize, StepError> {
    match cursor {
        None => Ok(0),
        Some(raw) => raw.parse().map_err(|_| {
            StepError::internal(format!("invalid jsonl cursor '{raw}'")).with_class("CursorError")
        }),
    }
}

impl Extractor<Value> for JsonlExtractor {
    fn name(&self) -> &str {
        "jsonl_extractor"
    }

    fn extract(
        &self,
        _ctx: &Context,
        cursor: Option<&str>,
    ) -> Result<Option<ExtractedBatch<Value>>, StepError> {
        let offset = parse_cursor(cursor)?;
        let file = File::open(&self.path).map_err(|e| {
            StepError::config(format!("cannot open {}: {e}", self.path.display()))
                .with_class("SourceNotFound")
        })?;

        let mut records = Vec::with_capacity(self.page_size);
        let mut next_line = offset;
        let mut has_next_page = false;

        for (line_no, line) in BufReader::new(file).lines().enumerate().skip(offset) {
            let line = line?;
            if line.trim().is_empty() {
                if records.len() < self.page_size {
                    next_line = line_no + 1;
                }
                continue;
            }
            if records.len() == self.page_size {
                has_next_page = true;
                break;
            }
            let record: Value = serde_json::from_str(&line).map_err(|e| {
                StepError::data(format!("{}:{}: {e}", self.path.display(), line_no + 1))
                    .with_class("JsonError")
            })?;
            records.push(record);
            next_line = line_no + 1;
        }

        if records.is_empty() {
            return Ok(None);
        }

        tracing::debug!(offset, records = records.len(), has_next_page, "Extracted jsonl page");
        if has_next_page {
            Ok(Some(ExtractedBatch::with_next(records, next_line.to_string())))
        } else {
            Ok(Some(ExtractedBatch::last(records)))
        }
    }
}

/// Appends one compact JSON line per record.
#[derive(Debug)]
pub struct JsonlLoader {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlLoader {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }
}

impl Loader<Value> for JsonlLoader {
    fn name(&self) -> &str {
        "jsonl_loader"
    }

    fn load(&self, _ctx: &Context, record: Value) -> Result<(), StepError> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self
            .lock
            .lock()
            .map_err(|_| StepError::internal("jsonl loader lock poisoned"))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                StepError::load(format!("cannot open {}: {e}", self.path.display()))
            })?;
        file.write_all(line.as_bytes())
            .map_err(|e| StepError::load(format!("write to {} failed: {e}", self.path.display())))
    }
}
