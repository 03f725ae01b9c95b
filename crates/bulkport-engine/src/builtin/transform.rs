//! Field-level transformers for JSON object records.

use bulkport_types::error::StepError;
use serde_json::{Map, Value};

use crate::context::Context;
use crate::pipeline::Transformer;

fn as_object<'a>(name: &str, record: &'a mut Value) -> Result<&'a mut Map<String, Value>, StepError> {
    record.as_object_mut().ok_or_else(|| {
        StepError::data(format!("{name} expects a JSON object record"))
            .with_class("UnexpectedRecordShape")
    })
}

/// Moves `from` to `to`. Records without `from` pass through unchanged.
#[derive(Debug, Clone)]
pub struct RenameField {
    pub from: String,
    pub to: String,
}

impl Transformer<Value> for RenameField {
    fn name(&self) -> &str {
        "rename_field"
    }

    fn transform(&self, _ctx: &Context, mut record: Value) -> Result<Option<Value>, StepError> {
        let object = as_object(self.name(), &mut record)?;
        if let Some(value) = object.remove(&self.from) {
            object.insert(self.to.clone(), value);
        }
        Ok(Some(record))
    }
}

#[derive(Debug, Clone)]
pub struct RemoveFields {
    pub fields: Vec<String>,
}

impl Transformer<Value> for RemoveFields {
    fn name(&self) -> &str {
        "remove_fields"
    }

    fn transform(&self, _ctx: &Context, mut record: Value) -> Result<Option<Value>, StepError> {
        let object = as_object(self.name(), &mut record)?;
        for field in &self.fields {
            object.remove(field);
        }
        Ok(Some(record))
    }
}

#[derive(Debug, Clone)]
pub struct SetField {
    pub field: String,
    pub value: Value,
}

impl Transformer<Value> for SetField {
    fn name(&self) -> &str {
        "set_field"
    }

    fn transform(&self, _ctx: &Context, mut record: Value) -> Result<Option<Value>, StepError> {
        as_object(self.name(), &mut record)?.insert(self.field.clone(), self.value.clone());
        Ok(Some(record))
    }
}

/// Drops records where `field` is missing or null.
#[derive(Debug, Clone)]
pub struct RequireField {
    pub field: String,
}

impl Transformer<Value> for RequireField {
    fn name(&self) -> &str {
        "require_field"
    }

    fn transform(&self, _ctx: &Context, mut record: Value) -> Result<Option<Value>, StepError> {
        let present = as_object(self.name(), &mut record)?
            .get(&self.field)
            .is_some_and(|v| !v.is_null());
        Ok(present.then_some(record))
    }
}

/// Prepends `prefix` to a string field. Non-string values are a data error.
#[derive(Debug, Clone)]
pub struct PrefixField {
    pub field: String,
    pub prefix: String,
}

impl Transformer<Value> for PrefixField {
    fn name(&self) -> &str {
        "prefix_field"
    }

    fn transform(&self, _ctx: &Context, mut record: Value) -> Result<Option<Value>, StepError> {
        let object = as_object(self.name(), &mut record)?;
        match object.get_mut(&self.field) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => s.insert_str(0, &self.prefix),
            Some(other) => {
                return Err(StepError::data(format!(
                    "prefix_field: '{}' is not a string ({other})",
                    self.field
                ))
                .with_class("UnexpectedRecordShape"));
            }
        }
        Ok(Some(record))
    }
}
