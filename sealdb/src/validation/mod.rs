use crate::config::{FieldDefinition, FieldType, TableConfig};
use crate::document::Document;
use crate::error::{Result, SealDbError};
use serde_json::Value;
use std::path::Path;

/// Result of validating a document
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate a document against its table schema.
/// Fields not declared in the schema are accepted as-is.
pub fn validate_document(table: &TableConfig, doc: &Document) -> ValidationResult {
    let mut result = ValidationResult::default();

    // Sorted so error messages are stable
    let mut fields: Vec<(&String, &FieldDefinition)> = table.schema.iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    for (field_name, field_def) in fields {
        match doc.get(field_name.as_str()) {
            None | Some(Value::Null) => {
                if field_def.required {
                    result
                        .errors
                        .push(format!("Required field '{field_name}' is missing"));
                }
            }
            Some(value) => validate_field_value(field_name, field_def.field_type, value, &mut result),
        }
    }

    result
}

fn validate_field_value(
    field_name: &str,
    field_type: FieldType,
    value: &Value,
    result: &mut ValidationResult,
) {
    let ok = match field_type {
        FieldType::String => value.is_string(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Object => value.is_object(),
        FieldType::Array => value.is_array(),
        FieldType::Date => match value.as_str() {
            Some(s) => {
                if !is_date(s) {
                    result.errors.push(format!(
                        "Field '{field_name}' value '{s}' is not an ISO-8601 date"
                    ));
                }
                return;
            }
            None => false,
        },
        FieldType::Path => match value.as_str() {
            Some(s) => {
                if !Path::new(s).exists() {
                    result
                        .errors
                        .push(format!("Field '{field_name}' path '{s}' does not exist"));
                }
                return;
            }
            None => false,
        },
    };

    if !ok {
        result.errors.push(format!(
            "Field '{field_name}' expected {}, got {}",
            expected_name(field_type),
            type_name(value)
        ));
    }
}

fn is_date(s: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(s).is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

fn expected_name(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::String => "string",
        FieldType::Number => "number",
        FieldType::Boolean => "boolean",
        FieldType::Date => "date string",
        FieldType::Object => "object",
        FieldType::Array => "array",
        FieldType::Path => "path string",
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validate and convert failures into a `Validation` error.
pub fn ensure_valid(table_name: &str, table: &TableConfig, doc: &Document) -> Result<()> {
    let result = validate_document(table, doc);
    if !result.is_ok() {
        return Err(SealDbError::Validation(format!(
            "Document for table '{table_name}' failed validation:\n  - {}",
            result.errors.join("\n  - ")
        )));
    }
    Ok(())
}
