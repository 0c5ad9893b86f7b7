//! Evolvable record schemas: every task and proposal is validated against a
//! declared schema before it is allowed to enter state, and missing optional
//! fields are filled from the schema's declared defaults.
//!
//! The type model here mirrors the condition/operator modeling used for
//! query filters in the data layer this crate was adapted from: a small,
//! serializable constraint language rather than a dependency on an external
//! JSON Schema implementation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unknown schema: {0}")]
    UnknownSchema(String),
    #[error("field '{0}' is required")]
    MissingField(String),
    #[error("field '{field}' expected type {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },
    #[error("field '{field}' violates constraint: {reason}")]
    ConstraintViolation { field: String, reason: String },
    #[error("field '{field}' is not one of the declared enum values")]
    NotInEnum { field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Boolean,
    ListString,
    Object,
    Enum,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldConstraints {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub values: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub constraints: FieldConstraints,
    #[serde(default)]
    pub fields: Option<HashMap<String, FieldSpec>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub schema_name: String,
    pub version: u32,
    pub description: String,
    pub fields: HashMap<String, FieldSpec>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validate `record` against `schema`. Extra fields not declared in the
/// schema are tolerated (forward-compatible evolution); only declared
/// fields are checked for presence, type, and constraints.
pub fn validate(record: &serde_json::Value, schema: &SchemaDocument) -> Result<(), SchemaError> {
    validate_fields(record, &schema.fields)
}

fn validate_fields(
    record: &serde_json::Value,
    fields: &HashMap<String, FieldSpec>,
) -> Result<(), SchemaError> {
    let obj = record.as_object();
    for (name, spec) in fields {
        let value = obj.and_then(|o| o.get(name));
        match value {
            None => {
                if spec.required {
                    return Err(SchemaError::MissingField(name.clone()));
                }
            }
            Some(v) => validate_one(name, v, spec)?,
        }
    }
    Ok(())
}

fn validate_one(name: &str, value: &serde_json::Value, spec: &FieldSpec) -> Result<(), SchemaError> {
    match spec.field_type {
        FieldType::String => {
            let s = value.as_str().ok_or_else(|| type_mismatch(name, "string", value))?;
            if let Some(min) = spec.constraints.min_length {
                if s.len() < min {
                    return Err(SchemaError::ConstraintViolation {
                        field: name.to_string(),
                        reason: format!("length {} below minimum {}", s.len(), min),
                    });
                }
            }
            if let Some(max) = spec.constraints.max_length {
                if s.len() > max {
                    return Err(SchemaError::ConstraintViolation {
                        field: name.to_string(),
                        reason: format!("length {} above maximum {}", s.len(), max),
                    });
                }
            }
        }
        FieldType::Integer => {
            let n = value.as_i64().ok_or_else(|| type_mismatch(name, "integer", value))?;
            if let Some(min) = spec.constraints.min {
                if n < min {
                    return Err(SchemaError::ConstraintViolation {
                        field: name.to_string(),
                        reason: format!("{} below minimum {}", n, min),
                    });
                }
            }
            if let Some(max) = spec.constraints.max {
                if n > max {
                    return Err(SchemaError::ConstraintViolation {
                        field: name.to_string(),
                        reason: format!("{} above maximum {}", n, max),
                    });
                }
            }
        }
        FieldType::Boolean => {
            value.as_bool().ok_or_else(|| type_mismatch(name, "boolean", value))?;
        }
        FieldType::ListString => {
            let list = value.as_array().ok_or_else(|| type_mismatch(name, "list", value))?;
            for item in list {
                if !item.is_string() {
                    return Err(type_mismatch(name, "list of strings", item));
                }
            }
        }
        FieldType::Object => {
            if !value.is_object() {
                return Err(type_mismatch(name, "object", value));
            }
            if let Some(nested) = &spec.fields {
                validate_fields(value, nested)?;
            }
        }
        FieldType::Enum => {
            let s = value.as_str().ok_or_else(|| type_mismatch(name, "enum string", value))?;
            let allowed = spec.constraints.values.as_deref().unwrap_or(&[]);
            if !allowed.iter().any(|v| v == s) {
                return Err(SchemaError::NotInEnum {
                    field: name.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn type_mismatch(field: &str, expected: &str, actual: &serde_json::Value) -> SchemaError {
    SchemaError::TypeMismatch {
        field: field.to_string(),
        expected: expected.to_string(),
        actual: json_type_name(actual).to_string(),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Deep-fill any field missing from `record` with its schema-declared
/// default. Idempotent: applying twice yields the same result as once.
pub fn apply_defaults(record: &mut serde_json::Value, schema: &SchemaDocument) {
    apply_defaults_fields(record, &schema.fields);
}

fn apply_defaults_fields(record: &mut serde_json::Value, fields: &HashMap<String, FieldSpec>) {
    if !record.is_object() {
        *record = serde_json::json!({});
    }
    let obj = record.as_object_mut().expect("coerced to object above");
    for (name, spec) in fields {
        let entry = obj.entry(name.clone());
        match entry {
            serde_json::map::Entry::Vacant(slot) => {
                if let Some(default) = &spec.default {
                    slot.insert(default.clone());
                }
            }
            serde_json::map::Entry::Occupied(mut slot) => {
                if spec.field_type == FieldType::Object {
                    if let Some(nested) = &spec.fields {
                        apply_defaults_fields(slot.get_mut(), nested);
                    }
                }
            }
        }
    }
}

/// The two built-in task schemas and the proposal schema present at genesis.
pub fn builtin_schemas() -> HashMap<String, SchemaDocument> {
    let now = Utc::now();
    let mut schemas = HashMap::new();
    schemas.insert("task_v1".to_string(), task_v1(now));
    schemas.insert("task_v2".to_string(), task_v2(now));
    schemas.insert("proposal_v1".to_string(), proposal_v1(now));
    schemas
}

fn task_v1(now: DateTime<Utc>) -> SchemaDocument {
    let mut fields = HashMap::new();
    fields.insert(
        "title".to_string(),
        FieldSpec {
            field_type: FieldType::String,
            required: true,
            default: None,
            constraints: FieldConstraints {
                min_length: Some(1),
                max_length: Some(200),
                ..Default::default()
            },
            fields: None,
        },
    );
    fields.insert(
        "description".to_string(),
        FieldSpec {
            field_type: FieldType::String,
            required: false,
            default: Some(serde_json::json!("")),
            constraints: FieldConstraints::default(),
            fields: None,
        },
    );
    fields.insert(
        "reward".to_string(),
        FieldSpec {
            field_type: FieldType::Integer,
            required: false,
            default: Some(serde_json::json!(0)),
            constraints: FieldConstraints {
                min: Some(0),
                ..Default::default()
            },
            fields: None,
        },
    );
    fields.insert(
        "tags".to_string(),
        FieldSpec {
            field_type: FieldType::ListString,
            required: false,
            default: Some(serde_json::json!([])),
            constraints: FieldConstraints::default(),
            fields: None,
        },
    );
    SchemaDocument {
        schema_name: "task_v1".to_string(),
        version: 1,
        description: "A simple fixed-reward task".to_string(),
        fields,
        created_at: now,
        updated_at: now,
    }
}

fn task_v2(now: DateTime<Utc>) -> SchemaDocument {
    let mut doc = task_v1(now);
    doc.schema_name = "task_v2".to_string();
    doc.description = "A task that may be fulfilled through a sealed-bid auction".to_string();
    doc.fields.insert(
        "required_tools".to_string(),
        FieldSpec {
            field_type: FieldType::ListString,
            required: false,
            default: Some(serde_json::json!([])),
            constraints: FieldConstraints::default(),
            fields: None,
        },
    );
    doc
}

fn proposal_v1(now: DateTime<Utc>) -> SchemaDocument {
    let mut fields = HashMap::new();
    fields.insert(
        "title".to_string(),
        FieldSpec {
            field_type: FieldType::String,
            required: true,
            default: None,
            constraints: FieldConstraints {
                min_length: Some(1),
                max_length: Some(200),
                ..Default::default()
            },
            fields: None,
        },
    );
    fields.insert(
        "description".to_string(),
        FieldSpec {
            field_type: FieldType::String,
            required: false,
            default: Some(serde_json::json!("")),
            constraints: FieldConstraints::default(),
            fields: None,
        },
    );
    fields.insert(
        "proposal_type".to_string(),
        FieldSpec {
            field_type: FieldType::Enum,
            required: true,
            default: None,
            constraints: FieldConstraints {
                values: Some(vec![
                    "generic".to_string(),
                    "config_change".to_string(),
                    "network_operation".to_string(),
                    "command".to_string(),
                    "code_upgrade".to_string(),
                ]),
                ..Default::default()
            },
            fields: None,
        },
    );
    SchemaDocument {
        schema_name: "proposal_v1".to_string(),
        version: 1,
        description: "A governance proposal".to_string(),
        fields,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_v1_requires_title() {
        let schema = task_v1(Utc::now());
        let record = serde_json::json!({});
        assert!(matches!(
            validate(&record, &schema),
            Err(SchemaError::MissingField(f)) if f == "title"
        ));
    }

    #[test]
    fn task_v1_rejects_negative_reward() {
        let schema = task_v1(Utc::now());
        let record = serde_json::json!({"title": "x", "reward": -5});
        assert!(validate(&record, &schema).is_err());
    }

    #[test]
    fn apply_defaults_is_idempotent() {
        let schema = task_v1(Utc::now());
        let mut record = serde_json::json!({"title": "x"});
        apply_defaults(&mut record, &schema);
        let once = record.clone();
        apply_defaults(&mut record, &schema);
        assert_eq!(once, record);
    }

    #[test]
    fn enum_field_rejects_unknown_variant() {
        let schema = proposal_v1(Utc::now());
        let record = serde_json::json!({"title": "x", "proposal_type": "nonsense"});
        assert!(matches!(
            validate(&record, &schema),
            Err(SchemaError::NotInEnum { .. })
        ));
    }
}
