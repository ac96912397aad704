// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Runtime schema representation used by `cognition` and
//! `browser_query.extract`.
//!
//! Workflow authors may write either the compact form
//! (`{field: "string"|"number"|"boolean"|"array"}`) or a JSON-Schema-like
//! form (`{type: "object", properties: {...}}`). Both convert into the same
//! [`Schema`] tree, which can then validate a [`serde_json::Value`] and
//! produce a human-readable field-level diagnostic on mismatch.

use serde_json::Value;
use std::collections::BTreeMap;

/// A single declared field type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// `string`
    String,
    /// `number`
    Number,
    /// `boolean`
    Boolean,
    /// `array` (element type unknown — "array of any" per spec)
    Array,
    /// `object` with a nested schema
    Object(Schema),
    /// Declared type we don't recognize, or none declared.
    Any,
}

/// A flat or nested field schema, as produced from either the compact or
/// JSON-Schema-like input forms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    /// Field name -> declared type.
    pub fields: BTreeMap<String, FieldType>,
}

fn type_from_str(s: &str) -> FieldType {
    match s {
        "string" => FieldType::String,
        "number" => FieldType::Number,
        "boolean" => FieldType::Boolean,
        "array" => FieldType::Array,
        "object" => FieldType::Object(Schema::default()),
        _ => FieldType::Any,
    }
}

impl Schema {
    /// Converts a compact-form or JSON-Schema-like `Value` into a [`Schema`].
    /// Unknown declared types become `FieldType::Any`.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Schema::default();
        };

        // JSON-Schema-like form: {"type": "object", "properties": {...}}
        if let Some(Value::Object(props)) = obj.get("properties") {
            let mut fields = BTreeMap::new();
            for (name, spec) in props {
                fields.insert(name.clone(), field_type_from_schema_value(spec));
            }
            return Schema { fields };
        }

        // Compact form: {field: "type", ...}
        let mut fields = BTreeMap::new();
        for (name, spec) in obj {
            if name == "type" {
                continue;
            }
            fields.insert(name.clone(), field_type_from_compact_value(spec));
        }
        Schema { fields }
    }
}

fn field_type_from_compact_value(spec: &Value) -> FieldType {
    match spec {
        Value::String(s) => type_from_str(s),
        Value::Object(_) => field_type_from_schema_value(spec),
        _ => FieldType::Any,
    }
}

fn field_type_from_schema_value(spec: &Value) -> FieldType {
    let Some(obj) = spec.as_object() else {
        return FieldType::Any;
    };
    match obj.get("type").and_then(Value::as_str) {
        Some("object") => FieldType::Object(Schema::from_value(spec)),
        Some(t) => type_from_str(t),
        None => FieldType::Any,
    }
}

/// Checks `value`'s runtime shape against `schema`.
///
/// Every declared field must be present; each field's runtime type must
/// match the declared type; nested object schemas recurse. Returns a
/// human-readable diagnostic naming the offending field on the first
/// mismatch found (field iteration order is deterministic: schema field
/// order).
pub fn validate(schema: &Schema, value: &Value) -> Result<(), String> {
    let Some(obj) = value.as_object() else {
        return Err(format!(
            "expected an object to validate against schema, got {value}"
        ));
    };
    for (name, field_type) in &schema.fields {
        let Some(found) = obj.get(name) else {
            return Err(format!("missing field `{name}`"));
        };
        check_type(name, field_type, found)?;
    }
    Ok(())
}

fn check_type(name: &str, field_type: &FieldType, value: &Value) -> Result<(), String> {
    let ok = match field_type {
        FieldType::String => value.is_string(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Array => value.is_array(),
        FieldType::Any => true,
        FieldType::Object(nested) => {
            if !value.is_object() {
                return Err(format!("field `{name}` must be an object"));
            }
            return validate(nested, value).map_err(|e| format!("field `{name}`: {e}"));
        }
    };
    if ok {
        Ok(())
    } else {
        let expected = match field_type {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object(_) | FieldType::Any => "any",
        };
        Err(format!("field `{name}` must be a {expected}"))
    }
}

/// Renders a schema as a human-readable description suitable for embedding
/// in an LLM system prompt (`cognition` step 1).
#[must_use]
pub fn describe(schema: &Schema) -> String {
    if schema.fields.is_empty() {
        return "any valid JSON value".to_string();
    }
    schema
        .fields
        .iter()
        .map(|(name, ty)| format!("- `{name}`: must be a {}", describe_type(ty)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe_type(ty: &FieldType) -> String {
    match ty {
        FieldType::String => "string".to_string(),
        FieldType::Number => "number".to_string(),
        FieldType::Boolean => "boolean".to_string(),
        FieldType::Array => "array".to_string(),
        FieldType::Any => "value of any type".to_string(),
        FieldType::Object(nested) => format!("object with fields:\n{}", describe(nested)),
    }
}

/// Builds a literal exemplar value matching `schema`'s shape, to embed in an
/// LLM system prompt alongside [`describe`] so the model sees both a
/// description and a worked example.
#[must_use]
pub fn example_value(schema: &Schema) -> Value {
    Value::Object(
        schema
            .fields
            .iter()
            .map(|(name, ty)| (name.clone(), example_for_type(ty)))
            .collect(),
    )
}

fn example_for_type(ty: &FieldType) -> Value {
    match ty {
        FieldType::String => Value::String("example".to_string()),
        FieldType::Number => Value::from(1),
        FieldType::Boolean => Value::Bool(true),
        FieldType::Array => Value::Array(vec![]),
        FieldType::Any => Value::Null,
        FieldType::Object(nested) => example_value(nested),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compact_schema_accepts_matching_value() {
        let schema = Schema::from_value(&json!({"foo": "string", "bar": "number"}));
        assert!(validate(&schema, &json!({"foo": "x", "bar": 1})).is_ok());
    }

    #[test]
    fn compact_schema_rejects_wrong_type_naming_field() {
        let schema = Schema::from_value(&json!({"foo": "string", "bar": "number"}));
        let err = validate(&schema, &json!({"foo": 1, "bar": 1})).unwrap_err();
        assert!(err.contains("foo"));
        let err = validate(&schema, &json!({"foo": "x", "bar": "not a number"})).unwrap_err();
        assert!(err.contains("bar"));
    }

    #[test]
    fn json_schema_like_form_is_accepted() {
        let schema = Schema::from_value(&json!({
            "type": "object",
            "properties": {
                "label": {"type": "string"},
                "score": {"type": "number"}
            }
        }));
        assert!(validate(&schema, &json!({"label": "x", "score": 1.0})).is_ok());
    }

    #[test]
    fn nested_object_schemas_recurse() {
        let schema = Schema::from_value(&json!({
            "type": "object",
            "properties": {
                "user": {
                    "type": "object",
                    "properties": { "name": {"type": "string"} }
                }
            }
        }));
        assert!(validate(&schema, &json!({"user": {"name": "Ada"}})).is_ok());
        let err = validate(&schema, &json!({"user": {"name": 1}})).unwrap_err();
        assert!(err.contains("name"));
    }

    #[test]
    fn missing_field_is_reported() {
        let schema = Schema::from_value(&json!({"foo": "string"}));
        let err = validate(&schema, &json!({})).unwrap_err();
        assert!(err.contains("foo"));
    }

    #[test]
    fn unknown_type_becomes_any() {
        let schema = Schema::from_value(&json!({"foo": "whatever"}));
        assert!(validate(&schema, &json!({"foo": 123})).is_ok());
        assert!(validate(&schema, &json!({"foo": "x"})).is_ok());
    }
}
