//! Minimal JSON-schema-subset validator.
//!
//! Covers the subset the tool contracts use: `type`, `required`,
//! `properties`, `items`, and `enum`. Unknown keywords are ignored so
//! schemas can carry descriptions without affecting validation.

use serde_json::Value;

/// Validate a value against a schema fragment.
///
/// # Errors
///
/// Returns a human-readable message naming the first failing path.
pub fn validate(value: &Value, schema: &Value) -> Result<(), String> {
    validate_at(value, schema, "$")
}

fn validate_at(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        // A non-object schema constrains nothing.
        return Ok(());
    };

    if let Some(expected) = schema_obj.get("type").and_then(Value::as_str) {
        if !type_matches(value, expected) {
            return Err(format!(
                "{path}: expected {expected}, got {}",
                type_name(value)
            ));
        }
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("{path}: value not in enum"));
        }
    }

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        let obj = value.as_object();
        for key in required.iter().filter_map(Value::as_str) {
            let present = obj.is_some_and(|o| o.contains_key(key));
            if !present {
                return Err(format!("{path}: missing required field '{key}'"));
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
        if let Some(obj) = value.as_object() {
            for (key, prop_schema) in properties {
                if let Some(field) = obj.get(key) {
                    validate_at(field, prop_schema, &format!("{path}.{key}"))?;
                }
            }
        }
    }

    if let Some(item_schema) = schema_obj.get("items") {
        if let Some(items) = value.as_array() {
            for (i, item) in items.iter().enumerate() {
                validate_at(item, item_schema, &format!("{path}[{i}]"))?;
            }
        }
    }

    Ok(())
}

/// True when the value satisfies a JSON Schema `type` keyword.
fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
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
