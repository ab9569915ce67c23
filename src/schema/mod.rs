//! JSON Schema validation for tool arguments and structured output.
//!
//! Supports the subset models are asked to produce: `type` (single or list),
//! `enum`, `const`, `required`, `properties`, `additionalProperties`, `items`,
//! `anyOf`/`oneOf`/`allOf`, and the basic length/range bounds.

use serde_json::Value;

use crate::error::WeaveError;

/// Validate a value against a JSON Schema.
///
/// Returns `Err(message)` describing the first violation found; the message
/// names the offending location as a JSON pointer.
pub fn validate_value(value: &Value, schema: &Value) -> Result<(), String> {
    validate_at(value, schema, "")
}

/// Validate a value, wrapping failures as [`WeaveError::TypeValidation`].
pub fn validate_types(value: &Value, schema: &Value) -> Result<(), WeaveError> {
    validate_value(value, schema).map_err(|message| WeaveError::TypeValidation {
        value: value.clone(),
        message,
    })
}

fn validate_at(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        // `true`, `{}` and unknown shapes accept everything.
        return match schema {
            Value::Bool(false) => Err(format!("{} is not allowed", location(path))),
            _ => Ok(()),
        };
    };

    if let Some(expected) = schema.get("type") {
        let matches = match expected {
            Value::String(name) => value_matches_type(value, name),
            Value::Array(names) => names
                .iter()
                .filter_map(|n| n.as_str())
                .any(|name| value_matches_type(value, name)),
            _ => true,
        };
        if !matches {
            return Err(format!(
                "{} expected type {}, got {}",
                location(path),
                expected,
                json_type_name(value)
            ));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(|v| v.as_array()) {
        if !allowed.contains(value) {
            return Err(format!("{} must be one of {}", location(path), Value::Array(allowed.clone())));
        }
    }

    if let Some(constant) = schema.get("const") {
        if constant != value {
            return Err(format!("{} must equal {constant}", location(path)));
        }
    }

    match value {
        Value::Object(obj) => {
            if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
                for field in required.iter().filter_map(|f| f.as_str()) {
                    if !obj.contains_key(field) {
                        return Err(format!(
                            "{} missing required field '{field}'",
                            location(path)
                        ));
                    }
                }
            }

            let properties = schema.get("properties").and_then(|v| v.as_object());
            for (key, child) in obj {
                let child_path = format!("{path}/{key}");
                match properties.and_then(|p| p.get(key)) {
                    Some(prop_schema) => validate_at(child, prop_schema, &child_path)?,
                    None => match schema.get("additionalProperties") {
                        Some(Value::Bool(false)) => {
                            return Err(format!(
                                "{} has unexpected field '{key}'",
                                location(path)
                            ));
                        }
                        Some(extra) => validate_at(child, extra, &child_path)?,
                        None => {}
                    },
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_at(item, item_schema, &format!("{path}/{i}"))?;
                }
            }
            check_bound(schema, "minItems", items.len(), path, |len, min| len >= min)?;
            check_bound(schema, "maxItems", items.len(), path, |len, max| len <= max)?;
        }
        Value::String(s) => {
            let len = s.chars().count();
            check_bound(schema, "minLength", len, path, |len, min| len >= min)?;
            check_bound(schema, "maxLength", len, path, |len, max| len <= max)?;
        }
        Value::Number(n) => {
            if let Some(x) = n.as_f64() {
                if let Some(min) = schema.get("minimum").and_then(|v| v.as_f64()) {
                    if x < min {
                        return Err(format!("{} must be >= {min}", location(path)));
                    }
                }
                if let Some(max) = schema.get("maximum").and_then(|v| v.as_f64()) {
                    if x > max {
                        return Err(format!("{} must be <= {max}", location(path)));
                    }
                }
            }
        }
        _ => {}
    }

    if let Some(all) = schema.get("allOf").and_then(|v| v.as_array()) {
        for sub in all {
            validate_at(value, sub, path)?;
        }
    }

    if let Some(any) = schema.get("anyOf").and_then(|v| v.as_array()) {
        if !any.iter().any(|sub| validate_at(value, sub, path).is_ok()) {
            return Err(format!("{} does not match any allowed schema", location(path)));
        }
    }

    if let Some(one) = schema.get("oneOf").and_then(|v| v.as_array()) {
        let matched = one
            .iter()
            .filter(|sub| validate_at(value, sub, path).is_ok())
            .count();
        if matched != 1 {
            return Err(format!(
                "{} must match exactly one schema, matched {matched}",
                location(path)
            ));
        }
    }

    Ok(())
}

fn check_bound(
    schema: &serde_json::Map<String, Value>,
    keyword: &str,
    actual: usize,
    path: &str,
    ok: impl Fn(usize, usize) -> bool,
) -> Result<(), String> {
    match schema.get(keyword).and_then(|v| v.as_u64()) {
        Some(bound) if !ok(actual, bound as usize) => Err(format!(
            "{} violates {keyword} {bound} (got {actual})",
            location(path)
        )),
        _ => Ok(()),
    }
}

fn location(path: &str) -> String {
    if path.is_empty() {
        "value".to_string()
    } else {
        format!("field '{path}'")
    }
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_non_object_when_schema_expects_object() {
        let schema = json!({ "type": "object", "properties": {}, "required": [] });

        let err = validate_value(&json!("not an object"), &schema).unwrap_err();

        assert!(err.contains("expected type \"object\""));
    }

    #[test]
    fn rejects_missing_required_field() {
        let schema = json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
        });

        let err = validate_value(&json!({}), &schema).unwrap_err();

        assert!(err.contains("missing required field 'path'"));
    }

    #[test]
    fn accepts_empty_object_for_parameterless_schema() {
        let schema = json!({ "type": "object", "properties": {} });

        assert!(validate_value(&json!({}), &schema).is_ok());
    }

    #[test]
    fn rejects_nested_field_with_wrong_type() {
        let schema = json!({
            "type": "object",
            "properties": {
                "city": {
                    "type": "object",
                    "properties": { "population": { "type": "integer" } }
                }
            }
        });

        let err = validate_value(&json!({ "city": { "population": "many" } }), &schema).unwrap_err();

        assert!(err.contains("/city/population"));
        assert!(err.contains("\"integer\""));
    }

    #[test]
    fn validates_array_items() {
        let schema = json!({ "type": "array", "items": { "type": "string" } });

        assert!(validate_value(&json!(["a", "b"]), &schema).is_ok());
        assert!(validate_value(&json!(["a", 2]), &schema).unwrap_err().contains("/1"));
    }

    #[test]
    fn enforces_enum_membership() {
        let schema = json!({ "type": "string", "enum": ["sunny", "rainy"] });

        assert!(validate_value(&json!("sunny"), &schema).is_ok());
        assert!(validate_value(&json!("snowy"), &schema).is_err());
    }

    #[test]
    fn rejects_additional_properties_when_closed() {
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "number" } },
            "additionalProperties": false
        });

        assert!(validate_value(&json!({ "a": 1, "b": 2 }), &schema)
            .unwrap_err()
            .contains("unexpected field 'b'"));
    }

    #[test]
    fn accepts_extra_fields_when_open() {
        let schema = json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
        });

        assert!(validate_value(&json!({ "path": "a.txt", "extra": true }), &schema).is_ok());
    }

    #[test]
    fn supports_type_lists_and_any_of() {
        let nullable = json!({ "type": ["string", "null"] });
        let either = json!({ "anyOf": [{ "type": "number" }, { "type": "boolean" }] });

        assert!(validate_value(&Value::Null, &nullable).is_ok());
        assert!(validate_value(&json!(true), &either).is_ok());
        assert!(validate_value(&json!("x"), &either).is_err());
    }

    #[test]
    fn checks_numeric_and_length_bounds() {
        let schema = json!({
            "type": "object",
            "properties": {
                "age": { "type": "integer", "minimum": 0 },
                "tags": { "type": "array", "maxItems": 2 },
                "name": { "type": "string", "minLength": 1 }
            }
        });

        assert!(validate_value(&json!({ "age": -1 }), &schema).is_err());
        assert!(validate_value(&json!({ "tags": [1, 2, 3] }), &schema).is_err());
        assert!(validate_value(&json!({ "name": "" }), &schema).is_err());
        assert!(validate_value(&json!({ "age": 3, "tags": [], "name": "x" }), &schema).is_ok());
    }

    #[test]
    fn empty_schema_accepts_anything() {
        assert!(validate_value(&json!({ "anything": 42 }), &json!({})).is_ok());
        assert!(validate_value(&Value::Null, &json!({})).is_ok());
    }
}
