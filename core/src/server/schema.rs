//! Basic JSON-schema typing checks: object shape, required properties and
//! the `type` keyword of top-level properties. Nothing deeper.

use serde_json::{Map, Value};

/// Checks that `schema` describes a JSON object whose `required` entries are
/// all declared properties.
pub fn check_object_schema(schema: &Value) -> Result<(), String> {
    let schema = schema
        .as_object()
        .ok_or_else(|| "schema must be a JSON object".to_string())?;

    if let Some(ty) = schema.get("type")
        && ty != "object"
    {
        return Err(format!("schema type must be \"object\", got {ty}"));
    }

    let properties = match schema.get("properties") {
        Some(Value::Object(props)) => Some(props),
        Some(_) => return Err("\"properties\" must be an object".to_string()),
        None => None,
    };

    if let Some(props) = properties {
        for (name, prop) in props {
            if let Some(ty) = prop.get("type")
                && !ty.as_str().is_some_and(is_known_type)
            {
                return Err(format!("property '{name}' has unsupported type {ty}"));
            }
        }
    }

    if let Some(required) = schema.get("required") {
        let required = required
            .as_array()
            .ok_or_else(|| "\"required\" must be an array".to_string())?;
        for entry in required {
            let name = entry
                .as_str()
                .ok_or_else(|| format!("required entry {entry} is not a string"))?;
            if !properties.is_some_and(|p| p.contains_key(name)) {
                return Err(format!("required property '{name}' is not declared"));
            }
        }
    }

    Ok(())
}

/// Checks `value` against an object schema that already passed
/// [`check_object_schema`].
pub fn validate(schema: &Value, value: &Value) -> Result<(), String> {
    let object = value
        .as_object()
        .ok_or_else(|| format!("expected a JSON object, got {}", type_name(value)))?;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(name) {
                return Err(format!("missing required property '{name}'"));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        check_properties(props, object)?;
    }

    Ok(())
}

fn check_properties(props: &Map<String, Value>, object: &Map<String, Value>) -> Result<(), String> {
    for (name, value) in object {
        let Some(expected) = props
            .get(name)
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        if !matches_type(expected, value) {
            return Err(format!(
                "property '{name}' should be {expected}, got {}",
                type_name(value)
            ));
        }
    }
    Ok(())
}

fn is_known_type(ty: &str) -> bool {
    matches!(
        ty,
        "string" | "number" | "integer" | "boolean" | "object" | "array" | "null"
    )
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
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
