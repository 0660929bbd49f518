//! Filters available to prompt templates
//!
//! minijinja's builtins (`join`, `first`, `trim`, ...) stay available; these
//! cover the cases prompts over dataset rows keep running into.

use minijinja::value::{Value, ValueKind};
use minijinja::{Error, ErrorKind};

pub fn register_filters(env: &mut minijinja::Environment) {
    env.add_filter("json", filter_json);
    env.add_filter("lines", filter_lines);
    env.add_filter("default", filter_default);
    env.add_filter("number", filter_number);
}

/// Serialize a value (usually a row or a parsed object) to compact JSON
fn filter_json(value: Value) -> Result<Value, Error> {
    let json = serde_json::to_string(&value).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("JSON serialization failed: {}", e),
        )
    })?;
    Ok(Value::from(json))
}

/// Split text into a list of lines
fn filter_lines(value: Value) -> Value {
    let text = value.to_string();
    Value::from_iter(text.lines().map(|l| Value::from(l.to_string())))
}

/// Fallback for missing, null or empty-string values
///
/// Dataset cells are frequently empty strings rather than absent, so those
/// count as missing too.
fn filter_default(value: Value, fallback: Value) -> Value {
    match value.kind() {
        ValueKind::Undefined | ValueKind::None => fallback,
        _ if value.as_str().is_some_and(str::is_empty) => fallback,
        _ => value,
    }
}

/// Coerce a numeric string to a number, rendering integers without a fraction
fn filter_number(value: Value) -> Result<Value, Error> {
    if value.kind() == ValueKind::Number {
        return Ok(value);
    }

    let text = value.to_string();
    let trimmed = text.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Ok(Value::from(n));
    }
    trimmed.parse::<f64>().map(Value::from).map_err(|_| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("'{}' is not a number", trimmed),
        )
    })
}
