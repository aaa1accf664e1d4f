//! Reusable field handler constructors.
//!
//! Handlers return a fragment of output fields that the transformer merges
//! into the record: objects merge key by key, arrays concatenate, and
//! scalars replace.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::rules::model::HandlerError;

pub type HandlerResult = Result<Map<String, Value>, HandlerError>;

static PARTIAL_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})(?:-(\d{2})(?:-(\d{2}))?)?$").expect("valid partial date regex")
});

/// Scalar text of a legacy value. Strings are trimmed; numbers and booleans
/// are rendered.
///
/// # Errors
///
/// Fails for null, arrays, and objects.
pub fn text(value: &Value) -> Result<String, HandlerError> {
    match value {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(HandlerError::new(format!(
            "expected a scalar value, got {}",
            type_name(other)
        ))),
    }
}

/// Like [`text`] but rejects blank strings.
///
/// # Errors
///
/// Fails for non-scalars and blank strings.
pub fn non_empty_text(value: &Value) -> Result<String, HandlerError> {
    let s = text(value)?;
    if s.is_empty() {
        return Err(HandlerError::new("empty value"));
    }
    Ok(s)
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

/// Single-key output fragment.
#[must_use]
pub fn fragment(key: &str, value: Value) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert(key.to_string(), value);
    out
}

/// Store the value's text under `key`, replacing earlier values.
pub fn set_text(key: &'static str) -> impl Fn(&Value, &Map<String, Value>) -> HandlerResult {
    move |value, _| Ok(fragment(key, Value::String(non_empty_text(value)?)))
}

/// Append the value's text to the list under `key`.
pub fn push_text(key: &'static str) -> impl Fn(&Value, &Map<String, Value>) -> HandlerResult {
    move |value, _| Ok(fragment(key, json!([non_empty_text(value)?])))
}

/// Append `{field: text, ..extra}` to the list under `key`.
pub fn push_object(
    key: &'static str,
    field: &'static str,
    extra: Value,
) -> impl Fn(&Value, &Map<String, Value>) -> HandlerResult {
    move |value, _| {
        let mut item = match &extra {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        item.insert(field.to_string(), Value::String(non_empty_text(value)?));
        Ok(fragment(key, Value::Array(vec![Value::Object(item)])))
    }
}

/// Store `{field: text}` inside the object under `key`.
pub fn set_nested(
    key: &'static str,
    field: &'static str,
) -> impl Fn(&Value, &Map<String, Value>) -> HandlerResult {
    move |value, _| {
        Ok(fragment(
            key,
            Value::Object(fragment(field, Value::String(non_empty_text(value)?))),
        ))
    }
}

/// Normalize a partial date (`YYYY`, `YYYY-MM`, `YYYY-MM-DD`).
///
/// # Errors
///
/// Fails for anything else, including out-of-range months and days.
pub fn partial_date(raw: &str) -> Result<String, HandlerError> {
    let raw = raw.trim();
    let caps = PARTIAL_DATE_RE
        .captures(raw)
        .ok_or_else(|| HandlerError::new(format!("unparseable date '{raw}'")))?;

    if let Some(month) = caps.get(2) {
        let month: u32 = month.as_str().parse().unwrap_or(0);
        if !(1..=12).contains(&month) {
            return Err(HandlerError::new(format!("month out of range in '{raw}'")));
        }
        if caps.get(3).is_some() {
            chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|e| HandlerError::new(format!("invalid date '{raw}': {e}")))?;
        }
    }
    Ok(raw.to_string())
}

/// Store a validated partial date under `key`.
pub fn set_date(key: &'static str) -> impl Fn(&Value, &Map<String, Value>) -> HandlerResult {
    move |value, _| {
        let date = partial_date(&non_empty_text(value)?)?;
        Ok(fragment(key, Value::String(date)))
    }
}

/// Lower-cased language code appended to `languages`.
pub fn push_language(value: &Value, _: &Map<String, Value>) -> HandlerResult {
    let code = non_empty_text(value)?.to_ascii_lowercase();
    if !(2..=3).contains(&code.len()) || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(HandlerError::new(format!("invalid language code '{code}'")));
    }
    Ok(fragment("languages", json!([{ "id": code }])))
}
