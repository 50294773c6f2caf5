//! Extraction of per-field messages from validation error bodies.
//!
//! Backends report validation failures in a handful of shapes. Each shape has
//! its own parser; they are tried in a fixed order and the first one that
//! yields at least one field error wins. Entries that do not fit the shape are
//! skipped rather than treated as failures.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single field-level validation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// The field the message applies to.
    pub field: String,
    /// Human readable message.
    pub message: String,
    /// Optional machine readable code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl FieldError {
    /// Creates a field error without a code.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: None,
        }
    }

    /// Attaches a machine readable code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

type Parser = fn(&Value) -> Vec<FieldError>;

/// Parsers in priority order. Ambiguous bodies go to the first match.
const PARSERS: [Parser; 4] = [
    parse_json_api,
    parse_keyed_arrays,
    parse_keyed_strings,
    parse_field_list,
];

/// Extracts field errors from a validation error body.
///
/// Bodies wrapped in an `{"errors": ...}` envelope are unwrapped first; if the
/// envelope yields nothing the body itself is tried. Unknown shapes produce an
/// empty list.
///
/// # Examples
///
/// ```
/// use cushion::validation::parse_field_errors;
/// use serde_json::json;
///
/// let errors = parse_field_errors(&json!({"email": ["is invalid"]}));
/// assert_eq!(errors[0].field, "email");
/// assert_eq!(errors[0].message, "is invalid");
/// ```
pub fn parse_field_errors(body: &Value) -> Vec<FieldError> {
    let envelope = body
        .get("errors")
        .filter(|inner| inner.is_array() || inner.is_object());

    envelope
        .into_iter()
        .chain(std::iter::once(body))
        .find_map(|candidate| {
            PARSERS
                .iter()
                .map(|parse| parse(candidate))
                .find(|errors| !errors.is_empty())
        })
        .unwrap_or_default()
}

fn code_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `[{"source": {"pointer": "/data/attributes/email"}, "detail": "...", "code": "..."}]`
fn parse_json_api(body: &Value) -> Vec<FieldError> {
    let Some(items) = body.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let pointer = item.get("source")?.get("pointer")?.as_str()?;
            let field = pointer.rsplit('/').find(|segment| !segment.is_empty())?;
            let detail = item.get("detail")?.as_str()?;
            Some(FieldError {
                field: field.to_string(),
                message: detail.to_string(),
                code: code_of(item.get("code")),
            })
        })
        .collect()
}

/// `{"email": ["is invalid", "is taken"]}`
fn parse_keyed_arrays(body: &Value) -> Vec<FieldError> {
    let Some(map) = body.as_object() else {
        return Vec::new();
    };

    map.iter()
        .filter_map(|(field, messages)| Some((field, messages.as_array()?)))
        .flat_map(|(field, messages)| {
            messages
                .iter()
                .filter_map(Value::as_str)
                .map(move |message| FieldError::new(field.as_str(), message))
        })
        .collect()
}

/// `{"email": "is invalid"}`
fn parse_keyed_strings(body: &Value) -> Vec<FieldError> {
    let Some(map) = body.as_object() else {
        return Vec::new();
    };

    map.iter()
        .filter_map(|(field, message)| Some(FieldError::new(field.as_str(), message.as_str()?)))
        .collect()
}

/// `[{"field": "email", "message": "is invalid", "code": "format"}]`
fn parse_field_list(body: &Value) -> Vec<FieldError> {
    let Some(items) = body.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            Some(FieldError {
                field: item.get("field")?.as_str()?.to_string(),
                message: item.get("message")?.as_str()?.to_string(),
                code: code_of(item.get("code")),
            })
        })
        .collect()
}
