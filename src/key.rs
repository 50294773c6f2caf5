//! Order-independent request keys.
//!
//! Deduplication and caching both compare requests by a string key. Two requests
//! that differ only in the insertion order of their parameters, body fields or
//! headers must produce the same key, so mappings are always serialized with
//! their keys sorted.

use http::{HeaderMap, Method};
use serde_json::Value;
use std::collections::HashMap;

/// Serializes a JSON value into a canonical string.
///
/// Scalars use their JSON representation, arrays keep their element order and
/// objects are emitted with lexicographically sorted keys, recursively.
///
/// # Examples
///
/// ```
/// use cushion::key::stable_key;
/// use serde_json::json;
///
/// assert_eq!(
///     stable_key(&json!({"b": 2, "a": [1, {"d": null, "c": true}]})),
///     r#"{"a":[1,{"c":true,"d":null}],"b":2}"#,
/// );
/// ```
pub fn stable_key(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Like [`stable_key`], but renders an absent value as `undefined`.
pub fn stable_key_opt(value: Option<&Value>) -> String {
    match value {
        Some(value) => stable_key(value),
        None => "undefined".to_string(),
    }
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_value(out, &map[key]);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn params_value(params: &HashMap<String, Value>) -> Value {
    Value::Object(
        params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

fn headers_value(headers: &HeaderMap) -> Value {
    let mut map = serde_json::Map::new();
    for name in headers.keys() {
        let values: Vec<Value> = headers
            .get_all(name)
            .iter()
            .map(|v| Value::String(String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let value = match <[Value; 1]>::try_from(values) {
            Ok([single]) => single,
            Err(values) => Value::Array(values),
        };
        map.insert(name.as_str().to_string(), value);
    }
    Value::Object(map)
}

/// Key used to coalesce concurrent identical requests.
///
/// Covers the method, URL, query parameters, body and headers.
pub fn request_key(
    method: &Method,
    url: &str,
    params: &HashMap<String, Value>,
    body: Option<&Value>,
    headers: &HeaderMap,
) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        method,
        url,
        stable_key(&params_value(params)),
        stable_key_opt(body),
        stable_key(&headers_value(headers)),
    )
}

/// Key used for cached responses.
///
/// Narrower than [`request_key`]: only the method, URL and query parameters.
pub fn cache_key(method: &Method, url: &str, params: &HashMap<String, Value>) -> String {
    format!("{}:{}:{}", method, url, stable_key(&params_value(params)))
}
