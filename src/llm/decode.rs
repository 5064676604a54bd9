//! Structured-output decoding
//!
//! Raw model text is decoded into JSON, tolerating a fenced markdown
//! wrapper, then deserialized against the declared schema. Decode errors
//! carry the truncated raw text and the expected schema name.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::prompt::schema_name;
use crate::error::{Error, Result};

/// Decode raw model text into a JSON value
pub fn decode_value(raw: &str) -> Result<Value> {
    let stripped = strip_code_fences(raw);

    match serde_json::from_str(stripped) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            // Models sometimes wrap the object in prose; retry on the
            // outermost braces before giving up.
            if let (Some(start), Some(end)) = (stripped.find('{'), stripped.rfind('}')) {
                if start < end {
                    if let Ok(value) = serde_json::from_str(&stripped[start..=end]) {
                        return Ok(value);
                    }
                }
            }
            Err(Error::llm_response(
                format!("invalid JSON: {first_err}"),
                raw,
                "json",
            ))
        }
    }
}

/// Deserialize a decoded value against schema `T`
pub fn decode_structured<T: DeserializeOwned + JsonSchema>(value: Value, raw: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::llm_response(e.to_string(), raw, schema_name::<T>()))
}

/// Strip a ```json ... ``` (or bare ```) fence if the whole payload is fenced
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.trim_start_matches(['\r', '\n']);
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentResponse;
    use serde_json::json;

    #[test]
    fn test_decode_plain_json() {
        let value = decode_value(r#"{"response": "hi"}"#).unwrap();
        assert_eq!(value["response"], "hi");
    }

    #[test]
    fn test_decode_fenced_json() {
        let raw = "```json\n{\"response\": \"hi\"}\n```";
        let value = decode_value(raw).unwrap();
        assert_eq!(value["response"], "hi");
    }

    #[test]
    fn test_decode_json_embedded_in_prose() {
        let raw = "Here is the result: {\"response\": \"hi\"} as requested.";
        let value = decode_value(raw).unwrap();
        assert_eq!(value["response"], "hi");
    }

    #[test]
    fn test_decode_invalid_json_reports_schema() {
        let err = decode_value("not json at all").unwrap_err();
        match err {
            Error::LlmResponse { raw, expected, .. } => {
                assert_eq!(raw, "not json at all");
                assert_eq!(expected, "json");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_structured_mismatch() {
        let value = json!({"response": 42});
        let err = decode_structured::<AgentResponse>(value, "{\"response\": 42}").unwrap_err();
        match err {
            Error::LlmResponse { expected, .. } => assert_eq!(expected, "AgentResponse"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
