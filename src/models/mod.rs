//! Wire payloads for the three protocols the proxy speaks.
//!
//! - `chat`: the client-facing OpenAI Chat Completions shape.
//! - `anthropic`: Anthropic Messages requests, responses and stream events.
//! - `responses`: OpenAI Responses requests, responses and stream events.
//!
//! Upstream documents are decoded leniently: a field with an unexpected JSON
//! type becomes `None` rather than failing the whole payload, so converters
//! can fall back to their documented defaults.

pub mod anthropic;
pub mod chat;
pub mod responses;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Deserialize an optional field, mapping type mismatches to `None`.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Deserialize a list, dropping it entirely when it is not an array and
/// skipping elements that do not decode.
pub(crate) fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// An upstream JSON body, discriminated once at decode time.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamPayload<T> {
    Success(T),
    /// The upstream returned an error document; forwarded verbatim.
    Error(Value),
}

impl<T> UpstreamPayload<T>
where
    T: DeserializeOwned + Default,
{
    /// Decode an upstream body. Bytes that are not JSON decode to `T::default()`.
    pub fn decode(bytes: &[u8]) -> Self {
        let value: Value = serde_json::from_slice(bytes).unwrap_or(Value::Null);
        if value.get("error").map(is_truthy).unwrap_or(false) {
            return UpstreamPayload::Error(value);
        }
        UpstreamPayload::Success(serde_json::from_value(value).unwrap_or_default())
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Probe {
        #[serde(default, deserialize_with = "lenient")]
        count: Option<u64>,
        #[serde(default, deserialize_with = "lenient_vec")]
        items: Vec<String>,
    }

    #[test]
    fn lenient_fields_tolerate_wrong_types() {
        let probe: Probe =
            serde_json::from_value(json!({"count": "seven", "items": ["a", 1, "b"]})).unwrap();
        assert_eq!(probe.count, None);
        assert_eq!(probe.items, vec!["a".to_string(), "b".to_string()]);

        let probe: Probe = serde_json::from_value(json!({"items": {"not": "a list"}})).unwrap();
        assert!(probe.items.is_empty());
    }

    #[test]
    fn error_documents_are_discriminated_at_decode() {
        let body = br#"{"error":{"message":"quota","type":"rate_limit"}}"#;
        match UpstreamPayload::<Probe>::decode(body) {
            UpstreamPayload::Error(v) => assert_eq!(v["error"]["message"], "quota"),
            other => panic!("expected error payload, got {other:?}"),
        }

        // A falsy `error` field is not an error document.
        let body = br#"{"error":null,"count":3}"#;
        assert_eq!(
            UpstreamPayload::<Probe>::decode(body),
            UpstreamPayload::Success(Probe {
                count: Some(3),
                items: vec![]
            })
        );
    }

    #[test]
    fn non_json_bodies_decode_to_defaults() {
        assert_eq!(
            UpstreamPayload::<Probe>::decode(b"<html>bad gateway</html>"),
            UpstreamPayload::Success(Probe::default())
        );
    }
}
