//! Anthropic Messages API payloads and stream events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{lenient, lenient_vec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    pub max_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default, deserialize_with = "lenient")]
    pub input_tokens: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub output_tokens: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessagesResponse {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub content: Vec<ContentBlock>,
    #[serde(default, deserialize_with = "lenient")]
    pub stop_reason: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub usage: Option<AnthropicUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageStart {
    #[serde(default, deserialize_with = "lenient")]
    message: Option<StartedMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct StartedMessage {
    #[serde(default, deserialize_with = "lenient")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct ContentBlockDelta {
    #[serde(default, deserialize_with = "lenient")]
    delta: Option<TextDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct TextDelta {
    #[serde(default, deserialize_with = "lenient")]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageDelta {
    #[serde(default, deserialize_with = "lenient")]
    delta: Option<StopDelta>,
    #[serde(default, deserialize_with = "lenient")]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct StopDelta {
    #[serde(default, deserialize_with = "lenient")]
    stop_reason: Option<String>,
}

/// One Anthropic SSE event, keyed by its `event:` name.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    MessageStart {
        id: String,
        input_tokens: Option<u64>,
    },
    ContentBlockDelta {
        text: Option<String>,
    },
    MessageDelta {
        stop_reason: Option<String>,
        output_tokens: Option<u64>,
    },
    MessageStop,
    Ping,
    /// `content_block_start`, `content_block_stop` and anything unknown.
    Ignored,
}

impl StreamEvent {
    /// Decode an event from its SSE name and data line.
    ///
    /// Only the event kinds whose payload is read need valid JSON; the error
    /// is returned so the caller can skip that single event.
    pub fn parse(event: &str, data: &str) -> Result<Self, serde_json::Error> {
        if event == "ping" || data == r#"{"type": "ping"}"# || data == r#"{"type":"ping"}"# {
            return Ok(StreamEvent::Ping);
        }
        Ok(match event {
            "message_start" => {
                let start: MessageStart = serde_json::from_str(data)?;
                let message = start.message.unwrap_or_default();
                StreamEvent::MessageStart {
                    id: message.id.unwrap_or_default(),
                    input_tokens: message.usage.and_then(|u| u.input_tokens),
                }
            }
            "content_block_delta" => {
                let delta: ContentBlockDelta = serde_json::from_str(data)?;
                StreamEvent::ContentBlockDelta {
                    text: delta.delta.and_then(|d| d.text),
                }
            }
            "message_delta" => {
                let delta: MessageDelta = serde_json::from_str(data)?;
                StreamEvent::MessageDelta {
                    stop_reason: delta.delta.and_then(|d| d.stop_reason),
                    output_tokens: delta.usage.and_then(|u| u.output_tokens),
                }
            }
            "message_stop" => StreamEvent::MessageStop,
            _ => StreamEvent::Ignored,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stream_events_by_name() {
        assert_eq!(
            StreamEvent::parse(
                "message_start",
                r#"{"type":"message_start","message":{"id":"m1","usage":{"input_tokens":12}}}"#
            )
            .unwrap(),
            StreamEvent::MessageStart {
                id: "m1".into(),
                input_tokens: Some(12)
            }
        );
        assert_eq!(
            StreamEvent::parse(
                "message_delta",
                r#"{"delta":{"stop_reason":"max_tokens"},"usage":{"output_tokens":40}}"#
            )
            .unwrap(),
            StreamEvent::MessageDelta {
                stop_reason: Some("max_tokens".into()),
                output_tokens: Some(40)
            }
        );
        assert_eq!(
            StreamEvent::parse("content_block_start", "{}").unwrap(),
            StreamEvent::Ignored
        );
        assert_eq!(
            StreamEvent::parse("", r#"{"type": "ping"}"#).unwrap(),
            StreamEvent::Ping
        );
    }

    #[test]
    fn malformed_payloads_are_errors_only_where_read() {
        assert!(StreamEvent::parse("content_block_delta", "{not json").is_err());
        assert_eq!(
            StreamEvent::parse("message_stop", "{not json").unwrap(),
            StreamEvent::MessageStop
        );
        // Wrong types inside a valid document degrade to None.
        assert_eq!(
            StreamEvent::parse("content_block_delta", r#"{"delta":{"text":5}}"#).unwrap(),
            StreamEvent::ContentBlockDelta { text: None }
        );
    }
}
