//! OpenAI Responses API payloads and stream events.

use serde::{Deserialize, Serialize};

use super::{lenient, lenient_vec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMessage {
    pub role: String,
    pub content: Vec<InputContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInput {
    Text(String),
    Messages(Vec<InputMessage>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsesRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub input: ResponsesInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OutputContent {
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub content: Vec<OutputContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponsesUsage {
    #[serde(default, deserialize_with = "lenient")]
    pub input_tokens: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub output_tokens: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponsesResponse {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub created_at: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub output_text: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub output: Vec<OutputItem>,
    #[serde(default, deserialize_with = "lenient")]
    pub usage: Option<ResponsesUsage>,
}

impl ResponsesResponse {
    /// Assistant text: top-level `output_text`, else the first `output_text`
    /// block of the first assistant message in `output` that carries one.
    pub fn assistant_text(&self) -> String {
        if let Some(text) = &self.output_text {
            return text.clone();
        }
        self.output
            .iter()
            .filter(|item| {
                item.kind.as_deref() == Some("message") && item.role.as_deref() == Some("assistant")
            })
            .filter_map(|item| {
                item.content
                    .iter()
                    .find(|c| c.kind.as_deref() == Some("output_text") && c.text.is_some())
                    .and_then(|c| c.text.clone())
            })
            .next()
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
struct TextDelta {
    #[serde(default, deserialize_with = "lenient")]
    delta: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Completed {
    #[serde(default, deserialize_with = "lenient")]
    response: Option<CompletedResponse>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletedResponse {
    #[serde(default, deserialize_with = "lenient")]
    usage: Option<ResponsesUsage>,
}

/// One Responses API SSE event, keyed by its `event:` name.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    OutputTextDelta { delta: Option<String> },
    Completed { usage: Option<ResponsesUsage> },
    Ignored,
}

impl StreamEvent {
    pub fn parse(event: &str, data: &str) -> Result<Self, serde_json::Error> {
        Ok(match event {
            "response.output_text.delta" => {
                let delta: TextDelta = serde_json::from_str(data)?;
                StreamEvent::OutputTextDelta { delta: delta.delta }
            }
            // Completion never depends on the payload; usage is best-effort.
            "response.completed" => StreamEvent::Completed {
                usage: serde_json::from_str::<Completed>(data)
                    .ok()
                    .and_then(|c| c.response)
                    .and_then(|r| r.usage),
            },
            _ => StreamEvent::Ignored,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_text_prefers_output_text() {
        let resp: ResponsesResponse = serde_json::from_value(json!({
            "output_text": "top",
            "output": [{"type": "message", "role": "assistant",
                        "content": [{"type": "output_text", "text": "nested"}]}]
        }))
        .unwrap();
        assert_eq!(resp.assistant_text(), "top");
    }

    #[test]
    fn assistant_text_scans_output_messages() {
        let resp: ResponsesResponse = serde_json::from_value(json!({
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "role": "assistant",
                 "content": [{"type": "refusal", "refusal": "no"},
                             {"type": "output_text", "text": "answer"}]}
            ]
        }))
        .unwrap();
        assert_eq!(resp.assistant_text(), "answer");
        assert_eq!(ResponsesResponse::default().assistant_text(), "");
    }

    #[test]
    fn completed_event_survives_bad_payload() {
        assert_eq!(
            StreamEvent::parse("response.completed", "garbage").unwrap(),
            StreamEvent::Completed { usage: None }
        );
        let ev = StreamEvent::parse(
            "response.completed",
            r#"{"response":{"usage":{"input_tokens":3,"output_tokens":4,"total_tokens":7}}}"#,
        )
        .unwrap();
        match ev {
            StreamEvent::Completed { usage: Some(u) } => {
                assert_eq!(u.input_tokens, Some(3));
                assert_eq!(u.output_tokens, Some(4));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(StreamEvent::parse("response.output_text.delta", "{").is_err());
    }
}
