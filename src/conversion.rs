use crate::models::anthropic;
use crate::models::chat;
use crate::models::responses as resp;
use crate::models::unix_now;
use serde_json::Value;

/// `max_tokens` sent to Anthropic when the client did not ask for a limit.
pub const DEFAULT_ANTHROPIC_MAX_TOKENS: u64 = 1000;

// ============================================================================
// Request Body Conversion Functions
// ============================================================================

/// Convert a Chat Completions request into an Anthropic Messages request.
///
/// This conversion maps:
/// - system message → top-level `system` (the last one wins)
/// - other messages → `messages`, in order
/// - `input` (single-string prompt) → one user message, no system
/// - `max_tokens` → `max_tokens`, defaulting to 1000 when unset or zero
/// - `temperature` only when > 0, `stream` only when true
pub fn chat_to_anthropic(req: &chat::ChatCompletionRequest, model: &str) -> anthropic::MessagesRequest {
    let mut system: Option<String> = None;
    let mut messages = Vec::new();

    match req.input.as_deref().filter(|s| !s.is_empty()) {
        Some(input) => messages.push(anthropic::AnthropicMessage {
            role: "user".into(),
            content: Value::String(input.to_string()),
        }),
        None => {
            for msg in &req.messages {
                if msg.role == "system" {
                    system = Some(msg.text());
                    continue;
                }
                let content = match &msg.content {
                    Value::Null => Value::String(String::new()),
                    other => other.clone(),
                };
                messages.push(anthropic::AnthropicMessage {
                    role: msg.role.clone(),
                    content,
                });
            }
        }
    }

    anthropic::MessagesRequest {
        model: model.to_string(),
        messages,
        max_tokens: req
            .max_tokens
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_ANTHROPIC_MAX_TOKENS),
        system: system.filter(|s| !s.is_empty()),
        temperature: req.temperature.filter(|t| *t > 0.0),
        stream: req.stream.filter(|s| *s),
    }
}

/// Convert a Chat Completions request into a Responses API request.
///
/// A lone user message collapses to a plain string `input`; anything else
/// becomes a list of `input_text` messages. `max_tokens` is renamed to
/// `max_output_tokens`.
pub fn chat_to_responses(req: &chat::ChatCompletionRequest) -> resp::ResponsesRequest {
    let input = match req.messages.as_slice() {
        [only] if only.role == "user" => resp::ResponsesInput::Text(only.text()),
        [] if req.input.is_some() => {
            resp::ResponsesInput::Text(req.input.clone().unwrap_or_default())
        }
        messages => resp::ResponsesInput::Messages(
            messages
                .iter()
                .map(|msg| resp::InputMessage {
                    role: msg.role.clone(),
                    content: vec![resp::InputContent {
                        kind: "input_text".into(),
                        text: msg.text(),
                    }],
                })
                .collect(),
        ),
    };

    resp::ResponsesRequest {
        model: req.model.clone(),
        input,
        temperature: req.temperature.filter(|t| *t > 0.0),
        max_output_tokens: req.max_tokens.filter(|n| *n > 0),
        stream: req.stream.filter(|s| *s),
    }
}

// ============================================================================
// Response Body Conversion Functions
// ============================================================================

/// Map an Anthropic `stop_reason` to a Chat `finish_reason`.
pub fn map_stop_reason(reason: &str) -> &'static str {
    match reason {
        "max_tokens" => "length",
        // end_turn, stop_sequence and anything new
        _ => "stop",
    }
}

/// Convert an Anthropic Messages response to a Chat Completions response.
///
/// The first content block's text becomes the assistant message; usage is
/// summed into `total_tokens`. `model` is the name the client asked for.
pub fn anthropic_to_chat(
    response: &anthropic::MessagesResponse,
    model: &str,
) -> chat::ChatCompletionResponse {
    let content = response
        .content
        .first()
        .and_then(|block| block.text.clone())
        .unwrap_or_default();

    let usage = response.usage.clone().unwrap_or_default();
    let prompt_tokens = usage.input_tokens.unwrap_or(0);
    let completion_tokens = usage.output_tokens.unwrap_or(0);

    chat::ChatCompletionResponse::single(
        response.id.clone().unwrap_or_else(|| "msg-unknown".into()),
        unix_now(),
        model.to_string(),
        content,
        map_stop_reason(response.stop_reason.as_deref().unwrap_or("end_turn")).to_string(),
        chat::Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
    )
}

/// Convert a Responses API response to a Chat Completions response.
///
/// This conversion maps:
/// - output_text (or the first assistant `output_text` block) → message content
/// - status other than `completed` → finish_reason, verbatim
/// - usage.input_tokens / output_tokens / total_tokens → prompt / completion / total
/// - created_at → created (now when absent)
pub fn responses_to_chat(response: &resp::ResponsesResponse) -> chat::ChatCompletionResponse {
    let finish_reason = match response.status.as_deref() {
        Some(status) if status != "completed" => status.to_string(),
        _ => "stop".to_string(),
    };

    let usage = response
        .usage
        .as_ref()
        .map(|u| chat::Usage {
            prompt_tokens: u.input_tokens.unwrap_or(0),
            completion_tokens: u.output_tokens.unwrap_or(0),
            total_tokens: u.total_tokens.unwrap_or(0),
        })
        .unwrap_or_default();

    chat::ChatCompletionResponse::single(
        response.id.clone().unwrap_or_else(|| "resp-unknown".into()),
        response.created_at.unwrap_or_else(unix_now),
        response.model.clone().unwrap_or_else(|| "unknown".into()),
        response.assistant_text(),
        finish_reason,
        usage,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::{ChatCompletionRequest, ChatMessage};
    use serde_json::json;

    fn request(messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: Some("gpt-4o".into()),
            messages,
            ..Default::default()
        }
    }

    #[test]
    fn anthropic_request_lifts_system_and_defaults_max_tokens() {
        let mut req = request(vec![
            ChatMessage::new("system", "be terse"),
            ChatMessage::new("user", "hi"),
            ChatMessage::new("assistant", "hello"),
        ]);
        req.temperature = Some(0.0);
        req.stream = Some(false);

        let out = chat_to_anthropic(&req, "claude-sonnet-4.5");
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(
            v,
            json!({
                "model": "claude-sonnet-4.5",
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"}
                ],
                "max_tokens": 1000,
                "system": "be terse"
            })
        );
    }

    #[test]
    fn anthropic_request_uses_input_prompt() {
        let mut req = request(vec![ChatMessage::new("system", "ignored")]);
        req.input = Some("summarize".into());
        req.max_tokens = Some(64);
        req.temperature = Some(0.7);
        req.stream = Some(true);

        let out = chat_to_anthropic(&req, "claude-haiku-4.5");
        assert_eq!(out.system, None);
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].content, json!("summarize"));
        assert_eq!(out.max_tokens, 64);
        assert_eq!(out.temperature, Some(0.7));
        assert_eq!(out.stream, Some(true));
    }

    #[test]
    fn responses_request_shapes_input() {
        let single = chat_to_responses(&request(vec![ChatMessage::new("user", "hi")]));
        assert_eq!(single.input, resp::ResponsesInput::Text("hi".into()));

        let mut req = request(vec![
            ChatMessage::new("system", "sys"),
            ChatMessage::new("user", "hi"),
        ]);
        req.max_tokens = Some(0);
        let multi = serde_json::to_value(chat_to_responses(&req)).unwrap();
        assert_eq!(
            multi["input"],
            json!([
                {"role": "system", "content": [{"type": "input_text", "text": "sys"}]},
                {"role": "user", "content": [{"type": "input_text", "text": "hi"}]}
            ])
        );
        assert!(multi.get("max_output_tokens").is_none());
    }

    #[test]
    fn single_user_message_round_trips_through_responses() {
        let req = request(vec![ChatMessage::new("user", "what is rust?")]);
        let converted = chat_to_responses(&req);
        let echoed_text = match &converted.input {
            resp::ResponsesInput::Text(text) => text.clone(),
            other => panic!("expected text input, got {other:?}"),
        };

        let upstream: resp::ResponsesResponse = serde_json::from_value(json!({
            "id": "resp_1",
            "model": "o3",
            "status": "completed",
            "output": [{"type": "message", "role": "assistant",
                        "content": [{"type": "output_text", "text": echoed_text}]}]
        }))
        .unwrap();
        let chat = responses_to_chat(&upstream);
        assert_eq!(chat.choices[0].message.content, "what is rust?");
        assert_eq!(chat.choices[0].finish_reason, "stop");
    }

    #[test]
    fn anthropic_response_maps_usage_and_stop_reason() {
        let upstream: anthropic::MessagesResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "content": [{"type": "text", "text": "hello"}],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }))
        .unwrap();
        let chat = anthropic_to_chat(&upstream, "claude-opus-4.5");
        assert_eq!(chat.id, "msg_1");
        assert_eq!(chat.model, "claude-opus-4.5");
        assert_eq!(chat.object, "chat.completion");
        assert_eq!(chat.choices[0].message.content, "hello");
        assert_eq!(chat.choices[0].finish_reason, "length");
        assert_eq!(chat.usage.total_tokens, 15);
    }

    #[test]
    fn converters_default_malformed_payloads() {
        let chat = anthropic_to_chat(&anthropic::MessagesResponse::default(), "claude");
        assert_eq!(chat.id, "msg-unknown");
        assert_eq!(chat.choices[0].message.content, "");
        assert_eq!(chat.choices[0].finish_reason, "stop");
        assert_eq!(chat.usage, chat::Usage::default());

        let upstream: resp::ResponsesResponse = serde_json::from_value(json!({
            "status": "incomplete",
            "created_at": 1700000000,
            "output": "not a list"
        }))
        .unwrap();
        let chat = responses_to_chat(&upstream);
        assert_eq!(chat.id, "resp-unknown");
        assert_eq!(chat.model, "unknown");
        assert_eq!(chat.created, 1700000000);
        assert_eq!(chat.choices[0].finish_reason, "incomplete");
        assert_eq!(chat.choices[0].message.content, "");
    }

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(map_stop_reason("end_turn"), "stop");
        assert_eq!(map_stop_reason("stop_sequence"), "stop");
        assert_eq!(map_stop_reason("max_tokens"), "length");
        assert_eq!(map_stop_reason("tool_use"), "stop");
    }
}
