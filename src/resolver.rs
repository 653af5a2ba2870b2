//! Model classification and deployment / API-version resolution.
//!
//! Everything here is a pure function over the model name (plus the mapper
//! table from [`crate::config::Config`]); the request handler calls into it
//! once per request to decide which upstream family and wire format apply.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

const CLAUDE_PREFIXES: &[&str] = &[
    "claude-opus",
    "claude-sonnet",
    "claude-haiku",
    "claude-3",
    "claude-4",
];

/// Reasoning and codex families that are only served by the Responses API.
const RESPONSES_PREFIXES: &[&str] = &[
    "o1",
    "o1-preview",
    "o1-mini",
    "o3",
    "o3-mini",
    "o3-pro",
    "o3-deep-research",
    "o4",
    "o4-mini",
    "codex-mini",
    "gpt-5.1-codex",
    "gpt-5-codex",
    "gpt-5-pro",
    "computer-use-preview",
];

/// Models that reject `max_completion_tokens`.
const LEGACY_MAX_TOKENS_PREFIXES: &[&str] = &["gpt-3.5", "gpt-4-"];

const ACCEPTED_ROLES: &[&str] = &["system", "user", "assistant", "tool"];

/// Non-standard role names seen from other SDKs and their canonical role.
const ROLE_ALIASES: &[(&str, &str)] = &[
    ("developer", "system"),
    ("human", "user"),
    ("ai", "assistant"),
    ("model", "assistant"),
    ("bot", "assistant"),
    ("function", "tool"),
    ("ipython", "tool"),
];

static VERSION_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"-\d{4}-\d{2}-\d{2}$|-\d{8}$").expect("version suffix regex is valid")
});

/// Ordered `(prefix, api-version)` pairs. The first matching prefix wins.
pub type VersionTable = Vec<(String, String)>;

#[derive(Debug, Deserialize)]
struct ApiVersionTables {
    chat: VersionTable,
    responses: VersionTable,
}

static API_VERSIONS: Lazy<ApiVersionTables> = Lazy::new(|| {
    serde_json::from_str(include_str!("api_versions.json"))
        .expect("embedded api_versions.json is valid")
});

/// Built-in public model name → Azure deployment name table.
pub const DEFAULT_MODEL_MAPPER: &[(&str, &str)] = &[
    ("gpt-5.2", "gpt-5.2"),
    ("gpt-5.2-2025-12-11", "gpt-5.2-2025-12-11"),
    ("gpt-5.2-chat", "gpt-5.2-chat"),
    ("gpt-5.2-chat-2025-12-11", "gpt-5.2-chat-2025-12-11"),
    ("gpt-5.1", "gpt-5.1"),
    ("gpt-5.1-2025-11-13", "gpt-5.1-2025-11-13"),
    ("gpt-5.1-chat", "gpt-5.1-chat"),
    ("gpt-5.1-chat-2025-11-13", "gpt-5.1-chat-2025-11-13"),
    ("gpt-5.1-codex", "gpt-5.1-codex"),
    ("gpt-5.1-codex-2025-11-13", "gpt-5.1-codex-2025-11-13"),
    ("gpt-5.1-codex-mini", "gpt-5.1-codex-mini"),
    ("gpt-5.1-codex-mini-2025-11-13", "gpt-5.1-codex-mini-2025-11-13"),
    ("gpt-5.1-codex-max", "gpt-5.1-codex-max"),
    ("gpt-5.1-codex-max-2025-12-04", "gpt-5.1-codex-max-2025-12-04"),
    ("gpt-5", "gpt-5"),
    ("gpt-5-2025-08-07", "gpt-5-2025-08-07"),
    ("gpt-5-mini", "gpt-5-mini"),
    ("gpt-5-mini-2025-08-07", "gpt-5-mini-2025-08-07"),
    ("gpt-5-nano", "gpt-5-nano"),
    ("gpt-5-nano-2025-08-07", "gpt-5-nano-2025-08-07"),
    ("gpt-5-chat", "gpt-5-chat"),
    ("gpt-5-chat-2025-08-07", "gpt-5-chat-2025-08-07"),
    ("gpt-5-chat-2025-10-03", "gpt-5-chat-2025-10-03"),
    ("gpt-5-codex", "gpt-5-codex"),
    ("gpt-5-codex-2025-09-11", "gpt-5-codex-2025-09-11"),
    ("gpt-5-pro", "gpt-5-pro"),
    ("gpt-5-pro-2025-10-06", "gpt-5-pro-2025-10-06"),
    ("gpt-4.1", "gpt-4.1"),
    ("gpt-4.1-2025-04-14", "gpt-4.1-2025-04-14"),
    ("gpt-4.1-mini", "gpt-4.1-mini"),
    ("gpt-4.1-mini-2025-04-14", "gpt-4.1-mini-2025-04-14"),
    ("gpt-4.1-nano", "gpt-4.1-nano"),
    ("gpt-4.1-nano-2025-04-14", "gpt-4.1-nano-2025-04-14"),
    ("o1", "o1"),
    ("o1-2024-12-17", "o1-2024-12-17"),
    ("o1-preview", "o1-preview"),
    ("o1-preview-2024-09-12", "o1-preview-2024-09-12"),
    ("o1-mini", "o1-mini"),
    ("o1-mini-2024-09-12", "o1-mini-2024-09-12"),
    ("o3", "o3"),
    ("o3-2025-04-16", "o3-2025-04-16"),
    ("o3-mini", "o3-mini"),
    ("o3-mini-2025-01-31", "o3-mini-2025-01-31"),
    ("o3-pro", "o3-pro"),
    ("o3-pro-2025-06-10", "o3-pro-2025-06-10"),
    ("o3-deep-research", "o3-deep-research"),
    ("o3-deep-research-2025-06-26", "o3-deep-research-2025-06-26"),
    ("o4", "o4"),
    ("o4-mini", "o4-mini"),
    ("o4-mini-2025-04-16", "o4-mini-2025-04-16"),
    ("codex-mini", "codex-mini"),
    ("codex-mini-2025-05-16", "codex-mini-2025-05-16"),
    ("computer-use-preview", "computer-use-preview"),
    ("computer-use-preview-2025-03-11", "computer-use-preview-2025-03-11"),
    ("gpt-oss-120b", "gpt-oss-120b"),
    ("gpt-oss-20b", "gpt-oss-20b"),
    ("claude-opus-4.5", "claude-opus-4.5"),
    ("claude-opus-4-5", "claude-opus-4.5"),
    ("claude-sonnet-4.5", "claude-sonnet-4.5"),
    ("claude-sonnet-4-5", "claude-sonnet-4.5"),
    ("claude-haiku-4.5", "claude-haiku-4.5"),
    ("claude-haiku-4-5", "claude-haiku-4.5"),
    ("claude-opus-4.1", "claude-opus-4.1"),
    ("claude-opus-4-1", "claude-opus-4.1"),
    ("gpt-4o", "gpt-4o"),
    ("gpt-4o-2024-05-13", "gpt-4o-2024-05-13"),
    ("gpt-4o-2024-08-06", "gpt-4o-2024-08-06"),
    ("gpt-4o-2024-11-20", "gpt-4o-2024-11-20"),
    ("gpt-4o-mini", "gpt-4o-mini"),
    ("gpt-4o-mini-2024-07-18", "gpt-4o-mini-2024-07-18"),
    ("gpt-4", "gpt-4-0613"),
    ("gpt-4-0613", "gpt-4-0613"),
    ("gpt-4-1106-preview", "gpt-4-1106-preview"),
    ("gpt-4-0125-preview", "gpt-4-0125-preview"),
    ("gpt-4-vision-preview", "gpt-4-vision-preview"),
    ("gpt-4-turbo", "gpt-4-turbo"),
    ("gpt-4-turbo-2024-04-09", "gpt-4-turbo-2024-04-09"),
    ("gpt-4-32k", "gpt-4-32k-0613"),
    ("gpt-4-32k-0613", "gpt-4-32k-0613"),
    ("gpt-3.5-turbo", "gpt-35-turbo-0613"),
    ("gpt-3.5-turbo-0301", "gpt-35-turbo-0301"),
    ("gpt-3.5-turbo-0613", "gpt-35-turbo-0613"),
    ("gpt-3.5-turbo-1106", "gpt-35-turbo-1106"),
    ("gpt-3.5-turbo-0125", "gpt-35-turbo-0125"),
    ("gpt-3.5-turbo-16k", "gpt-35-turbo-16k-0613"),
    ("gpt-3.5-turbo-16k-0613", "gpt-35-turbo-16k-0613"),
    ("gpt-3.5-turbo-instruct", "gpt-35-turbo-instruct-0914"),
    ("gpt-3.5-turbo-instruct-0914", "gpt-35-turbo-instruct-0914"),
    ("text-embedding-3-small", "text-embedding-3-small-1"),
    ("text-embedding-3-large", "text-embedding-3-large-1"),
    ("text-embedding-ada-002", "text-embedding-ada-002-2"),
    ("text-embedding-ada-002-1", "text-embedding-ada-002-1"),
    ("text-embedding-ada-002-2", "text-embedding-ada-002-2"),
    ("dall-e-2", "dall-e-2-2.0"),
    ("dall-e-2-2.0", "dall-e-2-2.0"),
    ("dall-e-3", "dall-e-3-3.0"),
    ("dall-e-3-3.0", "dall-e-3-3.0"),
    ("babbage-002", "babbage-002-1"),
    ("babbage-002-1", "babbage-002-1"),
    ("davinci-002", "davinci-002-1"),
    ("davinci-002-1", "davinci-002-1"),
    ("gpt-4o-audio-preview", "gpt-4o-audio-preview"),
    ("gpt-4o-audio-preview-2024-12-17", "gpt-4o-audio-preview-2024-12-17"),
    ("gpt-4o-mini-audio-preview", "gpt-4o-mini-audio-preview"),
    ("gpt-4o-mini-audio-preview-2024-12-17", "gpt-4o-mini-audio-preview-2024-12-17"),
    ("gpt-4o-realtime-preview", "gpt-4o-realtime-preview"),
    ("gpt-4o-realtime-preview-2024-12-17", "gpt-4o-realtime-preview-2024-12-17"),
    ("gpt-4o-realtime-preview-2025-06-03", "gpt-4o-realtime-preview-2025-06-03"),
    ("gpt-4o-mini-realtime-preview", "gpt-4o-mini-realtime-preview"),
    ("gpt-4o-mini-realtime-preview-2024-12-17", "gpt-4o-mini-realtime-preview-2024-12-17"),
    ("gpt-realtime", "gpt-realtime"),
    ("gpt-realtime-2025-08-28", "gpt-realtime-2025-08-28"),
    ("gpt-realtime-mini", "gpt-realtime-mini"),
    ("gpt-realtime-mini-2025-10-06", "gpt-realtime-mini-2025-10-06"),
    ("gpt-audio", "gpt-audio"),
    ("gpt-audio-2025-08-28", "gpt-audio-2025-08-28"),
    ("gpt-audio-mini", "gpt-audio-mini"),
    ("gpt-audio-mini-2025-10-06", "gpt-audio-mini-2025-10-06"),
    ("gpt-4o-transcribe", "gpt-4o-transcribe"),
    ("gpt-4o-transcribe-2025-03-20", "gpt-4o-transcribe-2025-03-20"),
    ("gpt-4o-mini-transcribe", "gpt-4o-mini-transcribe"),
    ("gpt-4o-mini-transcribe-2025-03-20", "gpt-4o-mini-transcribe-2025-03-20"),
    ("gpt-4o-transcribe-diarize", "gpt-4o-transcribe-diarize"),
    ("gpt-4o-transcribe-diarize-2025-10-15", "gpt-4o-transcribe-diarize-2025-10-15"),
    ("tts", "tts-001"),
    ("tts-001", "tts-001"),
    ("tts-hd", "tts-hd-001"),
    ("tts-hd-001", "tts-hd-001"),
    ("gpt-4o-mini-tts", "gpt-4o-mini-tts"),
    ("gpt-4o-mini-tts-2025-03-20", "gpt-4o-mini-tts-2025-03-20"),
    ("whisper", "whisper-001"),
    ("whisper-001", "whisper-001"),
    ("gpt-image-1", "gpt-image-1"),
    ("gpt-image-1-2025-04-15", "gpt-image-1-2025-04-15"),
    ("gpt-image-1-mini", "gpt-image-1-mini"),
    ("gpt-image-1-mini-2025-10-06", "gpt-image-1-mini-2025-10-06"),
    ("sora", "sora"),
    ("sora-2025-05-02", "sora-2025-05-02"),
    ("sora-2", "sora-2"),
    ("sora-2-2025-10-06", "sora-2-2025-10-06"),
    ("phi-3", "phi-3"),
    ("phi-3-mini", "phi-3-mini"),
    ("phi-3-small", "phi-3-small"),
    ("phi-3-medium", "phi-3-medium"),
    ("phi-4", "phi-4"),
];

fn has_prefix(model: &str, prefixes: &[&str]) -> bool {
    let lower = model.to_lowercase();
    prefixes.iter().any(|p| lower.starts_with(*p))
}

pub fn is_claude_model(model: &str) -> bool {
    has_prefix(model, CLAUDE_PREFIXES)
}

pub fn should_use_responses_api(model: &str) -> bool {
    has_prefix(model, RESPONSES_PREFIXES)
}

/// True when the model only understands `max_tokens` (plain `gpt-4`, `gpt-4-*`, `gpt-3.5*`).
pub fn is_legacy_max_tokens_only(model: &str) -> bool {
    model.eq_ignore_ascii_case("gpt-4") || has_prefix(model, LEGACY_MAX_TOKENS_PREFIXES)
}

/// Remove a trailing `-YYYY-MM-DD` or `-YYYYMMDD` version suffix.
pub fn strip_model_version(model: &str) -> String {
    VERSION_SUFFIX.replace(model, "").into_owned()
}

/// Map a public model name to its upstream deployment.
///
/// Exact (case-insensitive) lookup first, then the same lookup with the date
/// suffix stripped. Unmapped names are returned unchanged so custom
/// deployments named after the model keep working.
pub fn resolve_model_deployment(model: &str, mapper: &HashMap<String, String>) -> String {
    let lower = model.to_lowercase();
    if let Some(deployment) = mapper.get(&lower) {
        return deployment.clone();
    }
    let stripped = strip_model_version(&lower);
    if stripped != lower {
        if let Some(deployment) = mapper.get(&stripped) {
            return deployment.clone();
        }
    }
    model.to_string()
}

pub fn resolve_api_version(table: &[(String, String)], model: &str, fallback: &str) -> String {
    let lower = model.to_lowercase();
    table
        .iter()
        .find(|(prefix, _)| lower.starts_with(&prefix.to_lowercase()))
        .map(|(_, version)| version.clone())
        .unwrap_or_else(|| fallback.to_string())
}

pub fn resolve_chat_api_version(model: &str, fallback: &str) -> String {
    resolve_api_version(&API_VERSIONS.chat, model, fallback)
}

pub fn resolve_responses_api_version(model: &str, fallback: &str) -> String {
    resolve_api_version(&API_VERSIONS.responses, model, fallback)
}

/// The segment following `deployments/` in a request path, or `""`.
pub fn model_from_path(path: &str) -> String {
    let mut parts = path.split('/');
    while let Some(part) = parts.next() {
        if part == "deployments" {
            return parts.next().unwrap_or("").to_string();
        }
    }
    String::new()
}

/// The `model` field of a raw JSON body, or `""` when the body does not parse.
pub fn model_from_body(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .as_ref()
        .and_then(|v| v.get("model"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

/// Canonical role for `role`; unknown roles fall back to `user`.
pub fn normalize_role(role: &str) -> &'static str {
    let lower = role.to_lowercase();
    if let Some(accepted) = ACCEPTED_ROLES.iter().find(|r| **r == lower) {
        return *accepted;
    }
    ROLE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, role)| *role)
        .unwrap_or("user")
}

/// Rewrite every `messages[*].role` to a canonical role. Returns whether anything changed.
pub fn normalize_roles(body: &mut Value) -> bool {
    let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
        return false;
    };
    let mut changed = false;
    for message in messages.iter_mut() {
        let Some(obj) = message.as_object_mut() else {
            continue;
        };
        let current = obj.get("role").and_then(Value::as_str).unwrap_or("");
        let canonical = normalize_role(current);
        if current != canonical {
            tracing::debug!(from = %current, to = %canonical, "Normalized message role");
            obj.insert("role".into(), Value::String(canonical.into()));
            changed = true;
        }
    }
    changed
}

/// Move `max_tokens` to `max_completion_tokens` for models that accept the newer field.
///
/// An existing `max_completion_tokens` is kept as is; `max_tokens` is dropped either way.
pub fn rewrite_max_tokens(body: &mut Value, model: &str) -> bool {
    if is_legacy_max_tokens_only(model) {
        return false;
    }
    let Some(obj) = body.as_object_mut() else {
        return false;
    };
    let Some(max_tokens) = obj.remove("max_tokens") else {
        return false;
    };
    if !obj.contains_key("max_completion_tokens") {
        obj.insert("max_completion_tokens".into(), max_tokens);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_model_mapper;
    use serde_json::json;

    #[test]
    fn classifies_model_families() {
        assert!(is_claude_model("Claude-Sonnet-4.5"));
        assert!(is_claude_model("claude-3-opus"));
        assert!(!is_claude_model("gpt-4o"));

        assert!(should_use_responses_api("o3-mini"));
        assert!(should_use_responses_api("GPT-5-Codex"));
        assert!(!should_use_responses_api("gpt-5"));

        assert!(is_legacy_max_tokens_only("gpt-4"));
        assert!(is_legacy_max_tokens_only("gpt-4-turbo"));
        assert!(is_legacy_max_tokens_only("gpt-3.5-turbo"));
        assert!(!is_legacy_max_tokens_only("gpt-4o"));
        assert!(!is_legacy_max_tokens_only("gpt-4.1"));
    }

    #[test]
    fn deployment_lookup_is_case_insensitive() {
        let mapper = default_model_mapper();
        for (name, deployment) in DEFAULT_MODEL_MAPPER {
            assert_eq!(resolve_model_deployment(name, &mapper), *deployment);
            assert_eq!(
                resolve_model_deployment(&name.to_uppercase(), &mapper),
                *deployment
            );
        }
    }

    #[test]
    fn deployment_lookup_strips_date_suffix() {
        let mapper = default_model_mapper();
        assert_eq!(resolve_model_deployment("gpt-4o-2099-01-01", &mapper), "gpt-4o");
        assert_eq!(
            resolve_model_deployment("gpt-3.5-turbo-20990101", &mapper),
            "gpt-35-turbo-0613"
        );
    }

    #[test]
    fn unmapped_models_pass_through_unchanged() {
        let mapper = default_model_mapper();
        assert_eq!(resolve_model_deployment("My-Custom-Deploy", &mapper), "My-Custom-Deploy");
        assert_eq!(
            resolve_model_deployment("my-custom-2099-01-01", &mapper),
            "my-custom-2099-01-01"
        );
    }

    #[test]
    fn api_version_uses_first_matching_prefix() {
        let table: VersionTable = vec![
            ("gpt-4".into(), "first".into()),
            ("gpt-4o-mini".into(), "longer".into()),
        ];
        assert_eq!(resolve_api_version(&table, "GPT-4o-mini", "fb"), "first");
        assert_eq!(resolve_api_version(&table, "phi-4", "fb"), "fb");
    }

    #[test]
    fn embedded_tables_resolve() {
        assert_eq!(resolve_chat_api_version("gpt-4o-audio-preview", "fb"), "2025-01-01-preview");
        assert_eq!(resolve_chat_api_version("gpt-4o", "fb"), "2024-10-21");
        assert_eq!(resolve_chat_api_version("mistral-large", "fb"), "fb");
        assert_eq!(resolve_responses_api_version("o3-pro", "fb"), "2025-04-01-preview");
        assert_eq!(resolve_responses_api_version("gpt-4o", "fb"), "fb");
    }

    #[test]
    fn extracts_model_from_path_and_body() {
        assert_eq!(model_from_path("/openai/deployments/my-dep/chat/completions"), "my-dep");
        assert_eq!(model_from_path("/deployments"), "");
        assert_eq!(model_from_path("/v1/chat/completions"), "");
        assert_eq!(model_from_body(br#"{"model":"gpt-4o"}"#), "gpt-4o");
        assert_eq!(model_from_body(b"not json"), "");
        assert_eq!(model_from_body(br#"{"model":7}"#), "");
    }

    #[test]
    fn roles_are_normalized() {
        let mut body = json!({
            "messages": [
                {"role": "developer", "content": "be brief"},
                {"role": "narrator", "content": "once upon"},
                {"role": "Assistant", "content": "ok"},
                {"role": "user", "content": "hi"}
            ]
        });
        assert!(normalize_roles(&mut body));
        let roles: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);

        let mut clean = json!({"messages": [{"role": "user", "content": "hi"}]});
        assert!(!normalize_roles(&mut clean));
        assert!(!normalize_roles(&mut json!({"input": "hi"})));
    }

    #[test]
    fn max_tokens_rewrite_respects_legacy_models() {
        let mut body = json!({"model": "gpt-4o", "max_tokens": 50});
        assert!(rewrite_max_tokens(&mut body, "gpt-4o"));
        assert_eq!(body["max_completion_tokens"], 50);
        assert!(body.get("max_tokens").is_none());

        let mut legacy = json!({"model": "gpt-3.5-turbo", "max_tokens": 50});
        assert!(!rewrite_max_tokens(&mut legacy, "gpt-3.5-turbo"));
        assert_eq!(legacy["max_tokens"], 50);

        let mut both = json!({"max_tokens": 50, "max_completion_tokens": 80});
        assert!(rewrite_max_tokens(&mut both, "gpt-5"));
        assert_eq!(both["max_completion_tokens"], 80);
        assert!(both.get("max_tokens").is_none());
    }
}
