//! Upstream target and auth resolution.
//!
//! The incoming path is classified once into a [`RouteTarget`]; everything
//! downstream (URL building, response conversion) works from that value and
//! the resulting [`UpstreamTarget`] instead of re-inspecting path strings.

use std::collections::BTreeMap;

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use tracing::{debug, warn};

use crate::config::{Config, ServerlessDeployment};
use crate::resolver::{
    resolve_chat_api_version, resolve_model_deployment, resolve_responses_api_version,
};

/// Incoming headers never forwarded upstream. `accept-encoding` is left to
/// the HTTP client so it can decode the body it receives.
const HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "content-length",
    "accept-encoding",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// `/v1/responses` and its sub-resources, already mapped under `/openai`.
    Responses { upstream_path: String },
    /// `/v1/anthropic/messages`.
    Anthropic,
    /// Deployment-scoped OpenAI APIs; `remainder` follows `/openai/deployments/{name}/`.
    Deployment { remainder: String },
    /// `/v1/files*`, mapped under `/openai` with no deployment segment.
    Files { upstream_path: String },
    /// Anything else, treated as deployment-scoped.
    Fallback { remainder: String },
}

impl RouteTarget {
    pub fn classify(path: &str) -> Self {
        if path.contains("/v1/responses") {
            let upstream_path = if path == "/v1/responses" {
                "/openai/v1/responses".to_string()
            } else {
                path.replacen("/v1/", "/openai/v1/", 1)
            };
            return RouteTarget::Responses { upstream_path };
        }
        if path.starts_with("/v1/anthropic/messages") {
            return RouteTarget::Anthropic;
        }
        for fixed in [
            "chat/completions",
            "completions",
            "embeddings",
            "images/generations",
        ] {
            if path
                .strip_prefix("/v1/")
                .is_some_and(|rest| rest.starts_with(fixed))
            {
                return RouteTarget::Deployment {
                    remainder: fixed.to_string(),
                };
            }
        }
        if let Some(audio) = path.strip_prefix("/v1/audio/") {
            return RouteTarget::Deployment {
                remainder: format!("audio/{audio}"),
            };
        }
        if path.starts_with("/v1/files") {
            return RouteTarget::Files {
                upstream_path: path.replacen("/v1/", "/openai/", 1),
            };
        }
        let remainder = path
            .strip_prefix("/v1/")
            .or_else(|| path.strip_prefix('/'))
            .unwrap_or(path);
        RouteTarget::Fallback {
            remainder: remainder.to_string(),
        }
    }
}

/// Which wire format the upstream speaks, as far as response conversion cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamApi {
    Anthropic,
    Responses,
    /// Azure OpenAI deployments, files and serverless chat endpoints.
    OpenAi,
}

impl UpstreamApi {
    /// Wire format implied by the path the upstream request is sent to.
    pub fn for_path(path: &str) -> Self {
        match RouteTarget::classify(path) {
            RouteTarget::Responses { .. } => UpstreamApi::Responses,
            RouteTarget::Anthropic => UpstreamApi::Anthropic,
            _ => UpstreamApi::OpenAi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub remove_headers: Vec<String>,
    pub api: UpstreamApi,
}

/// Headers to set and strip so the upstream sees the auth scheme it expects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthResolution {
    pub set: BTreeMap<String, String>,
    pub remove: Vec<String>,
}

pub fn build_upstream_target(
    path: &str,
    query: &str,
    model: &str,
    config: &Config,
) -> UpstreamTarget {
    match config.serverless_for(model) {
        Some(serverless) => serverless_target(path, query, serverless),
        None => azure_target(path, query, model, config),
    }
}

fn serverless_target(path: &str, query: &str, info: &ServerlessDeployment) -> UpstreamTarget {
    let mut url = format!("{}{}", info.base_url(), path);
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }
    UpstreamTarget {
        url,
        headers: BTreeMap::from([("authorization".to_string(), format!("Bearer {}", info.key))]),
        remove_headers: vec!["api-key".into()],
        api: UpstreamApi::for_path(path),
    }
}

fn azure_target(path: &str, query: &str, model: &str, config: &Config) -> UpstreamTarget {
    let endpoint = config.azure_endpoint.trim_end_matches('/');
    let deployment = resolve_model_deployment(model, &config.model_mapper);
    let mut headers = BTreeMap::new();
    let mut remove_headers = Vec::new();

    let chat_version = || resolve_chat_api_version(model, &config.api_version);
    let (target_path, api_version, api) = match RouteTarget::classify(path) {
        RouteTarget::Responses { upstream_path } => (
            upstream_path,
            Some(resolve_responses_api_version(
                model,
                &config.responses_api_version,
            )),
            UpstreamApi::Responses,
        ),
        RouteTarget::Anthropic => {
            headers.insert(
                "anthropic-version".to_string(),
                config.anthropic_api_version.clone(),
            );
            remove_headers.push("api-key".to_string());
            ("/anthropic/v1/messages".to_string(), None, UpstreamApi::Anthropic)
        }
        RouteTarget::Deployment { remainder } | RouteTarget::Fallback { remainder } => (
            format!("/openai/deployments/{deployment}/{remainder}"),
            Some(chat_version()),
            UpstreamApi::OpenAi,
        ),
        RouteTarget::Files { upstream_path } => {
            (upstream_path, Some(chat_version()), UpstreamApi::OpenAi)
        }
    };

    let qs = rebuild_query(query, api_version.as_deref());
    let url = if qs.is_empty() {
        format!("{endpoint}{target_path}")
    } else {
        format!("{endpoint}{target_path}?{qs}")
    };
    debug!(upstream = %url, "Resolved upstream URL");

    UpstreamTarget {
        url,
        headers,
        remove_headers,
        api,
    }
}

/// Re-encode `query`, replacing (or appending) `api-version` when one is given.
fn rebuild_query(query: &str, api_version: Option<&str>) -> String {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut version_set = false;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match api_version {
            Some(version) if key == "api-version" => {
                if !version_set {
                    pairs.push((key.into_owned(), version.to_string()));
                    version_set = true;
                }
            }
            _ => pairs.push((key.into_owned(), value.into_owned())),
        }
    }
    if let (Some(version), false) = (api_version, version_set) {
        pairs.push(("api-version".to_string(), version.to_string()));
    }

    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Pick the upstream credential.
///
/// Serverless models always use their own key as a bearer token. Otherwise the
/// key comes from the incoming `api-key`, then a `Bearer` authorization, then
/// the configured default, and is sent as `api-key`.
pub fn resolve_auth(incoming: &HeaderMap, model: &str, config: &Config) -> AuthResolution {
    if let Some(serverless) = config.serverless_for(model) {
        return AuthResolution {
            set: BTreeMap::from([(
                "authorization".to_string(),
                format!("Bearer {}", serverless.key),
            )]),
            remove: vec!["api-key".into()],
        };
    }

    let header = |name: &str| {
        incoming
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    let mut key = header("api-key");
    if key.is_empty() {
        if let Some(token) = header("authorization").strip_prefix("Bearer ") {
            key = token.to_string();
        }
    }
    if key.is_empty() {
        key = config.api_key.clone();
    }

    AuthResolution {
        set: BTreeMap::from([("api-key".to_string(), key)]),
        remove: vec!["authorization".into()],
    }
}

/// Anthropic's endpoint only takes bearer tokens: move a resolved `api-key` into `Authorization`.
pub fn apply_anthropic_bearer(auth: &mut AuthResolution, target: &UpstreamTarget) {
    if target.api != UpstreamApi::Anthropic {
        return;
    }
    if let Some(key) = auth.set.remove("api-key") {
        if key.is_empty() {
            return;
        }
        auth.set
            .insert("authorization".to_string(), format!("Bearer {key}"));
        auth.remove.retain(|h| !h.eq_ignore_ascii_case("authorization"));
    }
}

pub fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_HEADERS {
        headers.remove(*name);
    }
}

fn insert_header(headers: &mut HeaderMap, key: &str, value: &str) {
    match (
        HeaderName::from_bytes(key.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(val)) => {
            headers.insert(name, val);
        }
        _ => warn!("Skipping invalid upstream header: {}", key),
    }
}

/// Headers for the upstream request: incoming minus hop-by-hop, then auth, then target rules.
pub fn forward_headers(
    incoming: &HeaderMap,
    auth: &AuthResolution,
    target: &UpstreamTarget,
    body_rewritten: bool,
) -> HeaderMap {
    let mut headers = incoming.clone();
    strip_hop_headers(&mut headers);

    for name in &auth.remove {
        headers.remove(name.as_str());
    }
    for (key, value) in &auth.set {
        insert_header(&mut headers, key, value);
    }

    for name in &target.remove_headers {
        headers.remove(name.as_str());
    }
    for (key, value) in &target.headers {
        insert_header(&mut headers, key, value);
    }

    if body_rewritten {
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
    }
    headers
}
