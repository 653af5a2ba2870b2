//! HTTP surface: route dispatch, the Azure request pipeline and the small responders.
//!
//! Every request enters through [`dispatch`]. OPTIONS is answered for CORS
//! before routing; everything else goes through the mode-specific [`Router`].

use actix_web::http::{Method, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse, HttpResponseBuilder};
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use http::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::config::{Config, ProxyMode};
use crate::conversion::{anthropic_to_chat, chat_to_anthropic, chat_to_responses, responses_to_chat};
use crate::director::{
    apply_anthropic_bearer, build_upstream_target, forward_headers, resolve_auth,
    strip_hop_headers, UpstreamApi,
};
use crate::error::ProxyError;
use crate::models::anthropic::MessagesResponse;
use crate::models::chat::{ChatCompletionRequest, ChatCompletionResponse};
use crate::models::responses::ResponsesResponse;
use crate::models::UpstreamPayload;
use crate::resolver::{
    is_claude_model, model_from_body, model_from_path, normalize_roles, rewrite_max_tokens,
    should_use_responses_api,
};
use crate::router::{Router, RouterError};
use crate::stats::{RequestTracker, TokenUsage};
use crate::transcode::{
    AnthropicTranscoder, ByteStream, ResponsesTranscoder, TrackedStream, TranscodeStream,
};
use crate::util::AppState;

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
const ANTHROPIC_MESSAGES_PATH: &str = "/v1/anthropic/messages";
const RESPONSES_PATH: &str = "/v1/responses";

/// Upstream response headers that no longer describe the body we send back.
const RESPONSE_SKIP_HEADERS: &[&str] = &[
    "content-length",
    "transfer-encoding",
    "connection",
    "content-encoding",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Health,
    Stats,
    Models,
    Azure,
    OpenAi,
}

const AZURE_ROUTES: &[(&str, &str)] = &[
    ("POST", "/v1/chat/completions"),
    ("POST", "/v1/completions"),
    ("POST", "/v1/embeddings"),
    ("POST", "/v1/images/generations"),
    ("POST", "/v1/audio/speech"),
    ("GET", "/v1/audio/voices"),
    ("POST", "/v1/audio/transcriptions"),
    ("POST", "/v1/audio/translations"),
    ("POST", "/v1/fine_tunes"),
    ("GET", "/v1/fine_tunes"),
    ("GET", "/v1/fine_tunes/:fine_tune_id"),
    ("POST", "/v1/fine_tunes/:fine_tune_id/cancel"),
    ("GET", "/v1/fine_tunes/:fine_tune_id/events"),
    ("POST", "/v1/files"),
    ("GET", "/v1/files"),
    ("DELETE", "/v1/files/:file_id"),
    ("GET", "/v1/files/:file_id"),
    ("GET", "/v1/files/:file_id/content"),
    ("GET", "/deployments"),
    ("GET", "/deployments/:deployment_id"),
    ("GET", "/v1/models/:model_id/capabilities"),
    ("POST", "/v1/responses"),
    ("GET", "/v1/responses/:response_id"),
    ("DELETE", "/v1/responses/:response_id"),
    ("POST", "/v1/responses/:response_id/cancel"),
    ("GET", "/v1/responses/:response_id/input_items"),
];

/// Routes for the configured proxy mode.
pub fn build_router(config: &Config) -> Result<Router<Endpoint>, RouterError> {
    let mut router = Router::new();
    router.get("/healthz", Endpoint::Health)?;
    router.get("/stats", Endpoint::Stats)?;

    match config.proxy_mode {
        ProxyMode::OpenAi => router.any(Endpoint::OpenAi),
        ProxyMode::Azure => {
            router.get("/v1/models", Endpoint::Models)?;
            for (method, pattern) in AZURE_ROUTES {
                router.on(method, pattern, Endpoint::Azure)?;
            }
        }
    }
    Ok(router)
}

/// Configure Actix-web with the proxy entry point. Expects `web::Data<AppState>`.
pub fn config_routes(cfg: &mut web::ServiceConfig) {
    cfg.default_service(web::to(dispatch));
}

async fn dispatch(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ProxyError> {
    if req.method() == Method::OPTIONS {
        return Ok(cors_preflight());
    }

    let Some(route) = state.router.match_route(req.method().as_str(), req.path()) else {
        return Err(ProxyError::NotFound {
            method: req.method().to_string(),
            path: req.path().to_string(),
        });
    };

    let result = match route.handler {
        Endpoint::Health => Ok(HttpResponse::Ok().json(json!({ "status": "ok" }))),
        Endpoint::Stats => Ok(HttpResponse::Ok().json(state.stats.snapshot())),
        Endpoint::Models => Ok(list_models(&req, &state).await),
        Endpoint::Azure => proxy_azure(&req, body, &state).await,
        Endpoint::OpenAi => openai_passthrough(&req, body, &state).await,
    };
    if let Err(e) = &result {
        error!("Handler error: {}", e);
    }
    result
}

fn cors_preflight() -> HttpResponse {
    HttpResponse::Ok()
        .insert_header(("access-control-allow-origin", "*"))
        .insert_header((
            "access-control-allow-methods",
            "POST, GET, OPTIONS, PUT, DELETE",
        ))
        .insert_header(("access-control-allow-headers", "Content-Type, Authorization"))
        .finish()
}

/// State needed to decide how an upstream response is turned back into a client response.
#[derive(Debug, Clone)]
pub struct ConversionContext {
    /// The path the client requested.
    pub original_path: String,
    pub upstream_url: String,
    pub model: String,
    pub api: UpstreamApi,
}

impl ConversionContext {
    /// Chat clients whose request was rewritten for another API get chat-shaped answers.
    pub fn converts(&self) -> bool {
        self.original_path == CHAT_COMPLETIONS_PATH && self.api != UpstreamApi::OpenAi
    }
}

fn request_header<'a>(req: &'a HttpRequest, name: &str) -> &'a str {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Copy the incoming actix headers into the header map the upstream client takes.
fn incoming_headers(req: &HttpRequest) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in req.headers().iter() {
        if let (Ok(name), Ok(value)) = (
            http::HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }
    headers
}

/// Model for stats and routing: body `model` on Responses paths, then the
/// `deployments/{name}` path segment, then the parsed body, then a raw scan.
fn detect_model(path: &str, parsed: Option<&Value>, raw: &[u8]) -> String {
    let body_model = || {
        parsed
            .and_then(|v| v.get("model"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    };

    if path.contains("/responses") {
        let model = body_model();
        if !model.is_empty() {
            return model;
        }
    }
    let model = model_from_path(path);
    if !model.is_empty() {
        return model;
    }
    let model = body_model();
    if !model.is_empty() || raw.is_empty() {
        return model;
    }
    model_from_body(raw)
}

fn to_json_bytes<T: serde::Serialize>(value: &T) -> Result<Bytes, ProxyError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| ProxyError::Internal(format!("failed to encode request body: {e}")))
}

async fn proxy_azure(
    req: &HttpRequest,
    body: Bytes,
    state: &AppState,
) -> Result<HttpResponse, ProxyError> {
    let config = &state.config;
    let path = req.path();
    let query = req.query_string();
    info!(method = %req.method(), path = %path, "Incoming request");

    let has_body = req.method() != Method::GET && req.method() != Method::HEAD;
    let is_json = request_header(req, "content-type").contains("application/json");
    let mut parsed: Option<Value> = if has_body && is_json && !body.is_empty() {
        serde_json::from_slice(&body).ok()
    } else {
        None
    };

    let model = detect_model(path, parsed.as_ref(), &body);
    info!(model = %model, "Resolved model");
    let tracker = state.stats.start_request(&model);

    let mut body_changed = parsed.as_mut().map(normalize_roles).unwrap_or(false);

    let mut effective_path = path.to_string();
    let mut converted_body: Option<Bytes> = None;
    if path == CHAT_COMPLETIONS_PATH {
        let chat_request = parsed
            .as_ref()
            .and_then(|v| serde_json::from_value::<ChatCompletionRequest>(v.clone()).ok());
        if let Some(chat_request) = chat_request {
            if is_claude_model(&model) {
                info!(model = %model, "Converting to Anthropic Messages API");
                converted_body = Some(to_json_bytes(&chat_to_anthropic(&chat_request, &model))?);
                effective_path = ANTHROPIC_MESSAGES_PATH.to_string();
            } else if should_use_responses_api(&model) {
                info!(model = %model, "Converting to Responses API");
                converted_body = Some(to_json_bytes(&chat_to_responses(&chat_request))?);
                effective_path = RESPONSES_PATH.to_string();
            }
        }
        if converted_body.is_none() && config.serverless_for(&model).is_none() {
            if let Some(value) = parsed.as_mut() {
                body_changed |= rewrite_max_tokens(value, &model);
            }
        }
    }

    let upstream_body = match (converted_body, parsed.as_ref()) {
        (Some(bytes), _) => Some(bytes),
        (None, Some(value)) if body_changed => Some(to_json_bytes(value)?),
        _ => None,
    };

    let incoming = incoming_headers(req);
    let target = build_upstream_target(&effective_path, query, &model, config);
    let mut auth = resolve_auth(&incoming, &model, config);
    apply_anthropic_bearer(&mut auth, &target);
    let headers = forward_headers(&incoming, &auth, &target, upstream_body.is_some());
    info!(upstream = %target.url, "Forwarding request");

    let upstream = send_upstream(
        state,
        req,
        &target.url,
        headers,
        upstream_body.unwrap_or(body),
        &tracker,
    )
    .await?;

    let ctx = ConversionContext {
        original_path: path.to_string(),
        upstream_url: target.url,
        model,
        api: target.api,
    };
    process_upstream_response(upstream, &ctx, tracker).await
}

async fn send_upstream(
    state: &AppState,
    req: &HttpRequest,
    url: &str,
    headers: HeaderMap,
    body: Bytes,
    tracker: &RequestTracker,
) -> Result<reqwest::Response, ProxyError> {
    let method = match reqwest::Method::from_bytes(req.method().as_str().as_bytes()) {
        Ok(m) => m,
        Err(e) => {
            tracker.finish(502, None);
            return Err(ProxyError::Internal(format!("unsupported method: {e}")));
        }
    };

    let mut builder = state.http.request(method.clone(), url).headers(headers);
    if method != reqwest::Method::GET && method != reqwest::Method::HEAD {
        builder = builder.body(body);
    }
    builder.send().await.map_err(|e| {
        error!(url = %url, error = %e, "Upstream request failed");
        tracker.finish(502, None);
        ProxyError::Upstream(e)
    })
}

/// Turn an upstream response into the client response, converting chat-bound
/// answers and finishing `tracker` exactly once.
pub async fn process_upstream_response(
    upstream: reqwest::Response,
    ctx: &ConversionContext,
    tracker: RequestTracker,
) -> Result<HttpResponse, ProxyError> {
    let status = upstream.status().as_u16();
    let is_sse = content_type(upstream.headers()).contains("text/event-stream");

    if ctx.converts() && is_sse && status < 400 {
        info!(api = ?ctx.api, model = %ctx.model, "Transcoding stream to chat chunks");
        let source = byte_stream(upstream);
        let body: ByteStream = match ctx.api {
            UpstreamApi::Anthropic => TranscodeStream::new(
                source,
                AnthropicTranscoder::new(ctx.model.clone()),
                tracker,
                status,
            )
            .boxed(),
            _ => TranscodeStream::new(
                source,
                ResponsesTranscoder::new(ctx.model.clone()),
                tracker,
                status,
            )
            .boxed(),
        };
        let mut builder = HttpResponse::build(status_code(status));
        builder.insert_header(("content-type", "text/event-stream"));
        apply_sse_headers(&mut builder);
        return Ok(builder.streaming(body));
    }

    if ctx.converts() && status == 200 {
        info!(api = ?ctx.api, model = %ctx.model, "Converting response to chat completion");
        let bytes = read_body(upstream, &tracker).await?;
        let response = match ctx.api {
            UpstreamApi::Anthropic => {
                convert_json::<MessagesResponse, _>(&bytes, status, &tracker, |r| {
                    anthropic_to_chat(r, &ctx.model)
                })
            }
            _ => convert_json::<ResponsesResponse, _>(&bytes, status, &tracker, responses_to_chat),
        };
        return Ok(response);
    }

    relay(upstream, tracker, &ctx.upstream_url).await
}

fn convert_json<T, F>(bytes: &[u8], status: u16, tracker: &RequestTracker, convert: F) -> HttpResponse
where
    T: DeserializeOwned + Default,
    F: FnOnce(&T) -> ChatCompletionResponse,
{
    match UpstreamPayload::<T>::decode(bytes) {
        UpstreamPayload::Error(err) => {
            warn!(status, "Upstream returned an error document; passing through");
            tracker.finish(status, None);
            HttpResponse::build(status_code(status)).json(err)
        }
        UpstreamPayload::Success(payload) => {
            let chat = convert(&payload);
            tracker.finish(
                status,
                Some(TokenUsage {
                    input: chat.usage.prompt_tokens,
                    output: chat.usage.completion_tokens,
                }),
            );
            HttpResponse::Ok().json(chat)
        }
    }
}

/// Forward an upstream response unchanged apart from framing headers.
async fn relay(
    upstream: reqwest::Response,
    tracker: RequestTracker,
    url: &str,
) -> Result<HttpResponse, ProxyError> {
    let status = upstream.status().as_u16();
    let upstream_type = content_type(upstream.headers()).to_string();
    let mut builder = HttpResponse::build(status_code(status));
    for (name, value) in upstream.headers() {
        if RESPONSE_SKIP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        builder.append_header((name.as_str(), value.as_bytes()));
    }

    if status >= 400 {
        let body = read_body(upstream, &tracker).await?;
        error!(
            status,
            url = %url,
            body = %String::from_utf8_lossy(&body),
            "Upstream API error"
        );
        tracker.finish(status, None);
        return Ok(builder.body(body));
    }

    if upstream_type.contains("text/event-stream") {
        apply_sse_headers(&mut builder);
        return Ok(builder.streaming(TrackedStream::new(byte_stream(upstream), tracker, status)));
    }

    if upstream_type.contains("application/json") {
        let body = read_body(upstream, &tracker).await?;
        tracker.finish(status, usage_from_json(&body));
        return Ok(builder.body(body));
    }

    Ok(builder.streaming(TrackedStream::new(byte_stream(upstream), tracker, status)))
}

fn content_type(headers: &HeaderMap) -> &str {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY)
}

fn apply_sse_headers(builder: &mut HttpResponseBuilder) {
    builder
        .insert_header(("cache-control", "no-cache"))
        .insert_header(("connection", "keep-alive"))
        .insert_header(("x-accel-buffering", "no"));
}

fn byte_stream(upstream: reqwest::Response) -> ByteStream {
    upstream
        .bytes_stream()
        .map_err(std::io::Error::other)
        .boxed()
}

async fn read_body(upstream: reqwest::Response, tracker: &RequestTracker) -> Result<Bytes, ProxyError> {
    upstream.bytes().await.map_err(|e| {
        error!(error = %e, "Failed to read upstream body");
        tracker.finish(502, None);
        ProxyError::Upstream(e)
    })
}

/// Token usage from a chat (`prompt_tokens`) or Responses-style (`input_tokens`) `usage` object.
fn usage_from_json(body: &[u8]) -> Option<TokenUsage> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let usage = value.get("usage")?.as_object()?;
    let count = |keys: [&str; 2]| {
        keys.iter()
            .find_map(|k| usage.get(*k).and_then(Value::as_u64))
            .unwrap_or(0)
    };
    Some(TokenUsage {
        input: count(["prompt_tokens", "input_tokens"]),
        output: count(["completion_tokens", "output_tokens"]),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<Value>,
}

/// Key for the models listing: `api-key` query param, `api-key` header,
/// `Authorization` (bearer prefix stripped), then the configured key.
fn models_api_key(req: &HttpRequest, config: &Config) -> String {
    let from_query = url::form_urlencoded::parse(req.query_string().as_bytes())
        .find(|(k, _)| k == "api-key")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty());
    if let Some(key) = from_query {
        return key;
    }
    let header = request_header(req, "api-key");
    if !header.is_empty() {
        return header.to_string();
    }
    let auth = request_header(req, "authorization");
    if !auth.is_empty() {
        return auth.replacen("Bearer ", "", 1);
    }
    config.api_key.clone()
}

async fn list_models(req: &HttpRequest, state: &AppState) -> HttpResponse {
    let config = &state.config;
    let url = format!(
        "{}/openai/models?api-version={}",
        config.azure_endpoint.trim_end_matches('/'),
        config.models_api_version
    );
    debug!(url = %url, "Fetching model list");

    let mut data = match state
        .http
        .get(&url)
        .header("api-key", models_api_key(req, config))
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => match resp.json::<ModelList>().await {
            Ok(list) => list.data,
            Err(e) => {
                error!("Failed to decode model list: {}", e);
                Vec::new()
            }
        },
        Ok(resp) => {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!("Failed to fetch models: {} {}", status, body);
            Vec::new()
        }
        Err(e) => {
            error!("Error fetching models: {}", e);
            Vec::new()
        }
    };

    let mut serverless: Vec<&String> = config.serverless_deployments.keys().collect();
    serverless.sort_unstable();
    data.extend(serverless.into_iter().map(|name| {
        json!({
            "id": name,
            "object": "model",
            "capabilities": {
                "completion": true,
                "chat_completion": true,
                "inference": true
            },
            "lifecycle_status": "active",
            "status": "ready"
        })
    }));

    HttpResponse::Ok().json(json!({ "object": "list", "data": data }))
}

async fn openai_passthrough(
    req: &HttpRequest,
    body: Bytes,
    state: &AppState,
) -> Result<HttpResponse, ProxyError> {
    let path = req.path();
    let mut url = format!(
        "{}{}",
        state.config.openai_endpoint.trim_end_matches('/'),
        path
    );
    if !req.query_string().is_empty() {
        url.push('?');
        url.push_str(req.query_string());
    }
    info!(path = %path, target = %url, "Proxying [OpenAI]");

    let mut headers = incoming_headers(req);
    strip_hop_headers(&mut headers);
    headers.remove("api-key");
    let bare_auth = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && !v.starts_with("Bearer "))
        .map(str::to_string);
    if let Some(auth) = bare_auth {
        match HeaderValue::from_str(&format!("Bearer {auth}")) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => warn!("Dropping unparseable authorization header"),
        }
    }
    headers.insert(USER_AGENT, HeaderValue::from_static("Azure-OAI-Proxy/1.0"));

    let tracker = state.stats.start_request(&model_from_body(&body));
    let upstream = send_upstream(state, req, &url, headers, body, &tracker).await?;
    relay(upstream, tracker, &url).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn azure_router_covers_proxy_routes() {
        let router = build_router(&Config::default()).unwrap();
        let handler = |m: &str, p: &str| router.match_route(m, p).map(|r| r.handler);

        assert_eq!(handler("GET", "/healthz"), Some(Endpoint::Health));
        assert_eq!(handler("GET", "/stats"), Some(Endpoint::Stats));
        assert_eq!(handler("GET", "/v1/models"), Some(Endpoint::Models));
        assert_eq!(
            handler("GET", "/v1/models/gpt-4o/capabilities"),
            Some(Endpoint::Azure)
        );
        assert_eq!(handler("DELETE", "/v1/files/file-1"), Some(Endpoint::Azure));
        assert_eq!(
            handler("GET", "/v1/responses/resp_1/input_items"),
            Some(Endpoint::Azure)
        );
        assert_eq!(handler("GET", "/v1/chat/completions"), None);
        assert_eq!(handler("POST", "/v1/unknown"), None);
    }

    #[test]
    fn openai_router_falls_back_for_everything() {
        let config = Config {
            proxy_mode: ProxyMode::OpenAi,
            ..Config::default()
        };
        let router = build_router(&config).unwrap();
        assert_eq!(
            router.match_route("GET", "/healthz").map(|r| r.handler),
            Some(Endpoint::Health)
        );
        assert_eq!(
            router.match_route("GET", "/v1/models").map(|r| r.handler),
            Some(Endpoint::OpenAi)
        );
    }

    #[test]
    fn model_detection_order() {
        let body = json!({ "model": "o3" });
        assert_eq!(detect_model("/v1/responses", Some(&body), b""), "o3");
        assert_eq!(
            detect_model("/deployments/dep-1/chat/completions", Some(&body), b""),
            "dep-1"
        );
        assert_eq!(detect_model("/v1/chat/completions", Some(&body), b""), "o3");
        // Unparsed bodies (e.g. a missing content-type) still get scanned.
        assert_eq!(
            detect_model("/v1/embeddings", None, br#"{"model":"text-embedding-3-small"}"#),
            "text-embedding-3-small"
        );
        assert_eq!(detect_model("/v1/files", None, b"not json"), "");
    }

    #[test]
    fn usage_is_read_from_either_vocabulary() {
        let chat = br#"{"usage":{"prompt_tokens":7,"completion_tokens":3,"total_tokens":10}}"#;
        assert_eq!(
            usage_from_json(chat),
            Some(TokenUsage {
                input: 7,
                output: 3
            })
        );
        let responses = br#"{"usage":{"input_tokens":2,"output_tokens":5}}"#;
        assert_eq!(
            usage_from_json(responses),
            Some(TokenUsage {
                input: 2,
                output: 5
            })
        );
        assert_eq!(usage_from_json(br#"{"data":[]}"#), None);
        assert_eq!(usage_from_json(b"binary"), None);
    }

    #[test]
    fn only_rewritten_chat_requests_convert() {
        let ctx = |path: &str, api| ConversionContext {
            original_path: path.into(),
            upstream_url: String::new(),
            model: "m".into(),
            api,
        };
        assert!(ctx(CHAT_COMPLETIONS_PATH, UpstreamApi::Anthropic).converts());
        assert!(ctx(CHAT_COMPLETIONS_PATH, UpstreamApi::Responses).converts());
        assert!(!ctx(CHAT_COMPLETIONS_PATH, UpstreamApi::OpenAi).converts());
        assert!(!ctx(RESPONSES_PATH, UpstreamApi::Responses).converts());
    }

    #[actix_web::test]
    async fn serverless_responses_stream_is_returned_as_chat_chunks() {
        let mut config = Config::default();
        config.serverless_deployments.insert(
            "o3-mini".into(),
            crate::config::ServerlessDeployment {
                name: "reasoner".into(),
                region: "eastus".into(),
                key: "sl-key".into(),
            },
        );
        let target = build_upstream_target(RESPONSES_PATH, "", "o3-mini", &config);
        let ctx = ConversionContext {
            original_path: CHAT_COMPLETIONS_PATH.into(),
            upstream_url: target.url,
            model: "o3-mini".into(),
            api: target.api,
        };
        assert!(ctx.converts());

        let upstream = http::Response::builder()
            .status(200)
            .header("content-type", "text/event-stream")
            .body(concat!(
                "event: response.output_text.delta\n",
                "data: {\"type\":\"response.output_text.delta\",\"delta\":\"hi\"}\n\n",
                "event: response.completed\n",
                "data: {\"type\":\"response.completed\",\"response\":{}}\n\n",
            ))
            .unwrap();
        let stats = crate::stats::StatsCollector::new();
        let tracker = stats.start_request("o3-mini");
        let resp = process_upstream_response(reqwest::Response::from(upstream), &ctx, tracker)
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("\"object\":\"chat.completion.chunk\""), "{text}");
        assert!(text.contains("\"content\":\"hi\""), "{text}");
        assert!(!text.contains("response.output_text.delta"), "{text}");
        assert!(text.ends_with("data: [DONE]\n\n"));
        assert_eq!(stats.snapshot().active_requests, 0);
    }
}
