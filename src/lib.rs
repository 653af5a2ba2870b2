#![forbid(unsafe_code)]
#![doc = r#"
Azure OAI Proxy

Serve OpenAI Chat Completions clients from Azure OpenAI deployments, Azure AI
serverless hosts, the Responses API and the Anthropic Messages API.

Crate highlights
- Library: pure request/response conversion (`conversion`), live SSE transcoding (`transcode`),
  and model/deployment/API-version resolution (`resolver`).
- HTTP server (in `server`): Azure mode with its OpenAI-shaped route table, or a
  verbatim OpenAI passthrough; both expose `/healthz` and `/stats`.

Modules
- `models`: Typed payloads for Chat, Responses and Anthropic Messages.
- `director`: Upstream URL, header and auth resolution per request.
- `stats`: Process-wide request statistics with a rolling latency window.
- `util`: Tracing/env bootstrap, HTTP client and shared app state.
"#]

pub mod config;
pub mod conversion;
pub mod director;
pub mod error;
pub mod models;
pub mod resolver;
pub mod router;
pub mod server;
pub mod sse;
pub mod stats;
pub mod transcode;
pub mod util;

pub use crate::config::{Config, ProxyMode};
pub use crate::conversion::{anthropic_to_chat, chat_to_anthropic, chat_to_responses, responses_to_chat};
pub use crate::error::{ConfigError, ProxyError};
pub use crate::stats::{StatsCollector, StatsSnapshot, TokenUsage};

// Re-export model namespaces for convenience (downstream users can do `use azure_oai_proxy::chat`).
pub use crate::models::{anthropic, chat, responses};
