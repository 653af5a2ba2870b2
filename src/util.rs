use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::router::{Router, RouterError};
use crate::server::{build_router, Endpoint};
use crate::stats::StatsCollector;

/// Load a dotenv file, then initialize structured tracing based on RUST_LOG.
///
/// Lookup order:
/// - explicit paths in ENV_FILE, ENVFILE, DOTENV_PATH
/// - `.envfile`, then `.env` in the working directory
/// - `.env` in the executable's directory or any parent
///
/// Variables already present in the process environment are never overwritten.
pub fn init_tracing() {
    let env_source = load_env_file().unwrap_or_else(|| "none".into());

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,actix_server=warn".into());
    let subscriber = fmt().with_env_filter(EnvFilter::new(filter)).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    tracing::info!("Environment loaded from: {}", env_source);
}

fn load_env_file() -> Option<String> {
    for key in ["ENV_FILE", "ENVFILE", "DOTENV_PATH"] {
        if let Ok(p) = std::env::var(key) {
            let p = p.trim();
            if !p.is_empty() && Path::new(p).is_file() && dotenvy::from_filename(p).is_ok() {
                return Some(format!("{p} ({key})"));
            }
        }
    }

    if Path::new(".envfile").is_file() && dotenvy::from_filename(".envfile").is_ok() {
        return Some(".envfile".into());
    }
    if let Ok(path) = dotenvy::dotenv() {
        return Some(path.display().to_string());
    }

    let exe = std::env::current_exe().ok()?;
    exe.ancestors().skip(1).find_map(|dir| {
        let candidate = dir.join(".env");
        (candidate.is_file() && dotenvy::from_filename(&candidate).is_ok())
            .then(|| candidate.display().to_string())
    })
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Build the upstream HTTP client honoring proxy environment variables.
///
/// Environment:
/// - AZURE_OPENAI_PROXY_NO_PROXY = 1|true|yes|on  -> disable all outbound proxies
/// - AZURE_OPENAI_PROXY_OUTBOUND_URL = <url>      -> proxy for all schemes
/// - HTTP_PROXY / http_proxy, HTTPS_PROXY / https_proxy
/// - AZURE_OPENAI_PROXY_CONNECT_TIMEOUT_SECONDS   -> connect timeout (u64)
///
/// There is deliberately no overall request timeout: streams may run for minutes.
pub fn build_http_client_from_env() -> reqwest::Client {
    let mut builder = reqwest::Client::builder();

    if let Ok(secs) = std::env::var("AZURE_OPENAI_PROXY_CONNECT_TIMEOUT_SECONDS") {
        if let Ok(n) = secs.trim().parse::<u64>() {
            builder = builder.connect_timeout(std::time::Duration::from_secs(n));
        }
    }

    if env_flag("AZURE_OPENAI_PROXY_NO_PROXY") {
        builder = builder.no_proxy();
    } else {
        let configured = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| std::env::var(k).ok())
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };
        if let Some(url) = configured(&["AZURE_OPENAI_PROXY_OUTBOUND_URL"]) {
            match reqwest::Proxy::all(&url) {
                Ok(p) => builder = builder.proxy(p),
                Err(e) => tracing::warn!("Ignoring invalid outbound proxy {}: {}", url, e),
            }
        }
        if let Some(url) = configured(&["HTTP_PROXY", "http_proxy"]) {
            if let Ok(p) = reqwest::Proxy::http(&url) {
                builder = builder.proxy(p);
            }
        }
        if let Some(url) = configured(&["HTTPS_PROXY", "https_proxy"]) {
            if let Ok(p) = reqwest::Proxy::https(&url) {
                builder = builder.proxy(p);
            }
        }
    }

    builder = builder.user_agent(format!("azure-oai-proxy/{}", env!("CARGO_PKG_VERSION")));

    builder.build().unwrap_or_else(|e| {
        tracing::warn!("Falling back to default HTTP client: {}", e);
        reqwest::Client::new()
    })
}

/// Shared application state used by the HTTP server and handlers.
#[derive(Clone)]
pub struct AppState {
    pub http: reqwest::Client,
    pub config: Arc<Config>,
    /// Routes for the configured proxy mode.
    pub router: Arc<Router<Endpoint>>,
    pub stats: StatsCollector,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, RouterError> {
        Self::with_client(config, build_http_client_from_env())
    }

    pub fn with_client(config: Config, http: reqwest::Client) -> Result<Self, RouterError> {
        let router = build_router(&config)?;
        Ok(Self {
            http,
            config: Arc::new(config),
            router: Arc::new(router),
            stats: StatsCollector::new(),
        })
    }
}
