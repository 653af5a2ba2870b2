//! Proxy configuration.
//!
//! Everything is read once from the environment at startup (after the dotenv
//! pass in [`crate::util::init_tracing`]) and is immutable afterwards; request
//! handlers only ever see it behind an `Arc`.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::resolver::DEFAULT_MODEL_MAPPER;

/// Default request body cap (100 MiB); audio and file uploads flow through here.
pub const DEFAULT_MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyMode {
    /// Translate OpenAI-style paths onto Azure OpenAI / Foundry upstreams.
    #[default]
    Azure,
    /// Forward everything verbatim to an OpenAI-compatible endpoint.
    OpenAi,
}

impl FromStr for ProxyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "azure" => Ok(ProxyMode::Azure),
            "openai" => Ok(ProxyMode::OpenAi),
            other => Err(ConfigError::InvalidProxyMode(other.to_string())),
        }
    }
}

/// A model served from its own Azure AI serverless host instead of the shared endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerlessDeployment {
    pub name: String,
    pub region: String,
    pub key: String,
}

impl ServerlessDeployment {
    pub fn base_url(&self) -> String {
        format!("https://{}.{}.models.ai.azure.com", self.name, self.region)
    }
}

/// Per-model endpoint override. Parsed and reported, not consulted for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointOverride {
    pub endpoint: String,
    pub key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub azure_endpoint: String,
    pub api_version: String,
    pub models_api_version: String,
    pub responses_api_version: String,
    pub anthropic_api_version: String,
    pub address: String,
    pub proxy_mode: ProxyMode,
    pub openai_endpoint: String,
    /// Lowercased public model name → Azure deployment name.
    pub model_mapper: HashMap<String, String>,
    /// Keyed by lowercased model name.
    pub serverless_deployments: HashMap<String, ServerlessDeployment>,
    /// Keyed by lowercased model name.
    pub endpoint_map: HashMap<String, EndpointOverride>,
    pub api_key: String,
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            azure_endpoint: String::new(),
            api_version: "2024-08-01-preview".into(),
            models_api_version: "2024-10-21".into(),
            responses_api_version: "2024-08-01-preview".into(),
            anthropic_api_version: "2023-06-01".into(),
            address: "0.0.0.0:11437".into(),
            proxy_mode: ProxyMode::Azure,
            openai_endpoint: "https://api.openai.com".into(),
            model_mapper: default_model_mapper(),
            serverless_deployments: HashMap::new(),
            endpoint_map: HashMap::new(),
            api_key: String::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_mode(None)
    }

    /// Like [`Config::from_env`], but an explicit `mode` replaces
    /// `AZURE_OPENAI_PROXY_MODE` without that variable being parsed.
    pub fn from_env_with_mode(mode: Option<ProxyMode>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let mut model_mapper = defaults.model_mapper;
        if let Ok(raw) = std::env::var("AZURE_OPENAI_MODEL_MAPPER") {
            // User mappings win over the built-in table.
            model_mapper.extend(parse_model_mapper(&raw));
        }

        let proxy_mode =
            resolve_proxy_mode(mode, std::env::var("AZURE_OPENAI_PROXY_MODE").ok().as_deref())?;

        let serverless_deployments = std::env::var("AZURE_AI_STUDIO_DEPLOYMENTS")
            .map(|raw| {
                parse_serverless_deployments(&raw, |model| {
                    std::env::var(format!("AZURE_OPENAI_KEY_{}", model.to_uppercase())).ok()
                })
            })
            .unwrap_or_default();

        let endpoint_map = std::env::var("AZURE_OPENAI_ENDPOINT_MAP")
            .map(|raw| parse_endpoint_map(&raw))
            .unwrap_or_default();

        let max_body_bytes = std::env::var("AZURE_OPENAI_PROXY_MAX_BODY_BYTES")
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_BODY_BYTES);

        Ok(Self {
            azure_endpoint: env_or("AZURE_OPENAI_ENDPOINT", &defaults.azure_endpoint),
            api_version: env_or("AZURE_OPENAI_APIVERSION", &defaults.api_version),
            models_api_version: env_or(
                "AZURE_OPENAI_MODELS_APIVERSION",
                &defaults.models_api_version,
            ),
            responses_api_version: env_or(
                "AZURE_OPENAI_RESPONSES_APIVERSION",
                &defaults.responses_api_version,
            ),
            anthropic_api_version: env_or("ANTHROPIC_APIVERSION", &defaults.anthropic_api_version),
            address: env_or("AZURE_OPENAI_PROXY_ADDRESS", &defaults.address),
            proxy_mode,
            openai_endpoint: env_or("OPENAI_API_ENDPOINT", &defaults.openai_endpoint),
            model_mapper,
            serverless_deployments,
            endpoint_map,
            api_key: env_or("AZURE_OPENAI_API_KEY", ""),
            max_body_bytes,
        })
    }

    pub fn serverless_for(&self, model: &str) -> Option<&ServerlessDeployment> {
        self.serverless_deployments.get(&model.to_lowercase())
    }

    /// Log the effective configuration. Keys are never printed.
    pub fn log_summary(&self) {
        let mut serverless: Vec<&str> = self
            .serverless_deployments
            .keys()
            .map(String::as_str)
            .collect();
        serverless.sort_unstable();

        tracing::info!(
            mode = ?self.proxy_mode,
            endpoint = %self.azure_endpoint,
            api_version = %self.api_version,
            models_api_version = %self.models_api_version,
            responses_api_version = %self.responses_api_version,
            anthropic_api_version = %self.anthropic_api_version,
            "Loaded proxy configuration"
        );
        tracing::info!("Serverless deployments: {:?}", serverless);

        if !self.endpoint_map.is_empty() {
            let mut overrides: Vec<&str> = self.endpoint_map.keys().map(String::as_str).collect();
            overrides.sort_unstable();
            tracing::info!("Endpoint overrides: {:?}", overrides);
        }
    }
}

fn resolve_proxy_mode(
    explicit: Option<ProxyMode>,
    env: Option<&str>,
) -> Result<ProxyMode, ConfigError> {
    if let Some(mode) = explicit {
        return Ok(mode);
    }
    match env {
        Some(raw) if !raw.trim().is_empty() => raw.parse(),
        _ => Ok(ProxyMode::Azure),
    }
}

pub fn default_model_mapper() -> HashMap<String, String> {
    DEFAULT_MODEL_MAPPER
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Parse `model=deployment,model=deployment`. Malformed pairs are skipped.
pub fn parse_model_mapper(raw: &str) -> HashMap<String, String> {
    let mut mapper = HashMap::new();
    for pair in raw.split(',') {
        let mut it = pair.split('=');
        let key = it.next().unwrap_or("").trim();
        let value = it.next().unwrap_or("").trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        mapper.insert(key.to_lowercase(), value.to_string());
    }
    mapper
}

/// Parse `model=name:region,...`; the key for each model comes from `key_for`
/// (the binary reads `AZURE_OPENAI_KEY_<MODEL>`).
pub fn parse_serverless_deployments<F>(
    raw: &str,
    key_for: F,
) -> HashMap<String, ServerlessDeployment>
where
    F: Fn(&str) -> Option<String>,
{
    let mut deployments = HashMap::new();
    for pair in raw.split(',') {
        let mut it = pair.split('=');
        let model = it.next().unwrap_or("").trim();
        let info = it.next().unwrap_or("").trim();
        if model.is_empty() || info.is_empty() {
            continue;
        }
        let mut parts = info.split(':');
        let name = parts.next().unwrap_or("").trim();
        let region = parts.next().unwrap_or("").trim();
        if name.is_empty() || region.is_empty() {
            continue;
        }
        deployments.insert(
            model.to_lowercase(),
            ServerlessDeployment {
                name: name.to_string(),
                region: region.to_string(),
                key: key_for(model).unwrap_or_default(),
            },
        );
    }
    deployments
}

/// Parse `model=endpoint` or `model=endpoint:key`.
///
/// The whole value is tried as a URL first so ports survive
/// (`https://host:8443/path`); otherwise it splits on the last colon.
pub fn parse_endpoint_map(raw: &str) -> HashMap<String, EndpointOverride> {
    let mut map = HashMap::new();
    for pair in raw.split(',') {
        let Some((model, rest)) = pair.split_once('=') else {
            continue;
        };
        let model = model.trim();
        let rest = rest.trim();
        if model.is_empty() || rest.is_empty() {
            continue;
        }

        let entry = if url::Url::parse(rest).is_ok() {
            EndpointOverride {
                endpoint: rest.to_string(),
                key: None,
            }
        } else if let Some((endpoint, key)) = rest.rsplit_once(':') {
            let key = key.trim();
            EndpointOverride {
                endpoint: endpoint.trim().to_string(),
                key: (!key.is_empty()).then(|| key.to_string()),
            }
        } else {
            EndpointOverride {
                endpoint: rest.to_string(),
                key: None,
            }
        };
        map.insert(model.to_lowercase(), entry);
    }
    map
}
