use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;

use azure_oai_proxy::config::{Config, ProxyMode};
use azure_oai_proxy::server::config_routes;
use azure_oai_proxy::util::{init_tracing, AppState};

/// Azure OpenAI compatibility proxy.
#[derive(Debug, Parser)]
#[command(name = "azure-oai-proxy", version, about)]
struct Cli {
    /// Listen address (host:port).
    #[arg(long, env = "AZURE_OPENAI_PROXY_ADDRESS")]
    address: Option<String>,

    /// Proxy mode: `azure` or `openai`.
    #[arg(long, env = "AZURE_OPENAI_PROXY_MODE")]
    mode: Option<ProxyMode>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // The dotenv pass must run before clap reads env fallbacks and before config.
    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::from_env_with_mode(cli.mode).context("invalid configuration")?;
    if let Some(address) = cli.address {
        config.address = address;
    }
    config.log_summary();

    let address = config.address.clone();
    let max_body_bytes = config.max_body_bytes;
    let mode = config.proxy_mode;
    let state = web::Data::new(AppState::new(config).context("failed to build routes")?);

    tracing::info!("Azure OpenAI Proxy ({:?} mode) listening on {}", mode, address);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(max_body_bytes))
            .configure(config_routes)
    })
    .bind(&address)
    .with_context(|| format!("failed to bind {address}"))?
    .run()
    .await?;

    Ok(())
}
