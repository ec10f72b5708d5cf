use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use mcp_github::config::{Cli, Config, RemoteConfig};
use mcp_github::github::GithubIntegration;
use mcp_github::ip::IpIntegration;
use mcp_github::metrics::{self, Metrics};
use mcp_github::server::McpGithubServer;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::StreamableHttpService;
use rmcp::{transport::stdio, ServiceExt};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_cli(cli)?;

    let github = GithubIntegration::new(
        &config.github_token,
        &config.github_api_url,
        config.timeout,
    )?;
    let ip = IpIntegration::new(
        config.ipv4_api_url.as_str(),
        config.ipv6_api_url.as_str(),
        config.timeout,
    )?;

    tracing::info!(
        owner = config.default_owner.as_deref().unwrap_or("none"),
        remote = config.remote.is_some(),
        "Starting mcp-github-pr-issue-analyser server"
    );

    let server = McpGithubServer::new(github, ip, config.default_owner.clone());

    match config.remote {
        Some(remote) => serve_remote(server, remote).await,
        None => {
            let running = server.serve(stdio()).await?;
            running.waiting().await?;
            Ok(())
        }
    }
}

/// Streamable HTTP transport at `/mcp`, with Prometheus metrics on a side port.
async fn serve_remote(server: McpGithubServer, remote: RemoteConfig) -> Result<()> {
    let metrics = Arc::new(Metrics::new());
    metrics::spawn_metrics_server(metrics.clone(), remote.metrics_port).await;

    let server = server.with_metrics(metrics);
    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );
    let app = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(remote.bind).await?;
    tracing::info!(addr = %remote.bind, "MCP streamable HTTP transport listening on /mcp");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
