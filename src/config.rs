//! Command-line and environment configuration, validated into [`Config`] at startup.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_IPV4_API_URL: &str = "https://ipinfo.io/json";
pub const DEFAULT_IPV6_API_URL: &str = "https://v6.ipinfo.io/json";

/// MCP server for GitHub. Analyse pull requests, manage issues, tags, and releases
#[derive(Debug, Parser)]
#[command(name = "mcp-github-pr-issue-analyser", version, about)]
pub struct Cli {
    /// GitHub personal access token.
    /// Can also be set via GITHUB_TOKEN environment variable.
    #[arg(long)]
    pub token: Option<String>,

    /// Read GitHub token from an environment variable.
    /// Default: GITHUB_TOKEN
    #[arg(long = "token-env")]
    pub token_env: Option<String>,

    /// Default repository owner/org when a tool call omits repo_owner
    #[arg(long, env = "GITHUB_OWNER")]
    pub owner: Option<String>,

    /// GitHub REST API base URL
    #[arg(long = "api-url", env = "GITHUB_API_URL", default_value = DEFAULT_GITHUB_API_URL)]
    pub api_url: String,

    /// Timeout in seconds for every outbound HTTP request
    #[arg(long, env = "GITHUB_API_TIMEOUT", default_value = "5")]
    pub timeout: u64,

    /// Serve MCP over streamable HTTP and expose Prometheus metrics
    #[arg(
        long = "enable-remote",
        env = "MCP_ENABLE_REMOTE",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub enable_remote: bool,

    /// Bind host for the remote transport
    #[arg(long, env = "MCP_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Bind port for the remote transport
    #[arg(long, env = "MCP_PORT", default_value = "8000")]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint (remote mode only)
    #[arg(long = "metrics-port", env = "METRICS_PORT", default_value = "9090")]
    pub metrics_port: u16,

    /// IP-info endpoint queried for the public IPv4 address
    #[arg(long = "ipv4-api-url", env = "IPV4_API_URL", default_value = DEFAULT_IPV4_API_URL)]
    pub ipv4_api_url: String,

    /// IP-info endpoint queried over IPv6 for the public IPv6 address
    #[arg(long = "ipv6-api-url", env = "IPV6_API_URL", default_value = DEFAULT_IPV6_API_URL)]
    pub ipv6_api_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing GitHub token: set GITHUB_TOKEN (or pass --token / --token-env)")]
    MissingToken,

    #[error("Invalid URL for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("Invalid bind address {0}")]
    InvalidBind(String),

    #[error("Timeout must be at least one second")]
    ZeroTimeout,
}

/// Remote transport settings; present only when remote mode is enabled.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub bind: SocketAddr,
    pub metrics_port: u16,
}

#[derive(Clone)]
pub struct Config {
    pub github_token: String,
    pub github_api_url: String,
    pub default_owner: Option<String>,
    pub timeout: Duration,
    pub ipv4_api_url: String,
    pub ipv6_api_url: String,
    pub remote: Option<RemoteConfig>,
}

// The token stays out of logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("github_token", &"<redacted>")
            .field("github_api_url", &self.github_api_url)
            .field("default_owner", &self.default_owner)
            .field("timeout", &self.timeout)
            .field("ipv4_api_url", &self.ipv4_api_url)
            .field("ipv6_api_url", &self.ipv6_api_url)
            .field("remote", &self.remote)
            .finish()
    }
}

impl Config {
    /// Resolve and validate the parsed command line.
    ///
    /// Token precedence: `--token` > `--token-env` > `GITHUB_TOKEN`.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let github_token = match cli.token.filter(|t| !t.trim().is_empty()) {
            Some(t) => t,
            None => {
                let env_name = cli.token_env.as_deref().unwrap_or("GITHUB_TOKEN");
                match std::env::var(env_name) {
                    Ok(t) if !t.trim().is_empty() => {
                        tracing::info!(env = env_name, "Read GitHub token from environment variable");
                        t
                    }
                    _ => return Err(ConfigError::MissingToken),
                }
            }
        };

        let github_api_url = validate_url("api-url", &cli.api_url)?;
        let ipv4_api_url = validate_url("ipv4-api-url", &cli.ipv4_api_url)?;
        let ipv6_api_url = validate_url("ipv6-api-url", &cli.ipv6_api_url)?;

        if cli.timeout == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        let remote = if cli.enable_remote {
            let addr = format!("{}:{}", cli.host, cli.port);
            let bind = addr
                .parse::<SocketAddr>()
                .map_err(|_| ConfigError::InvalidBind(addr))?;
            Some(RemoteConfig {
                bind,
                metrics_port: cli.metrics_port,
            })
        } else {
            None
        };

        Ok(Self {
            github_token,
            github_api_url,
            default_owner: cli.owner.filter(|o| !o.is_empty()),
            timeout: Duration::from_secs(cli.timeout),
            ipv4_api_url,
            ipv6_api_url,
            remote,
        })
    }
}

fn validate_url(field: &'static str, value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://"))
        || trimmed.len() <= "https://".len()
    {
        return Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        });
    }
    Ok(trimmed.to_string())
}
