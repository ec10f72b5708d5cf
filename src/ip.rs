//! Public IPv4/IPv6 lookup against an ipinfo-style JSON endpoint.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::McpGithubError;

/// IPv4 details from the service, plus the IPv6 address seen from an
/// IPv6-bound socket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IpInfo {
    pub ip: Ipv4Addr,
    pub ipv6: Ipv6Addr,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct IpPayload {
    #[serde(default)]
    ip: Option<String>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

pub struct IpIntegration {
    ipv4_url: String,
    ipv6_url: String,
    ipv4_client: reqwest::Client,
    ipv6_client: reqwest::Client,
}

impl IpIntegration {
    /// Each client binds to the unspecified address of its family, so a
    /// dual-stack endpoint is always reached over the intended protocol.
    pub fn new(
        ipv4_url: impl Into<String>,
        ipv6_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, McpGithubError> {
        Self::build(
            ipv4_url.into(),
            ipv6_url.into(),
            timeout,
            Some(IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
        )
    }

    fn build(
        ipv4_url: String,
        ipv6_url: String,
        timeout: Duration,
        ipv6_local: Option<IpAddr>,
    ) -> Result<Self, McpGithubError> {
        let client = |local: Option<IpAddr>| {
            reqwest::Client::builder()
                .user_agent(concat!("mcp-github-pr-issue-analyser/", env!("CARGO_PKG_VERSION")))
                .timeout(timeout)
                .local_address(local)
                .build()
                .map_err(|e| McpGithubError::Transport(format!("Failed to create HTTP client: {}", e)))
        };

        Ok(Self {
            ipv4_url,
            ipv6_url,
            ipv4_client: client(Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)))?,
            ipv6_client: client(ipv6_local)?,
        })
    }

    pub async fn get_ipv4_ipv6_info(&self) -> Result<IpInfo, McpGithubError> {
        tracing::info!("Fetching IPv4 and IPv6 information");

        let (v4, v6) = tokio::join!(
            fetch(&self.ipv4_client, &self.ipv4_url, "IPv4"),
            fetch(&self.ipv6_client, &self.ipv6_url, "IPv6"),
        );
        let v4 = v4?;
        let v6 = v6?;

        let ip = parse_addr::<Ipv4Addr>(v4.ip.as_deref(), "IPv4")?;
        let ipv6 = parse_addr::<Ipv6Addr>(v6.ip.as_deref(), "IPv6")?;

        Ok(IpInfo {
            ip,
            ipv6,
            details: v4.rest,
        })
    }
}

async fn fetch(client: &reqwest::Client, url: &str, family: &str) -> Result<IpPayload, McpGithubError> {
    let response = client
        .get(url)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| McpGithubError::IpLookup(format!("{} request to {} failed: {}", family, url, e)))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        return Err(McpGithubError::IpLookup(format!(
            "{} service returned {}: {}",
            family,
            status,
            message.trim()
        )));
    }

    response
        .json::<IpPayload>()
        .await
        .map_err(|e| McpGithubError::IpLookup(format!("{} response was not valid JSON: {}", family, e)))
}

fn parse_addr<T: std::str::FromStr>(raw: Option<&str>, family: &str) -> Result<T, McpGithubError> {
    let raw = raw.ok_or_else(|| {
        McpGithubError::IpLookup(format!("{} response did not contain an address", family))
    })?;
    raw.trim().parse::<T>().map_err(|_| {
        McpGithubError::IpLookup(format!("{} service returned malformed address '{}'", family, raw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    // MockServer listens on 127.0.0.1, so the IPv6 client must not bind to `::`.
    fn unpinned(server: &MockServer) -> IpIntegration {
        IpIntegration::build(
            server.url("/v4"),
            server.url("/v6"),
            Duration::from_secs(5),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_addr() {
        assert_eq!(
            parse_addr::<Ipv4Addr>(Some("203.0.113.7"), "IPv4").unwrap(),
            Ipv4Addr::new(203, 0, 113, 7)
        );
        assert!(parse_addr::<Ipv4Addr>(Some("2001:db8::1"), "IPv4").is_err());
        assert!(parse_addr::<Ipv6Addr>(None, "IPv6").is_err());
    }

    #[tokio::test]
    async fn test_ip_info_success() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v4");
                then.status(200).json_body(serde_json::json!({
                    "ip": "203.0.113.7",
                    "city": "London",
                    "country": "GB"
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v6");
                then.status(200)
                    .json_body(serde_json::json!({ "ip": "2001:db8::1" }));
            })
            .await;

        let info = unpinned(&server).get_ipv4_ipv6_info().await.unwrap();
        assert_eq!(info.ip, Ipv4Addr::new(203, 0, 113, 7));
        assert_eq!(info.ipv6, "2001:db8::1".parse::<Ipv6Addr>().unwrap());
        assert_eq!(info.details["city"], "London");

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["ip"], "203.0.113.7");
        assert_eq!(json["ipv6"], "2001:db8::1");
        assert_eq!(json["country"], "GB");
    }

    #[tokio::test]
    async fn test_ip_info_service_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v4");
                then.status(503).body("unavailable");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v6");
                then.status(200)
                    .json_body(serde_json::json!({ "ip": "2001:db8::1" }));
            })
            .await;

        let err = unpinned(&server).get_ipv4_ipv6_info().await.unwrap_err();
        assert!(matches!(err, McpGithubError::IpLookup(_)));
        assert!(err.to_string().contains("IPv4 service returned 503"));
    }

    #[tokio::test]
    async fn test_ip_info_malformed_ipv6() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v4");
                then.status(200)
                    .json_body(serde_json::json!({ "ip": "203.0.113.7" }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v6");
                then.status(200)
                    .json_body(serde_json::json!({ "ip": "203.0.113.7" }));
            })
            .await;

        let err = unpinned(&server).get_ipv4_ipv6_info().await.unwrap_err();
        assert!(err.to_string().contains("IPv6 service returned malformed address"));
    }
}
