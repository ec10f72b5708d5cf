use rmcp::model::ErrorData;

#[derive(Debug, thiserror::Error)]
pub enum McpGithubError {
    #[error("GitHub API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("GitHub authentication failed (401): {0}")]
    Unauthenticated(String),

    #[error("GitHub rate limit exceeded ({status}): {message}")]
    RateLimited { status: u16, message: String },

    #[error("Not found (404): {0}")]
    NotFound(String),

    #[error("Missing required parameter: {0}")]
    MissingParam(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("HTTP transport error: {0}")]
    Transport(String),

    #[error("Unexpected response from GitHub: {0}")]
    Decode(String),

    #[error("GitHub GraphQL error: {0}")]
    GraphQl(String),

    #[error("IP lookup failed: {0}")]
    IpLookup(String),
}

impl McpGithubError {
    /// Classify a non-2xx response by status code and GitHub's message.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => McpGithubError::Unauthenticated(message),
            404 => McpGithubError::NotFound(message),
            429 => McpGithubError::RateLimited { status, message },
            403 if message.to_lowercase().contains("rate limit") => {
                McpGithubError::RateLimited { status, message }
            }
            _ => McpGithubError::Api { status, message },
        }
    }

    /// HTTP status of the failed remote call, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            McpGithubError::Api { status, .. } | McpGithubError::RateLimited { status, .. } => {
                Some(*status)
            }
            McpGithubError::Unauthenticated(_) => Some(401),
            McpGithubError::NotFound(_) => Some(404),
            _ => None,
        }
    }

    /// Error class used for the `error_type` metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            McpGithubError::Unauthenticated(_) => "authentication_error",
            McpGithubError::NotFound(_) => "not_found_error",
            McpGithubError::RateLimited { .. } => "rate_limit_error",
            McpGithubError::Api { status: 403, .. } => "permission_error",
            McpGithubError::Api { .. }
            | McpGithubError::Decode(_)
            | McpGithubError::GraphQl(_) => "unknown_error",
            McpGithubError::MissingParam(_) | McpGithubError::InvalidParam(_) => {
                "validation_error"
            }
            McpGithubError::Transport(msg) | McpGithubError::IpLookup(msg) => {
                if msg.to_lowercase().contains("timed out") {
                    "timeout_error"
                } else {
                    "network_error"
                }
            }
        }
    }

    pub fn to_mcp_error(&self) -> ErrorData {
        match self {
            McpGithubError::MissingParam(_)
            | McpGithubError::InvalidParam(_)
            | McpGithubError::NotFound(_) => ErrorData::invalid_params(self.to_string(), None),
            _ => ErrorData::internal_error(
                self.to_string(),
                Some(serde_json::json!({
                    "status": self.status(),
                    "kind": self.kind(),
                })),
            ),
        }
    }
}

impl From<octocrab::Error> for McpGithubError {
    fn from(err: octocrab::Error) -> Self {
        match err {
            octocrab::Error::GitHub { source, .. } => {
                McpGithubError::from_status(source.status_code.as_u16(), source.message.clone())
            }
            octocrab::Error::Serde { source, .. } => McpGithubError::Decode(source.to_string()),
            octocrab::Error::Json { source, .. } => McpGithubError::Decode(source.to_string()),
            other => McpGithubError::Transport(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for McpGithubError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return McpGithubError::Decode(err.to_string());
        }
        match err.status() {
            Some(status) => McpGithubError::from_status(status.as_u16(), err.to_string()),
            None => McpGithubError::Transport(err.to_string()),
        }
    }
}
