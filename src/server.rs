use std::future::Future;
use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::{schemars, tool, tool_handler, tool_router, ServerHandler};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::McpGithubError;
use crate::github::{
    GithubIntegration, IssueState, IssueUpdate, MakeLatest, MergeMethod, ReleaseOptions,
    ReviewEvent, SearchFilter, SearchKind,
};
use crate::ip::IpIntegration;
use crate::metrics::Metrics;

pub const SERVER_NAME: &str = "mcp-github-pr-issue-analyser";

const DEFAULT_SEARCH_PER_PAGE: u32 = 50;

#[derive(Clone)]
pub struct McpGithubServer {
    github: Arc<GithubIntegration>,
    ip: Arc<IpIntegration>,
    metrics: Option<Arc<Metrics>>,
    default_owner: Option<String>,
    tool_router: ToolRouter<Self>,
}

// -- Tool parameter types --

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PrParams {
    #[schemars(description = "Repository owner (user or org). Defaults to --owner / GITHUB_OWNER")]
    #[serde(default)]
    pub repo_owner: Option<String>,

    #[schemars(description = "Repository name")]
    pub repo_name: String,

    #[schemars(description = "Pull request number")]
    pub pr_number: u64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct UpdatePrDescriptionParams {
    #[schemars(description = "Repository owner (user or org). Defaults to --owner / GITHUB_OWNER")]
    #[serde(default)]
    pub repo_owner: Option<String>,

    #[schemars(description = "Repository name")]
    pub repo_name: String,

    #[schemars(description = "Pull request number")]
    pub pr_number: u64,

    #[schemars(description = "New pull request title")]
    pub new_title: String,

    #[schemars(description = "New pull request description (markdown)")]
    pub new_description: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PrCommentParams {
    #[schemars(description = "Repository owner (user or org). Defaults to --owner / GITHUB_OWNER")]
    #[serde(default)]
    pub repo_owner: Option<String>,

    #[schemars(description = "Repository name")]
    pub repo_name: String,

    #[schemars(description = "Pull request number")]
    pub pr_number: u64,

    #[schemars(description = "Comment text (markdown)")]
    pub comment: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct InlineCommentParams {
    #[schemars(description = "Repository owner (user or org). Defaults to --owner / GITHUB_OWNER")]
    #[serde(default)]
    pub repo_owner: Option<String>,

    #[schemars(description = "Repository name")]
    pub repo_name: String,

    #[schemars(description = "Pull request number")]
    pub pr_number: u64,

    #[schemars(description = "File path relative to the repository root")]
    pub path: String,

    #[schemars(description = "Line number in the new version of the file")]
    pub line: u64,

    #[schemars(description = "Review comment text (markdown)")]
    pub comment_body: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CreateIssueParams {
    #[schemars(description = "Repository owner (user or org). Defaults to --owner / GITHUB_OWNER")]
    #[serde(default)]
    pub repo_owner: Option<String>,

    #[schemars(description = "Repository name")]
    pub repo_name: String,

    #[schemars(description = "Issue title")]
    pub title: String,

    #[schemars(description = "Issue body (markdown)")]
    #[serde(default)]
    pub body: String,

    #[schemars(description = "Labels to apply. The 'mcp' label is always added")]
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct UpdateIssueParams {
    #[schemars(description = "Repository owner (user or org). Defaults to --owner / GITHUB_OWNER")]
    #[serde(default)]
    pub repo_owner: Option<String>,

    #[schemars(description = "Repository name")]
    pub repo_name: String,

    #[schemars(description = "Issue number")]
    pub issue_number: u64,

    #[schemars(description = "New title (unchanged when omitted)")]
    #[serde(default)]
    pub title: Option<String>,

    #[schemars(description = "New body (unchanged when omitted)")]
    #[serde(default)]
    pub body: Option<String>,

    #[schemars(description = "Replacement label set (unchanged when omitted)")]
    #[serde(default)]
    pub labels: Option<Vec<String>>,

    #[schemars(description = "New state: open or closed (unchanged when omitted)")]
    #[serde(default)]
    pub state: Option<IssueState>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct AssigneesParams {
    #[schemars(description = "Repository owner (user or org). Defaults to --owner / GITHUB_OWNER")]
    #[serde(default)]
    pub repo_owner: Option<String>,

    #[schemars(description = "Repository name")]
    pub repo_name: String,

    #[schemars(description = "Issue or pull request number")]
    pub issue_number: u64,

    #[schemars(description = "GitHub logins to assign. An empty list clears all assignees")]
    #[serde(default)]
    pub assignees: Vec<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RepoParams {
    #[schemars(description = "Repository owner (user or org). Defaults to --owner / GITHUB_OWNER")]
    #[serde(default)]
    pub repo_owner: Option<String>,

    #[schemars(description = "Repository name")]
    pub repo_name: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CreateTagParams {
    #[schemars(description = "Repository owner (user or org). Defaults to --owner / GITHUB_OWNER")]
    #[serde(default)]
    pub repo_owner: Option<String>,

    #[schemars(description = "Repository name")]
    pub repo_name: String,

    #[schemars(description = "Tag name, e.g. v1.2.0")]
    pub tag_name: String,

    #[schemars(description = "Annotated tag message")]
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CreateReleaseParams {
    #[schemars(description = "Repository owner (user or org). Defaults to --owner / GITHUB_OWNER")]
    #[serde(default)]
    pub repo_owner: Option<String>,

    #[schemars(description = "Repository name")]
    pub repo_name: String,

    #[schemars(description = "Tag to release; created from the default branch if it does not exist")]
    pub tag_name: String,

    #[schemars(description = "Release title")]
    pub release_name: String,

    #[schemars(description = "Release notes (markdown)")]
    #[serde(default)]
    pub body: String,

    #[schemars(description = "Create as draft (default: false)")]
    #[serde(default)]
    pub draft: Option<bool>,

    #[schemars(description = "Mark as prerelease (default: false)")]
    #[serde(default)]
    pub prerelease: Option<bool>,

    #[schemars(description = "Append GitHub-generated release notes (default: true)")]
    #[serde(default)]
    pub generate_release_notes: Option<bool>,

    #[schemars(description = "Mark as latest release: true, false, or legacy (default: true)")]
    #[serde(default)]
    pub make_latest: Option<MakeLatest>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CreatePrParams {
    #[schemars(description = "Repository owner (user or org). Defaults to --owner / GITHUB_OWNER")]
    #[serde(default)]
    pub repo_owner: Option<String>,

    #[schemars(description = "Repository name")]
    pub repo_name: String,

    #[schemars(description = "Pull request title")]
    pub title: String,

    #[schemars(description = "Pull request description (markdown)")]
    #[serde(default)]
    pub body: String,

    #[schemars(description = "Branch containing the changes")]
    pub head: String,

    #[schemars(description = "Branch to merge into")]
    pub base: String,

    #[schemars(description = "Open as draft (default: false)")]
    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct MergePrParams {
    #[schemars(description = "Repository owner (user or org). Defaults to --owner / GITHUB_OWNER")]
    #[serde(default)]
    pub repo_owner: Option<String>,

    #[schemars(description = "Repository name")]
    pub repo_name: String,

    #[schemars(description = "Pull request number")]
    pub pr_number: u64,

    #[schemars(description = "Merge commit title")]
    #[serde(default)]
    pub commit_title: Option<String>,

    #[schemars(description = "Merge commit message")]
    #[serde(default)]
    pub commit_message: Option<String>,

    #[schemars(description = "merge, squash, or rebase (default: squash)")]
    #[serde(default)]
    pub merge_method: MergeMethod,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ReviewParams {
    #[schemars(description = "Repository owner (user or org). Defaults to --owner / GITHUB_OWNER")]
    #[serde(default)]
    pub repo_owner: Option<String>,

    #[schemars(description = "Repository name")]
    pub repo_name: String,

    #[schemars(description = "Pull request number")]
    pub pr_number: u64,

    #[schemars(description = "APPROVE, REQUEST_CHANGES, or COMMENT")]
    pub event: ReviewEvent,

    #[schemars(description = "Review text; required unless event is APPROVE")]
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct OpenItemsParams {
    #[schemars(description = "User or organization to search. Defaults to --owner / GITHUB_OWNER")]
    #[serde(default)]
    pub repo_owner: Option<String>,

    #[schemars(description = "pr or issue (default: pr)")]
    #[serde(default)]
    pub kind: SearchKind,

    #[schemars(description = "user, owner, or involves (default: involves)")]
    #[serde(default)]
    pub filtering: SearchFilter,

    #[schemars(description = "Results per page, 1-100 (default: 50)")]
    #[serde(default)]
    pub per_page: Option<u32>,

    #[schemars(description = "Page number, starting at 1 (default: 1)")]
    #[serde(default)]
    pub page: Option<u32>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct UserActivityParams {
    #[schemars(description = "Organization login. Defaults to --owner / GITHUB_OWNER")]
    #[serde(default)]
    pub org_name: Option<String>,

    #[schemars(description = "GitHub login whose activity is collected")]
    pub username: String,

    #[schemars(description = "Restrict to one repository of the organization")]
    #[serde(default)]
    pub repo_name: Option<String>,
}

/// Compact acknowledgement for write operations.
#[derive(Debug, Serialize)]
struct Ack {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

impl Ack {
    fn from_response(message: String, response: &Value) -> Self {
        let text = |key: &str| response.get(key).and_then(Value::as_str).map(String::from);
        Self {
            message,
            id: response.get("id").and_then(Value::as_u64),
            number: response.get("number").and_then(Value::as_u64),
            url: text("html_url"),
            sha: text("sha").or_else(|| {
                response
                    .pointer("/object/sha")
                    .and_then(Value::as_str)
                    .map(String::from)
            }),
        }
    }
}

impl McpGithubServer {
    pub fn new(
        github: GithubIntegration,
        ip: IpIntegration,
        default_owner: Option<String>,
    ) -> Self {
        Self {
            github: Arc::new(github),
            ip: Arc::new(ip),
            metrics: None,
            default_owner,
            tool_router: Self::tool_router(),
        }
    }

    /// Record every tool call in `metrics` (remote mode).
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn resolve_owner(&self, param: Option<&str>) -> Result<String, McpGithubError> {
        param
            .filter(|p| !p.is_empty())
            .map(String::from)
            .or_else(|| self.default_owner.clone())
            .ok_or_else(|| {
                McpGithubError::MissingParam(
                    "repo_owner is required (or set --owner / GITHUB_OWNER)".to_string(),
                )
            })
    }

    /// Run one tool body, turning its outcome into an MCP result and
    /// recording it when metrics are enabled.
    async fn instrument<F>(&self, tool: &'static str, call: F) -> Result<CallToolResult, ErrorData>
    where
        F: Future<Output = Result<String, McpGithubError>>,
    {
        let timer = self.metrics.as_ref().map(|m| m.start(tool));

        match call.await {
            Ok(text) => {
                if let Some(timer) = timer {
                    timer.success(text.len());
                }
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => {
                tracing::warn!(tool, kind = e.kind(), error = %e, "Tool call failed");
                if let Some(timer) = timer {
                    timer.failure(&e);
                }
                Err(e.to_mcp_error())
            }
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, McpGithubError> {
    serde_json::to_string_pretty(value).map_err(|e| McpGithubError::Decode(e.to_string()))
}

// -- MCP tool handlers --

#[tool_router]
impl McpGithubServer {
    #[tool(
        name = "get_github_pr_diff",
        description = "Fetch the unified diff of a pull request. Start a PR review with this, then call get_github_pr_content for the title and description"
    )]
    async fn get_github_pr_diff(
        &self,
        Parameters(params): Parameters<PrParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.instrument("get_github_pr_diff", async {
            let owner = self.resolve_owner(params.repo_owner.as_deref())?;
            self.github
                .get_pr_diff(&owner, &params.repo_name, params.pr_number)
                .await
        })
        .await
    }

    #[tool(
        name = "get_github_pr_content",
        description = "Get pull request title, description, author, state, and timestamps"
    )]
    async fn get_github_pr_content(
        &self,
        Parameters(params): Parameters<PrParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.instrument("get_github_pr_content", async {
            let owner = self.resolve_owner(params.repo_owner.as_deref())?;
            let pr = self
                .github
                .get_pr_content(&owner, &params.repo_name, params.pr_number)
                .await?;
            to_json(&pr)
        })
        .await
    }

    #[tool(
        name = "update_github_pr_description",
        description = "Replace a pull request's title and description"
    )]
    async fn update_github_pr_description(
        &self,
        Parameters(params): Parameters<UpdatePrDescriptionParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.instrument("update_github_pr_description", async {
            let owner = self.resolve_owner(params.repo_owner.as_deref())?;
            let response = self
                .github
                .update_pr_description(
                    &owner,
                    &params.repo_name,
                    params.pr_number,
                    &params.new_title,
                    &params.new_description,
                )
                .await?;
            to_json(&Ack::from_response(
                format!("Updated PR #{} description", params.pr_number),
                &response,
            ))
        })
        .await
    }

    #[tool(
        name = "add_github_pr_comment",
        description = "Add a general comment to a pull request conversation"
    )]
    async fn add_github_pr_comment(
        &self,
        Parameters(params): Parameters<PrCommentParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.instrument("add_github_pr_comment", async {
            let owner = self.resolve_owner(params.repo_owner.as_deref())?;
            let response = self
                .github
                .add_pr_comment(&owner, &params.repo_name, params.pr_number, &params.comment)
                .await?;
            to_json(&Ack::from_response(
                format!("Added comment to PR #{}", params.pr_number),
                &response,
            ))
        })
        .await
    }

    #[tool(
        name = "add_github_pr_inline_comment",
        description = "Add a review comment on a specific file and line of a pull request's latest commit"
    )]
    async fn add_github_pr_inline_comment(
        &self,
        Parameters(params): Parameters<InlineCommentParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.instrument("add_github_pr_inline_comment", async {
            let owner = self.resolve_owner(params.repo_owner.as_deref())?;
            let response = self
                .github
                .add_inline_pr_comment(
                    &owner,
                    &params.repo_name,
                    params.pr_number,
                    &params.path,
                    params.line,
                    &params.comment_body,
                )
                .await?;
            to_json(&Ack::from_response(
                format!(
                    "Added inline comment to PR #{} at {}:{}",
                    params.pr_number, params.path, params.line
                ),
                &response,
            ))
        })
        .await
    }

    #[tool(
        name = "create_github_issue",
        description = "Create an issue labelled 'mcp' plus any given labels. Link it to a PR afterwards with add_github_pr_comment ('Resolves #<number>')"
    )]
    async fn create_github_issue(
        &self,
        Parameters(params): Parameters<CreateIssueParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.instrument("create_github_issue", async {
            let owner = self.resolve_owner(params.repo_owner.as_deref())?;
            let response = self
                .github
                .create_issue(
                    &owner,
                    &params.repo_name,
                    &params.title,
                    &params.body,
                    &params.labels,
                )
                .await?;
            to_json(&Ack::from_response(
                format!("Created issue '{}'", params.title),
                &response,
            ))
        })
        .await
    }

    #[tool(
        name = "update_github_issue",
        description = "Update an issue's title, body, labels, or state. Only the fields given are changed"
    )]
    async fn update_github_issue(
        &self,
        Parameters(params): Parameters<UpdateIssueParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.instrument("update_github_issue", async {
            let owner = self.resolve_owner(params.repo_owner.as_deref())?;
            let update = IssueUpdate {
                title: params.title.clone(),
                body: params.body.clone(),
                labels: params.labels.clone(),
                state: params.state,
            };
            let response = self
                .github
                .update_issue(&owner, &params.repo_name, params.issue_number, &update)
                .await?;
            to_json(&Ack::from_response(
                format!("Updated issue #{}", params.issue_number),
                &response,
            ))
        })
        .await
    }

    #[tool(
        name = "update_github_assignees",
        description = "Replace the assignees of an issue or pull request"
    )]
    async fn update_github_assignees(
        &self,
        Parameters(params): Parameters<AssigneesParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.instrument("update_github_assignees", async {
            let owner = self.resolve_owner(params.repo_owner.as_deref())?;
            let response = self
                .github
                .update_assignees(
                    &owner,
                    &params.repo_name,
                    params.issue_number,
                    &params.assignees,
                )
                .await?;
            to_json(&Ack::from_response(
                format!(
                    "Set {} assignee(s) on #{}",
                    params.assignees.len(),
                    params.issue_number
                ),
                &response,
            ))
        })
        .await
    }

    #[tool(
        name = "get_github_latest_sha",
        description = "Get the SHA of the latest commit on the default branch"
    )]
    async fn get_github_latest_sha(
        &self,
        Parameters(params): Parameters<RepoParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.instrument("get_github_latest_sha", async {
            let owner = self.resolve_owner(params.repo_owner.as_deref())?;
            let sha = self.github.get_latest_sha(&owner, &params.repo_name).await?;
            to_json(&serde_json::json!({
                "repo": format!("{}/{}", owner, params.repo_name),
                "sha": sha,
            }))
        })
        .await
    }

    #[tool(
        name = "create_github_tag",
        description = "Create an annotated tag on the latest commit of the default branch"
    )]
    async fn create_github_tag(
        &self,
        Parameters(params): Parameters<CreateTagParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.instrument("create_github_tag", async {
            let owner = self.resolve_owner(params.repo_owner.as_deref())?;
            let response = self
                .github
                .create_tag(&owner, &params.repo_name, &params.tag_name, &params.message)
                .await?;
            to_json(&Ack::from_response(
                format!("Created tag {}", params.tag_name),
                &response,
            ))
        })
        .await
    }

    #[tool(
        name = "create_github_release",
        description = "Create a release for a tag, with GitHub-generated release notes by default"
    )]
    async fn create_github_release(
        &self,
        Parameters(params): Parameters<CreateReleaseParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.instrument("create_github_release", async {
            let owner = self.resolve_owner(params.repo_owner.as_deref())?;
            let defaults = ReleaseOptions::default();
            let options = ReleaseOptions {
                draft: params.draft.unwrap_or(defaults.draft),
                prerelease: params.prerelease.unwrap_or(defaults.prerelease),
                generate_release_notes: params
                    .generate_release_notes
                    .unwrap_or(defaults.generate_release_notes),
                make_latest: params.make_latest.unwrap_or(defaults.make_latest),
            };
            let response = self
                .github
                .create_release(
                    &owner,
                    &params.repo_name,
                    &params.tag_name,
                    &params.release_name,
                    &params.body,
                    options,
                )
                .await?;
            to_json(&Ack::from_response(
                format!("Created release '{}' for {}", params.release_name, params.tag_name),
                &response,
            ))
        })
        .await
    }

    #[tool(
        name = "create_github_pr",
        description = "Open a pull request from head into base"
    )]
    async fn create_github_pr(
        &self,
        Parameters(params): Parameters<CreatePrParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.instrument("create_github_pr", async {
            let owner = self.resolve_owner(params.repo_owner.as_deref())?;
            let pr = self
                .github
                .create_pr(
                    &owner,
                    &params.repo_name,
                    &params.title,
                    &params.body,
                    &params.head,
                    &params.base,
                    params.draft,
                )
                .await?;
            to_json(&pr)
        })
        .await
    }

    #[tool(
        name = "merge_github_pr",
        description = "Merge a pull request using merge, squash, or rebase"
    )]
    async fn merge_github_pr(
        &self,
        Parameters(params): Parameters<MergePrParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.instrument("merge_github_pr", async {
            let owner = self.resolve_owner(params.repo_owner.as_deref())?;
            let response = self
                .github
                .merge_pr(
                    &owner,
                    &params.repo_name,
                    params.pr_number,
                    params.commit_title.as_deref(),
                    params.commit_message.as_deref(),
                    params.merge_method,
                )
                .await?;
            to_json(&response)
        })
        .await
    }

    #[tool(
        name = "submit_github_pr_review",
        description = "Submit a pull request review: APPROVE, REQUEST_CHANGES, or COMMENT"
    )]
    async fn submit_github_pr_review(
        &self,
        Parameters(params): Parameters<ReviewParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.instrument("submit_github_pr_review", async {
            let owner = self.resolve_owner(params.repo_owner.as_deref())?;
            let response = self
                .github
                .submit_review(
                    &owner,
                    &params.repo_name,
                    params.pr_number,
                    params.event,
                    params.body.as_deref(),
                )
                .await?;
            to_json(&Ack::from_response(
                format!("Submitted review on PR #{}", params.pr_number),
                &response,
            ))
        })
        .await
    }

    #[tool(
        name = "list_github_open_issues_prs",
        description = "Search open pull requests or issues for a user or organization"
    )]
    async fn list_github_open_issues_prs(
        &self,
        Parameters(params): Parameters<OpenItemsParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.instrument("list_github_open_issues_prs", async {
            let owner = self.resolve_owner(params.repo_owner.as_deref())?;
            let results = self
                .github
                .list_open_issues_prs(
                    &owner,
                    params.kind,
                    params.filtering,
                    params.per_page.unwrap_or(DEFAULT_SEARCH_PER_PAGE),
                    params.page.unwrap_or(1),
                )
                .await?;
            to_json(&results)
        })
        .await
    }

    #[tool(
        name = "get_github_user_activity",
        description = "Collect a user's recent commits, pull requests, and issues across an organization or one of its repositories"
    )]
    async fn get_github_user_activity(
        &self,
        Parameters(params): Parameters<UserActivityParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.instrument("get_github_user_activity", async {
            let org = self.resolve_owner(params.org_name.as_deref())?;
            let activity = self
                .github
                .get_user_activity(&org, &params.username, params.repo_name.as_deref())
                .await?;
            to_json(&activity)
        })
        .await
    }

    #[tool(
        name = "get_ipv4_ipv6_info",
        description = "Look up this server's public IPv4 and IPv6 addresses with location details"
    )]
    async fn get_ipv4_ipv6_info(&self) -> Result<CallToolResult, ErrorData> {
        self.instrument("get_ipv4_ipv6_info", async {
            let info = self.ip.get_ipv4_ipv6_info().await?;
            to_json(&info)
        })
        .await
    }
}

#[tool_handler]
impl ServerHandler for McpGithubServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "GitHub PR and issue server. Review a PR with get_github_pr_diff then \
                 get_github_pr_content, and respond with update_github_pr_description, \
                 add_github_pr_comment, add_github_pr_inline_comment, or submit_github_pr_review. \
                 Manage issues with create_github_issue, update_github_issue, and \
                 update_github_assignees; link an issue to a PR by commenting 'Resolves #<number>'. \
                 Ship with create_github_pr, merge_github_pr, get_github_latest_sha, \
                 create_github_tag, and create_github_release. Use list_github_open_issues_prs \
                 and get_github_user_activity for overviews, and get_ipv4_ipv6_info for the \
                 server's public addresses. repo_owner may be omitted when a default owner is configured."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // Nothing listens on port 9; any request that slips past validation fails fast.
    const UNREACHABLE: &str = "http://127.0.0.1:9";

    fn make_server(default_owner: Option<String>) -> McpGithubServer {
        let github =
            GithubIntegration::new("ghp_test", UNREACHABLE, Duration::from_secs(1)).unwrap();
        let ip = IpIntegration::new(UNREACHABLE, UNREACHABLE, Duration::from_secs(1)).unwrap();
        McpGithubServer::new(github, ip, default_owner)
    }

    // Octocrab's client spawns onto the Tokio runtime, so these tests are
    // async even when they don't await anything.

    #[tokio::test]
    async fn test_resolve_owner_with_param() {
        let server = make_server(None);
        assert_eq!(server.resolve_owner(Some("my-org")).unwrap(), "my-org");
    }

    #[tokio::test]
    async fn test_resolve_owner_with_default() {
        let server = make_server(Some("default-org".to_string()));
        assert_eq!(server.resolve_owner(None).unwrap(), "default-org");
        assert_eq!(server.resolve_owner(Some("")).unwrap(), "default-org");
    }

    #[tokio::test]
    async fn test_resolve_owner_param_overrides_default() {
        let server = make_server(Some("default-org".to_string()));
        assert_eq!(
            server.resolve_owner(Some("explicit-org")).unwrap(),
            "explicit-org"
        );
    }

    #[tokio::test]
    async fn test_resolve_owner_missing() {
        let server = make_server(None);
        assert!(matches!(
            server.resolve_owner(None),
            Err(McpGithubError::MissingParam(_))
        ));
    }

    #[tokio::test]
    async fn test_all_tools_registered() {
        let server = make_server(None);
        let mut names: Vec<String> = server
            .tool_router
            .list_all()
            .into_iter()
            .map(|t| t.name.to_string())
            .collect();
        names.sort();

        let mut expected = vec![
            "get_github_pr_diff",
            "get_github_pr_content",
            "update_github_pr_description",
            "add_github_pr_comment",
            "add_github_pr_inline_comment",
            "create_github_issue",
            "update_github_issue",
            "update_github_assignees",
            "get_github_latest_sha",
            "create_github_tag",
            "create_github_release",
            "create_github_pr",
            "merge_github_pr",
            "submit_github_pr_review",
            "list_github_open_issues_prs",
            "get_github_user_activity",
            "get_ipv4_ipv6_info",
        ];
        expected.sort();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn test_unknown_tool_not_routed() {
        let server = make_server(None);
        assert!(!server.tool_router.has_route("delete_github_repo"));
        assert!(server.tool_router.has_route("create_github_issue"));
    }

    #[tokio::test]
    async fn test_get_info_names_server() {
        let info = make_server(None).get_info();
        assert_eq!(info.server_info.name, SERVER_NAME);
        assert!(info.capabilities.tools.is_some());
    }

    #[tokio::test]
    async fn test_empty_title_rejected_and_counted() {
        let metrics = Arc::new(Metrics::new());
        let server = make_server(Some("octo".to_string())).with_metrics(metrics.clone());

        let err = server
            .create_github_issue(Parameters(CreateIssueParams {
                repo_owner: None,
                repo_name: "demo".to_string(),
                title: "   ".to_string(),
                body: String::new(),
                labels: vec![],
            }))
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        assert_eq!(metrics.requests_total("create_github_issue", "error"), 1);
        assert_eq!(metrics.errors_total("create_github_issue", "validation_error"), 1);
        assert_eq!(metrics.active_requests("create_github_issue"), 0);
    }

    #[tokio::test]
    async fn test_missing_owner_rejected() {
        let server = make_server(None);
        let err = server
            .get_github_pr_content(Parameters(PrParams {
                repo_owner: None,
                repo_name: "demo".to_string(),
                pr_number: 1,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        assert!(err.message.contains("repo_owner"));
    }

    #[tokio::test]
    async fn test_review_without_body_rejected() {
        let server = make_server(Some("octo".to_string()));
        let err = server
            .submit_github_pr_review(Parameters(ReviewParams {
                repo_owner: None,
                repo_name: "demo".to_string(),
                pr_number: 3,
                event: ReviewEvent::RequestChanges,
                body: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_search_page_bounds_rejected() {
        let server = make_server(Some("octo".to_string()));
        let err = server
            .list_github_open_issues_prs(Parameters(OpenItemsParams {
                repo_owner: None,
                kind: SearchKind::Issue,
                filtering: SearchFilter::Owner,
                per_page: Some(500),
                page: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }

    #[test]
    fn test_params_accept_missing_owner() {
        let params: PrParams =
            serde_json::from_value(serde_json::json!({ "repo_name": "demo", "pr_number": 7 }))
                .unwrap();
        assert!(params.repo_owner.is_none());
        assert_eq!(params.pr_number, 7);
    }

    #[test]
    fn test_update_issue_params_state() {
        let params: UpdateIssueParams = serde_json::from_value(serde_json::json!({
            "repo_owner": "octo",
            "repo_name": "demo",
            "issue_number": 4,
            "state": "closed"
        }))
        .unwrap();
        assert_eq!(params.state, Some(IssueState::Closed));
        assert!(params.title.is_none());
        assert!(params.labels.is_none());
    }

    #[test]
    fn test_ack_from_response() {
        let ack = Ack::from_response(
            "Created issue 'x'".to_string(),
            &serde_json::json!({
                "id": 99,
                "number": 12,
                "html_url": "https://github.com/octo/demo/issues/12"
            }),
        );
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["number"], 12);
        assert_eq!(json["url"], "https://github.com/octo/demo/issues/12");
        assert!(json.get("sha").is_none());
    }

    #[test]
    fn test_ack_reads_ref_object_sha() {
        let ack = Ack::from_response(
            "Created tag v1".to_string(),
            &serde_json::json!({
                "ref": "refs/tags/v1",
                "object": { "sha": "abc123", "type": "tag" }
            }),
        );
        assert_eq!(ack.sha.as_deref(), Some("abc123"));
    }
}
