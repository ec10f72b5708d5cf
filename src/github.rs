//! GitHub REST and GraphQL calls behind the MCP tools.
//!
//! Every operation validates its identifiers locally, sends one authenticated
//! request (or a short fixed sequence of them) through `octocrab`, and returns
//! the decoded response. Non-2xx responses become [`McpGithubError`] values
//! carrying GitHub's status and message; nothing is retried.

use std::time::Duration;

use octocrab::service::middleware::retry::RetryConfig;
use rmcp::schemars;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::McpGithubError;

pub type Result<T> = std::result::Result<T, McpGithubError>;

/// Label attached to every issue created through this server.
pub const MCP_LABEL: &str = "mcp";

#[derive(Clone)]
pub struct GithubIntegration {
    crab: octocrab::Octocrab,
}

// -- Public result shapes --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrContent {
    pub title: String,
    pub body: String,
    pub author: String,
    pub state: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedPr {
    pub pr_url: Option<String>,
    pub pr_number: Option<u64>,
    pub status: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchSummary {
    pub url: String,
    pub title: String,
    pub number: u64,
    pub state: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub author: Option<String>,
    pub label_names: Vec<String>,
    pub is_draft: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub kind: SearchKind,
    pub total: u64,
    pub items: Vec<SearchSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivityCommit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    pub message: String,
    pub date: Option<String>,
    pub url: Option<String>,
    pub additions: u64,
    pub deletions: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivityItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    pub number: u64,
    pub title: String,
    pub state: String,
    pub created: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserActivity {
    pub commits: Vec<ActivityCommit>,
    pub prs: Vec<ActivityItem>,
    pub issues: Vec<ActivityItem>,
}

// -- Enumerated parameters shared with the tool layer --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    Merge,
    #[default]
    Squash,
    Rebase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewEvent {
    Approve,
    RequestChanges,
    Comment,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MakeLatest {
    #[default]
    True,
    False,
    Legacy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    #[default]
    Pr,
    Issue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SearchFilter {
    User,
    Owner,
    #[default]
    Involves,
}

impl SearchKind {
    fn as_str(self) -> &'static str {
        match self {
            SearchKind::Pr => "pr",
            SearchKind::Issue => "issue",
        }
    }
}

impl SearchFilter {
    fn as_str(self) -> &'static str {
        match self {
            SearchFilter::User => "user",
            SearchFilter::Owner => "owner",
            SearchFilter::Involves => "involves",
        }
    }
}

/// Optional release flags; defaults match GitHub's web UI with generated notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseOptions {
    pub draft: bool,
    pub prerelease: bool,
    pub generate_release_notes: bool,
    pub make_latest: MakeLatest,
}

impl Default for ReleaseOptions {
    fn default() -> Self {
        Self {
            draft: false,
            prerelease: false,
            generate_release_notes: true,
            make_latest: MakeLatest::True,
        }
    }
}

/// Fields of an issue update; only the ones set are sent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IssueUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<IssueState>,
}

impl IssueUpdate {
    fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none() && self.labels.is_none() && self.state.is_none()
    }
}

// -- Wire payloads (only the fields we read) --

#[derive(Debug, Deserialize)]
struct UserRef {
    login: String,
}

#[derive(Debug, Deserialize)]
struct HeadRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullPayload {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<UserRef>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    head: Option<HeadRef>,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct LabelRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SearchItemPayload {
    html_url: String,
    title: String,
    number: u64,
    state: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    user: Option<UserRef>,
    #[serde(default)]
    labels: Vec<LabelRef>,
    #[serde(default)]
    draft: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    total_count: u64,
    #[serde(default)]
    items: Vec<SearchItemPayload>,
}

#[derive(Debug, Serialize)]
struct PageParams {
    per_page: u8,
}

#[derive(Debug, Serialize)]
struct SearchParams {
    q: String,
    per_page: u8,
    page: u32,
}

impl GithubIntegration {
    /// Build an authenticated client against `base_url` with `timeout` applied
    /// to connect and read. Retries are disabled; failures surface to the caller.
    pub fn new(token: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        let crab = octocrab::OctocrabBuilder::new()
            .base_uri(base_url)
            .map_err(|e| McpGithubError::InvalidParam(format!("GitHub API URL {}: {}", base_url, e)))?
            .personal_token(token.to_string())
            .add_retry_config(RetryConfig::None)
            .set_connect_timeout(Some(timeout))
            .set_read_timeout(Some(timeout))
            .build()
            .map_err(|e| McpGithubError::Transport(format!("Failed to create GitHub client: {}", e)))?;

        tracing::info!(base_url, timeout_secs = timeout.as_secs(), "GitHub integration initialised");
        Ok(Self { crab })
    }

    pub async fn get_pr_content(&self, owner: &str, repo: &str, number: u64) -> Result<PrContent> {
        tracing::info!(owner, repo, number, "Fetching PR content");
        let pr = self.fetch_pull(owner, repo, number).await?;

        Ok(PrContent {
            title: pr.title.unwrap_or_default(),
            body: pr.body.unwrap_or_default(),
            author: pr.user.map(|u| u.login).unwrap_or_else(|| "unknown".to_string()),
            state: pr.state.unwrap_or_else(|| "unknown".to_string()),
            created_at: pr.created_at,
            updated_at: pr.updated_at,
        })
    }

    pub async fn get_pr_diff(&self, owner: &str, repo: &str, number: u64) -> Result<String> {
        validate_repo(owner, repo)?;
        tracing::info!(owner, repo, number, "Fetching PR diff");

        let diff = self.crab.pulls(owner, repo).get_diff(number).await?;
        Ok(diff)
    }

    pub async fn update_pr_description(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        new_title: &str,
        new_description: &str,
    ) -> Result<Value> {
        validate_repo(owner, repo)?;
        require_text(new_title, "new_title")?;
        tracing::info!(owner, repo, number, "Updating PR description");

        let route = format!("/repos/{}/{}/pulls/{}", owner, repo, number);
        let body = serde_json::json!({
            "title": new_title,
            "body": new_description,
        });
        Ok(self.crab.patch(route, Some(&body)).await?)
    }

    pub async fn add_pr_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        comment: &str,
    ) -> Result<Value> {
        validate_repo(owner, repo)?;
        require_text(comment, "comment")?;
        tracing::info!(owner, repo, number, "Adding PR comment");

        // PR conversation comments live on the issues endpoint.
        let route = format!("/repos/{}/{}/issues/{}/comments", owner, repo, number);
        let body = serde_json::json!({ "body": comment });
        Ok(self.crab.post(route, Some(&body)).await?)
    }

    pub async fn add_inline_pr_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        path: &str,
        line: u64,
        comment_body: &str,
    ) -> Result<Value> {
        validate_repo(owner, repo)?;
        require_text(path, "path")?;
        require_text(comment_body, "comment_body")?;
        if line == 0 {
            return Err(McpGithubError::InvalidParam("line must be 1 or greater".to_string()));
        }
        tracing::info!(owner, repo, number, path, line, "Adding inline PR review comment");

        let commit_id = self
            .fetch_pull(owner, repo, number)
            .await?
            .head
            .map(|h| h.sha)
            .ok_or_else(|| McpGithubError::Decode("pull request has no head commit".to_string()))?;

        let route = format!("/repos/{}/{}/pulls/{}/comments", owner, repo, number);
        let body = serde_json::json!({
            "body": comment_body,
            "commit_id": commit_id,
            "path": path,
            "line": line,
            "side": "RIGHT",
        });
        Ok(self.crab.post(route, Some(&body)).await?)
    }

    pub async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<Value> {
        require_text(title, "title")?;
        validate_repo(owner, repo)?;
        tracing::info!(owner, repo, title, "Creating issue");

        let route = format!("/repos/{}/{}/issues", owner, repo);
        let payload = serde_json::json!({
            "title": title,
            "body": body,
            "labels": issue_labels(labels),
        });
        Ok(self.crab.post(route, Some(&payload)).await?)
    }

    pub async fn update_issue(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        update: &IssueUpdate,
    ) -> Result<Value> {
        validate_repo(owner, repo)?;
        if update.is_empty() {
            return Err(McpGithubError::MissingParam(
                "at least one of title, body, labels, or state is required".to_string(),
            ));
        }
        if let Some(ref title) = update.title {
            require_text(title, "title")?;
        }
        tracing::info!(owner, repo, number, "Updating issue");

        let route = format!("/repos/{}/{}/issues/{}", owner, repo, number);
        Ok(self.crab.patch(route, Some(update)).await?)
    }

    pub async fn update_assignees(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        assignees: &[String],
    ) -> Result<Value> {
        validate_repo(owner, repo)?;
        for login in assignees {
            sanitize_github_name(login, "assignee")?;
        }
        tracing::info!(owner, repo, number, count = assignees.len(), "Updating assignees");

        let route = format!("/repos/{}/{}/issues/{}", owner, repo, number);
        let body = serde_json::json!({ "assignees": assignees });
        Ok(self.crab.patch(route, Some(&body)).await?)
    }

    pub async fn get_latest_sha(&self, owner: &str, repo: &str) -> Result<String> {
        validate_repo(owner, repo)?;
        tracing::info!(owner, repo, "Fetching latest commit SHA");

        let route = format!("/repos/{}/{}/commits", owner, repo);
        let commits: Vec<CommitRef> = self
            .crab
            .get(route, Some(&PageParams { per_page: 1 }))
            .await?;

        commits
            .into_iter()
            .next()
            .map(|c| c.sha)
            .ok_or_else(|| {
                McpGithubError::NotFound(format!("No commits found in {}/{}", owner, repo))
            })
    }

    /// Create an annotated tag on the latest commit of the default branch.
    pub async fn create_tag(
        &self,
        owner: &str,
        repo: &str,
        tag_name: &str,
        message: &str,
    ) -> Result<Value> {
        validate_repo(owner, repo)?;
        sanitize_ref_name(tag_name, "tag_name")?;
        tracing::info!(owner, repo, tag_name, "Creating tag");

        let sha = self.get_latest_sha(owner, repo).await?;

        let tag_route = format!("/repos/{}/{}/git/tags", owner, repo);
        let tag_object: Value = self
            .crab
            .post(
                tag_route,
                Some(&serde_json::json!({
                    "tag": tag_name,
                    "message": message,
                    "object": sha,
                    "type": "commit",
                })),
            )
            .await?;
        let tag_sha = tag_object
            .get("sha")
            .and_then(Value::as_str)
            .ok_or_else(|| McpGithubError::Decode("tag object response has no sha".to_string()))?;

        let ref_route = format!("/repos/{}/{}/git/refs", owner, repo);
        Ok(self
            .crab
            .post(
                ref_route,
                Some(&serde_json::json!({
                    "ref": format!("refs/tags/{}", tag_name),
                    "sha": tag_sha,
                })),
            )
            .await?)
    }

    pub async fn create_release(
        &self,
        owner: &str,
        repo: &str,
        tag_name: &str,
        release_name: &str,
        body: &str,
        options: ReleaseOptions,
    ) -> Result<Value> {
        validate_repo(owner, repo)?;
        sanitize_ref_name(tag_name, "tag_name")?;
        require_text(release_name, "release_name")?;
        tracing::info!(owner, repo, tag_name, release_name, "Creating release");

        let route = format!("/repos/{}/{}/releases", owner, repo);
        let payload = serde_json::json!({
            "tag_name": tag_name,
            "name": release_name,
            "body": body,
            "draft": options.draft,
            "prerelease": options.prerelease,
            "generate_release_notes": options.generate_release_notes,
            "make_latest": options.make_latest,
        });
        Ok(self.crab.post(route, Some(&payload)).await?)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_pr(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
        draft: bool,
    ) -> Result<CreatedPr> {
        validate_repo(owner, repo)?;
        require_text(title, "title")?;
        sanitize_url_value(head, "head")?;
        sanitize_url_value(base, "base")?;
        tracing::info!(owner, repo, head, base, "Creating PR");

        let route = format!("/repos/{}/{}/pulls", owner, repo);
        let payload = serde_json::json!({
            "title": title,
            "body": body,
            "head": head,
            "base": base,
            "draft": draft,
        });
        let pr: Value = self.crab.post(route, Some(&payload)).await?;

        Ok(CreatedPr {
            pr_url: pr.get("html_url").and_then(Value::as_str).map(String::from),
            pr_number: pr.get("number").and_then(Value::as_u64),
            status: pr.get("state").and_then(Value::as_str).map(String::from),
            title: pr.get("title").and_then(Value::as_str).map(String::from),
        })
    }

    pub async fn merge_pr(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        commit_title: Option<&str>,
        commit_message: Option<&str>,
        method: MergeMethod,
    ) -> Result<Value> {
        validate_repo(owner, repo)?;
        tracing::info!(owner, repo, number, ?method, "Merging PR");

        let route = format!("/repos/{}/{}/pulls/{}/merge", owner, repo, number);
        let mut payload = serde_json::json!({ "merge_method": method });
        if let Some(title) = commit_title {
            payload["commit_title"] = Value::from(title);
        }
        if let Some(message) = commit_message {
            payload["commit_message"] = Value::from(message);
        }
        Ok(self.crab.put(route, Some(&payload)).await?)
    }

    pub async fn submit_review(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        event: ReviewEvent,
        body: Option<&str>,
    ) -> Result<Value> {
        validate_repo(owner, repo)?;
        let body = body.filter(|b| !b.trim().is_empty());
        if body.is_none() && event != ReviewEvent::Approve {
            return Err(McpGithubError::MissingParam(
                "body is required for REQUEST_CHANGES and COMMENT reviews".to_string(),
            ));
        }
        tracing::info!(owner, repo, number, ?event, "Submitting PR review");

        let route = format!("/repos/{}/{}/pulls/{}/reviews", owner, repo, number);
        let mut payload = serde_json::json!({ "event": event });
        if let Some(body) = body {
            payload["body"] = Value::from(body);
        }
        Ok(self.crab.post(route, Some(&payload)).await?)
    }

    pub async fn list_open_issues_prs(
        &self,
        owner: &str,
        kind: SearchKind,
        filter: SearchFilter,
        per_page: u32,
        page: u32,
    ) -> Result<SearchResults> {
        sanitize_github_name(owner, "repo_owner")?;
        if !(1..=100).contains(&per_page) {
            return Err(McpGithubError::InvalidParam(format!(
                "per_page must be between 1 and 100, got {}",
                per_page
            )));
        }
        if page == 0 {
            return Err(McpGithubError::InvalidParam("page must be 1 or greater".to_string()));
        }
        tracing::info!(owner, kind = kind.as_str(), filter = filter.as_str(), "Listing open items");

        let params = SearchParams {
            q: format!("is:{} is:open {}:{}", kind.as_str(), filter.as_str(), owner),
            per_page: per_page as u8,
            page,
        };
        let found: SearchPayload = self.crab.get("/search/issues", Some(&params)).await?;

        Ok(SearchResults {
            kind,
            total: found.total_count,
            items: found
                .items
                .into_iter()
                .map(|item| SearchSummary {
                    url: item.html_url,
                    title: item.title,
                    number: item.number,
                    state: item.state,
                    created_at: item.created_at,
                    updated_at: item.updated_at,
                    author: item.user.map(|u| u.login),
                    label_names: item.labels.into_iter().map(|l| l.name).collect(),
                    is_draft: item.draft.unwrap_or(false),
                })
                .collect(),
        })
    }

    /// Commits, PRs, and issues authored by `username`, across an organisation
    /// or within one repository.
    pub async fn get_user_activity(
        &self,
        org: &str,
        username: &str,
        repo: Option<&str>,
    ) -> Result<UserActivity> {
        sanitize_github_name(org, "org_name")?;
        sanitize_github_name(username, "username")?;
        if let Some(repo) = repo {
            sanitize_github_name(repo, "repo_name")?;
        }
        tracing::info!(org, username, repo = repo.unwrap_or("*"), "Fetching user activity");

        let payload = match repo {
            Some(repo) => serde_json::json!({
                "query": REPO_ACTIVITY_QUERY,
                "variables": { "org": org, "repo": repo, "user": username },
            }),
            None => serde_json::json!({
                "query": ORG_ACTIVITY_QUERY,
                "variables": { "org": org, "user": username },
            }),
        };
        let response: Value = self.crab.graphql(&payload).await?;

        if let Some(errors) = response.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let messages: Vec<&str> = errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(Value::as_str))
                    .collect();
                return Err(McpGithubError::GraphQl(messages.join("; ")));
            }
        }

        let mut activity = UserActivity::default();
        match repo {
            Some(_) => {
                if let Some(node) = response.pointer("/data/repository") {
                    collect_repo_activity(node, None, username, &mut activity);
                }
            }
            None => {
                let repos = response
                    .pointer("/data/organization/repositories/nodes")
                    .and_then(Value::as_array);
                for node in repos.into_iter().flatten() {
                    let name = node.get("name").and_then(Value::as_str);
                    collect_repo_activity(node, name, username, &mut activity);
                }
            }
        }
        Ok(activity)
    }

    async fn fetch_pull(&self, owner: &str, repo: &str, number: u64) -> Result<PullPayload> {
        validate_repo(owner, repo)?;
        let route = format!("/repos/{}/{}/pulls/{}", owner, repo, number);
        Ok(self.crab.get(route, None::<&()>).await?)
    }
}

const ORG_ACTIVITY_QUERY: &str = r#"
query($org: String!, $user: String!) {
  organization(login: $org) {
    repositories(first: 50) {
      nodes {
        name
        defaultBranchRef {
          target {
            ... on Commit {
              history(author: {login: $user}, first: 20) {
                nodes { messageHeadline committedDate url additions deletions }
              }
            }
          }
        }
        pullRequests(first: 20, states: [OPEN, CLOSED, MERGED]) {
          nodes { number title state author { login } createdAt url }
        }
        issues(first: 20) {
          nodes { number title state author { login } createdAt url }
        }
      }
    }
  }
}
"#;

const REPO_ACTIVITY_QUERY: &str = r#"
query($org: String!, $repo: String!, $user: String!) {
  repository(owner: $org, name: $repo) {
    defaultBranchRef {
      target {
        ... on Commit {
          history(author: {login: $user}, first: 50) {
            nodes { messageHeadline committedDate url additions deletions }
          }
        }
      }
    }
    pullRequests(first: 50, states: [OPEN, CLOSED, MERGED]) {
      nodes { number title state author { login } createdAt url }
    }
    issues(first: 50) {
      nodes { number title state author { login } createdAt url }
    }
  }
}
"#;

fn collect_repo_activity(
    node: &Value,
    repo_name: Option<&str>,
    username: &str,
    out: &mut UserActivity,
) {
    let repo = repo_name.map(String::from);

    let commits = node
        .pointer("/defaultBranchRef/target/history/nodes")
        .and_then(Value::as_array);
    for commit in commits.into_iter().flatten() {
        out.commits.push(ActivityCommit {
            repo: repo.clone(),
            message: str_field(commit, "messageHeadline").unwrap_or_default(),
            date: str_field(commit, "committedDate"),
            url: str_field(commit, "url"),
            additions: commit.get("additions").and_then(Value::as_u64).unwrap_or(0),
            deletions: commit.get("deletions").and_then(Value::as_u64).unwrap_or(0),
        });
    }

    out.prs.extend(authored_items(node, "/pullRequests/nodes", &repo, username));
    out.issues.extend(authored_items(node, "/issues/nodes", &repo, username));
}

fn authored_items(
    node: &Value,
    pointer: &str,
    repo: &Option<String>,
    username: &str,
) -> Vec<ActivityItem> {
    node.pointer(pointer)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| {
                    item.pointer("/author/login").and_then(Value::as_str) == Some(username)
                })
                .map(|item| ActivityItem {
                    repo: repo.clone(),
                    number: item.get("number").and_then(Value::as_u64).unwrap_or(0),
                    title: str_field(item, "title").unwrap_or_default(),
                    state: str_field(item, "state").unwrap_or_default(),
                    created: str_field(item, "createdAt"),
                    url: str_field(item, "url"),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

/// Caller labels plus [`MCP_LABEL`], without duplicates, order preserved.
pub fn issue_labels(labels: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(labels.len() + 1);
    for label in labels.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        if !out.iter().any(|existing| existing == label) {
            out.push(label.to_string());
        }
    }
    if !out.iter().any(|l| l == MCP_LABEL) {
        out.push(MCP_LABEL.to_string());
    }
    out
}

fn validate_repo(owner: &str, repo: &str) -> Result<()> {
    sanitize_github_name(owner, "repo_owner")?;
    sanitize_github_name(repo, "repo_name")
}

fn require_text(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(McpGithubError::MissingParam(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Validate that a GitHub owner/repo name doesn't contain characters that
/// could be used for URL injection in raw API routes.
pub fn sanitize_github_name(name: &str, field: &str) -> Result<()> {
    if name.is_empty() {
        return Err(McpGithubError::MissingParam(format!(
            "{} must not be empty",
            field
        )));
    }
    for ch in ['/', '?', '#', '%', '\0', ' ', '\n', '\t'] {
        if name.contains(ch) {
            return Err(McpGithubError::InvalidParam(format!(
                "{} contains invalid character '{}'",
                field,
                ch.escape_default()
            )));
        }
    }
    if name == "." || name == ".." {
        return Err(McpGithubError::InvalidParam(format!("{} is not a valid name", field)));
    }
    Ok(())
}

/// Validate a value sent as a branch name. Unlike `sanitize_github_name`,
/// this allows slashes (for branch names like `feature/foo`).
pub fn sanitize_url_value(value: &str, field: &str) -> Result<()> {
    if value.is_empty() {
        return Err(McpGithubError::MissingParam(format!(
            "{} must not be empty",
            field
        )));
    }
    for ch in ['?', '#', '&', '\0', '\n', '\r', '\t'] {
        if value.contains(ch) {
            return Err(McpGithubError::InvalidParam(format!(
                "{} contains invalid character",
                field
            )));
        }
    }
    Ok(())
}

/// Reject tag names git itself would refuse as a ref component.
pub fn sanitize_ref_name(value: &str, field: &str) -> Result<()> {
    sanitize_url_value(value, field)?;
    let invalid = value.contains("..")
        || value.contains("@{")
        || value.starts_with('-')
        || value.starts_with('/')
        || value.ends_with('/')
        || value.ends_with(".lock")
        || value.ends_with('.')
        || value
            .chars()
            .any(|c| c.is_ascii_control() || matches!(c, ' ' | '~' | '^' | ':' | '*' | '[' | '\\'));
    if invalid {
        return Err(McpGithubError::InvalidParam(format!(
            "{} '{}' is not a valid git ref name",
            field, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_labels_always_has_mcp() {
        assert_eq!(issue_labels(&[]), vec!["mcp"]);
        assert_eq!(
            issue_labels(&["bug".to_string(), "ui".to_string()]),
            vec!["bug", "ui", "mcp"]
        );
    }

    #[test]
    fn test_issue_labels_no_duplicates() {
        let labels = vec![
            "mcp".to_string(),
            "bug".to_string(),
            "bug".to_string(),
            " ".to_string(),
        ];
        assert_eq!(issue_labels(&labels), vec!["mcp", "bug"]);
    }

    #[test]
    fn test_sanitize_github_name_valid() {
        assert!(sanitize_github_name("my-org", "owner").is_ok());
        assert!(sanitize_github_name("user_name", "owner").is_ok());
        assert!(sanitize_github_name("repo.name", "repo").is_ok());
    }

    #[test]
    fn test_sanitize_github_name_empty() {
        assert!(matches!(
            sanitize_github_name("", "owner"),
            Err(McpGithubError::MissingParam(_))
        ));
    }

    #[test]
    fn test_sanitize_github_name_path_tricks() {
        assert!(sanitize_github_name("owner/repo", "owner").is_err());
        assert!(sanitize_github_name("../etc", "owner").is_err());
        assert!(sanitize_github_name("..", "repo").is_err());
        assert!(sanitize_github_name("owner?evil=1", "owner").is_err());
        assert!(sanitize_github_name("repo#fragment", "repo").is_err());
        assert!(sanitize_github_name("my repo", "repo").is_err());
    }

    #[test]
    fn test_sanitize_url_value_allows_slashes() {
        assert!(sanitize_url_value("feature/my-branch", "head").is_ok());
        assert!(sanitize_url_value("main?evil=1", "head").is_err());
        assert!(sanitize_url_value("val&other=1", "base").is_err());
        assert!(sanitize_url_value("", "base").is_err());
    }

    #[test]
    fn test_sanitize_ref_name() {
        assert!(sanitize_ref_name("v1.2.3", "tag_name").is_ok());
        assert!(sanitize_ref_name("release/2024-01", "tag_name").is_ok());
        assert!(sanitize_ref_name("v1..2", "tag_name").is_err());
        assert!(sanitize_ref_name("-v1", "tag_name").is_err());
        assert!(sanitize_ref_name("v1 beta", "tag_name").is_err());
        assert!(sanitize_ref_name("v1~1", "tag_name").is_err());
        assert!(sanitize_ref_name("v1.lock", "tag_name").is_err());
    }

    #[test]
    fn test_issue_update_serializes_only_set_fields() {
        let update = IssueUpdate {
            state: Some(IssueState::Closed),
            ..Default::default()
        };
        assert!(!update.is_empty());
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({ "state": "closed" })
        );
        assert!(IssueUpdate::default().is_empty());
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_value(ReviewEvent::RequestChanges).unwrap(),
            "REQUEST_CHANGES"
        );
        assert_eq!(serde_json::to_value(MergeMethod::default()).unwrap(), "squash");
        assert_eq!(serde_json::to_value(MakeLatest::Legacy).unwrap(), "legacy");
        assert_eq!(SearchFilter::default().as_str(), "involves");
    }

    #[test]
    fn test_collect_org_activity_filters_by_author() {
        let repo = serde_json::json!({
            "name": "engine",
            "defaultBranchRef": { "target": { "history": { "nodes": [
                { "messageHeadline": "Fix parser", "committedDate": "2024-01-01T00:00:00Z",
                  "url": "https://github.com/acme/engine/commit/abc", "additions": 3, "deletions": 1 }
            ]}}},
            "pullRequests": { "nodes": [
                { "number": 7, "title": "Mine", "state": "OPEN", "author": { "login": "octo" },
                  "createdAt": "2024-01-02T00:00:00Z", "url": "u7" },
                { "number": 8, "title": "Theirs", "state": "MERGED", "author": { "login": "other" },
                  "createdAt": "2024-01-03T00:00:00Z", "url": "u8" },
                { "number": 9, "title": "Ghost", "state": "CLOSED", "author": null,
                  "createdAt": "2024-01-04T00:00:00Z", "url": "u9" }
            ]},
            "issues": { "nodes": [] }
        });

        let mut activity = UserActivity::default();
        collect_repo_activity(&repo, Some("engine"), "octo", &mut activity);

        assert_eq!(activity.commits.len(), 1);
        assert_eq!(activity.commits[0].repo.as_deref(), Some("engine"));
        assert_eq!(activity.commits[0].additions, 3);
        assert_eq!(activity.prs.len(), 1);
        assert_eq!(activity.prs[0].number, 7);
        assert!(activity.issues.is_empty());
    }

    #[test]
    fn test_collect_activity_without_default_branch() {
        let repo = serde_json::json!({
            "defaultBranchRef": null,
            "pullRequests": { "nodes": [] },
            "issues": { "nodes": [
                { "number": 1, "title": "Bug", "state": "OPEN", "author": { "login": "octo" },
                  "createdAt": "2024-01-02T00:00:00Z", "url": "u1" }
            ]}
        });

        let mut activity = UserActivity::default();
        collect_repo_activity(&repo, None, "octo", &mut activity);

        assert!(activity.commits.is_empty());
        assert_eq!(activity.issues.len(), 1);
        assert_eq!(activity.issues[0].repo, None);
    }
}
