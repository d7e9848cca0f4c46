//! GitHub: open pull requests involving the user, and PR details.

use async_trait::async_trait;
use concierge_core::credential::{AccessToken, ProviderKind};
use concierge_core::error::ToolError;
use concierge_core::tool::{Tool, ToolResult};
use serde::{Deserialize, Deserializer};
use serde_json::json;

use crate::context::{ToolContext, endpoint, parse_args, read_json, send, with_defaults};
use crate::envelope::{Attempt, ToolEnvelope, settle};

const PROVIDER: ProviderKind = ProviderKind::Github;
const MAX_DESCRIPTION_CHARS: usize = 2_000;
const PAGE_SIZE: &str = "20";

#[derive(Deserialize)]
struct GithubErrorBody {
    message: Option<String>,
}

fn parse_github_error(body: &str) -> Option<String> {
    serde_json::from_str::<GithubErrorBody>(body).ok()?.message
}

fn github_request(request: reqwest::RequestBuilder, token: &AccessToken) -> reqwest::RequestBuilder {
    with_defaults(request, token)
        .header(reqwest::header::ACCEPT, "application/vnd.github+json")
        .header("X-GitHub-Api-Version", "2022-11-28")
}

#[derive(Deserialize)]
struct Account {
    login: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    items: Vec<Issue>,
}

#[derive(Deserialize)]
struct Issue {
    number: u64,
    title: String,
    html_url: Option<String>,
    repository_url: Option<String>,
    user: Option<Account>,
    updated_at: Option<String>,
    #[serde(default)]
    draft: bool,
}

#[derive(Deserialize)]
struct PullRequest {
    number: u64,
    title: String,
    state: String,
    html_url: Option<String>,
    body: Option<String>,
    user: Option<Account>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    merged: bool,
    mergeable_state: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
    #[serde(default)]
    changed_files: u64,
    #[serde(default)]
    commits: u64,
    #[serde(default)]
    comments: u64,
    #[serde(default)]
    review_comments: u64,
    #[serde(default)]
    requested_reviewers: Vec<Account>,
    head: Option<Branch>,
    base: Option<Branch>,
}

#[derive(Deserialize)]
struct Branch {
    #[serde(rename = "ref")]
    name: String,
}

/// `https://api.github.com/repos/{owner}/{repo}` to `owner/repo`.
fn repo_slug(repository_url: Option<&str>) -> Option<String> {
    let mut parts = repository_url?.rsplit('/');
    let repo = parts.next()?;
    let owner = parts.next()?;
    Some(format!("{owner}/{repo}"))
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}… [truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

/// Open PRs the authenticated user authored, was assigned, mentioned in or
/// asked to review.
pub async fn list_pull_requests(ctx: &ToolContext) -> Result<ToolEnvelope, ToolError> {
    settle(try_list_pull_requests(ctx).await)
}

async fn try_list_pull_requests(ctx: &ToolContext) -> Attempt<serde_json::Value> {
    let token = ctx.token(PROVIDER, "list_github_pull_requests").await?;

    let me_url = endpoint(&ctx.endpoints.github, &["user"])?;
    let response = send(github_request(ctx.http.get(me_url), &token), parse_github_error)
        .await
        .map_err(|e| e.into_failure(PROVIDER))?;
    let me: Account = read_json(PROVIDER, response).await?;

    let mut url = endpoint(&ctx.endpoints.github, &["search", "issues"])?;
    url.query_pairs_mut()
        .append_pair("q", &format!("is:pr is:open involves:{}", me.login))
        .append_pair("sort", "updated")
        .append_pair("order", "desc")
        .append_pair("per_page", PAGE_SIZE);
    let response = send(github_request(ctx.http.get(url), &token), parse_github_error)
        .await
        .map_err(|e| e.into_failure(PROVIDER))?;
    let results: SearchResponse = read_json(PROVIDER, response).await?;

    let pull_requests: Vec<_> = results
        .items
        .into_iter()
        .map(|pr| {
            json!({
                "number": pr.number,
                "title": pr.title,
                "repository": repo_slug(pr.repository_url.as_deref()),
                "author": pr.user.map(|u| u.login),
                "draft": pr.draft,
                "updatedAt": pr.updated_at,
                "url": pr.html_url,
            })
        })
        .collect();
    Ok(json!({
        "login": me.login,
        "total": results.total_count,
        "pullRequests": pull_requests,
    }))
}

pub async fn pull_request_details(
    ctx: &ToolContext,
    owner: &str,
    repo: &str,
    number: u64,
) -> Result<ToolEnvelope, ToolError> {
    settle(try_pull_request_details(ctx, owner, repo, number).await)
}

async fn try_pull_request_details(
    ctx: &ToolContext,
    owner: &str,
    repo: &str,
    number: u64,
) -> Attempt<serde_json::Value> {
    let token = ctx.token(PROVIDER, "get_github_pull_request_details").await?;
    let number_segment = number.to_string();
    let url = endpoint(&ctx.endpoints.github, &["repos", owner, repo, "pulls", &number_segment])?;
    let response = send(github_request(ctx.http.get(url), &token), parse_github_error)
        .await
        .map_err(|e| e.into_failure(PROVIDER))?;
    let pr: PullRequest = read_json(PROVIDER, response).await?;

    let state = if pr.merged { "merged".to_string() } else { pr.state.clone() };
    Ok(json!({
        "number": pr.number,
        "title": pr.title,
        "state": state,
        "draft": pr.draft,
        "author": pr.user.map(|u| u.login),
        "url": pr.html_url,
        "head": pr.head.map(|b| b.name),
        "base": pr.base.map(|b| b.name),
        "mergeableState": pr.mergeable_state,
        "createdAt": pr.created_at,
        "updatedAt": pr.updated_at,
        "stats": {
            "additions": pr.additions,
            "deletions": pr.deletions,
            "changedFiles": pr.changed_files,
            "commits": pr.commits,
            "comments": pr.comments + pr.review_comments,
        },
        "requestedReviewers": pr.requested_reviewers.into_iter().map(|r| r.login).collect::<Vec<_>>(),
        "description": pr.body.as_deref().map(|b| truncate(b.trim(), MAX_DESCRIPTION_CHARS)),
    }))
}

// --- Tools ---

pub struct ListGithubPullRequestsTool {
    ctx: ToolContext,
}

impl ListGithubPullRequestsTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for ListGithubPullRequestsTool {
    fn name(&self) -> &str {
        "list_github_pull_requests"
    }

    fn description(&self) -> &str {
        "List open GitHub pull requests that involve the user (authored, assigned, mentioned or \
         review requested), most recently updated first."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(list_pull_requests(&self.ctx).await?.into_tool_result())
    }
}

pub struct GetGithubPullRequestDetailsTool {
    ctx: ToolContext,
}

impl GetGithubPullRequestDetailsTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

/// Models send PR numbers both as numbers and as strings.
fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .trim_start_matches('#')
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("'{s}' is not a pull request number"))),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailArgs {
    owner: String,
    repo: String,
    #[serde(deserialize_with = "number_or_string")]
    pull_request_number: u64,
}

#[async_trait]
impl Tool for GetGithubPullRequestDetailsTool {
    fn name(&self) -> &str {
        "get_github_pull_request_details"
    }

    fn description(&self) -> &str {
        "Get details of one GitHub pull request: status, diff stats, reviewers and description."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "owner": { "type": "string", "description": "Repository owner (user or organization)" },
                "repo": { "type": "string", "description": "Repository name" },
                "pullRequestNumber": { "type": "integer", "description": "Pull request number" }
            },
            "required": ["owner", "repo", "pullRequestNumber"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: DetailArgs = match parse_args(self.name(), arguments) {
            Ok(args) => args,
            Err(envelope) => return Ok(envelope.into_tool_result()),
        };
        Ok(pull_request_details(&self.ctx, &args.owner, &args.repo, args.pull_request_number)
            .await?
            .into_tool_result())
    }
}
