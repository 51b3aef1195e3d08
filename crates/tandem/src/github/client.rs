//! GitHub issue client implementing [`IssueTracker`].

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use super::convert::{parse_issue, parse_issues, to_milestone};
use super::error::error_from_response;
use super::types::{CreateIssueBody, GitHubMilestone};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use crate::platform::{
    self, ApiError, ApiRateLimiter, Issue, IssueState, IssueTracker, Milestone, NewIssue,
};
use crate::retry::RetryPolicy;

/// Public GitHub REST API base URL.
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Page size for list endpoints (GitHub's maximum).
const PAGE_SIZE: u32 = 100;

/// Pagination information extracted from GitHub's Link header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkPagination {
    /// The last page number (from rel="last" link).
    pub last_page: Option<u32>,
    /// The next page number (from rel="next" link).
    pub next_page: Option<u32>,
}

/// Parse the Link header to extract pagination info.
///
/// GitHub Link headers look like:
/// `<https://api.github.com/repositories/1/issues?per_page=100&page=2>; rel="next", <...&page=3>; rel="last"`
pub fn parse_link_header(link_header: &str) -> LinkPagination {
    let mut info = LinkPagination::default();

    for part in link_header.split(',') {
        let mut url = None;
        let mut rel = None;

        for segment in part.trim().split(';') {
            let segment = segment.trim();
            if segment.starts_with('<') && segment.ends_with('>') {
                url = Some(&segment[1..segment.len() - 1]);
            } else if let Some(rel_value) = segment.strip_prefix("rel=") {
                rel = Some(rel_value.trim_matches('"'));
            }
        }

        if let (Some(url), Some(rel_type)) = (url, rel)
            && let Some(page_num) = extract_page_from_url(url)
        {
            match rel_type {
                "last" => info.last_page = Some(page_num),
                "next" => info.next_page = Some(page_num),
                _ => {}
            }
        }
    }

    info
}

/// Extract the page parameter from a URL.
fn extract_page_from_url(url: &str) -> Option<u32> {
    let query = &url[url.find('?')? + 1..];
    query
        .split('&')
        .find_map(|param| param.strip_prefix("page="))
        .and_then(|value| value.parse().ok())
}

/// Format a cursor the way the `since` query parameter expects.
fn format_since(since: DateTime<Utc>) -> String {
    since.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// GitHub REST client for the issue side of the sync.
#[derive(Clone)]
pub struct GitHubClient {
    transport: Arc<dyn HttpTransport>,
    api_url: String,
    token: String,
    rate_limiter: Option<ApiRateLimiter>,
    retry: RetryPolicy,
}

impl GitHubClient {
    /// Create a new client against the public GitHub API.
    pub fn new(
        token: &str,
        rate_limiter: Option<ApiRateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::with_timeout(StdDuration::from_secs(30))
            .map_err(|e| ApiError::internal(e.to_string()))?;

        Ok(Self::new_with_transport(
            GITHUB_API_URL,
            token,
            rate_limiter,
            retry,
            Arc::new(transport),
        ))
    }

    pub fn new_with_transport(
        api_url: &str,
        token: &str,
        rate_limiter: Option<ApiRateLimiter>,
        retry: RetryPolicy,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            transport,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            rate_limiter,
            retry,
        }
    }

    /// Get the API base URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        HttpRequest::new(method, format!("{}{}", self.api_url, path))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "tandem")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .bearer(&self.token)
    }

    /// Wait for rate limiter if one is configured.
    async fn wait_for_rate_limit(&self) {
        if let Some(ref limiter) = self.rate_limiter {
            limiter.acquire().await;
        }
    }

    /// Send one request through the rate limiter and retry policy.
    ///
    /// Non-success statuses are returned as errors.
    async fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> platform::Result<HttpResponse> {
        let request = self.request(method, path);
        let request = match body {
            Some(value) => request.json(&value),
            None => request,
        };
        let operation = format!("{} {}", method.as_str(), path);

        self.retry
            .run(&operation, || {
                let request = request.clone();
                async move {
                    self.wait_for_rate_limit().await;
                    let response = self.transport.send(request).await?;
                    if response.is_success() {
                        Ok(response)
                    } else {
                        Err(error_from_response(&response))
                    }
                }
            })
            .await
    }

    /// Fetch every page of an issue listing, dropping pull requests.
    async fn list_issue_pages(&self, base_path: &str) -> platform::Result<Vec<Issue>> {
        let mut all = Vec::new();
        let mut page = 1u32;

        loop {
            let path = format!("{base_path}&per_page={PAGE_SIZE}&page={page}");
            let response = self.send(HttpMethod::Get, &path, None).await?;
            let issues = parse_issues(&response.body)?;
            let count = issues.len();
            all.extend(issues.into_iter().filter(|issue| !issue.is_pull_request));

            let next = response
                .header("link")
                .map(parse_link_header)
                .and_then(|links| links.next_page);

            match next {
                Some(next_page) if next_page > page => page = next_page,
                // No Link header: fall back to the short-page rule.
                None if count == PAGE_SIZE as usize && response.header("link").is_none() => {
                    page += 1
                }
                _ => break,
            }
        }

        Ok(all)
    }

    async fn patch_issue(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        body: serde_json::Value,
    ) -> platform::Result<()> {
        self.send(
            HttpMethod::Patch,
            &format!("/repos/{org}/{repo}/issues/{number}"),
            Some(body),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl IssueTracker for GitHubClient {
    async fn list_issues_updated_since(
        &self,
        org: &str,
        repo: &str,
        since: Option<DateTime<Utc>>,
    ) -> platform::Result<Vec<Issue>> {
        let mut path = format!("/repos/{org}/{repo}/issues?state=all&sort=updated&direction=asc");
        if let Some(since) = since {
            path.push_str("&since=");
            path.push_str(&format_since(since));
        }
        self.list_issue_pages(&path).await
    }

    async fn list_open_issues(&self, org: &str, repo: &str) -> platform::Result<Vec<Issue>> {
        self.list_issue_pages(&format!(
            "/repos/{org}/{repo}/issues?state=open&sort=created&direction=asc"
        ))
        .await
    }

    async fn get_issue(
        &self,
        org: &str,
        repo: &str,
        number: u64,
    ) -> platform::Result<Option<Issue>> {
        match self
            .send(
                HttpMethod::Get,
                &format!("/repos/{org}/{repo}/issues/{number}"),
                None,
            )
            .await
        {
            Ok(response) => parse_issue(&response.body).map(Some),
            // 410 Gone: issue deleted or transferred away.
            Err(e) if e.is_not_found() || e.status_code() == Some(410) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_issue(
        &self,
        org: &str,
        repo: &str,
        issue: &NewIssue,
    ) -> platform::Result<Issue> {
        let body = CreateIssueBody {
            title: &issue.title,
            body: issue.body.as_deref().filter(|b| !b.is_empty()),
            milestone: issue.milestone,
        };
        let body = serde_json::to_value(&body).map_err(|e| ApiError::internal(e.to_string()))?;
        let response = self
            .send(
                HttpMethod::Post,
                &format!("/repos/{org}/{repo}/issues"),
                Some(body),
            )
            .await?;
        parse_issue(&response.body)
    }

    async fn set_issue_state(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        state: IssueState,
    ) -> platform::Result<()> {
        self.patch_issue(org, repo, number, serde_json::json!({ "state": state.as_str() }))
            .await
    }

    async fn set_issue_milestone(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        milestone: Option<u64>,
    ) -> platform::Result<()> {
        self.patch_issue(org, repo, number, serde_json::json!({ "milestone": milestone }))
            .await
    }

    async fn list_milestones(&self, org: &str, repo: &str) -> platform::Result<Vec<Milestone>> {
        let mut all = Vec::new();
        let mut page = 1u32;

        loop {
            let path =
                format!("/repos/{org}/{repo}/milestones?state=all&per_page={PAGE_SIZE}&page={page}");
            let response = self.send(HttpMethod::Get, &path, None).await?;
            let milestones: Vec<GitHubMilestone> = serde_json::from_slice(&response.body)
                .map_err(|e| ApiError::validation("milestone", e.to_string()))?;
            let count = milestones.len();
            all.extend(milestones.into_iter().map(to_milestone));

            if count < PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }

        Ok(all)
    }
}
