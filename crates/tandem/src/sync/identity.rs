//! Cross-system identity: issue links embedded in task text.
//!
//! A linked task carries the issue URL in its description and a
//! `[#N] ` prefix on its content. Both parsers distinguish "nothing there"
//! from "something there that does not parse".
//!
//! Descriptions are free text and may mention unrelated issues, so a task's
//! own link is looked up with [`find_issue_link`] inside a [`LinkScope`]:
//! the configured web host and the repository the task is routed to.

use thiserror::Error;

/// Why no link was parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkParseError {
    /// The text contains nothing that looks like a link.
    #[error("no issue link present")]
    Absent,
    /// A link-like fragment was found but is not a valid issue reference.
    #[error("malformed issue link: {0}")]
    Malformed(String),
}

/// A parsed reference to one issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueLink {
    /// Canonical browser URL (no query or fragment).
    pub url: String,
    pub org: String,
    pub repo: String,
    pub number: u64,
}

impl IssueLink {
    /// Build a link from its parts under `web_base` (e.g. `https://github.com`).
    pub fn from_parts(web_base: &str, full_repo_name: &str, number: u64) -> Result<Self, LinkParseError> {
        let url = format!(
            "{}/{}/issues/{}",
            web_base.trim_end_matches('/'),
            full_repo_name,
            number
        );
        parse_issue_url(&url)
    }

    pub fn full_repo_name(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }
}

/// Canonical task title for an issue.
pub fn canonical_title(number: u64, title: &str) -> String {
    format!("[#{number}] {title}")
}

/// Parse one URL of the form `{scheme}://{host}/{org}/{repo}/issues/{n}`.
pub fn parse_issue_url(candidate: &str) -> Result<IssueLink, LinkParseError> {
    let malformed = || LinkParseError::Malformed(candidate.to_string());

    let url = url::Url::parse(candidate).map_err(|_| malformed())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(malformed());
    }
    let host = url.host_str().ok_or_else(malformed)?;

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    let [org, repo, "issues", number] = segments.as_slice() else {
        return Err(malformed());
    };
    let number: u64 = number.parse().map_err(|_| malformed())?;
    if number == 0 {
        return Err(malformed());
    }

    let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
    Ok(IssueLink {
        url: format!("{}://{host}{port}/{org}/{repo}/issues/{number}", url.scheme()),
        org: (*org).to_string(),
        repo: (*repo).to_string(),
        number,
    })
}

/// Fragments of `text` that look like issue URLs, in order.
fn link_candidates(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| c.is_whitespace() || matches!(c, '<' | '>' | '(' | ')' | '[' | ']' | '"'))
        .map(|token| token.trim_end_matches(['.', ',', ';', ':', '!', '?']))
        .filter(|token| {
            (token.starts_with("https://") || token.starts_with("http://"))
                && token.contains("/issues/")
        })
}

/// Find the first issue link in free text, wherever it points.
///
/// Only fragments starting with `http(s)://` and containing `/issues/` are
/// candidates; the first candidate decides the result.
pub fn parse_issue_link(text: &str) -> Result<IssueLink, LinkParseError> {
    let candidate = link_candidates(text).next().ok_or(LinkParseError::Absent)?;
    parse_issue_url(candidate)
}

/// Where a task's own issue link may point.
#[derive(Debug, Clone, Copy)]
pub struct LinkScope<'a> {
    web_base: &'a str,
    full_repo_name: Option<&'a str>,
}

impl<'a> LinkScope<'a> {
    /// Links under `web_base`, and inside `full_repo_name` when the task is
    /// routed. An unrouted task is only held to the host.
    pub fn new(web_base: &'a str, full_repo_name: Option<&'a str>) -> Self {
        Self {
            web_base,
            full_repo_name,
        }
    }

    pub fn contains(&self, link: &IssueLink) -> bool {
        self.covers(&link.url)
    }

    /// Host and port match the web base, and the first two path segments
    /// name the repository. Both compare case-insensitively.
    fn covers(&self, candidate: &str) -> bool {
        let (Ok(base), Ok(url)) = (url::Url::parse(self.web_base), url::Url::parse(candidate)) else {
            return false;
        };
        let same_host = match (base.host_str(), url.host_str()) {
            (Some(expected), Some(actual)) => {
                expected.eq_ignore_ascii_case(actual) && base.port() == url.port()
            }
            _ => false,
        };
        if !same_host {
            return false;
        }

        let Some(full_repo_name) = self.full_repo_name else {
            return true;
        };
        let mut segments = url
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|seg| !seg.is_empty());
        match (segments.next(), segments.next()) {
            (Some(org), Some(repo)) => format!("{org}/{repo}").eq_ignore_ascii_case(full_repo_name),
            _ => false,
        }
    }
}

/// Find the task's own issue link in free text.
///
/// Candidates outside `scope` are ignored; the first candidate inside it
/// decides the result.
pub fn find_issue_link(text: &str, scope: &LinkScope<'_>) -> Result<IssueLink, LinkParseError> {
    let candidate = link_candidates(text)
        .find(|candidate| scope.covers(candidate))
        .ok_or(LinkParseError::Absent)?;
    parse_issue_url(candidate)
}

/// Parse the `[#N] title` prefix of task content.
///
/// Returns the issue number and the remaining title.
pub fn parse_title_prefix(content: &str) -> Result<(u64, &str), LinkParseError> {
    let trimmed = content.trim_start();
    let Some(rest) = trimmed.strip_prefix("[#") else {
        return Err(LinkParseError::Absent);
    };
    let malformed = || LinkParseError::Malformed(content.to_string());

    let close = rest.find(']').ok_or_else(malformed)?;
    let number: u64 = rest[..close].parse().map_err(|_| malformed())?;
    Ok((number, rest[close + 1..].trim_start()))
}
