//! Validation of GitHub payloads into domain entities.

use crate::platform::{ApiError, Issue, IssueState, Milestone};

use super::types::{GitHubIssue, GitHubMilestone};

/// Parse an issue state string.
fn to_issue_state(state: &str) -> Result<IssueState, ApiError> {
    match state {
        "open" => Ok(IssueState::Open),
        "closed" => Ok(IssueState::Closed),
        other => Err(ApiError::validation(
            "issue",
            format!("unknown state {other:?}"),
        )),
    }
}

/// Convert a milestone.
pub fn to_milestone(milestone: GitHubMilestone) -> Milestone {
    Milestone {
        number: milestone.number,
        title: milestone.title,
    }
}

/// Convert a raw GitHub issue into an [`Issue`].
///
/// Rejects unknown states and non-HTTP URLs rather than guessing.
pub fn to_issue(raw: GitHubIssue) -> Result<Issue, ApiError> {
    let state = to_issue_state(&raw.state)?;

    let url = url::Url::parse(&raw.html_url)
        .map_err(|e| ApiError::validation("issue", format!("bad html_url: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::validation(
            "issue",
            format!("html_url is not http(s): {}", raw.html_url),
        ));
    }

    Ok(Issue {
        number: raw.number,
        title: raw.title,
        url: raw.html_url,
        state,
        body: raw.body,
        milestone: raw.milestone.map(to_milestone),
        is_pull_request: raw.pull_request.is_some(),
        updated_at: raw.updated_at,
        routing: None,
    })
}

/// Deserialize and validate a JSON issue body.
pub fn parse_issue(body: &[u8]) -> Result<Issue, ApiError> {
    let raw: GitHubIssue =
        serde_json::from_slice(body).map_err(|e| ApiError::validation("issue", e.to_string()))?;
    to_issue(raw)
}

/// Deserialize and validate a JSON array of issues.
pub fn parse_issues(body: &[u8]) -> Result<Vec<Issue>, ApiError> {
    let raw: Vec<GitHubIssue> =
        serde_json::from_slice(body).map_err(|e| ApiError::validation("issue", e.to_string()))?;
    raw.into_iter().map(to_issue).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(state: &str, url: &str) -> GitHubIssue {
        GitHubIssue {
            number: 3,
            title: "Crash on start".to_string(),
            html_url: url.to_string(),
            state: state.to_string(),
            body: Some("details".to_string()),
            milestone: Some(GitHubMilestone {
                number: 1,
                title: "v1".to_string(),
            }),
            pull_request: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_to_issue_maps_fields() {
        let issue = to_issue(raw("closed", "https://github.com/acme/api/issues/3"))
            .expect("valid issue");

        assert_eq!(issue.number, 3);
        assert_eq!(issue.state, IssueState::Closed);
        assert_eq!(issue.milestone_title(), Some("v1"));
        assert!(!issue.is_pull_request);
        assert!(issue.routing.is_none());
    }

    #[test]
    fn test_to_issue_rejects_unknown_state() {
        let err = to_issue(raw("merged", "https://github.com/acme/api/issues/3"))
            .expect_err("unknown state");
        assert!(matches!(err, ApiError::Validation { entity: "issue", .. }));
    }

    #[test]
    fn test_to_issue_rejects_bad_url() {
        assert!(to_issue(raw("open", "not a url")).is_err());
        assert!(to_issue(raw("open", "ftp://github.com/acme/api/issues/3")).is_err());
    }

    #[test]
    fn test_parse_issues_flags_pull_requests() {
        let body = serde_json::json!([
            {"number": 1, "title": "Issue", "html_url": "https://github.com/a/b/issues/1", "state": "open"},
            {"number": 2, "title": "PR", "html_url": "https://github.com/a/b/pull/2", "state": "open",
             "pull_request": {"url": "https://api.github.com/repos/a/b/pulls/2"}}
        ]);
        let issues = parse_issues(body.to_string().as_bytes()).expect("valid list");

        assert_eq!(issues.len(), 2);
        assert!(!issues[0].is_pull_request);
        assert!(issues[1].is_pull_request);
    }

    #[test]
    fn test_parse_issue_reports_missing_fields_as_validation_error() {
        let err = parse_issue(br#"{"number": 1}"#).expect_err("missing fields");
        assert!(matches!(err, ApiError::Validation { .. }));
    }
}
