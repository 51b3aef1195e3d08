//! GitHub issue client.
//!
//! # Module Structure
//!
//! - [`client`] - REST client implementing [`crate::platform::IssueTracker`]
//! - [`error`] - Error response mapping (rate-limit detection)
//! - [`types`] - Raw API payloads
//! - [`convert`] - Validation of payloads into domain entities

mod client;
mod convert;
mod error;
mod types;

pub use client::{GITHUB_API_URL, GitHubClient, LinkPagination, parse_link_header};
pub use convert::{parse_issue, parse_issues, to_issue};
pub use error::{error_from_response, parse_retry_after};
pub use types::{GitHubIssue, GitHubMilestone};
