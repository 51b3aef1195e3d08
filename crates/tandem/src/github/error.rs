//! Mapping of GitHub error responses to [`ApiError`].

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::http::HttpResponse;
use crate::platform::ApiError;

use super::types::GitHubErrorBody;

/// Parse a `Retry-After` header given in whole seconds.
pub fn parse_retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .header("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Time until the primary rate limit resets, from `x-ratelimit-reset`.
fn reset_wait(response: &HttpResponse, now: DateTime<Utc>) -> Option<Duration> {
    let reset_epoch = response
        .header("x-ratelimit-reset")?
        .trim()
        .parse::<i64>()
        .ok()?;
    let reset_at = DateTime::from_timestamp(reset_epoch, 0)?;
    Some((reset_at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Whether a 403 is GitHub's primary quota being exhausted.
fn is_primary_limit_exhausted(response: &HttpResponse) -> bool {
    response.status == 403 && response.header("x-ratelimit-remaining") == Some("0")
}

/// Extract the human-readable message from an error body.
fn error_message(response: &HttpResponse) -> String {
    serde_json::from_slice::<GitHubErrorBody>(&response.body)
        .map(|b| b.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(&response.body).into_owned())
}

/// Convert a non-success response into an [`ApiError`].
pub fn error_from_response(response: &HttpResponse) -> ApiError {
    let message = error_message(response);

    if response.status == 429 {
        return ApiError::RateLimited {
            retry_after: parse_retry_after(response),
            message,
        };
    }

    if is_primary_limit_exhausted(response) {
        return ApiError::RateLimited {
            retry_after: parse_retry_after(response).or_else(|| reset_wait(response, Utc::now())),
            message,
        };
    }

    ApiError::status(response.status, message)
}
