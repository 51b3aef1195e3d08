//! Mapping of Todoist error responses to [`ApiError`].

use std::time::Duration;

use crate::http::HttpResponse;
use crate::platform::ApiError;

/// Wait hint from the `Retry-After` header or the Sync API's
/// `error_extra.retry_after` body field.
fn retry_after(response: &HttpResponse, body: Option<&serde_json::Value>) -> Option<Duration> {
    response
        .header("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .or_else(|| {
            body.and_then(|b| b.pointer("/error_extra/retry_after"))
                .and_then(|v| v.as_u64())
        })
        .map(Duration::from_secs)
}

/// Convert a non-success response into an [`ApiError`].
pub fn error_from_response(response: &HttpResponse) -> ApiError {
    let body = serde_json::from_slice::<serde_json::Value>(&response.body).ok();
    let message = body
        .as_ref()
        .and_then(|b| b.get("error"))
        .and_then(|e| e.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| String::from_utf8_lossy(&response.body).into_owned());

    if response.status == 429 {
        return ApiError::RateLimited {
            retry_after: retry_after(response, body.as_ref()),
            message,
        };
    }

    ApiError::status(response.status, message)
}
