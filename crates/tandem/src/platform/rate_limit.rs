use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Type alias for the governor rate limiter.
type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Default outbound budgets per external system (requests per minute).
pub mod rate_limits {
    /// GitHub: 5000 requests/hour authenticated, we pace at 60/min.
    pub const GITHUB_DEFAULT_RPM: u32 = 60;
    /// Todoist: 450 requests per 15 minutes, we pace at 50/min.
    pub const TODOIST_DEFAULT_RPM: u32 = 50;
}

/// Token bucket limiting outbound calls to one external system.
///
/// Capacity equals the per-minute budget and refills continuously, so a
/// full bucket allows an immediate burst of `requests_per_minute` calls,
/// after which each further call waits `60s / requests_per_minute`.
///
/// # Example
///
/// ```ignore
/// use tandem::platform::ApiRateLimiter;
///
/// let limiter = ApiRateLimiter::new(60);
///
/// // Before each API call:
/// limiter.acquire().await;
/// client.some_api_call().await?;
/// ```
#[derive(Clone)]
pub struct ApiRateLimiter {
    inner: Arc<GovernorRateLimiter>,
    clock: DefaultClock,
    requests_per_minute: u32,
}

impl ApiRateLimiter {
    /// Create a new rate limiter with the specified requests per minute.
    ///
    /// A budget of 0 is treated as 1.
    pub fn new(requests_per_minute: u32) -> Self {
        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_minute(rpm));

        Self {
            inner: Arc::new(rate_limiter),
            clock: DefaultClock::default(),
            requests_per_minute: rpm.get(),
        }
    }

    /// The configured budget.
    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    /// Take one token if available, otherwise report how long until one is.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.inner
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Wait until a token is available, then debit it.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => {
                    tracing::debug!(
                        wait_ms = wait.as_millis() as u64,
                        rpm = self.requests_per_minute,
                        "Rate limiter exhausted, waiting for token"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for ApiRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRateLimiter")
            .field("requests_per_minute", &self.requests_per_minute)
            .finish()
    }
}
