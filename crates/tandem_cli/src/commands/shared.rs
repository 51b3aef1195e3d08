use std::sync::Arc;
use std::time::Duration;

use tandem::github::GitHubClient;
use tandem::http::ReqwestTransport;
use tandem::retry::RetryPolicy;
use tandem::sync::{ProgressCallback, SyncContext, SyncOptions};
use tandem::todoist::TodoistClient;
use tandem::{ApiRateLimiter, DbKvStore, connect_and_migrate};

use crate::config::Config;

/// Timeout for a single HTTP request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect to the database, applying pending migrations.
pub(crate) async fn open_store(
    database_url: &str,
) -> Result<Arc<DbKvStore>, Box<dyn std::error::Error>> {
    let db = connect_and_migrate(database_url).await?;
    Ok(Arc::new(DbKvStore::new(db)))
}

/// Build a sync context with live clients for both services.
pub(crate) fn build_context(
    config: &Config,
    store: Arc<DbKvStore>,
    options: SyncOptions,
    progress: Option<Arc<ProgressCallback>>,
) -> Result<SyncContext, Box<dyn std::error::Error>> {
    let retry = RetryPolicy::new(config.retry_config());

    let github = GitHubClient::new_with_transport(
        config.github_api_url(),
        config.github_token()?,
        Some(ApiRateLimiter::new(config.github_requests_per_minute())),
        retry,
        Arc::new(ReqwestTransport::with_timeout(REQUEST_TIMEOUT)?),
    );
    let todoist = TodoistClient::new_with_transport(
        config.todoist_api_url(),
        config.todoist_token()?,
        Some(ApiRateLimiter::new(config.todoist_requests_per_minute())),
        retry,
        Arc::new(ReqwestTransport::with_timeout(REQUEST_TIMEOUT)?),
    );

    let mut builder = SyncContext::builder()
        .issue_tracker(Arc::new(github))
        .task_manager(Arc::new(todoist))
        .store(store)
        .options(options);
    if let Some(progress) = progress {
        builder = builder.progress(progress);
    }
    Ok(builder.build()?)
}
