//! Configuration file support for tandem.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `TANDEM_`, nested with `__`,
//!    e.g. `TANDEM_SYNC__POLL_INTERVAL_SECS`)
//! 3. Config file (./tandem.toml, then ~/.config/tandem/config.toml)
//! 4. Built-in defaults
//!
//! `TANDEM_DATABASE_URL`, `TANDEM_GITHUB_TOKEN`, `TANDEM_TODOIST_TOKEN` and
//! `TANDEM_ORG_MAPPING` are also accepted as flat shortcuts.
//!
//! The database URL defaults to `sqlite://~/.local/state/tandem/tandem.db` on Linux
//! (using the XDG state directory) if not explicitly configured.
//!
//! Example config file:
//! ```toml
//! [database]
//! url = "sqlite://~/.local/state/tandem/tandem.db"  # optional, this is the default
//!
//! [github]
//! token = "ghp_..."  # or use TANDEM_GITHUB_TOKEN env var
//! requests_per_minute = 60
//!
//! [todoist]
//! token = "..."  # or use TANDEM_TODOIST_TOKEN env var
//! requests_per_minute = 50
//!
//! [sync]
//! poll_interval_secs = 300
//! max_tasks_per_sync = 30
//!
//! [sync.org_mapping]
//! "2203306141" = "acme"  # Todoist parent project id = GitHub organization
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::{Deserialize, Deserializer};
use tandem::github::GITHUB_API_URL;
use tandem::rate_limits;
use tandem::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RETRIES, RetryConfig};
use tandem::sync::{
    DEFAULT_HEALTH_FAILURE_THRESHOLD, DEFAULT_ISSUE_WEB_URL, DEFAULT_LEASE_TTL,
    DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_SECTIONS_PER_SYNC, DEFAULT_MAX_TASKS_PER_SYNC,
    DEFAULT_POLL_INTERVAL_SECS, OrgMapping, SyncOptions,
};
use tandem::todoist::TODOIST_API_URL;

/// Errors turning loaded configuration into runtime settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration value: {0}")]
    Missing(&'static str),

    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// GitHub configuration.
    pub github: ServiceConfig,
    /// Todoist configuration.
    pub todoist: ServiceConfig,
    /// Sync engine tuning.
    pub sync: SyncConfig,
}

/// Database configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL.
    /// Supports sqlite:// and postgres:// schemes.
    /// Defaults to `sqlite://~/.local/state/tandem/tandem.db` if not specified.
    pub url: Option<String>,
}

/// Credentials and limits for one external service.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub token: Option<String>,
    /// Override the API base URL (for proxies and tests).
    pub api_url: Option<String>,
    /// Outbound request budget; the service default when unset.
    pub requests_per_minute: Option<u32>,
}

/// Sync engine settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Todoist parent project id → GitHub organization.
    ///
    /// Config keys are case-folded, so mixed-case ids must use the JSON
    /// string form.
    #[serde(deserialize_with = "deserialize_org_mapping")]
    pub org_mapping: OrgMapping,
    /// Seconds between cycles in watch mode.
    pub poll_interval_secs: u64,
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_tasks_per_sync: usize,
    pub max_sections_per_sync: usize,
    pub max_batch_size: usize,
    pub health_failure_threshold: u32,
    /// Seconds a cycle lease survives if its holder dies.
    pub lease_ttl_secs: u64,
    /// Base URL used to rebuild issue links from task titles.
    pub issue_web_url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            org_mapping: OrgMapping::new(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_tasks_per_sync: DEFAULT_MAX_TASKS_PER_SYNC,
            max_sections_per_sync: DEFAULT_MAX_SECTIONS_PER_SYNC,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            health_failure_threshold: DEFAULT_HEALTH_FAILURE_THRESHOLD,
            lease_ttl_secs: DEFAULT_LEASE_TTL.as_secs(),
            issue_web_url: DEFAULT_ISSUE_WEB_URL.to_string(),
        }
    }
}

/// Accept the mapping as a TOML table or as a JSON object string (the form
/// an environment variable can carry).
fn deserialize_org_mapping<'de, D>(deserializer: D) -> Result<OrgMapping, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Table(BTreeMap<String, String>),
        Json(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Table(table) => Ok(table),
        Raw::Json(json) if json.trim().is_empty() => Ok(OrgMapping::new()),
        Raw::Json(json) => serde_json::from_str(&json).map_err(serde::de::Error::custom),
    }
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/tandem/config.toml)
    /// 3. Local config file (./tandem.toml)
    /// 4. Environment variables with TANDEM_ prefix
    /// 5. Flat shortcut variables for tokens, database and mapping
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = Self::default_config_path()
            && path.exists()
        {
            tracing::debug!(path = %path.display(), "Loading config file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let local_config = PathBuf::from("tandem.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./tandem.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // e.g., TANDEM_SYNC__MAX_BATCH_SIZE -> sync.max_batch_size
        builder = builder.add_source(
            Environment::with_prefix("TANDEM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        for (key, var) in [
            ("database.url", "TANDEM_DATABASE_URL"),
            ("github.token", "TANDEM_GITHUB_TOKEN"),
            ("todoist.token", "TANDEM_TODOIST_TOKEN"),
            ("sync.org_mapping", "TANDEM_ORG_MAPPING"),
        ] {
            match builder.set_override_option(key, std::env::var(var).ok()) {
                Ok(next) => builder = next,
                Err(e) => {
                    tracing::warn!(var, error = %e, "Ignoring environment override");
                    return Config::default();
                }
            }
        }

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        }
    }

    /// Get the database URL, falling back to the default state directory path.
    ///
    /// The `mode=rwc` parameter enables read-write access and creates the file if it doesn't exist.
    pub fn database_url(&self) -> Option<String> {
        self.database.url.clone().or_else(|| {
            Self::default_state_dir().map(|state_dir| {
                let db_path = state_dir.join("tandem.db");
                format!("sqlite://{}?mode=rwc", db_path.display())
            })
        })
    }

    pub fn github_token(&self) -> Result<&str, ConfigError> {
        non_empty(self.github.token.as_deref()).ok_or(ConfigError::Missing("github.token"))
    }

    pub fn todoist_token(&self) -> Result<&str, ConfigError> {
        non_empty(self.todoist.token.as_deref()).ok_or(ConfigError::Missing("todoist.token"))
    }

    pub fn github_api_url(&self) -> &str {
        self.github.api_url.as_deref().unwrap_or(GITHUB_API_URL)
    }

    pub fn todoist_api_url(&self) -> &str {
        self.todoist.api_url.as_deref().unwrap_or(TODOIST_API_URL)
    }

    pub fn github_requests_per_minute(&self) -> u32 {
        self.github
            .requests_per_minute
            .unwrap_or(rate_limits::GITHUB_DEFAULT_RPM)
    }

    pub fn todoist_requests_per_minute(&self) -> u32 {
        self.todoist
            .requests_per_minute
            .unwrap_or(rate_limits::TODOIST_DEFAULT_RPM)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync.poll_interval_secs.max(1))
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            Duration::from_millis(self.sync.base_delay_ms),
            Duration::from_millis(self.sync.max_delay_ms),
            self.sync.max_retries,
        )
    }

    /// Build engine options, validating the values the engine depends on.
    pub fn sync_options(&self, dry_run: bool) -> Result<SyncOptions, ConfigError> {
        let sync = &self.sync;
        if sync.org_mapping.is_empty() {
            return Err(ConfigError::Missing("sync.org_mapping"));
        }
        if let Some((group, _)) = sync.org_mapping.iter().find(|(_, org)| org.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "sync.org_mapping",
                reason: format!("group {group} maps to an empty organization"),
            });
        }
        if sync.max_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "sync.max_batch_size",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(SyncOptions {
            org_mapping: sync.org_mapping.clone(),
            max_tasks_per_sync: sync.max_tasks_per_sync,
            max_sections_per_sync: sync.max_sections_per_sync,
            max_batch_size: sync.max_batch_size,
            health_failure_threshold: sync.health_failure_threshold.max(1),
            lease_ttl: Duration::from_secs(sync.lease_ttl_secs.max(1)),
            issue_web_url: sync.issue_web_url.trim_end_matches('/').to_string(),
            dry_run,
        })
    }

    /// Get the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "tandem").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the default state directory path.
    ///
    /// On Linux, this is `$XDG_STATE_HOME/tandem` or `~/.local/state/tandem`.
    /// On macOS/Windows, falls back to the data directory.
    pub fn default_state_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "tandem").map(|dirs| {
            // state_dir() returns None on macOS/Windows, fall back to data_dir
            dirs.state_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| dirs.data_dir().to_path_buf())
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_content: &str) -> Config {
        ConfigBuilder::builder()
            .add_source(config::File::from_str(toml_content, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.database.url.is_none());
        assert!(config.github.token.is_none());
        assert!(config.todoist.token.is_none());
        assert_eq!(config.sync.poll_interval_secs, 300);
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync.base_delay_ms, 1000);
        assert_eq!(config.sync.max_delay_ms, 10_000);
        assert_eq!(config.sync.max_tasks_per_sync, 30);
        assert_eq!(config.sync.max_sections_per_sync, 10);
        assert_eq!(config.sync.max_batch_size, 100);
        assert_eq!(config.sync.health_failure_threshold, 3);
        assert_eq!(config.github_requests_per_minute(), 60);
        assert_eq!(config.todoist_requests_per_minute(), 50);
    }

    #[test]
    fn test_full_config_parsing() {
        let config = parse(
            r#"
            [database]
            url = "sqlite:///tmp/test.db"

            [github]
            token = "ghp_test123"
            requests_per_minute = 30

            [todoist]
            token = "todo_test"
            api_url = "http://localhost:9000/"

            [sync]
            poll_interval_secs = 60
            max_tasks_per_sync = 5

            [sync.org_mapping]
            "2203306141" = "acme"
        "#,
        );

        assert_eq!(config.database.url.as_deref(), Some("sqlite:///tmp/test.db"));
        assert_eq!(config.github_token().unwrap(), "ghp_test123");
        assert_eq!(config.github_requests_per_minute(), 30);
        assert_eq!(config.todoist_token().unwrap(), "todo_test");
        assert_eq!(config.todoist_api_url(), "http://localhost:9000/");
        assert_eq!(config.github_api_url(), "https://api.github.com");
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.sync.org_mapping["2203306141"], "acme");
        // Unset values keep their defaults.
        assert_eq!(config.sync.max_batch_size, 100);
    }

    #[test]
    fn test_org_mapping_accepts_json_string() {
        let config = parse(
            r#"
            [sync]
            org_mapping = '{"111": "acme", "222": "globex"}'
        "#,
        );

        assert_eq!(config.sync.org_mapping.len(), 2);
        assert_eq!(config.sync.org_mapping["222"], "globex");
    }

    #[test]
    fn test_org_mapping_rejects_bad_json() {
        let result = ConfigBuilder::builder()
            .add_source(config::File::from_str(
                "[sync]\norg_mapping = '{not json'",
                FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize::<Config>();

        assert!(result.is_err());
    }

    #[test]
    fn test_sync_options_require_mapping() {
        let config = Config::default();
        let err = config.sync_options(false).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("sync.org_mapping")));
    }

    #[test]
    fn test_sync_options_from_config() {
        let config = parse(
            r#"
            [sync]
            max_sections_per_sync = 4
            issue_web_url = "https://github.example.com/"

            [sync.org_mapping]
            "111" = "acme"
        "#,
        );

        let options = config.sync_options(true).unwrap();
        assert!(options.dry_run);
        assert_eq!(options.max_sections_per_sync, 4);
        assert_eq!(options.issue_web_url, "https://github.example.com");
        assert_eq!(options.org_mapping["111"], "acme");
    }

    #[test]
    fn test_blank_tokens_are_missing() {
        let config = parse(
            r#"
            [github]
            token = "  "
        "#,
        );
        assert!(matches!(
            config.github_token(),
            Err(ConfigError::Missing("github.token"))
        ));
        assert!(config.todoist_token().is_err());
    }

    #[test]
    fn test_retry_config_from_sync_section() {
        let config = parse(
            r#"
            [sync]
            max_retries = 5
            base_delay_ms = 200
        "#,
        );

        let retry = config.retry_config();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.base_delay, Duration::from_millis(200));
        assert_eq!(retry.max_delay, Duration::from_millis(10_000));
    }

    #[test]
    fn test_database_url_defaults_to_state_dir() {
        let config = Config::default();
        let url = config.database_url().unwrap();

        assert!(url.starts_with("sqlite://"));
        assert!(url.contains("tandem.db"));
        assert!(url.ends_with("?mode=rwc"));
    }

    #[test]
    fn test_config_invalid_toml() {
        let result = ConfigBuilder::builder()
            .add_source(config::File::from_str(
                "[sync\npoll_interval_secs = 60",
                FileFormat::Toml,
            ))
            .build();

        assert!(result.is_err());
    }
}
