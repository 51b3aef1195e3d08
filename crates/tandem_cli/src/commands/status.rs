use clap::ValueEnum;
use console::style;
use serde_json::json;
use tandem::sync::{HealthStatus, SyncStateStore};

use crate::commands::shared::open_store;
use crate::config::Config;

/// Output format for status display.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Human-readable summary (default)
    #[default]
    Text,
    /// Display as JSON
    Json,
}

pub(crate) async fn handle_status(
    config: &Config,
    database_url: &str,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(database_url).await?;
    let state = SyncStateStore::new(store).load().await?;
    let health = state.health(config.sync.health_failure_threshold.max(1));

    match output {
        OutputFormat::Json => {
            let value = json!({ "health": health, "state": state });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            let status = match health.status {
                HealthStatus::Healthy => style(health.status.as_str()).green(),
                HealthStatus::Degraded => style(health.status.as_str()).yellow(),
                HealthStatus::Error => style(health.status.as_str()).red(),
            };
            println!("Status:               {}", status.bold());
            println!("Polls:                {}", state.poll_count);
            println!("Consecutive failures: {}", health.consecutive_failures);
            println!("Total errors:         {}", health.error_count);
            println!("Last poll:            {}", display_time(state.last_poll_time));
            println!("Last success:         {}", display_time(health.last_successful_sync));
            println!("Issue cursor:         {}", display_time(state.source_cursor));
            println!("Completion cursor:    {}", display_time(state.last_completed_cursor));
            println!("Task sync token:      {}", state.target_sync_token);
            println!("Known groups:         {}", state.known_group_ids.len());
            if state.force_backfill.enabled {
                if state.force_backfill.group_ids.is_empty() {
                    println!("Pending backfill:     all groups");
                } else {
                    println!(
                        "Pending backfill:     {}",
                        state.force_backfill.group_ids.join(", ")
                    );
                }
            }
            if !health.recent_errors.is_empty() {
                println!("\nRecent errors:");
                for error in &health.recent_errors {
                    println!(
                        "  {} {}: {}",
                        error.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        error.operation,
                        error.message
                    );
                }
            }
        }
    }

    Ok(())
}

fn display_time(at: Option<chrono::DateTime<chrono::Utc>>) -> String {
    at.map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string())
}
