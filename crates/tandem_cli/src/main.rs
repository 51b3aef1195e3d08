//! Tandem CLI - keeps GitHub issues and Todoist tasks in sync.

mod commands;
mod config;
mod progress;
mod shutdown;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::status::OutputFormat;

#[derive(Parser)]
#[command(name = "tandem")]
#[command(version)]
#[command(about = "Two-way sync between GitHub issues and Todoist tasks")]
#[command(
    long_about = "Tandem mirrors GitHub issues into Todoist and carries task changes back. \
Todoist parent projects stand for organizations, their sub-projects for repositories, \
and sections for milestones. Each cycle polls both sides and resumes from where the \
last successful cycle stopped."
)]
#[command(after_long_help = r#"EXAMPLES
    Run a single sync cycle:
        $ tandem sync

    Keep syncing every poll interval until Ctrl+C:
        $ tandem sync --watch

    See what a cycle would change without touching anything:
        $ tandem sync --dry-run

    Re-import open issues for one repository project:
        $ tandem backfill --group 2203306142

CONFIGURATION
    Tandem reads configuration from:
      1. ~/.config/tandem/config.toml (or $XDG_CONFIG_HOME/tandem/config.toml)
      2. ./tandem.toml
      3. Environment variables (TANDEM_* prefix, nested with __)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    TANDEM_DATABASE_URL       Database connection string (default: ~/.local/state/tandem/tandem.db)
    TANDEM_GITHUB_TOKEN       GitHub personal access token
    TANDEM_TODOIST_TOKEN      Todoist API token
    TANDEM_ORG_MAPPING        JSON object of Todoist parent project id to GitHub organization
    RUST_LOG                  Log filter (default: tandem=info,tandem_cli=info)
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync cycle
    Sync {
        /// Keep running, one cycle per poll interval
        #[arg(short, long)]
        watch: bool,

        /// Dry run - show what would be done without making changes
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Show sync health and cursors
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
    /// Request a backfill of open issues on the next cycle
    Backfill {
        /// Todoist sub-project id(s) to backfill
        #[arg(short, long = "group", required_unless_present = "all", conflicts_with = "all")]
        groups: Vec<String>,

        /// Backfill every tracked repository
        #[arg(long)]
        all: bool,
    },
    /// Reset sync state to defaults
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("tandem=info,tandem_cli=info"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration (config file -> env vars -> defaults)
    let config = config::Config::load();

    let cli = Cli::parse();

    let database_url = config
        .database_url()
        .ok_or("Could not determine a database URL; set TANDEM_DATABASE_URL")?;

    // Ensure the database directory exists for SQLite
    if database_url.starts_with("sqlite://") {
        let db_path = database_url.trim_start_matches("sqlite://");
        // Strip query parameters (e.g., ?mode=rwc) before path operations
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        let db_path = std::path::Path::new(db_path);

        if db_path.is_relative() && !db_path.as_os_str().is_empty() {
            tracing::warn!(
                "Database path '{}' is relative - behavior depends on current directory. \
                 Consider using an absolute path.",
                db_path.display()
            );
        }

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
    }

    match cli.command {
        Commands::Sync { watch, dry_run } => {
            commands::sync::handle_sync(&config, &database_url, watch, dry_run).await?;
        }
        Commands::Status { output } => {
            commands::status::handle_status(&config, &database_url, output).await?;
        }
        Commands::Backfill { groups, all } => {
            commands::backfill::handle_backfill(&config, &database_url, groups, all).await?;
        }
        Commands::Reset { yes } => {
            commands::reset::handle_reset(&config, &database_url, yes).await?;
        }
        Commands::Migrate { action } => {
            commands::migrate::handle_migrate(action, &database_url).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_backfill_requires_scope() {
        assert!(Cli::try_parse_from(["tandem", "backfill"]).is_err());
        assert!(Cli::try_parse_from(["tandem", "backfill", "--all", "--group", "1"]).is_err());

        let cli = Cli::try_parse_from(["tandem", "backfill", "-g", "1", "-g", "2"]).unwrap();
        match cli.command {
            Commands::Backfill { groups, all } => {
                assert_eq!(groups, vec!["1", "2"]);
                assert!(!all);
            }
            _ => panic!("expected backfill"),
        }
    }

    #[test]
    fn test_sync_flags() {
        let cli = Cli::try_parse_from(["tandem", "sync", "--watch", "-n"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sync {
                watch: true,
                dry_run: true
            }
        ));
    }
}
