use std::sync::Arc;

use console::{Term, style};
use tandem::sync::{CycleReport, SyncError};

use crate::commands::shared::{build_context, open_store};
use crate::config::Config;
use crate::progress::LoggingReporter;
use crate::shutdown::{is_shutdown_requested, setup_shutdown_handler, sleep_unless_shutdown};

pub(crate) async fn handle_sync(
    config: &Config,
    database_url: &str,
    watch: bool,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let options = config.sync_options(dry_run)?;
    let store = open_store(database_url).await?;
    let reporter = Arc::new(LoggingReporter::new());
    let ctx = build_context(config, store, options, Some(reporter.as_callback()))?;

    if !watch {
        let report = ctx.run_cycle().await?;
        display_report(&report);
        if !report.is_clean() {
            return Err(format!("sync finished with {} failure(s)", report.failures.len()).into());
        }
        return Ok(());
    }

    setup_shutdown_handler();
    let interval = config.poll_interval();
    tracing::info!(interval_secs = interval.as_secs(), dry_run, "Watching for changes");

    loop {
        match ctx.run_cycle().await {
            Ok(report) => display_report(&report),
            Err(SyncError::LeaseHeld) => {
                tracing::warn!("Another sync holds the lease, skipping this cycle");
            }
            Err(SyncError::LeaseLost) => {
                tracing::warn!("Sync lease expired mid-cycle, cursors were not saved");
            }
            // Already recorded in the persisted error history.
            Err(e) => tracing::error!(error = %e, "Sync cycle failed"),
        }

        if is_shutdown_requested() || !sleep_unless_shutdown(interval).await {
            break;
        }
    }

    tracing::info!("Stopped watching");
    Ok(())
}

fn display_report(report: &CycleReport) {
    if !Term::stdout().is_term() {
        tracing::info!(
            poll_count = report.poll_count,
            issues_changed = report.issues.changed(),
            tasks_changed = report.tasks.changed(),
            completions_closed = report.completions.outcomes.completed,
            failures = report.failures.len(),
            "Cycle summary"
        );
        return;
    }

    let prefix = if report.dry_run { "[dry run] " } else { "" };
    println!("{prefix}Cycle {} complete", report.poll_count);
    if report.baseline_groups > 0 {
        println!("  Baseline:    {} repositories", report.baseline_groups);
    }
    if let Some(backfill) = &report.backfill {
        println!(
            "  Backfill:    {} created, {} failed, {} groups pending",
            backfill.created,
            backfill.failed,
            backfill.incomplete_group_ids.len()
        );
    }
    println!(
        "  Issues:      {} changed, {} skipped, {} errors",
        report.issues.changed(),
        report.issues.skipped,
        report.issues.errors
    );
    println!(
        "  Tasks:       {} changed, {} skipped, {} errors",
        report.tasks.changed(),
        report.tasks.skipped,
        report.tasks.errors
    );
    println!(
        "  Completions: {} closed, {} unresolved",
        report.completions.outcomes.completed, report.completions.unresolved
    );
    for failure in &report.failures {
        println!(
            "  {} {}: {}",
            style("!").red().bold(),
            failure.operation,
            failure.message
        );
    }
}
