use tandem::sync::BackfillScope;

use crate::commands::shared::{build_context, open_store};
use crate::config::Config;

pub(crate) async fn handle_backfill(
    config: &Config,
    database_url: &str,
    groups: Vec<String>,
    all: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let scope = if all {
        BackfillScope::All
    } else {
        BackfillScope::Groups(groups)
    };

    let store = open_store(database_url).await?;
    let ctx = build_context(config, store, config.sync_options(false)?, None)?;
    let state = ctx.request_backfill(scope).await?;

    if state.force_backfill.group_ids.is_empty() {
        println!("Backfill of all groups requested for the next cycle.");
    } else {
        println!(
            "Backfill requested for the next cycle: {}",
            state.force_backfill.group_ids.join(", ")
        );
    }
    Ok(())
}
