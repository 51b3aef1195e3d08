use crate::commands::shared::{build_context, open_store};
use crate::config::Config;

pub(crate) async fn handle_reset(
    config: &Config,
    database_url: &str,
    yes: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !yes {
        return Err("reset discards all cursors and known groups; pass --yes to confirm".into());
    }

    let store = open_store(database_url).await?;
    let ctx = build_context(config, store, config.sync_options(false)?, None)?;
    ctx.reset_state().await?;

    println!("Sync state reset. The next cycle performs a full scan.");
    Ok(())
}
