//! Clean command - remove stale work directories

use crate::config::Config;
use crate::error::BrokerResult;
use crate::ui::{self, UiContext};
use crate::worker::workdir::clean_root;

/// Execute the clean command
pub async fn execute(config: &Config) -> BrokerResult<()> {
    let ctx = UiContext::detect();
    let work_root = &config.worker.work_root;

    let removed = clean_root(work_root).await?;
    if removed == 0 {
        ui::step_ok(&ctx, "Work root is already clean");
        return Ok(());
    }

    ui::step_ok_detail(
        &ctx,
        &format!("Removed {} stale work director{}", removed, if removed == 1 { "y" } else { "ies" }),
        &work_root.display().to_string(),
    );
    Ok(())
}
