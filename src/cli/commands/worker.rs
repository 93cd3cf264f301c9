//! Worker command - serve one build over stdin/stdout

use crate::cli::args::WorkerArgs;
use crate::error::BrokerResult;
use crate::worker::{self, WorkerSettings};
use tracing::debug;

/// Execute the hidden worker command
pub async fn execute(args: WorkerArgs) -> BrokerResult<()> {
    let settings = WorkerSettings::from(args);
    debug!("Worker started (work root: {})", settings.work_root.display());
    worker::serve(settings, tokio::io::stdin(), tokio::io::stdout()).await
}
