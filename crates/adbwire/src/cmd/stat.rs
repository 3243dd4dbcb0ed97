use tracing::debug;

use crate::cmd::{DaemonArgs, StatArgs};
use crate::exit::{sync_error, CliResult, SUCCESS};
use crate::output::{print_stats, OutputFormat};

pub async fn run(args: StatArgs, daemon: &DaemonArgs, format: OutputFormat) -> CliResult<i32> {
    let sync = daemon.sync_session().await?;
    let stats = sync.stat(&args.path).await;
    if let Err(err) = sync.end().await {
        debug!(error = %err, "closing sync session failed");
    }
    let stats = stats.map_err(|err| sync_error("stat failed", err))?;

    print_stats(&args.path, &stats, format);
    Ok(SUCCESS)
}
