use tracing::debug;

use crate::cmd::{DaemonArgs, LsArgs};
use crate::exit::{sync_error, CliResult, SUCCESS};
use crate::output::{print_entries, OutputFormat};

pub async fn run(args: LsArgs, daemon: &DaemonArgs, format: OutputFormat) -> CliResult<i32> {
    let sync = daemon.sync_session().await?;
    let listed = sync.readdir(&args.path).await;
    if let Err(err) = sync.end().await {
        debug!(error = %err, "closing sync session failed");
    }
    let mut entries = listed.map_err(|err| sync_error("list failed", err))?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    print_entries(&entries, format);
    Ok(SUCCESS)
}
