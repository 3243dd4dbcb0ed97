use tracing::{debug, info};

use crate::cmd::{DaemonArgs, PushArgs};
use crate::exit::{io_error, sync_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_transfer, OutputFormat, TransferOutput};

pub async fn run(args: PushArgs, daemon: &DaemonArgs, format: OutputFormat) -> CliResult<i32> {
    let metadata = tokio::fs::metadata(&args.local)
        .await
        .map_err(|err| io_error("cannot read local file", err))?;
    if metadata.is_dir() {
        return Err(CliError::new(
            USAGE,
            format!("{} is a directory", args.local.display()),
        ));
    }

    let sync = daemon.sync_session().await?;
    let pushed = match sync.push_file(&args.local, &args.remote, args.mode).await {
        Ok(transfer) => transfer.wait().await,
        Err(err) => Err(err),
    };
    if let Err(err) = sync.end().await {
        debug!(error = %err, "closing sync session failed");
    }
    let bytes = pushed.map_err(|err| sync_error("push failed", err))?;

    let local = args.local.display().to_string();
    info!(local = %local, remote = %args.remote, bytes, "pushed");
    print_transfer(
        &TransferOutput {
            direction: "push",
            local: &local,
            remote: &args.remote,
            bytes,
        },
        format,
    );
    Ok(SUCCESS)
}
