use std::path::Path;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::cmd::{DaemonArgs, PullArgs};
use crate::exit::{io_error, sync_error, CliResult, SUCCESS};
use crate::output::{print_transfer, OutputFormat, TransferOutput};

pub async fn run(args: PullArgs, daemon: &DaemonArgs, format: OutputFormat) -> CliResult<i32> {
    let target = args.local.as_deref().filter(|path| *path != Path::new("-"));

    let sync = daemon.sync_session().await?;
    let pulled = match target {
        Some(path) => {
            let mut file = tokio::fs::File::create(path)
                .await
                .map_err(|err| io_error("cannot create local file", err))?;
            let copied = sync.pull_to(&args.remote, &mut file).await;
            match &copied {
                Ok(_) => file
                    .flush()
                    .await
                    .map_err(|err| io_error("cannot write local file", err))?,
                Err(_) => {
                    drop(file);
                    if let Err(err) = tokio::fs::remove_file(path).await {
                        debug!(error = %err, "removing partial file failed");
                    }
                }
            }
            copied
        }
        None => {
            let mut stdout = tokio::io::stdout();
            let copied = sync.pull_to(&args.remote, &mut stdout).await;
            if let Err(err) = stdout.flush().await {
                debug!(error = %err, "flushing stdout failed");
            }
            copied
        }
    };
    if let Err(err) = sync.end().await {
        debug!(error = %err, "closing sync session failed");
    }
    let bytes = pulled.map_err(|err| sync_error("pull failed", err))?;

    info!(remote = %args.remote, bytes, "pulled");
    // Stdout carries the file itself when no local path was given.
    if let Some(path) = target {
        let local = path.display().to_string();
        print_transfer(
            &TransferOutput {
                direction: "pull",
                local: &local,
                remote: &args.remote,
                bytes,
            },
            format,
        );
    }
    Ok(SUCCESS)
}
