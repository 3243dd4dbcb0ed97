use adbwire_bridge::{BridgeConfig, BridgeServer};
use tracing::info;

use crate::cmd::{BridgeArgs, DaemonArgs};
use crate::exit::{bridge_error, io_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_listening, OutputFormat};

pub async fn run(args: BridgeArgs, daemon: &DaemonArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = BridgeConfig::default().with_backend(daemon.options());
    if let Some(serial) = &daemon.serial {
        config = config.with_serial(serial.clone());
    }
    if let Some(max) = args.max_payload {
        config = config.with_max_packet_payload(max);
    }

    let server = BridgeServer::bind(&args.listen, config)
        .await
        .map_err(|err| bridge_error("bind failed", err))?;
    let addr = server
        .local_addr()
        .map_err(|err| bridge_error("bind failed", err))?
        .to_string();
    print_listening(&addr, daemon.serial.as_deref(), format);

    let closer = server.closer();
    let serving = tokio::spawn(async move { server.run().await });
    let interrupted = tokio::signal::ctrl_c().await;
    info!("shutting down bridge");
    closer.close();
    interrupted.map_err(|err| io_error("signal handler setup failed", err))?;

    serving
        .await
        .map_err(|err| CliError::new(INTERNAL, format!("bridge task failed: {err}")))?
        .map_err(|err| bridge_error("bridge failed", err))?;
    Ok(SUCCESS)
}
