use std::path::PathBuf;

use adbwire_sync::{SyncSession, DEFAULT_PUSH_MODE};
use adbwire_transport::ConnectionOptions;
use clap::{Args, Subcommand};

use crate::exit::{sync_error, CliResult};
use crate::output::OutputFormat;

pub mod bridge;
pub mod ls;
pub mod pull;
pub mod push;
pub mod stat;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve a device to remote ADB clients over TCP.
    Bridge(BridgeArgs),
    /// Show metadata of a remote path.
    Stat(StatArgs),
    /// List a remote directory.
    Ls(LsArgs),
    /// Upload a local file.
    Push(PushArgs),
    /// Download a remote file.
    Pull(PullArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, daemon: &DaemonArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Bridge(args) => bridge::run(args, daemon, format).await,
        Command::Stat(args) => stat::run(args, daemon, format).await,
        Command::Ls(args) => ls::run(args, daemon, format).await,
        Command::Push(args) => push::run(args, daemon, format).await,
        Command::Pull(args) => pull::run(args, daemon, format).await,
        Command::Version(args) => version::run(args),
    }
}

/// How to reach the host daemon and which device to use.
#[derive(Args, Debug)]
pub struct DaemonArgs {
    /// Host daemon address.
    #[arg(long, global = true, value_name = "HOST")]
    pub host: Option<String>,
    /// Host daemon port.
    #[arg(long, global = true, value_name = "PORT", env = "ANDROID_ADB_SERVER_PORT")]
    pub port: Option<u16>,
    /// Binary used to start the host daemon when it is not running.
    #[arg(long, global = true, value_name = "PATH")]
    pub bin: Option<PathBuf>,
    /// Device serial. Defaults to the only attached device.
    #[arg(long, short = 's', global = true, env = "ANDROID_SERIAL")]
    pub serial: Option<String>,
    /// Never start the host daemon.
    #[arg(long, global = true)]
    pub no_launch: bool,
}

impl DaemonArgs {
    pub fn options(&self) -> ConnectionOptions {
        let mut options = ConnectionOptions::default().with_auto_launch(!self.no_launch);
        if let Some(host) = &self.host {
            options = options.with_host(host.clone());
        }
        if let Some(port) = self.port {
            options = options.with_port(port);
        }
        if let Some(bin) = &self.bin {
            options = options.with_bin(bin.clone());
        }
        options
    }

    pub async fn sync_session(&self) -> CliResult<SyncSession> {
        SyncSession::connect(&self.options(), self.serial.as_deref())
            .await
            .map_err(|err| sync_error("sync connect failed", err))
    }
}

#[derive(Args, Debug)]
pub struct BridgeArgs {
    /// Address to accept ADB clients on.
    #[arg(long, default_value = "127.0.0.1:6037")]
    pub listen: String,
    /// Largest packet payload accepted from a client, in bytes.
    #[arg(long, value_name = "BYTES")]
    pub max_payload: Option<usize>,
}

#[derive(Args, Debug)]
pub struct StatArgs {
    /// Remote path.
    pub path: String,
}

#[derive(Args, Debug)]
pub struct LsArgs {
    /// Remote directory.
    pub path: String,
}

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Local file to upload.
    pub local: PathBuf,
    /// Remote destination path.
    pub remote: String,
    /// Permission bits, in octal.
    #[arg(long, default_value = "644", value_parser = parse_mode)]
    pub mode: u32,
}

#[derive(Args, Debug)]
pub struct PullArgs {
    /// Remote file to download.
    pub remote: String,
    /// Local destination. Writes to stdout when omitted or `-`.
    pub local: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn parse_mode(value: &str) -> Result<u32, String> {
    let digits = value.trim_start_matches("0o");
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if mode <= 0o7777 => Ok(mode),
        Ok(_) => Err(format!("mode {value} has bits outside 07777")),
        Err(_) => Err(format!("mode {value} is not octal (default {DEFAULT_PUSH_MODE:o})")),
    }
}
