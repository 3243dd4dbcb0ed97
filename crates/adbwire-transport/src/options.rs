use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::launcher::{ProcessLauncher, ServerLauncher};

/// Default host daemon port.
pub const DEFAULT_PORT: u16 = 5037;

/// Environment variable overriding the host daemon port.
pub const PORT_ENV: &str = "ANDROID_ADB_SERVER_PORT";

/// Where and how to reach the host daemon.
#[derive(Clone)]
pub struct ConnectionOptions {
    /// Daemon host. Default: `127.0.0.1`.
    pub host: String,
    /// Daemon port. Default: 5037.
    pub port: u16,
    /// Binary used to start the daemon. Default: `adb`.
    pub bin: PathBuf,
    /// Start the daemon once if the first connect is refused. Default: true.
    pub auto_launch: bool,
    /// Custom launcher; a [`ProcessLauncher`] over `bin` is used when unset.
    pub launcher: Option<Arc<dyn ServerLauncher>>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            bin: PathBuf::from("adb"),
            auto_launch: true,
            launcher: None,
        }
    }
}

impl ConnectionOptions {
    /// Defaults, with the port taken from `ANDROID_ADB_SERVER_PORT` when set.
    pub fn from_env() -> Self {
        let port = std::env::var(PORT_ENV)
            .ok()
            .and_then(|value| value.trim().parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);
        Self {
            port,
            ..Self::default()
        }
    }

    /// Override the daemon host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Override the daemon port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the daemon binary.
    pub fn with_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.bin = bin.into();
        self
    }

    /// Enable or disable the one-shot daemon launch.
    pub fn with_auto_launch(mut self, auto_launch: bool) -> Self {
        self.auto_launch = auto_launch;
        self
    }

    /// Install a custom launcher.
    pub fn with_launcher(mut self, launcher: Arc<dyn ServerLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// `host:port` of the daemon.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The launcher to use after a refused connect.
    pub fn launcher(&self) -> Arc<dyn ServerLauncher> {
        match &self.launcher {
            Some(launcher) => Arc::clone(launcher),
            None => Arc::new(ProcessLauncher::new(self.bin.clone(), self.port)),
        }
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("bin", &self.bin)
            .field("auto_launch", &self.auto_launch)
            .field("launcher", &self.launcher.as_ref().map(|_| "<custom>"))
            .finish()
    }
}
