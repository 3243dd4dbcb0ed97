use std::path::PathBuf;

use futures_util::future::BoxFuture;
use tokio::process::Command;
use tracing::info;

use crate::error::{Result, TransportError};

/// Starts a local host daemon after a refused first connect.
pub trait ServerLauncher: Send + Sync {
    /// Launch the daemon and resolve once it accepts connections.
    fn launch(&self) -> BoxFuture<'_, Result<()>>;
}

/// Runs `<bin> -P <port> start-server`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    port: u16,
}

impl ProcessLauncher {
    /// Create a launcher for the given binary and daemon port.
    pub fn new(program: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            program: program.into(),
            port,
        }
    }

    /// The binary that will be executed.
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    fn launch_error(&self, message: impl Into<String>) -> TransportError {
        TransportError::Launch {
            program: self.program.display().to_string(),
            message: message.into(),
        }
    }
}

impl ServerLauncher for ProcessLauncher {
    fn launch(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(program = %self.program.display(), port = self.port, "starting host daemon");
            let output = Command::new(&self.program)
                .arg("-P")
                .arg(self.port.to_string())
                .arg("start-server")
                .output()
                .await
                .map_err(|err| self.launch_error(err.to_string()))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(self.launch_error(format!(
                    "exited with {}: {}",
                    output.status,
                    stderr.trim()
                )));
            }
            Ok(())
        })
    }
}
