/// Errors that can occur on a host-daemon connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to connect to the host daemon.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// The host daemon could not be started.
    #[error("failed to launch '{program}': {message}")]
    Launch { program: String, message: String },

    /// The connection was already ended locally.
    #[error("connection closed")]
    Closed,

    /// Reading or decoding a reply failed.
    #[error(transparent)]
    Frame(#[from] adbwire_frame::FrameError),

    /// An I/O error occurred on the stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Returns true if the host daemon refused the connection.
    pub fn is_connection_refused(&self) -> bool {
        matches!(
            self,
            TransportError::Connect { source, .. }
                if source.kind() == std::io::ErrorKind::ConnectionRefused
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
