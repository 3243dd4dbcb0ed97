use adbwire_frame::FrameError;
use adbwire_transport::TransportError;

/// Errors that can occur during a sync exchange.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The remote path does not exist.
    #[error("no such file or directory: '{path}'")]
    NotFound { path: String },

    /// The device answered `FAIL` with a message.
    #[error("sync failure: '{message}'")]
    Fail { message: String },

    /// The device answered with a tag outside the accepted set.
    #[error("unexpected sync reply '{actual}', was expecting {expected}")]
    UnexpectedReply { actual: String, expected: String },

    /// The transfer observed its cancellation token.
    #[error("transfer cancelled")]
    Cancelled,

    /// The session was ended, or left unusable by a failed transfer.
    #[error("sync session ended")]
    Ended,

    /// The transfer task panicked or was aborted.
    #[error("transfer task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Reading the local source or writing the stream failed.
    #[error("sync I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Returns true for a missing remote path.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::TaskFailed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
