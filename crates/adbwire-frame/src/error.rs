/// Errors that can occur while encoding or reading protocol frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The stream ended while bytes were still expected.
    #[error("premature end of stream ({missing} bytes missing)")]
    PrematureEof { missing: usize },

    /// The peer replied with a code outside the accepted set.
    #[error("unexpected '{actual}', was expecting {expected}{}", describe_request(.request))]
    UnexpectedData {
        actual: String,
        expected: String,
        request: Option<String>,
    },

    /// The peer explicitly reported a failure.
    #[error("failure: '{message}'")]
    ProtocolFail { message: String },

    /// A length prefix could not be parsed.
    #[error("invalid length prefix {value:?}")]
    InvalidLength { value: String },

    /// The payload exceeds what the wire format can carry.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred on the underlying stream.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Returns true if this error means the stream ended early.
    pub fn is_premature_eof(&self) -> bool {
        matches!(self, FrameError::PrematureEof { .. })
    }
}

fn describe_request(request: &Option<String>) -> String {
    match request {
        Some(request) => format!(" (request: {request:?})"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
