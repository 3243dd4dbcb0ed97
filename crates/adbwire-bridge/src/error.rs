use crate::packet::Command;

/// Errors raised while serving one bridge connection.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The payload does not sum to the header checksum.
    #[error("packet checksum mismatch (header {expected:#010x}, payload {actual:#010x})")]
    Checksum { expected: u32, actual: u32 },

    /// The header magic is not the complement of the command.
    #[error("packet magic {magic:#010x} does not match command {command:#010x}")]
    Magic { command: u32, magic: u32 },

    /// The announced payload exceeds the configured limit.
    #[error("packet payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The header carries a command this bridge does not know.
    #[error("unknown packet command {command:#010x}")]
    UnknownCommand { command: u32 },

    /// The authentication handshake failed.
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// A packet other than `CNXN`/`AUTH` arrived before authorization.
    #[error("{command} received before authorization")]
    Unauthorized { command: Command },

    /// A stream packet arrived before its service finished opening.
    #[error("{command} received before the service was opened")]
    PrematurePacket { command: Command },

    /// `OPEN` arrived for a service that already ended.
    #[error("backend transport opened after the service ended")]
    LateTransport,

    /// The packet writer stopped; the physical connection is gone.
    #[error("bridge connection closed")]
    Closed,

    #[error(transparent)]
    Transport(#[from] adbwire_transport::TransportError),

    #[error(transparent)]
    Frame(#[from] adbwire_frame::FrameError),

    #[error("bridge I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub(crate) fn auth(message: impl Into<String>) -> Self {
        BridgeError::Auth {
            message: message.into(),
        }
    }

    /// Whether this error ends the whole physical connection rather than
    /// only the service it was raised in.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::Checksum { .. }
                | BridgeError::Magic { .. }
                | BridgeError::PayloadTooLarge { .. }
                | BridgeError::UnknownCommand { .. }
                | BridgeError::Auth { .. }
                | BridgeError::Unauthorized { .. }
                | BridgeError::Closed
                | BridgeError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_and_auth_errors_are_connection_fatal() {
        assert!(BridgeError::Checksum {
            expected: 1,
            actual: 2
        }
        .is_connection_fatal());
        assert!(BridgeError::Magic {
            command: 0,
            magic: 0
        }
        .is_connection_fatal());
        assert!(BridgeError::auth("nope").is_connection_fatal());
        assert!(BridgeError::Unauthorized {
            command: Command::Open
        }
        .is_connection_fatal());
    }

    #[test]
    fn stream_errors_only_end_the_service() {
        assert!(!BridgeError::LateTransport.is_connection_fatal());
        assert!(!BridgeError::PrematurePacket {
            command: Command::Wrte
        }
        .is_connection_fatal());
        assert!(!BridgeError::Transport(adbwire_transport::TransportError::Closed)
            .is_connection_fatal());
    }
}
