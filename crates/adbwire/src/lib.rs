//! An implementation of the ADB wire protocol.
//!
//! adbwire talks to the ADB host daemon, drives the file sync sub-protocol,
//! and can serve a device to remote ADB clients over TCP.
//!
//! # Crate Structure
//!
//! - [`frame`]: length-prefixed values, reply codes and the buffered frame reader
//! - [`transport`]: connections to the host daemon, with auto-launch
//! - [`sync`]: `stat`, `readdir`, `push` and `pull` (behind `sync` feature)
//! - [`bridge`]: the device-side packet protocol server (behind `bridge` feature)

/// Re-export frame types.
pub mod frame {
    pub use adbwire_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use adbwire_transport::*;
}

/// Re-export sync types (requires `sync` feature).
#[cfg(feature = "sync")]
pub mod sync {
    pub use adbwire_sync::*;
}

/// Re-export bridge types (requires `bridge` feature).
#[cfg(feature = "bridge")]
pub mod bridge {
    pub use adbwire_bridge::*;
}
