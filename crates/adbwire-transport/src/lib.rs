//! Connections to the ADB host daemon.
//!
//! A [`Connection`] owns one byte stream: a [`FrameReader`](adbwire_frame::FrameReader)
//! over the inbound half and a writer that waits for the transport to drain.
//! [`Connection::connect`] starts the daemon through a [`ServerLauncher`] at
//! most once when the first attempt is refused.

pub mod connection;
pub mod error;
pub mod launcher;
pub mod options;

pub use connection::{connect_stream, Connection};
pub use error::{Result, TransportError};
pub use launcher::{ProcessLauncher, ServerLauncher};
pub use options::{ConnectionOptions, DEFAULT_PORT, PORT_ENV};
