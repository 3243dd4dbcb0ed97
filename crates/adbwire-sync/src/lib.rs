//! The ADB sync sub-protocol.
//!
//! A [`SyncSession`] wraps a device-bound [`Connection`](adbwire_transport::Connection)
//! that answered `sync:`, and offers `stat`, `readdir`, `push` and `pull`.
//! Push and pull return transfer handles: [`PushTransfer`] resolves once the
//! device acknowledged the upload; [`PullTransfer`] is an `AsyncRead` over
//! the downloaded bytes.
//!
//! ```no_run
//! # async fn demo() -> adbwire_sync::Result<()> {
//! use adbwire_sync::SyncSession;
//! use adbwire_transport::ConnectionOptions;
//!
//! let sync = SyncSession::connect(&ConnectionOptions::from_env(), None).await?;
//! let stats = sync.stat("/sdcard").await?;
//! println!("directory: {}", stats.is_directory());
//! sync.end().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod session;
pub mod stats;
pub mod transfer;

pub use error::{Result, SyncError};
pub use session::{SyncConfig, SyncSession, DEFAULT_PUSH_MODE};
pub use stats::{
    Entry, Stats, DENT_RECORD_SIZE, STAT_RECORD_SIZE, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO,
    S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK,
};
pub use transfer::{PullTransfer, PushTransfer};
