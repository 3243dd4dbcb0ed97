//! Wire codecs and the async frame reader shared by every ADB command.
//!
//! Two wire formats live here:
//! - The line protocol: 4-byte reply codes (`OKAY`/`FAIL`) and values
//!   prefixed with a 4-digit ASCII hex length.
//! - The sync protocol: 4-byte ASCII tags followed by a little-endian `u32`.
//!
//! [`FrameReader`] layers byte, line and value primitives over any
//! `AsyncRead`, so callers never deal with partial reads.

pub mod codec;
pub mod error;
pub mod reader;

pub use codec::{
    decode_length, encode_request, encode_sync_header, encode_sync_request, encode_value,
    read_u32_le, FrameConfig, SyncCommand, CODE_SIZE, FAIL, LENGTH_PREFIX_SIZE, MAX_LINE_LENGTH,
    MAX_VALUE_LENGTH,
    OKAY, SYNC_DATA_MAX, SYNC_HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::{FrameReader, LineMatch};
