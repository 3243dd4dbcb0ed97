use std::time::{Duration, SystemTime, UNIX_EPOCH};

use adbwire_frame::read_u32_le;
use serde::Serialize;

/// File type mask of a mode word.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

/// Size of the `STAT` reply record: mode, size, mtime.
pub const STAT_RECORD_SIZE: usize = 12;

/// Size of a `DENT` record before its name: mode, size, mtime, name length.
pub const DENT_RECORD_SIZE: usize = 16;

/// Metadata of one remote path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub mode: u32,
    pub size: u32,
    /// Seconds since the unix epoch.
    pub mtime: u32,
}

impl Stats {
    /// Decode the first 12 bytes of a `STAT` or `DENT` record.
    pub fn from_record(record: &[u8]) -> Self {
        Self {
            mode: read_u32_le(record, 0),
            size: read_u32_le(record, 4),
            mtime: read_u32_le(record, 8),
        }
    }

    fn file_type(&self) -> u32 {
        self.mode & S_IFMT
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == S_IFREG
    }

    pub fn is_directory(&self) -> bool {
        self.file_type() == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == S_IFLNK
    }

    /// Permission bits, without the file type.
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Last modification time.
    pub fn modified(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(u64::from(self.mtime))
    }
}

/// One directory entry returned by `readdir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub name: String,
    #[serde(flatten)]
    pub stats: Stats,
}
