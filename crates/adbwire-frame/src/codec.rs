use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Width of every reply code and sync command tag.
pub const CODE_SIZE: usize = 4;

/// Width of the ASCII hex length prefix of a line-protocol value.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest value a 4-digit hex length prefix can describe.
pub const MAX_VALUE_LENGTH: usize = 0xFFFF;

/// Longest line `read_line` buffers before giving up.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Sync request/response header: tag (4) + little-endian length (4).
pub const SYNC_HEADER_SIZE: usize = 8;

/// Largest chunk carried by a single sync `DATA` frame.
pub const SYNC_DATA_MAX: usize = 64 * 1024;

/// Line-protocol success reply.
pub const OKAY: &[u8; 4] = b"OKAY";

/// Line-protocol failure reply; always followed by a length-prefixed message.
pub const FAIL: &[u8; 4] = b"FAIL";

/// Encode `payload` as a length-prefixed value.
///
/// Wire format:
/// ```text
/// ┌──────────────────┬──────────────────┐
/// │ Length (4B)      │ Payload          │
/// │ ASCII hex, upper │ (Length bytes)   │
/// │ zero-padded      │                  │
/// └──────────────────┴──────────────────┘
/// ```
pub fn encode_value(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_VALUE_LENGTH {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_VALUE_LENGTH,
        });
    }
    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_slice(format!("{:04X}", payload.len()).as_bytes());
    dst.put_slice(payload);
    Ok(())
}

/// Encode a line-protocol request into a fresh buffer.
pub fn encode_request(request: &str) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + request.len());
    encode_value(request.as_bytes(), &mut dst)?;
    Ok(dst.freeze())
}

/// Parse a 4-digit ASCII hex length prefix.
pub fn decode_length(prefix: &[u8]) -> Result<usize> {
    let invalid = || FrameError::InvalidLength {
        value: String::from_utf8_lossy(prefix).into_owned(),
    };
    if prefix.len() != LENGTH_PREFIX_SIZE {
        return Err(invalid());
    }
    let text = std::str::from_utf8(prefix).map_err(|_| invalid())?;
    usize::from_str_radix(text, 16).map_err(|_| invalid())
}

/// Tags of the binary sync sub-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncCommand {
    Stat,
    List,
    Send,
    Recv,
    Data,
    Done,
    Okay,
    Fail,
    Dent,
    Quit,
}

impl SyncCommand {
    /// The 4-byte ASCII tag of this command.
    pub fn code(self) -> &'static [u8; 4] {
        match self {
            SyncCommand::Stat => b"STAT",
            SyncCommand::List => b"LIST",
            SyncCommand::Send => b"SEND",
            SyncCommand::Recv => b"RECV",
            SyncCommand::Data => b"DATA",
            SyncCommand::Done => b"DONE",
            SyncCommand::Okay => b"OKAY",
            SyncCommand::Fail => b"FAIL",
            SyncCommand::Dent => b"DENT",
            SyncCommand::Quit => b"QUIT",
        }
    }

    /// Look up a command by its tag.
    pub fn from_code(code: &[u8]) -> Option<Self> {
        match code {
            b"STAT" => Some(SyncCommand::Stat),
            b"LIST" => Some(SyncCommand::List),
            b"SEND" => Some(SyncCommand::Send),
            b"RECV" => Some(SyncCommand::Recv),
            b"DATA" => Some(SyncCommand::Data),
            b"DONE" => Some(SyncCommand::Done),
            b"OKAY" => Some(SyncCommand::Okay),
            b"FAIL" => Some(SyncCommand::Fail),
            b"DENT" => Some(SyncCommand::Dent),
            b"QUIT" => Some(SyncCommand::Quit),
            _ => None,
        }
    }

    /// Human-readable tag.
    pub fn as_str(self) -> &'static str {
        // Tags are ASCII by construction.
        std::str::from_utf8(self.code()).unwrap_or("????")
    }
}

/// Encode a sync command whose length field carries a bare number
/// (`DATA` chunk size, `DONE` timestamp).
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────────┐
/// │ Tag (4B)     │ Value (4B LE) │
/// └──────────────┴───────────────┘
/// ```
pub fn encode_sync_header(command: SyncCommand, value: u32, dst: &mut BytesMut) {
    dst.reserve(SYNC_HEADER_SIZE);
    dst.put_slice(command.code());
    dst.put_u32_le(value);
}

/// Encode a sync command followed by its argument bytes (`STAT`, `LIST`,
/// `SEND`, `RECV`).
pub fn encode_sync_request(command: SyncCommand, arg: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(arg.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: arg.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(SYNC_HEADER_SIZE + arg.len());
    encode_sync_header(command, len, dst);
    dst.put_slice(arg);
    Ok(())
}

/// Read the little-endian `u32` at `offset` of a fixed-size record.
///
/// Callers pass records whose size they already validated.
pub fn read_u32_le(record: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&record[offset..offset + 4]);
    u32::from_le_bytes(word)
}

/// Configuration for the frame reader.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest value accepted by `read_value`. Default: 0xFFFF.
    pub max_value_length: usize,
    /// Longest line accepted by `read_line`. Default: 64 KiB.
    pub max_line_length: usize,
    /// Bytes requested from the stream per read. Default: 64 KiB.
    pub chunk_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_value_length: MAX_VALUE_LENGTH,
            max_line_length: MAX_LINE_LENGTH,
            chunk_size: SYNC_DATA_MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_value_uses_uppercase_zero_padded_hex() {
        let mut buf = BytesMut::new();
        encode_value(b"host:version", &mut buf).unwrap();
        assert_eq!(buf.as_ref(), b"000Chost:version");
    }

    #[test]
    fn encode_empty_value() {
        let mut buf = BytesMut::new();
        encode_value(b"", &mut buf).unwrap();
        assert_eq!(buf.as_ref(), b"0000");
    }

    #[test]
    fn encode_value_rejects_oversized_payload() {
        let mut buf = BytesMut::new();
        let payload = vec![b'x'; MAX_VALUE_LENGTH + 1];
        let err = encode_value(&payload, &mut buf).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size, max }
            if size == MAX_VALUE_LENGTH + 1 && max == MAX_VALUE_LENGTH));
        assert!(buf.is_empty());
    }

    #[test]
    fn encode_value_accepts_max_length() {
        let mut buf = BytesMut::new();
        let payload = vec![b'y'; MAX_VALUE_LENGTH];
        encode_value(&payload, &mut buf).unwrap();
        assert_eq!(&buf[..4], b"FFFF");
        assert_eq!(buf.len(), 4 + MAX_VALUE_LENGTH);
    }

    #[test]
    fn decode_length_parses_hex() {
        assert_eq!(decode_length(b"0000").unwrap(), 0);
        assert_eq!(decode_length(b"001a").unwrap(), 26);
        assert_eq!(decode_length(b"FFFF").unwrap(), 0xFFFF);
    }

    #[test]
    fn decode_length_rejects_garbage() {
        assert!(matches!(
            decode_length(b"zz12"),
            Err(FrameError::InvalidLength { .. })
        ));
        assert!(matches!(
            decode_length(b"12"),
            Err(FrameError::InvalidLength { .. })
        ));
    }

    #[test]
    fn sync_command_codes_roundtrip() {
        for cmd in [
            SyncCommand::Stat,
            SyncCommand::List,
            SyncCommand::Send,
            SyncCommand::Recv,
            SyncCommand::Data,
            SyncCommand::Done,
            SyncCommand::Okay,
            SyncCommand::Fail,
            SyncCommand::Dent,
            SyncCommand::Quit,
        ] {
            assert_eq!(SyncCommand::from_code(cmd.code()), Some(cmd));
        }
        assert_eq!(SyncCommand::from_code(b"NOPE"), None);
        assert_eq!(SyncCommand::Dent.as_str(), "DENT");
    }

    #[test]
    fn sync_request_layout() {
        let mut buf = BytesMut::new();
        encode_sync_request(SyncCommand::Stat, b"/sdcard", &mut buf).unwrap();
        assert_eq!(&buf[..4], b"STAT");
        assert_eq!(read_u32_le(&buf, 4), 7);
        assert_eq!(&buf[8..], b"/sdcard");
    }

    #[test]
    fn sync_header_is_little_endian() {
        let mut buf = BytesMut::new();
        encode_sync_header(SyncCommand::Done, 0x0102_0304, &mut buf);
        assert_eq!(buf.as_ref(), b"DONE\x04\x03\x02\x01");
    }

    #[test]
    fn encode_request_prefixes_length() {
        let encoded = encode_request("sync:").unwrap();
        assert_eq!(encoded.as_ref(), b"0005sync:");
    }
}
