use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Packet header: command, arg0, arg1, length, checksum, magic (u32 LE each).
pub const HEADER_SIZE: usize = 24;

/// Protocol version announced in our `CNXN`.
pub const A_VERSION: u32 = 0x0100_0000;

/// Ceiling applied to the peer's announced max payload.
pub const MAX_NEGOTIATED_PAYLOAD: u32 = 0xFFFF;

/// Size of the random challenge sent in `AUTH(TOKEN)`.
pub const TOKEN_SIZE: usize = 20;

/// Bridge packet commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    Sync = 0x434e_5953,
    Cnxn = 0x4e58_4e43,
    Open = 0x4e45_504f,
    Okay = 0x5941_4b4f,
    Clse = 0x4553_4c43,
    Wrte = 0x4554_5257,
    Auth = 0x4854_5541,
}

impl Command {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x434e_5953 => Some(Command::Sync),
            0x4e58_4e43 => Some(Command::Cnxn),
            0x4e45_504f => Some(Command::Open),
            0x5941_4b4f => Some(Command::Okay),
            0x4553_4c43 => Some(Command::Clse),
            0x4554_5257 => Some(Command::Wrte),
            0x4854_5541 => Some(Command::Auth),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// The magic word that must accompany this command.
    pub fn magic(self) -> u32 {
        !self.as_u32()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Sync => "SYNC",
            Command::Cnxn => "CNXN",
            Command::Open => "OPEN",
            Command::Okay => "OKAY",
            Command::Clse => "CLSE",
            Command::Wrte => "WRTE",
            Command::Auth => "AUTH",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `arg0` of an `AUTH` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AuthType {
    Token = 1,
    Signature = 2,
    RsaPublicKey = 3,
}

impl AuthType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(AuthType::Token),
            2 => Some(AuthType::Signature),
            3 => Some(AuthType::RsaPublicKey),
            _ => None,
        }
    }
}

/// Sum of the payload bytes, wrapping at 2^32.
pub fn checksum(payload: &[u8]) -> u32 {
    payload
        .iter()
        .fold(0u32, |sum, byte| sum.wrapping_add(u32::from(*byte)))
}

/// One bridge packet.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(command: Command, arg0: u32, arg1: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            arg0,
            arg1,
            payload: payload.into(),
        }
    }

    /// A packet without payload.
    pub fn empty(command: Command, arg0: u32, arg1: u32) -> Self {
        Self::new(command, arg0, arg1, Bytes::new())
    }

    pub fn checksum(&self) -> u32 {
        checksum(&self.payload)
    }

    /// The payload with trailing NUL bytes removed, as used by service
    /// names and key blobs.
    pub fn payload_trimmed(&self) -> &[u8] {
        let end = self
            .payload
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |pos| pos + 1);
        &self.payload[..end]
    }

    /// Encode header and payload.
    ///
    /// Wire format:
    /// ```text
    /// ┌─────────┬──────┬──────┬────────┬──────────┬───────┬─────────┐
    /// │ command │ arg0 │ arg1 │ length │ checksum │ magic │ payload │
    /// │ 4B LE   │ 4B LE│ 4B LE│ 4B LE  │ 4B LE    │ 4B LE │         │
    /// └─────────┴──────┴──────┴────────┴──────────┴───────┴─────────┘
    /// ```
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE + self.payload.len());
        dst.put_u32_le(self.command.as_u32());
        dst.put_u32_le(self.arg0);
        dst.put_u32_le(self.arg1);
        dst.put_u32_le(self.payload.len() as u32);
        dst.put_u32_le(self.checksum());
        dst.put_u32_le(self.command.magic());
        dst.put_slice(&self.payload);
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Packet");
        out.field("command", &self.command)
            .field("arg0", &self.arg0)
            .field("arg1", &self.arg1);
        if self.command == Command::Auth {
            out.field(
                "payload",
                &format_args!("<redacted:{} bytes>", self.payload.len()),
            );
        } else {
            out.field("payload", &format_args!("<{} bytes>", self.payload.len()));
        }
        out.finish()
    }
}
