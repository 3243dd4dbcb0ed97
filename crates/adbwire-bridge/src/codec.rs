use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use adbwire_frame::read_u32_le;

use crate::error::BridgeError;
use crate::packet::{checksum, Command, Packet, HEADER_SIZE};

/// Default ceiling on inbound payloads: 1 MiB.
pub const DEFAULT_MAX_PACKET_PAYLOAD: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy)]
struct Header {
    command: Command,
    arg0: u32,
    arg1: u32,
    length: usize,
    checksum: u32,
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    AwaitingHeader,
    AwaitingBody(Header),
}

/// tokio-util codec for bridge packets.
///
/// Decoding alternates between waiting for a 24-byte header and waiting for
/// its payload. Magic is checked as soon as the header is complete, the
/// checksum once the payload is. Both failures are fatal to the stream.
#[derive(Debug)]
pub struct PacketCodec {
    state: DecodeState,
    max_payload: usize,
}

impl PacketCodec {
    pub fn new(max_payload: usize) -> Self {
        Self {
            state: DecodeState::AwaitingHeader,
            max_payload,
        }
    }

    fn decode_header(&self, src: &[u8]) -> Result<Header, BridgeError> {
        let command = read_u32_le(src, 0);
        let magic = read_u32_le(src, 20);
        if magic != !command {
            return Err(BridgeError::Magic { command, magic });
        }
        let length = read_u32_le(src, 12) as usize;
        if length > self.max_payload {
            return Err(BridgeError::PayloadTooLarge {
                size: length,
                max: self.max_payload,
            });
        }
        Ok(Header {
            command: Command::from_u32(command).ok_or(BridgeError::UnknownCommand { command })?,
            arg0: read_u32_le(src, 4),
            arg1: read_u32_le(src, 8),
            length,
            checksum: read_u32_le(src, 16),
        })
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKET_PAYLOAD)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = BridgeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, BridgeError> {
        loop {
            match self.state {
                DecodeState::AwaitingHeader => {
                    if src.len() < HEADER_SIZE {
                        src.reserve(HEADER_SIZE - src.len());
                        return Ok(None);
                    }
                    let header = self.decode_header(&src[..HEADER_SIZE])?;
                    src.advance(HEADER_SIZE);
                    if header.length == 0 {
                        return Ok(Some(Packet::empty(header.command, header.arg0, header.arg1)));
                    }
                    self.state = DecodeState::AwaitingBody(header);
                }
                DecodeState::AwaitingBody(header) => {
                    if src.len() < header.length {
                        src.reserve(header.length - src.len());
                        return Ok(None);
                    }
                    let payload = src.split_to(header.length).freeze();
                    self.state = DecodeState::AwaitingHeader;

                    let actual = checksum(&payload);
                    if actual != header.checksum {
                        return Err(BridgeError::Checksum {
                            expected: header.checksum,
                            actual,
                        });
                    }
                    let packet = Packet::new(header.command, header.arg0, header.arg1, payload);
                    trace!(?packet, "decoded");
                    return Ok(Some(packet));
                }
            }
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = BridgeError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), BridgeError> {
        packet.encode(dst);
        Ok(())
    }
}
