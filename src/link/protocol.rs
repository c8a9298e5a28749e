//! Wire opcodes and packet framing.
//!
//! ```text
//! Handshake:
//!   host   -> device  INIT_REQUEST (127)
//!   device -> host    INIT_START (120) side channel_count bit_depth
//!   host   -> device  INIT_ACKNOWLEDGE (113)
//!
//! Streaming step (device pulls):
//!   device -> host    STREAM_REQUEST (63)
//!   host   -> device  STREAM_START_{COMPRESSED (32) | RAW (31)} payload[8] STREAM_END (248) checksum
//!   device -> host    STREAM_ACKNOWLEDGE (240) | STREAM_CORRUPTED (224)
//!
//! Display step:
//!   host   -> device  DISPLAY (24)
//!   device -> host    FRAME_DISPLAYED (217) | FRAME_FAILED (210)
//! ```

use crate::codec::{CHUNK_SIZE, ChunkEncoding, TransmissionChunk};

/// Length of the device's handshake reply, opcode included.
pub const INIT_DATA_SIZE: usize = 4;

/// Checksum byte sent after STREAM_END. The firmware does not verify it yet.
pub const CHECKSUM_PLACEHOLDER: u8 = 1;

/// Length of a framed stream packet.
pub const STREAM_PACKET_SIZE: usize = CHUNK_SIZE + 3;

/// Single-byte protocol commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    InitRequest = 127,
    InitStart = 120,
    InitAcknowledge = 113,
    StreamRequest = 63,
    TerminateCommunication = 0,
    StreamStartCompressed = 32,
    StreamStartRaw = 31,
    StreamEnd = 248,
    StreamAcknowledge = 240,
    StreamCorrupted = 224,
    Display = 24,
    FrameDisplayed = 217,
    FrameFailed = 210,
}

impl Command {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            127 => Some(Command::InitRequest),
            120 => Some(Command::InitStart),
            113 => Some(Command::InitAcknowledge),
            63 => Some(Command::StreamRequest),
            0 => Some(Command::TerminateCommunication),
            32 => Some(Command::StreamStartCompressed),
            31 => Some(Command::StreamStartRaw),
            248 => Some(Command::StreamEnd),
            240 => Some(Command::StreamAcknowledge),
            224 => Some(Command::StreamCorrupted),
            24 => Some(Command::Display),
            217 => Some(Command::FrameDisplayed),
            210 => Some(Command::FrameFailed),
            _ => None,
        }
    }

    #[inline]
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Opcode that opens a stream packet with the given encoding.
    pub fn stream_start(encoding: ChunkEncoding) -> Self {
        match encoding {
            ChunkEncoding::RunLength => Command::StreamStartCompressed,
            ChunkEncoding::Raw => Command::StreamStartRaw,
        }
    }

    /// Encoding announced by a stream-start opcode.
    pub fn chunk_encoding(self) -> Option<ChunkEncoding> {
        match self {
            Command::StreamStartCompressed => Some(ChunkEncoding::RunLength),
            Command::StreamStartRaw => Some(ChunkEncoding::Raw),
            _ => None,
        }
    }
}

impl From<Command> for u8 {
    fn from(c: Command) -> Self {
        c as u8
    }
}

/// Frame a chunk as `[start][payload][STREAM_END][checksum]`.
pub fn encode_stream_packet(chunk: &TransmissionChunk) -> [u8; STREAM_PACKET_SIZE] {
    let mut packet = [0u8; STREAM_PACKET_SIZE];
    packet[0] = Command::stream_start(chunk.encoding).byte();
    packet[1..=CHUNK_SIZE].copy_from_slice(&chunk.payload);
    packet[CHUNK_SIZE + 1] = Command::StreamEnd.byte();
    packet[CHUNK_SIZE + 2] = CHECKSUM_PLACEHOLDER;
    packet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_raw, encode_run_length};

    #[test]
    fn test_opcodes_roundtrip() {
        for v in 0..=u8::MAX {
            if let Some(cmd) = Command::from_u8(v) {
                assert_eq!(cmd.byte(), v);
            }
        }
        assert_eq!(Command::from_u8(1), None);
        assert_eq!(Command::InitRequest.byte(), 127);
        assert_eq!(Command::FrameFailed.byte(), 210);
    }

    #[test]
    fn test_packet_framing() {
        let raw = encode_raw(&[1, 2, 3], 0);
        assert_eq!(
            encode_stream_packet(&raw),
            [31, 1, 2, 3, 0, 0, 0, 0, 0, 248, 1]
        );

        let rle = encode_run_length(&[5; 10], 0);
        assert_eq!(
            encode_stream_packet(&rle),
            [32, 5, 10, 0, 0, 0, 0, 0, 0, 248, 1]
        );
    }

    #[test]
    fn test_encoding_mapping() {
        for encoding in [ChunkEncoding::Raw, ChunkEncoding::RunLength] {
            assert_eq!(Command::stream_start(encoding).chunk_encoding(), Some(encoding));
        }
        assert_eq!(Command::Display.chunk_encoding(), None);
    }
}
