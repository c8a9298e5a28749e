//! Chunk encoders for the streaming protocol.
//!
//! Each streaming step sends one fixed-size chunk taken from the packed
//! buffer at the acknowledged cursor. Two encodings compete per chunk and the
//! one that covers more source bytes wins.

/// Payload size of one wire chunk.
pub const CHUNK_SIZE: usize = 8;

/// Longest run one `(value, length)` pair can describe.
pub const MAX_RUN_LENGTH: usize = u8::MAX as usize;

/// Encoding used for a chunk payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkEncoding {
    /// Up to four `(value, run_length)` pairs.
    RunLength,
    /// Up to eight literal bytes.
    Raw,
}

/// One encoded chunk and the number of source bytes it represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmissionChunk {
    pub encoding: ChunkEncoding,
    pub payload: [u8; CHUNK_SIZE],
    pub produced_length: usize,
}

/// Run-length encode the bytes from `cursor`.
///
/// Unused pairs stay `(0, 0)`.
pub fn encode_run_length(data: &[u8], cursor: usize) -> TransmissionChunk {
    let mut payload = [0u8; CHUNK_SIZE];
    let mut consumed = 0;

    for pair in payload.chunks_exact_mut(2) {
        let rest = data.get(cursor + consumed..).unwrap_or(&[]);
        let Some(&value) = rest.first() else {
            break;
        };
        let run = rest
            .iter()
            .take(MAX_RUN_LENGTH)
            .take_while(|&&b| b == value)
            .count();

        pair[0] = value;
        pair[1] = run as u8;
        consumed += run;
    }

    TransmissionChunk {
        encoding: ChunkEncoding::RunLength,
        payload,
        produced_length: consumed,
    }
}

/// Copy up to [`CHUNK_SIZE`] literal bytes from `cursor`.
pub fn encode_raw(data: &[u8], cursor: usize) -> TransmissionChunk {
    let mut payload = [0u8; CHUNK_SIZE];
    let rest = data.get(cursor..).unwrap_or(&[]);
    let produced_length = rest.len().min(CHUNK_SIZE);
    payload[..produced_length].copy_from_slice(&rest[..produced_length]);

    TransmissionChunk {
        encoding: ChunkEncoding::Raw,
        payload,
        produced_length,
    }
}

/// Pick the encoding that advances the cursor furthest. Ties go to raw.
pub fn select_chunk(data: &[u8], cursor: usize) -> TransmissionChunk {
    let compressed = encode_run_length(data, cursor);
    let raw = encode_raw(data, cursor);
    if compressed.produced_length > raw.produced_length {
        compressed
    } else {
        raw
    }
}

/// Expand a chunk into `out` starting at `start`, as the device does.
///
/// Writes stop at the end of `out`. Returns the number of bytes written.
pub fn apply_chunk(chunk: &[u8; CHUNK_SIZE], encoding: ChunkEncoding, out: &mut [u8], start: usize) -> usize {
    let mut written = 0;
    match encoding {
        ChunkEncoding::Raw => {
            for &byte in chunk {
                let Some(slot) = out.get_mut(start + written) else {
                    break;
                };
                *slot = byte;
                written += 1;
            }
        }
        ChunkEncoding::RunLength => {
            for pair in chunk.chunks_exact(2) {
                for _ in 0..pair[1] {
                    let Some(slot) = out.get_mut(start + written) else {
                        return written;
                    };
                    *slot = pair[0];
                    written += 1;
                }
            }
        }
    }
    written
}
