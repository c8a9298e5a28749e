//! Per-connection streaming state and the device-pulled streaming step.

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::codec::{pack_into, select_chunk, voxel_data_size};
use crate::schema::{CubeParams, LinkConfig, VoxelGrid};

use super::protocol::{Command, encode_stream_packet};
use super::transport::Transport;

/// What one streaming step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Chunk acknowledged; cursor advanced by this many bytes.
    Acknowledged(usize),
    /// Device reported the chunk corrupted; cursor unchanged.
    Corrupted,
    /// No reply within the acknowledge window; cursor unchanged.
    NoReply,
    /// Device latched the buffered frame.
    Displayed,
    /// Device could not latch the frame (incomplete buffer).
    DisplayFailed,
    /// DISPLAY sent without a usable reply.
    DisplayUnconfirmed,
}

/// Timing windows used by a streaming step.
#[derive(Debug, Clone, Copy)]
pub struct StepTiming {
    pub acknowledge_wait: Duration,
    pub display_resend: Duration,
}

impl From<&LinkConfig> for StepTiming {
    fn from(config: &LinkConfig) -> Self {
        Self {
            acknowledge_wait: config.acknowledge_wait(),
            display_resend: config.display_resend(),
        }
    }
}

/// Snapshot of a session for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionDiagnostics {
    pub params: CubeParams,
    pub buffer_len: usize,
    pub cursor: usize,
    pub failed_frames: u32,
    pub corrupted_packets: u32,
}

impl fmt::Display for SessionDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "side {}, {} channel(s) x {} bit(s), cursor {}/{}, {} failed frames, {} corrupted packets",
            self.params.side,
            self.params.channels.channel_count(),
            self.params.channels.bit_depth(),
            self.cursor,
            self.buffer_len,
            self.failed_frames,
            self.corrupted_packets
        )
    }
}

/// State of one negotiated connection.
///
/// Created on a successful handshake and dropped on teardown, so the cursor
/// and counters never outlive the physical connection.
#[derive(Debug)]
pub struct LinkSession {
    params: CubeParams,
    /// Bytes of `voxel_data` the device has acknowledged.
    cursor: usize,
    failed_frames: u32,
    corrupted_packets: u32,
    /// Set once FRAME_FAILED has been counted for the current frame.
    frame_failure_counted: bool,
    voxel_data: Vec<u8>,
    /// When the pending display request was made.
    display_requested: Option<Instant>,
}

impl LinkSession {
    pub fn new(params: CubeParams) -> Self {
        Self {
            params,
            cursor: 0,
            failed_frames: 0,
            corrupted_packets: 0,
            frame_failure_counted: false,
            voxel_data: vec![0u8; voxel_data_size(params.side, params.channels)],
            display_requested: None,
        }
    }

    pub fn params(&self) -> CubeParams {
        self.params
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn failed_frames(&self) -> u32 {
        self.failed_frames
    }

    pub fn corrupted_packets(&self) -> u32 {
        self.corrupted_packets
    }

    pub fn voxel_data(&self) -> &[u8] {
        &self.voxel_data
    }

    pub fn display_pending(&self) -> bool {
        self.display_requested.is_some()
    }

    pub fn diagnostics(&self) -> SessionDiagnostics {
        SessionDiagnostics {
            params: self.params,
            buffer_len: self.voxel_data.len(),
            cursor: self.cursor,
            failed_frames: self.failed_frames,
            corrupted_packets: self.corrupted_packets,
        }
    }

    /// Repack the buffer from `grid`. The cursor is left alone.
    ///
    /// Returns false, without touching the buffer, if the grid side differs
    /// from the negotiated cube side.
    pub fn load_frame(&mut self, grid: &VoxelGrid) -> bool {
        if grid.side() != self.params.side {
            return false;
        }
        pack_into(grid, self.params.channels, &mut self.voxel_data);
        self.frame_failure_counted = false;
        true
    }

    /// Ask the device to latch the buffered frame. Idempotent while pending.
    pub fn request_display(&mut self, now: Instant) {
        self.display_requested.get_or_insert(now);
    }

    /// Perform one step in answer to STREAM_REQUEST.
    pub fn step(
        &mut self,
        transport: &mut dyn Transport,
        timing: StepTiming,
    ) -> io::Result<StepOutcome> {
        if self.display_pending() {
            self.display_step(transport, timing)
        } else {
            self.stream_step(transport, timing)
        }
    }

    fn display_step(
        &mut self,
        transport: &mut dyn Transport,
        timing: StepTiming,
    ) -> io::Result<StepOutcome> {
        let expired = self
            .display_requested
            .is_some_and(|requested| requested.elapsed() > timing.display_resend);
        if expired {
            // Best effort: this is the last time the request is offered.
            self.display_requested = None;
        }

        transport.write_all(&[Command::Display.byte()])?;
        // The device restarts its stride on DISPLAY, so the next chunk starts at 0.
        self.cursor = 0;

        let outcome = match await_reply(transport, timing.acknowledge_wait)?.and_then(Command::from_u8) {
            Some(Command::FrameDisplayed) => {
                self.display_requested = None;
                StepOutcome::Displayed
            }
            Some(Command::FrameFailed) => {
                if !self.frame_failure_counted {
                    self.failed_frames += 1;
                    self.frame_failure_counted = true;
                }
                StepOutcome::DisplayFailed
            }
            _ => StepOutcome::DisplayUnconfirmed,
        };
        log::trace!("display step: {:?}", outcome);
        Ok(outcome)
    }

    fn stream_step(
        &mut self,
        transport: &mut dyn Transport,
        timing: StepTiming,
    ) -> io::Result<StepOutcome> {
        let chunk = select_chunk(&self.voxel_data, self.cursor);
        transport.write_all(&encode_stream_packet(&chunk))?;

        let outcome = match await_reply(transport, timing.acknowledge_wait)?.and_then(Command::from_u8) {
            Some(Command::StreamAcknowledge) => {
                self.cursor += chunk.produced_length;
                StepOutcome::Acknowledged(chunk.produced_length)
            }
            Some(Command::StreamCorrupted) => {
                self.corrupted_packets += 1;
                StepOutcome::Corrupted
            }
            _ => StepOutcome::NoReply,
        };
        log::trace!(
            "stream step at {}: {:?} chunk, {:?}",
            self.cursor,
            chunk.encoding,
            outcome
        );
        Ok(outcome)
    }

    /// Zero the buffer and counters before the session is dropped.
    pub fn clear(&mut self) {
        self.voxel_data.fill(0);
        self.voxel_data.clear();
        self.cursor = 0;
        self.failed_frames = 0;
        self.corrupted_packets = 0;
        self.frame_failure_counted = false;
        self.display_requested = None;
    }
}

/// Poll for a one-byte reply until `window` elapses.
fn await_reply(transport: &mut dyn Transport, window: Duration) -> io::Result<Option<u8>> {
    let deadline = Instant::now() + window;
    loop {
        if transport.bytes_available()? > 0 {
            return transport.read_byte();
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::hint::spin_loop();
    }
}
