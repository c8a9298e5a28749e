//! In-process cube that speaks the device side of the protocol.
//!
//! Used by tests, benchmarks and the CLI's `--simulate` mode. The device is
//! double buffered: chunks land in a write buffer at the device's own stride,
//! and DISPLAY swaps it onto the "LEDs" only when the whole buffer arrived.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::codec::{CHUNK_SIZE, apply_chunk, channel_brightness, voxel_data_size};
use crate::schema::ChannelConfig;

use super::protocol::{Command, STREAM_PACKET_SIZE};
use super::transport::Transport;

/// Counters kept by the simulated device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub init_requests: u32,
    pub init_acknowledged: bool,
    pub chunks_received: u32,
    pub acknowledged: u32,
    pub corrupted: u32,
    pub displayed: u32,
    pub display_failed: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingInit,
    AwaitingAck,
    Streaming,
    Terminated,
}

#[derive(Debug)]
struct DeviceState {
    side: u8,
    channel_count: u8,
    bit_depth: u8,
    /// Probes ignored before the device answers.
    probes_before_reply: u32,
    /// Replaces the INIT_START reply when set.
    init_reply: Option<Vec<u8>>,
    silent: bool,
    muted: bool,
    phase: Phase,
    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
    write_buffer: Vec<u8>,
    display_buffer: Vec<u8>,
    stride: usize,
    corruption_rate: f64,
    rng: StdRng,
    stats: DeviceStats,
}

impl DeviceState {
    fn reply(&mut self, command: Command) {
        if !self.muted {
            self.outbound.push_back(command.byte());
        }
    }

    fn receive(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
        while self.process_next() {}
    }

    /// Consume one complete message from `inbound`. Returns false if more bytes are needed.
    fn process_next(&mut self) -> bool {
        let Some(&first) = self.inbound.first() else {
            return false;
        };

        match (self.phase, Command::from_u8(first)) {
            (Phase::AwaitingInit | Phase::AwaitingAck | Phase::Streaming, Some(Command::InitRequest)) => {
                // A new handshake restarts the link.
                self.inbound.remove(0);
                self.stride = 0;
                self.on_init_request();
            }
            (Phase::Streaming, Some(Command::TerminateCommunication)) => {
                self.inbound.remove(0);
                self.phase = Phase::AwaitingInit;
                self.stride = 0;
            }
            (Phase::AwaitingAck, Some(Command::InitAcknowledge)) => {
                self.inbound.remove(0);
                self.phase = Phase::Streaming;
                self.stats.init_acknowledged = true;
            }
            (Phase::Streaming, Some(cmd @ (Command::StreamStartRaw | Command::StreamStartCompressed))) => {
                if self.inbound.len() < STREAM_PACKET_SIZE {
                    return false;
                }
                let packet: Vec<u8> = self.inbound.drain(..STREAM_PACKET_SIZE).collect();
                self.on_stream_packet(cmd, &packet);
            }
            (Phase::Streaming, Some(Command::Display)) => {
                self.inbound.remove(0);
                self.on_display();
            }
            _ => {
                self.inbound.remove(0);
            }
        }
        true
    }

    fn on_init_request(&mut self) {
        self.stats.init_requests += 1;
        if self.silent || self.stats.init_requests <= self.probes_before_reply {
            return;
        }
        let reply = match &self.init_reply {
            Some(bytes) => bytes.clone(),
            None => vec![
                Command::InitStart.byte(),
                self.side,
                self.channel_count,
                self.bit_depth,
            ],
        };
        if !self.muted {
            self.outbound.extend(reply);
        }
        self.phase = Phase::AwaitingAck;
    }

    fn on_stream_packet(&mut self, start: Command, packet: &[u8]) {
        self.stats.chunks_received += 1;

        let mut payload = [0u8; CHUNK_SIZE];
        payload.copy_from_slice(&packet[1..=CHUNK_SIZE]);
        let Some(encoding) = start.chunk_encoding() else {
            return;
        };

        let end_ok = packet[CHUNK_SIZE + 1] == Command::StreamEnd.byte();
        let corrupted = self.corruption_rate > 0.0 && self.rng.gen_bool(self.corruption_rate);
        if end_ok && !corrupted {
            let written = apply_chunk(&payload, encoding, &mut self.write_buffer, self.stride);
            self.stride = (self.stride + written).min(self.write_buffer.len());
            self.stats.acknowledged += 1;
            self.reply(Command::StreamAcknowledge);
        } else {
            self.stats.corrupted += 1;
            self.reply(Command::StreamCorrupted);
        }
    }

    fn on_display(&mut self) {
        if self.stride == self.write_buffer.len() {
            std::mem::swap(&mut self.write_buffer, &mut self.display_buffer);
            self.stats.displayed += 1;
            self.reply(Command::FrameDisplayed);
        } else {
            self.stats.display_failed += 1;
            self.reply(Command::FrameFailed);
        }
        self.stride = 0;
    }
}

/// A simulated cube. Cloning yields another handle to the same device.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    /// Create a device reporting the given parameters.
    ///
    /// The parameters are reported as-is, so unsupported values can be used
    /// to exercise the host's validation.
    pub fn new(side: u8, channel_count: u8, bit_depth: u8) -> Self {
        let size = ChannelConfig::new(channel_count, bit_depth)
            .map(|channels| voxel_data_size(side as usize, channels))
            .unwrap_or(0);

        Self {
            state: Arc::new(Mutex::new(DeviceState {
                side,
                channel_count,
                bit_depth,
                probes_before_reply: 0,
                init_reply: None,
                silent: false,
                muted: false,
                phase: Phase::AwaitingInit,
                inbound: Vec::new(),
                outbound: VecDeque::new(),
                write_buffer: vec![0u8; size],
                display_buffer: vec![0u8; size],
                stride: 0,
                corruption_rate: 0.0,
                rng: StdRng::seed_from_u64(0),
                stats: DeviceStats::default(),
            })),
        }
    }

    /// Ignore the first `probes` INIT_REQUESTs.
    pub fn answer_after(self, probes: u32) -> Self {
        self.lock().probes_before_reply = probes;
        self
    }

    /// Never answer the handshake.
    pub fn silent(self) -> Self {
        self.lock().silent = true;
        self
    }

    /// Answer INIT_REQUEST with these bytes instead of INIT_START.
    pub fn with_init_reply(self, reply: Vec<u8>) -> Self {
        self.lock().init_reply = Some(reply);
        self
    }

    /// Report each stream packet as corrupted with probability `rate`.
    pub fn with_corruption(self, rate: f64, seed: u64) -> Self {
        {
            let mut state = self.lock();
            state.corruption_rate = rate.clamp(0.0, 1.0);
            state.rng = StdRng::seed_from_u64(seed);
        }
        self
    }

    /// Suppress all replies while keeping the device processing input.
    pub fn set_mute(&self, muted: bool) {
        self.lock().muted = muted;
    }

    /// Host-side transport connected to this device.
    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport {
            state: Arc::clone(&self.state),
        }
    }

    /// Send STREAM_REQUEST to the host.
    pub fn pull(&self) {
        let mut state = self.lock();
        if state.phase == Phase::Streaming {
            state.outbound.push_back(Command::StreamRequest.byte());
        }
    }

    /// Send TERMINATE_COMMUNICATION and stop responding.
    pub fn terminate(&self) {
        let mut state = self.lock();
        state.outbound.push_back(Command::TerminateCommunication.byte());
        state.phase = Phase::Terminated;
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().phase == Phase::Streaming
    }

    pub fn stats(&self) -> DeviceStats {
        self.lock().stats
    }

    /// Bytes received toward the next frame.
    pub fn stride(&self) -> usize {
        self.lock().stride
    }

    pub fn write_buffer(&self) -> Vec<u8> {
        self.lock().write_buffer.clone()
    }

    /// Buffer currently shown on the LEDs.
    pub fn displayed(&self) -> Vec<u8> {
        self.lock().display_buffer.clone()
    }

    /// Displayed brightness of one channel, 0..=255.
    pub fn brightness(&self, channel: usize, x: usize, y: usize, z: usize) -> Option<u8> {
        let state = self.lock();
        let channels = ChannelConfig::new(state.channel_count, state.bit_depth).ok()?;
        channel_brightness(
            &state.display_buffer,
            state.side as usize,
            channels,
            x,
            y,
            z,
            channel,
        )
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Host end of an in-memory link to a [`SimulatedDevice`].
///
/// Writes are processed by the device immediately, so replies are available
/// as soon as `write_all` returns.
#[derive(Debug)]
pub struct LoopbackTransport {
    state: Arc<Mutex<DeviceState>>,
}

impl LoopbackTransport {
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for LoopbackTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if state.phase == Phase::Terminated {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device terminated the link",
            ));
        }
        state.receive(bytes);
        Ok(())
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.lock().outbound.len())
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        Ok(self.lock().outbound.drain(..).collect())
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.lock().outbound.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake(device: &SimulatedDevice, transport: &mut LoopbackTransport) {
        let expected = {
            let state = device.lock();
            vec![120, state.side, state.channel_count, state.bit_depth]
        };
        transport.write_all(&[127]).unwrap();
        assert_eq!(transport.read_available().unwrap(), expected);
        transport.write_all(&[113]).unwrap();
        assert!(device.is_streaming());
    }

    #[test]
    fn test_device_handshake() {
        let device = SimulatedDevice::new(4, 3, 8);
        let mut transport = device.transport();
        handshake(&device, &mut transport);
        assert_eq!(device.stats().init_requests, 1);
    }

    #[test]
    fn test_device_accepts_split_packets() {
        let device = SimulatedDevice::new(2, 1, 8);
        let mut transport = device.transport();
        handshake(&device, &mut transport);

        transport.write_all(&[31, 1, 2, 3, 4]).unwrap();
        assert_eq!(transport.bytes_available().unwrap(), 0);
        transport.write_all(&[5, 6, 7, 8, 248, 1]).unwrap();
        assert_eq!(transport.read_byte().unwrap(), Some(240));
        assert_eq!(device.stride(), 8);
        assert_eq!(device.write_buffer(), vec![1, 2, 3, 4, 5, 6, 7, 8]);

        transport.write_all(&[24]).unwrap();
        assert_eq!(transport.read_byte().unwrap(), Some(217));
        assert_eq!(device.displayed(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(device.brightness(0, 1, 0, 0), Some(2));
        assert_eq!(device.stride(), 0);
    }

    #[test]
    fn test_device_rejects_bad_end_marker() {
        let device = SimulatedDevice::new(2, 1, 8);
        let mut transport = device.transport();
        handshake(&device, &mut transport);

        transport
            .write_all(&[32, 9, 8, 0, 0, 0, 0, 0, 0, 247, 1])
            .unwrap();
        assert_eq!(transport.read_byte().unwrap(), Some(224));
        assert_eq!(device.stride(), 0);

        transport.write_all(&[24]).unwrap();
        assert_eq!(transport.read_byte().unwrap(), Some(210));
    }

    #[test]
    fn test_terminated_device_breaks_pipe() {
        let device = SimulatedDevice::new(2, 1, 1);
        let mut transport = device.transport();
        handshake(&device, &mut transport);

        device.terminate();
        assert_eq!(transport.read_byte().unwrap(), Some(0));
        assert!(transport.write_all(&[24]).is_err());
    }
}
