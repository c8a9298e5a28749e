//! Protocol engine: connection lifecycle and the device-pulled dispatcher.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::animation::FrameSink;
use crate::schema::{LinkConfig, SchemaError, VoxelGrid};

use super::LinkError;
use super::handshake::{ConnectStatus, Handshake, HandshakeState};
use super::protocol::Command;
use super::session::{LinkSession, SessionDiagnostics, StepOutcome, StepTiming};
use super::transport::Transport;

#[cfg(feature = "serial")]
use super::transport::SerialTransport;

/// Receives human-readable status lines.
pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// What servicing the inbound bytes did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Nothing arrived.
    Idle,
    /// STREAM_REQUEST answered with one step.
    Step(StepOutcome),
    /// Unsolicited byte, dropped.
    Ignored(u8),
    /// Device ended the session, or the port went away.
    Terminated,
    /// No session to service.
    Closed,
}

#[derive(Default)]
struct LinkState {
    transport: Option<Box<dyn Transport>>,
    session: Option<LinkSession>,
    /// Bumped on every connect so a stale dispatcher exits.
    generation: u64,
}

impl LinkState {
    /// Close the transport and drop the session, returning its final counters.
    fn teardown(&mut self) -> Option<SessionDiagnostics> {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.session.take().map(|mut session| {
            let diagnostics = session.diagnostics();
            session.clear();
            diagnostics
        })
    }

    fn service(&mut self, timing: StepTiming) -> (Dispatch, Option<SessionDiagnostics>) {
        let (Some(transport), Some(session)) = (self.transport.as_mut(), self.session.as_mut())
        else {
            return (Dispatch::Closed, None);
        };

        let inbound = match transport.bytes_available() {
            Ok(0) => return (Dispatch::Idle, None),
            Ok(_) => transport.read_available(),
            Err(e) => Err(e),
        };
        let first = match inbound {
            Ok(bytes) => match bytes.first() {
                Some(&b) => b,
                None => return (Dispatch::Idle, None),
            },
            Err(e) => {
                log::warn!("inbound read failed, closing link: {}", e);
                return (Dispatch::Terminated, self.teardown());
            }
        };

        match Command::from_u8(first) {
            Some(Command::StreamRequest) => {
                let outcome = session.step(transport.as_mut(), timing).unwrap_or_else(|e| {
                    log::warn!("streaming step failed: {}", e);
                    StepOutcome::NoReply
                });
                (Dispatch::Step(outcome), None)
            }
            Some(Command::TerminateCommunication) => {
                log::debug!("device terminated communication");
                (Dispatch::Terminated, self.teardown())
            }
            _ => {
                log::trace!("ignoring unsolicited byte {}", first);
                (Dispatch::Ignored(first), None)
            }
        }
    }
}

/// Streams frames to a connected cube.
///
/// Share it as `Arc<FrameStreamer>`. Every operation takes the same lock, so
/// handshake, streaming steps, display steps and teardown never interleave.
pub struct FrameStreamer {
    config: LinkConfig,
    status: Option<StatusCallback>,
    state: Arc<Mutex<LinkState>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl FrameStreamer {
    /// Fails if the link configuration is invalid.
    pub fn new(config: LinkConfig) -> Result<Self, SchemaError> {
        config.validate()?;
        Ok(Self {
            config,
            status: None,
            state: Arc::new(Mutex::new(LinkState::default())),
            dispatcher: Mutex::new(None),
        })
    }

    /// Deliver status lines to `status` as well as the log.
    pub fn with_status(mut self, status: StatusCallback) -> Self {
        self.status = Some(status);
        self
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Open a serial port and run the handshake.
    #[cfg(feature = "serial")]
    pub fn connect(&self, port: &str) -> ConnectStatus {
        self.connect_with(port, |name, baud_rate| {
            Ok(Box::new(SerialTransport::open(name, baud_rate)?) as Box<dyn Transport>)
        })
    }

    /// Open a transport with `open` and run the handshake.
    ///
    /// An existing connection is closed first. On success the dispatcher
    /// thread starts answering the device's requests.
    pub fn connect_with<F>(&self, port: &str, open: F) -> ConnectStatus
    where
        F: FnOnce(&str, u32) -> Result<Box<dyn Transport>, LinkError>,
    {
        if self.is_connected() {
            self.disconnect();
        }
        self.emit(&format!("connecting to port '{}'...", port));

        let mut handshake = Handshake::new(&self.config);
        let mut transport = match open(port, self.config.baud_rate) {
            Ok(transport) => transport,
            Err(e) => {
                log::warn!("{}", e);
                let status = handshake.transport_failed().status();
                let status = status.unwrap_or(ConnectStatus::ConnectionFailed);
                self.emit(status.message());
                return status;
            }
        };

        let generation = {
            let mut state = self.lock();
            match handshake.run(transport.as_mut()) {
                HandshakeState::Negotiated(params) => {
                    state.transport = Some(transport);
                    state.session = Some(LinkSession::new(params));
                    state.generation += 1;
                    Ok((state.generation, params))
                }
                other => {
                    transport.close();
                    Err(other.status().unwrap_or(ConnectStatus::ConnectionFailed))
                }
            }
        };

        match generation {
            Ok((generation, params)) => {
                log::info!(
                    "negotiated with '{}' after {} probe(s)",
                    port,
                    handshake.attempts()
                );
                self.emit(&format!("loaded cube side {}", params.side));
                self.emit(&format!(
                    "number of color channels {}",
                    params.channels.channel_count()
                ));
                self.emit(&format!(
                    "channel resolution {} bits",
                    params.channels.bit_depth()
                ));
                self.emit(ConnectStatus::Succeeded.message());
                self.spawn_dispatcher(generation);
                ConnectStatus::Succeeded
            }
            Err(status) => {
                self.emit(status.message());
                status
            }
        }
    }

    /// Close the link and report the session's final counters.
    ///
    /// Returns `None` if no session was open.
    pub fn disconnect(&self) -> Option<SessionDiagnostics> {
        let diagnostics = {
            let mut state = self.lock();
            if let Some(transport) = state.transport.as_mut() {
                // Best effort; the device may already be gone.
                if let Err(e) = transport.write_all(&[Command::TerminateCommunication.byte()]) {
                    log::debug!("terminate not delivered: {}", e);
                }
            }
            state.teardown()
        };
        if let Some(diagnostics) = diagnostics {
            self.report_disconnect(diagnostics);
        }
        self.join_dispatcher();
        diagnostics
    }

    pub fn is_connected(&self) -> bool {
        self.lock().session.is_some()
    }

    /// Negotiated cube side, if connected.
    pub fn cube_side(&self) -> Option<usize> {
        self.lock().session.as_ref().map(|s| s.params().side)
    }

    pub fn diagnostics(&self) -> Option<SessionDiagnostics> {
        self.lock().session.as_ref().map(LinkSession::diagnostics)
    }

    /// Repack the voxel buffer from `grid`.
    ///
    /// Returns false if not connected or if the grid's side differs from the
    /// cube's.
    pub fn stream_frame(&self, grid: &VoxelGrid) -> bool {
        let mut state = self.lock();
        let Some(session) = state.session.as_mut() else {
            return false;
        };
        let loaded = session.load_frame(grid);
        if !loaded {
            log::warn!(
                "frame side {} does not match cube side {}",
                grid.side(),
                session.params().side
            );
        }
        loaded
    }

    /// Ask the device to show the buffered frame on its next pull.
    pub fn request_display(&self) {
        if let Some(session) = self.lock().session.as_mut() {
            session.request_display(Instant::now());
        }
    }

    /// Service inbound bytes once, as the dispatcher does on every poll.
    pub fn service_inbound(&self) -> Dispatch {
        let (dispatch, diagnostics) = self.lock().service(StepTiming::from(&self.config));
        if let Some(diagnostics) = diagnostics {
            self.report_disconnect(diagnostics);
        }
        dispatch
    }

    /// Send a status line to the log and the callback.
    pub fn emit(&self, line: &str) {
        emit(self.status.as_ref(), line);
    }

    fn report_disconnect(&self, diagnostics: SessionDiagnostics) {
        report_disconnect(self.status.as_ref(), diagnostics);
    }

    fn spawn_dispatcher(&self, generation: u64) {
        self.join_dispatcher();

        let state = Arc::clone(&self.state);
        let status = self.status.clone();
        let timing = StepTiming::from(&self.config);
        let poll_interval = self.config.poll_interval();

        let spawned = thread::Builder::new()
            .name("cube-link-dispatch".to_string())
            .spawn(move || {
                loop {
                    let (dispatch, diagnostics) = {
                        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                        if state.generation != generation {
                            break;
                        }
                        state.service(timing)
                    };
                    if let Some(diagnostics) = diagnostics {
                        report_disconnect(status.as_ref(), diagnostics);
                    }
                    match dispatch {
                        Dispatch::Closed | Dispatch::Terminated => break,
                        Dispatch::Idle | Dispatch::Step(_) | Dispatch::Ignored(_) => {
                            thread::sleep(poll_interval)
                        }
                    }
                }
                log::debug!("dispatcher stopped");
            });

        match spawned {
            Ok(handle) => {
                *self
                    .dispatcher
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Err(e) => log::warn!("failed to start dispatcher: {}", e),
        }
    }

    fn join_dispatcher(&self) {
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::warn!("dispatcher thread panicked");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FrameStreamer {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl FrameSink for FrameStreamer {
    fn stream_frame(&self, grid: &VoxelGrid) {
        FrameStreamer::stream_frame(self, grid);
    }

    fn request_display(&self) {
        FrameStreamer::request_display(self);
    }

    fn cube_side(&self) -> Option<usize> {
        FrameStreamer::cube_side(self)
    }

    fn status(&self, line: &str) {
        self.emit(line);
    }
}

fn emit(status: Option<&StatusCallback>, line: &str) {
    log::info!("{}", line);
    if let Some(status) = status {
        status(line);
    }
}

fn report_disconnect(status: Option<&StatusCallback>, diagnostics: SessionDiagnostics) {
    log::info!(
        "session closed with {} corrupted packet(s)",
        diagnostics.corrupted_packets
    );
    emit(
        status,
        &format!(
            "disconnected, a total of {} failed frames were detected",
            diagnostics.failed_frames
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::SimulatedDevice;
    use crate::schema::Color;

    fn fast_config() -> LinkConfig {
        LinkConfig {
            init_response_wait_ms: 1,
            acknowledge_wait_ms: 5,
            ..Default::default()
        }
    }

    fn recorded() -> (StatusCallback, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let callback: StatusCallback = Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        });
        (callback, lines)
    }

    fn connect(streamer: &FrameStreamer, device: &SimulatedDevice) -> ConnectStatus {
        let transport = device.transport();
        streamer.connect_with("sim", move |_, _| Ok(Box::new(transport) as Box<dyn Transport>))
    }

    #[test]
    fn test_connect_reports_parameters() {
        let (callback, lines) = recorded();
        let streamer = FrameStreamer::new(fast_config()).unwrap().with_status(callback);
        let device = SimulatedDevice::new(8, 3, 4);

        assert_eq!(connect(&streamer, &device), ConnectStatus::Succeeded);
        assert!(streamer.is_connected());
        assert_eq!(streamer.cube_side(), Some(8));
        assert_eq!(
            *lines.lock().unwrap(),
            vec![
                "connecting to port 'sim'...",
                "loaded cube side 8",
                "number of color channels 3",
                "channel resolution 4 bits",
                "connected",
            ]
        );
    }

    #[test]
    fn test_one_retry_before_negotiation() {
        let streamer = FrameStreamer::new(fast_config()).unwrap();
        let device = SimulatedDevice::new(5, 2, 4).answer_after(1);

        assert_eq!(connect(&streamer, &device), ConnectStatus::Succeeded);
        assert_eq!(device.stats().init_requests, 2);
    }

    #[test]
    fn test_silent_device_times_out() {
        let (callback, lines) = recorded();
        let streamer = FrameStreamer::new(fast_config()).unwrap().with_status(callback);
        let device = SimulatedDevice::new(4, 1, 1).silent();

        assert_eq!(connect(&streamer, &device), ConnectStatus::ConnectionTimeout);
        assert_eq!(device.stats().init_requests, 8);
        assert!(!streamer.is_connected());
        assert_eq!(
            lines.lock().unwrap().last().map(String::as_str),
            Some("connection timed out")
        );
    }

    #[test]
    fn test_open_failure() {
        let streamer = FrameStreamer::new(fast_config()).unwrap();
        let status = streamer.connect_with("missing", |port, _| {
            Err(LinkError::Open {
                port: port.to_string(),
                message: "no such device".to_string(),
            })
        });
        assert_eq!(status, ConnectStatus::ConnectionFailed);
        assert!(!streamer.is_connected());
    }

    #[test]
    fn test_pull_streams_and_displays() {
        let streamer = FrameStreamer::new(fast_config()).unwrap();
        let device = SimulatedDevice::new(2, 1, 8);
        assert_eq!(connect(&streamer, &device), ConnectStatus::Succeeded);

        let grid = VoxelGrid::filled(2, Color::WHITE).unwrap();
        assert!(streamer.stream_frame(&grid));

        device.pull();
        streamer.service_inbound();
        assert_eq!(device.stride(), 8);

        streamer.request_display();
        device.pull();
        streamer.service_inbound();
        assert_eq!(device.displayed(), vec![255; 8]);
        assert_eq!(streamer.diagnostics().map(|d| d.cursor), Some(0));
    }

    #[test]
    fn test_service_without_session() {
        let streamer = FrameStreamer::new(fast_config()).unwrap();
        assert_eq!(streamer.service_inbound(), Dispatch::Closed);
    }

    #[test]
    fn test_device_termination_tears_down() {
        let (callback, lines) = recorded();
        let streamer = FrameStreamer::new(fast_config()).unwrap().with_status(callback);
        let device = SimulatedDevice::new(2, 1, 1);
        assert_eq!(connect(&streamer, &device), ConnectStatus::Succeeded);

        device.terminate();
        // Either the dispatcher or this call handles it.
        streamer.service_inbound();
        assert!(!streamer.is_connected());
        assert_eq!(streamer.diagnostics(), None);
        // Joins the dispatcher, so its status line has been delivered.
        assert_eq!(streamer.disconnect(), None);
        assert!(
            lines
                .lock()
                .unwrap()
                .contains(&"disconnected, a total of 0 failed frames were detected".to_string())
        );
    }

    #[test]
    fn test_mismatched_frame_rejected() {
        let streamer = FrameStreamer::new(fast_config()).unwrap();
        let device = SimulatedDevice::new(4, 1, 1);
        assert_eq!(connect(&streamer, &device), ConnectStatus::Succeeded);
        assert!(!streamer.stream_frame(&VoxelGrid::new(3).unwrap()));
        assert!(streamer.stream_frame(&VoxelGrid::new(4).unwrap()));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let zero_budget = LinkConfig {
            init_retries: 0,
            ..fast_config()
        };
        assert!(matches!(
            FrameStreamer::new(zero_budget),
            Err(SchemaError::InvalidRetryBudget)
        ));

        let zero_poll = LinkConfig {
            poll_interval_ms: 0,
            ..fast_config()
        };
        assert!(matches!(
            FrameStreamer::new(zero_poll),
            Err(SchemaError::InvalidPollInterval)
        ));
    }

    #[test]
    fn test_reconnect_resizes_buffer() {
        let streamer = FrameStreamer::new(fast_config()).unwrap();

        let mono = SimulatedDevice::new(4, 1, 1);
        assert_eq!(connect(&streamer, &mono), ConnectStatus::Succeeded);
        streamer.stream_frame(&VoxelGrid::filled(4, Color::WHITE).unwrap());
        mono.pull();
        streamer.service_inbound();
        let first = streamer.disconnect().unwrap();
        assert_eq!(first.buffer_len, 8);
        assert_eq!(first.cursor, 8);

        let full = SimulatedDevice::new(4, 3, 8);
        assert_eq!(connect(&streamer, &full), ConnectStatus::Succeeded);
        let second = streamer.diagnostics().unwrap();
        assert_eq!(second.buffer_len, 192);
        assert_eq!(second.cursor, 0);
        assert_eq!(second.params.channels.channel_count(), 3);
    }

    #[test]
    fn test_disconnect_resets_session() {
        let streamer = FrameStreamer::new(fast_config()).unwrap();
        let device = SimulatedDevice::new(2, 1, 8);
        assert_eq!(connect(&streamer, &device), ConnectStatus::Succeeded);
        streamer.stream_frame(&VoxelGrid::filled(2, Color::RED).unwrap());
        device.pull();
        streamer.service_inbound();

        let diagnostics = streamer.disconnect().unwrap();
        assert_eq!(diagnostics.cursor, 8);
        assert!(!streamer.is_connected());
        assert!(!streamer.stream_frame(&VoxelGrid::new(2).unwrap()));

        // A fresh connection starts from offset zero.
        assert_eq!(connect(&streamer, &device), ConnectStatus::Succeeded);
        assert_eq!(streamer.diagnostics().map(|d| d.cursor), Some(0));
    }
}
