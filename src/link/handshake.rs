//! Connection handshake: probe the device and negotiate cube parameters.

use std::fmt;
use std::io;
use std::thread;
use std::time::Duration;

use crate::schema::{CubeParams, LinkConfig};

use super::protocol::{Command, INIT_DATA_SIZE};
use super::transport::Transport;

/// Result of a connection attempt, as reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectStatus {
    Succeeded,
    ConnectionFailed,
    ConnectionTimeout,
    NotRespondingProperly,
}

impl ConnectStatus {
    /// Human-readable status line.
    pub fn message(self) -> &'static str {
        match self {
            ConnectStatus::Succeeded => "connected",
            ConnectStatus::ConnectionFailed => "connection failed",
            ConnectStatus::ConnectionTimeout => "connection timed out",
            ConnectStatus::NotRespondingProperly => "received improper response",
        }
    }
}

impl fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Transport not opened yet.
    Idle,
    /// Probing; `pending` is the result reported if the budget runs out.
    Probing { attempt: u32, pending: ConnectStatus },
    /// Parameters accepted and acknowledged.
    Negotiated(CubeParams),
    /// Terminal failure.
    Failed(ConnectStatus),
}

impl HandshakeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::Negotiated(_) | HandshakeState::Failed(_))
    }

    /// Status to report for a terminal state.
    pub fn status(&self) -> Option<ConnectStatus> {
        match self {
            HandshakeState::Negotiated(_) => Some(ConnectStatus::Succeeded),
            HandshakeState::Failed(status) => Some(*status),
            _ => None,
        }
    }
}

/// Drives the INIT_REQUEST / INIT_START / INIT_ACKNOWLEDGE exchange.
///
/// Only silence and unexpected replies are retried. A well-formed reply with
/// unsupported parameters fails immediately.
#[derive(Debug, Clone)]
pub struct Handshake {
    state: HandshakeState,
    retries: u32,
    response_wait: Duration,
    attempts: u32,
}

impl Handshake {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            state: HandshakeState::Idle,
            retries: config.init_retries,
            response_wait: config.init_response_wait(),
            attempts: 0,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Number of INIT_REQUEST probes sent so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The transport could not be opened.
    pub fn transport_failed(&mut self) -> HandshakeState {
        self.state = HandshakeState::Failed(ConnectStatus::ConnectionFailed);
        self.state
    }

    /// Run probes until a terminal state is reached.
    ///
    /// An I/O error on the transport ends the handshake as `ConnectionFailed`.
    pub fn run(&mut self, transport: &mut dyn Transport) -> HandshakeState {
        if self.state == HandshakeState::Idle {
            self.state = HandshakeState::Probing {
                attempt: 0,
                pending: ConnectStatus::ConnectionTimeout,
            };
        }

        while !self.state.is_terminal() {
            if let Err(e) = self.probe(transport) {
                log::warn!("handshake aborted by transport error: {}", e);
                self.state = HandshakeState::Failed(ConnectStatus::ConnectionFailed);
            }
        }
        self.state
    }

    /// Send one probe and process whatever arrives within the response window.
    pub fn probe(&mut self, transport: &mut dyn Transport) -> io::Result<HandshakeState> {
        let HandshakeState::Probing { attempt, pending } = self.state else {
            return Ok(self.state);
        };

        transport.clear_input()?;
        transport.write_all(&[Command::InitRequest.byte()])?;
        self.attempts += 1;

        thread::sleep(self.response_wait);

        let response = transport.read_available()?;
        log::debug!(
            "handshake probe {}/{}: {} byte(s) received",
            attempt + 1,
            self.retries,
            response.len()
        );

        self.state = self.advance(attempt + 1, pending, &response);
        if let HandshakeState::Negotiated(_) = self.state {
            transport.write_all(&[Command::InitAcknowledge.byte()])?;
        }
        Ok(self.state)
    }

    /// Transition after `attempt` probes given the device's `response`.
    fn advance(&self, attempt: u32, pending: ConnectStatus, response: &[u8]) -> HandshakeState {
        let mut pending = pending;

        if response.len() == INIT_DATA_SIZE && response[0] == Command::InitStart.byte() {
            return match CubeParams::from_init_bytes(response[1], response[2], response[3]) {
                Ok(params) => HandshakeState::Negotiated(params),
                Err(e) => {
                    log::warn!("device reported unsupported parameters: {}", e);
                    HandshakeState::Failed(ConnectStatus::NotRespondingProperly)
                }
            };
        }
        if !response.is_empty() {
            pending = ConnectStatus::NotRespondingProperly;
        }

        if attempt >= self.retries {
            HandshakeState::Failed(pending)
        } else {
            HandshakeState::Probing { attempt, pending }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::device::SimulatedDevice;

    fn fast_config() -> LinkConfig {
        LinkConfig {
            init_response_wait_ms: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_negotiates_on_first_probe() {
        let device = SimulatedDevice::new(4, 2, 4);
        let mut transport = device.transport();

        let mut handshake = Handshake::new(&fast_config());
        let state = handshake.run(&mut transport);

        match state {
            HandshakeState::Negotiated(params) => {
                assert_eq!(params.side, 4);
                assert_eq!(params.channels.channel_count(), 2);
                assert_eq!(params.channels.bit_depth(), 4);
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(handshake.attempts(), 1);
        assert_eq!(device.stats().init_requests, 1);
        assert!(device.stats().init_acknowledged);
    }

    #[test]
    fn test_retries_until_device_answers() {
        let device = SimulatedDevice::new(3, 1, 1).answer_after(3);
        let mut transport = device.transport();

        let mut handshake = Handshake::new(&fast_config());
        assert!(matches!(
            handshake.run(&mut transport),
            HandshakeState::Negotiated(_)
        ));
        assert_eq!(handshake.attempts(), 4);
    }

    #[test]
    fn test_silent_device_times_out() {
        let device = SimulatedDevice::new(4, 1, 1).silent();
        let mut transport = device.transport();

        let mut handshake = Handshake::new(&fast_config());
        let state = handshake.run(&mut transport);

        assert_eq!(state, HandshakeState::Failed(ConnectStatus::ConnectionTimeout));
        assert_eq!(handshake.attempts(), 8);
        assert_eq!(device.stats().init_requests, 8);
    }

    #[test]
    fn test_malformed_parameters_fail_without_retry() {
        let device = SimulatedDevice::new(4, 1, 1).with_init_reply(vec![120, 4, 3, 3]);
        let mut transport = device.transport();

        let mut handshake = Handshake::new(&fast_config());
        let state = handshake.run(&mut transport);

        assert_eq!(
            state,
            HandshakeState::Failed(ConnectStatus::NotRespondingProperly)
        );
        assert_eq!(handshake.attempts(), 1);
        assert!(!device.stats().init_acknowledged);
    }

    #[test]
    fn test_garbage_reply_keeps_retrying() {
        let device = SimulatedDevice::new(4, 1, 1).with_init_reply(vec![1, 2]);
        let mut transport = device.transport();

        let mut handshake = Handshake::new(&fast_config());
        let state = handshake.run(&mut transport);

        assert_eq!(
            state,
            HandshakeState::Failed(ConnectStatus::NotRespondingProperly)
        );
        assert_eq!(handshake.attempts(), 8);
    }

    #[test]
    fn test_advance_transitions() {
        let handshake = Handshake::new(&LinkConfig::default());
        let timeout = ConnectStatus::ConnectionTimeout;

        assert_eq!(
            handshake.advance(1, timeout, &[]),
            HandshakeState::Probing {
                attempt: 1,
                pending: timeout
            }
        );
        assert_eq!(
            handshake.advance(8, timeout, &[]),
            HandshakeState::Failed(timeout)
        );
        // Wrong opcode with the right length is improper, not fatal.
        assert_eq!(
            handshake.advance(2, timeout, &[119, 4, 1, 1]),
            HandshakeState::Probing {
                attempt: 2,
                pending: ConnectStatus::NotRespondingProperly
            }
        );
        assert!(matches!(
            handshake.advance(5, timeout, &[120, 8, 3, 8]),
            HandshakeState::Negotiated(_)
        ));
    }

    #[test]
    fn test_transport_failure() {
        let mut handshake = Handshake::new(&LinkConfig::default());
        assert_eq!(
            handshake.transport_failed().status(),
            Some(ConnectStatus::ConnectionFailed)
        );
    }
}
