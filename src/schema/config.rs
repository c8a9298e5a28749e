//! Configuration types for the cube link and playback timing.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_baud_rate() -> u32 {
    115_200
}

fn default_init_retries() -> u32 {
    8
}

fn default_init_response_wait_ms() -> u64 {
    150
}

fn default_acknowledge_wait_ms() -> u64 {
    10
}

fn default_display_resend_ms() -> u64 {
    50
}

fn default_poll_interval_ms() -> u64 {
    1
}

fn default_start_frame_delay_ms() -> u64 {
    100
}

fn default_zero_frame_delay_ms() -> u64 {
    100
}

fn default_min_sleep_ms() -> u64 {
    17
}

/// Link and playback timing configuration.
///
/// Every field has a default matching the reference cube firmware, so an
/// empty JSON object deserializes to a working configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial speed. Framing is always 8 data bits, 1 stop bit, no parity.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Number of handshake probes before giving up.
    #[serde(default = "default_init_retries")]
    pub init_retries: u32,
    /// How long to wait for the device to answer a probe.
    #[serde(default = "default_init_response_wait_ms")]
    pub init_response_wait_ms: u64,
    /// Polling window for a one-byte acknowledgment.
    #[serde(default = "default_acknowledge_wait_ms")]
    pub acknowledge_wait_ms: u64,
    /// How long a display request is re-offered before it is dropped.
    #[serde(default = "default_display_resend_ms")]
    pub display_resend_ms: u64,
    /// Period at which the dispatcher checks for inbound bytes.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delay after pushing the first frame before playback starts.
    #[serde(default = "default_start_frame_delay_ms")]
    pub start_frame_delay_ms: u64,
    /// Delay between pushing the blank frame and displaying it.
    #[serde(default = "default_zero_frame_delay_ms")]
    pub zero_frame_delay_ms: u64,
    /// Lower bound on the per-frame pacing sleep.
    #[serde(default = "default_min_sleep_ms")]
    pub min_sleep_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            init_retries: default_init_retries(),
            init_response_wait_ms: default_init_response_wait_ms(),
            acknowledge_wait_ms: default_acknowledge_wait_ms(),
            display_resend_ms: default_display_resend_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            start_frame_delay_ms: default_start_frame_delay_ms(),
            zero_frame_delay_ms: default_zero_frame_delay_ms(),
            min_sleep_ms: default_min_sleep_ms(),
        }
    }
}

impl LinkConfig {
    #[inline]
    pub fn init_response_wait(&self) -> Duration {
        Duration::from_millis(self.init_response_wait_ms)
    }

    #[inline]
    pub fn acknowledge_wait(&self) -> Duration {
        Duration::from_millis(self.acknowledge_wait_ms)
    }

    #[inline]
    pub fn display_resend(&self) -> Duration {
        Duration::from_millis(self.display_resend_ms)
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[inline]
    pub fn start_frame_delay(&self) -> Duration {
        Duration::from_millis(self.start_frame_delay_ms)
    }

    #[inline]
    pub fn zero_frame_delay(&self) -> Duration {
        Duration::from_millis(self.zero_frame_delay_ms)
    }

    #[inline]
    pub fn min_sleep(&self) -> Duration {
        Duration::from_millis(self.min_sleep_ms)
    }

    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.baud_rate == 0 {
            return Err(SchemaError::InvalidBaudRate);
        }
        if self.init_retries == 0 {
            return Err(SchemaError::InvalidRetryBudget);
        }
        if self.poll_interval_ms == 0 {
            return Err(SchemaError::InvalidPollInterval);
        }
        Ok(())
    }
}

/// Validation and loading errors for schema types.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Cube side {0} is outside 1..=32")]
    InvalidSide(usize),
    #[error("Expected {expected} voxels, got {actual}")]
    VoxelCountMismatch { expected: usize, actual: usize },
    #[error("Frame {frame} has side {actual}, sequence side is {expected}")]
    FrameSideMismatch {
        frame: usize,
        expected: usize,
        actual: usize,
    },
    #[error("Frame {frame} has invalid duration {duration_ms} ms")]
    InvalidDuration { frame: usize, duration_ms: f32 },
    #[error("Sequence has no frames")]
    EmptySequence,
    #[error("Channel count {0} is not 1, 2 or 3")]
    InvalidChannelCount(u8),
    #[error("Channel bit depth {0} is not 1, 2, 4 or 8")]
    InvalidBitDepth(u8),
    #[error("Baud rate must be non-zero")]
    InvalidBaudRate,
    #[error("Handshake retry budget must be non-zero")]
    InvalidRetryBudget,
    #[error("Poll interval must be non-zero")]
    InvalidPollInterval,
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse JSON: {0}")]
    Parse(#[from] serde_json::Error),
}
