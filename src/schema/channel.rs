//! Channel format negotiated with the cube.

use serde::{Deserialize, Serialize};

use super::{MAX_CUBE_SIDE, SchemaError};

/// Per-voxel channel layout: how many channels and how many bits each.
///
/// `channel_count == 1` is a single intensity channel (max of R, G, B).
/// With two or three channels, channel `i` carries R, G, B in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawChannelConfig")]
pub struct ChannelConfig {
    channel_count: u8,
    bit_depth: u8,
}

#[derive(Deserialize)]
struct RawChannelConfig {
    channel_count: u8,
    bit_depth: u8,
}

impl TryFrom<RawChannelConfig> for ChannelConfig {
    type Error = SchemaError;

    fn try_from(raw: RawChannelConfig) -> Result<Self, Self::Error> {
        Self::new(raw.channel_count, raw.bit_depth)
    }
}

impl ChannelConfig {
    /// Create a validated channel configuration.
    pub fn new(channel_count: u8, bit_depth: u8) -> Result<Self, SchemaError> {
        if !(1..=3).contains(&channel_count) {
            return Err(SchemaError::InvalidChannelCount(channel_count));
        }
        if !matches!(bit_depth, 1 | 2 | 4 | 8) {
            return Err(SchemaError::InvalidBitDepth(bit_depth));
        }
        Ok(Self {
            channel_count,
            bit_depth,
        })
    }

    #[inline]
    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    #[inline]
    pub fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    /// Largest quantized channel value, `2^bit_depth - 1`.
    #[inline]
    pub fn max_value(&self) -> u32 {
        (1u32 << self.bit_depth) - 1
    }

    /// Bits occupied by one voxel across all channels.
    #[inline]
    pub fn bits_per_voxel(&self) -> usize {
        self.channel_count as usize * self.bit_depth as usize
    }
}

/// Cube geometry and channel format reported by the device during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CubeParams {
    pub side: usize,
    pub channels: ChannelConfig,
}

impl CubeParams {
    /// Parse the three parameter bytes that follow INIT_START.
    pub fn from_init_bytes(side: u8, channel_count: u8, bit_depth: u8) -> Result<Self, SchemaError> {
        let channels = ChannelConfig::new(channel_count, bit_depth)?;
        let side = side as usize;
        if side == 0 || side > MAX_CUBE_SIDE {
            return Err(SchemaError::InvalidSide(side));
        }
        Ok(Self { side, channels })
    }
}
