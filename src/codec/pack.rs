//! Bit-packing of voxel colors into the channel-encoded device buffer.
//!
//! Voxel `(x, y, z)` channel `i` starts at bit
//! `bit_depth * i + channel_count * bit_depth * (side² * z + side * y + x)`,
//! least-significant bit first within a byte. The Z axis is flipped: device
//! layer `z` holds logical layer `side - 1 - z`, so device layer 0 is the top
//! of the authored animation.

use crate::schema::{ChannelConfig, Color, VoxelGrid};

/// Bits in one byte of the packed buffer.
pub const BYTE_SIZE: usize = 8;

/// Size in bytes of a packed buffer for a cube of `side` with `channels`.
#[inline]
pub fn voxel_data_size(side: usize, channels: ChannelConfig) -> usize {
    (side * side * side * channels.bits_per_voxel()).div_ceil(BYTE_SIZE)
}

/// Bit offset of `channel` of the voxel at device coordinates (x, y, z).
#[inline]
pub fn bit_offset(
    side: usize,
    channels: ChannelConfig,
    x: usize,
    y: usize,
    z: usize,
    channel: usize,
) -> usize {
    let depth = channels.bit_depth() as usize;
    let voxel = side * side * z + side * y + x;
    depth * channel + channels.bits_per_voxel() * voxel
}

/// Quantize an intensity in `[0, 1]` to `0..=max_value`, rounding to nearest.
#[inline]
pub fn quantize(intensity: f32, max_value: u32) -> u32 {
    (intensity.clamp(0.0, 1.0) * max_value as f32).round() as u32
}

fn source_intensity(color: Color, channels: ChannelConfig, channel: usize) -> f32 {
    if channels.channel_count() == 1 {
        color.intensity()
    } else {
        color.channel(channel)
    }
}

/// Pack `grid` into `buffer`, which must be exactly
/// [`voxel_data_size`] bytes long. The buffer is cleared first.
///
/// # Panics
///
/// Panics if `buffer` has the wrong length.
pub fn pack_into(grid: &VoxelGrid, channels: ChannelConfig, buffer: &mut [u8]) {
    let side = grid.side();
    assert_eq!(buffer.len(), voxel_data_size(side, channels));

    buffer.fill(0);
    let max_value = channels.max_value();

    for z in 0..side {
        for y in 0..side {
            for x in 0..side {
                let color = grid.voxel(x, y, side - 1 - z);
                for channel in 0..channels.channel_count() as usize {
                    let value = quantize(source_intensity(color, channels, channel), max_value);
                    let offset = bit_offset(side, channels, x, y, z, channel);
                    buffer[offset / BYTE_SIZE] |= (value << (offset % BYTE_SIZE)) as u8;
                }
            }
        }
    }
}

/// Pack `grid` into a freshly allocated buffer.
pub fn pack(grid: &VoxelGrid, channels: ChannelConfig) -> Vec<u8> {
    let mut buffer = vec![0u8; voxel_data_size(grid.side(), channels)];
    pack_into(grid, channels, &mut buffer);
    buffer
}

/// Raw quantized value of `channel` at device coordinates (x, y, z).
///
/// Returns `None` for coordinates, channels or buffers out of range.
pub fn channel_value(
    buffer: &[u8],
    side: usize,
    channels: ChannelConfig,
    x: usize,
    y: usize,
    z: usize,
    channel: usize,
) -> Option<u32> {
    if x >= side || y >= side || z >= side || channel >= channels.channel_count() as usize {
        return None;
    }
    let offset = bit_offset(side, channels, x, y, z, channel);
    let byte = *buffer.get(offset / BYTE_SIZE)? as u32;
    Some((byte >> (offset % BYTE_SIZE)) & channels.max_value())
}

/// Channel value at device coordinates scaled to `0..=255`, as the firmware drives its LEDs.
pub fn channel_brightness(
    buffer: &[u8],
    side: usize,
    channels: ChannelConfig,
    x: usize,
    y: usize,
    z: usize,
    channel: usize,
) -> Option<u8> {
    let raw = channel_value(buffer, side, channels, x, y, z, channel)?;
    Some((raw * 255 / channels.max_value()) as u8)
}
