//! Codec module - Voxel bit-packing and wire chunk encoding.

mod encoder;
mod pack;

pub use encoder::*;
pub use pack::*;
