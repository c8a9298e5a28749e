//! Schema module - Voxel grids, animation sequences and link configuration.

mod channel;
mod config;
mod grid;
mod sequence;

pub use channel::*;
pub use config::*;
pub use grid::*;
pub use sequence::*;
