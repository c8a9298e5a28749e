//! Cube Link - Stream voxel animations to an LED cube over a serial line.
//!
//! The cube pulls data from the host one 8-byte chunk at a time. Each frame is
//! bit-packed according to the channel format negotiated during the handshake,
//! then sent as run-length or raw chunks, whichever covers more bytes.
//!
//! # Architecture
//!
//! - `schema`: Voxel grids, animation sequences, channel formats and link configuration
//! - `codec`: Bit-packing of voxel colors and chunk encoding
//! - `link`: Wire protocol, handshake, streaming session and the frame streamer
//! - `animation`: Real-time playback with cooperative cancellation
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cube_link::{
//!     animation::{AnimationScheduler, CancellationToken},
//!     link::{ConnectStatus, FrameStreamer},
//!     schema::{AnimationSequence, LinkConfig},
//! };
//!
//! let config = LinkConfig::default();
//! let streamer = Arc::new(FrameStreamer::new(config.clone()).unwrap());
//!
//! if streamer.connect("/dev/ttyACM0") == ConnectStatus::Succeeded {
//!     let sequence = AnimationSequence::example(8).unwrap().with_looping(false);
//!     let scheduler = AnimationScheduler::new(sequence, streamer.clone(), &config).unwrap();
//!     let report = scheduler.run(&CancellationToken::new());
//!     println!("streamed {} frames", report.frames_streamed);
//!     streamer.disconnect();
//! }
//! ```

pub mod animation;
pub mod codec;
pub mod link;
pub mod schema;

// Re-export commonly used types
pub use animation::{AnimationScheduler, CancellationToken, FrameSink, PlaybackReport};
pub use link::{ConnectStatus, FrameStreamer, LinkError, SimulatedDevice};
pub use schema::{AnimationSequence, Color, Frame, LinkConfig, VoxelGrid};
