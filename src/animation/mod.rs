//! Animation playback onto a connected cube.
//!
//! The scheduler walks an [`AnimationSequence`](crate::schema::AnimationSequence)
//! in real time and pushes frames into a [`FrameSink`], normally a
//! [`FrameStreamer`](crate::link::FrameStreamer). Playback stops cooperatively
//! through a [`CancellationToken`], and a blank frame is always sent on the way
//! out so the cube does not keep showing a stale image.

mod cancel;
mod scheduler;

pub use cancel::CancellationToken;
pub use scheduler::{
    AnimationScheduler, FrameSink, PlaybackHandle, PlaybackObserver, PlaybackReport,
};
