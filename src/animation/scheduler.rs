//! Real-time playback of an animation sequence onto a frame sink.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::schema::{AnimationSequence, LinkConfig, SchemaError, VoxelGrid};

use super::cancel::CancellationToken;

/// Destination for played frames.
pub trait FrameSink: Send + Sync {
    /// Replace the frame being transmitted.
    fn stream_frame(&self, grid: &VoxelGrid);

    /// Ask for the transmitted frame to be shown.
    fn request_display(&self);

    /// Side of the connected cube, if any.
    fn cube_side(&self) -> Option<usize>;

    /// Human-readable status line.
    fn status(&self, _line: &str) {}
}

/// Told which frame is currently shown; `None` once playback ends.
pub type PlaybackObserver = Arc<dyn Fn(Option<usize>) + Send + Sync>;

/// Summary of one playback run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackReport {
    /// Complete passes over the sequence.
    pub passes: u32,
    /// Frames streamed by the playback loop. The initial and blank frames
    /// are not counted.
    pub frames_streamed: u64,
    pub display_requests: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy)]
struct Pacing {
    start_delay: Duration,
    zero_frame_delay: Duration,
    min_sleep: Duration,
}

/// Walks a sequence frame by frame, paced by the authored durations.
///
/// Display of frame `i` is requested while frame `i + 1` is streamed, so the
/// cube always has data to pull.
pub struct AnimationScheduler {
    sequence: AnimationSequence,
    sink: Arc<dyn FrameSink>,
    observer: Option<PlaybackObserver>,
    pacing: Pacing,
}

impl AnimationScheduler {
    /// Fails if the sequence or the link configuration is invalid.
    pub fn new(
        sequence: AnimationSequence,
        sink: Arc<dyn FrameSink>,
        config: &LinkConfig,
    ) -> Result<Self, SchemaError> {
        sequence.validate()?;
        config.validate()?;
        Ok(Self {
            sequence,
            sink,
            observer: None,
            pacing: Pacing {
                start_delay: config.start_frame_delay(),
                zero_frame_delay: config.zero_frame_delay(),
                min_sleep: config.min_sleep(),
            },
        })
    }

    pub fn with_observer(mut self, observer: PlaybackObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn sequence(&self) -> &AnimationSequence {
        &self.sequence
    }

    /// Play on the calling thread until the sequence ends or `token` is
    /// cancelled. The blank-frame teardown always runs, exactly once.
    pub fn run(&self, token: &CancellationToken) -> PlaybackReport {
        let frames = &self.sequence.frames;
        let count = frames.len();
        let mut report = PlaybackReport::default();

        match self.sink.cube_side() {
            Some(side) if side == self.sequence.side => self
                .sink
                .status(&format!("streaming project {}", self.sequence.name)),
            Some(side) => self.sink.status(&format!(
                "warning, current project {} with cube side of {} does not match connected device's cube side of {}",
                self.sequence.name, self.sequence.side, side
            )),
            None => {}
        }
        log::debug!(
            "playback of '{}' started: {} frame(s), looping {}",
            self.sequence.name,
            count,
            self.sequence.looping
        );

        self.sink.stream_frame(&frames[0].grid);
        if !token.sleep(self.pacing.start_delay) {
            'playback: loop {
                for (i, frame) in frames.iter().enumerate() {
                    let started = Instant::now();
                    self.observe(Some(i));

                    self.sink.request_display();
                    report.display_requests += 1;
                    self.sink.stream_frame(&frames[(i + 1) % count].grid);
                    report.frames_streamed += 1;

                    let wait = frame
                        .duration()
                        .saturating_sub(started.elapsed())
                        .max(self.pacing.min_sleep);
                    if token.sleep(wait) {
                        break 'playback;
                    }
                }
                report.passes += 1;
                if !self.sequence.looping {
                    break;
                }
            }
        }

        report.cancelled = token.is_cancelled();
        self.teardown(&mut report);
        report
    }

    /// Play on a background thread.
    pub fn start(self) -> io::Result<PlaybackHandle> {
        let token = CancellationToken::new();
        let thread_token = token.clone();
        let thread = thread::Builder::new()
            .name("cube-link-playback".to_string())
            .spawn(move || self.run(&thread_token))?;

        Ok(PlaybackHandle {
            token,
            thread: Some(thread),
        })
    }

    /// Blank the cube and clear the frame override.
    fn teardown(&self, report: &mut PlaybackReport) {
        let side = self.sink.cube_side().unwrap_or(self.sequence.side);
        match VoxelGrid::new(side) {
            Ok(blank) => {
                self.sink.request_display();
                self.sink.stream_frame(&blank);
                thread::sleep(self.pacing.zero_frame_delay);
                self.sink.request_display();
                report.display_requests += 2;
            }
            Err(e) => log::warn!("no zero frame sent: {}", e),
        }

        self.observe(None);
        log::debug!("playback finished: {:?}", report);
        if self.sink.cube_side() == Some(self.sequence.side) {
            self.sink.status("project stream ended");
        }
    }

    fn observe(&self, frame: Option<usize>) {
        if let Some(observer) = &self.observer {
            observer(frame);
        }
    }
}

/// Handle to playback running on its own thread.
///
/// Dropping the handle stops playback and waits for teardown.
pub struct PlaybackHandle {
    token: CancellationToken,
    thread: Option<JoinHandle<PlaybackReport>>,
}

impl PlaybackHandle {
    /// Token that stops this playback when cancelled.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancel and wait for teardown.
    pub fn stop(mut self) -> Option<PlaybackReport> {
        self.token.cancel();
        self.join()
    }

    /// Wait for playback to end on its own.
    pub fn wait(mut self) -> Option<PlaybackReport> {
        self.join()
    }

    fn join(&mut self) -> Option<PlaybackReport> {
        match self.thread.take()?.join() {
            Ok(report) => Some(report),
            Err(_) => {
                log::warn!("playback thread panicked");
                None
            }
        }
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.token.cancel();
        self.join();
    }
}
