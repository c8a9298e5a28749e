//! Link module - Serial protocol between the host and the cube.
//!
//! The device drives the exchange: it pulls one chunk at a time with
//! STREAM_REQUEST, and the host answers from the packed buffer of the
//! current frame. [`FrameStreamer`] owns the transport and session and
//! services those requests on a dispatcher thread.

mod device;
mod handshake;
mod protocol;
mod session;
mod streamer;
mod transport;

pub use device::*;
pub use handshake::*;
pub use protocol::*;
pub use session::*;
pub use streamer::*;
pub use transport::*;

use std::io;

/// Error type for link operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to open port '{port}': {message}")]
    Open { port: String, message: String },

    #[error("Not connected to a cube")]
    NotConnected,
}
