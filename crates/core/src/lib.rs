//! Capture server for multiplexed robot telemetry.
//!
//! A device streams JPEG frames and drive commands over one TCP connection.
//! Each connection becomes a [`Session`](session::Session) that writes, into
//! its own directory, a video file (through an [`Encoder`]), a per-second
//! frame-count sync index, and a command log.

pub mod encoder;
pub mod error;
pub mod output;
pub mod protocol;
pub mod server;
pub mod session;
pub mod sink;
pub mod transport;

pub use encoder::{Encoder, EncoderFactory, FfmpegConfig, FfmpegFactory, RawFactory};
pub use error::{CaptureError, Result};
pub use protocol::{FrameDecoder, ProtocolVariant};
pub use server::{Server, ServerConfig};
pub use session::{EndReason, SessionSummary};
