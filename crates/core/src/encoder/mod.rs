//! Video encoder capability.
//!
//! The video sink only needs four things from an encoder: push bytes, close
//! the input, read back diagnostics, and learn how it exited. Keeping that
//! behind [`Encoder`] lets the sync-index logic run against an in-memory
//! fake in tests and against a real ffmpeg process in production.
//!
//! | Implementation | Module | Output |
//! |----------------|--------|--------|
//! | ffmpeg subprocess | [`ffmpeg`] | transcoded video (AVI/H.264 by default) |
//! | raw file | [`raw`] | concatenated JPEG frames (MJPEG elementary stream) |

pub mod ffmpeg;
pub mod raw;

use std::io;
use std::path::Path;

use crate::error::Result;

pub use ffmpeg::{FfmpegConfig, FfmpegEncoder, FfmpegFactory};
pub use raw::{RawEncoder, RawFactory};

/// How an encoder finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderExit {
    /// Process exit code, `None` if it was killed by a signal.
    pub code: Option<i32>,
}

impl EncoderExit {
    pub const SUCCESS: EncoderExit = EncoderExit { code: Some(0) };

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A sink for a continuous stream of concatenated JPEG frames.
pub trait Encoder: Send {
    /// Push the next frame's bytes, in order.
    fn accept(&mut self, data: &[u8]) -> io::Result<()>;

    /// Close the input stream and wait for the encoder to finish.
    ///
    /// Calling `close` more than once returns the first exit again.
    fn close(&mut self) -> io::Result<EncoderExit>;

    /// Everything the encoder has written to its diagnostic stream so far.
    fn diagnostics(&self) -> String;

    /// Exit status, once [`close`](Self::close) has completed.
    fn exit_status(&self) -> Option<EncoderExit>;
}

/// Creates one encoder per session, writing to `output`.
pub trait EncoderFactory: Send + Sync {
    fn launch(&self, output: &Path) -> Result<Box<dyn Encoder>>;

    /// File name of the video artifact inside a session directory.
    fn artifact_name(&self) -> &'static str;
}
