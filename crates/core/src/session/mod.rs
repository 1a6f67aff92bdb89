//! Per-connection capture session.
//!
//! A session owns one connection from accept to close. It runs three
//! threads: the caller's thread decodes and dispatches, and one
//! [`SinkWorker`] each persists video and commands.
//!
//! ## Lifecycle
//!
//! ```text
//! open        -> session directory created, sinks started
//! dispatch    -> Video -> video sink, Command -> command sink
//! end of data -> EndOfStream flag, clean EOF, or framing error
//! shutdown    -> command sink drained and closed,
//!                then video sink drained, encoder waited on
//! ```
//!
//! The session does not return until both sinks have acknowledged
//! shutdown, whatever ended the stream.

mod id;
pub mod registry;

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::encoder::EncoderFactory;
use crate::error::{CaptureError, Result};
use crate::output::{OutputRoot, SessionPaths};
use crate::protocol::{Frame, FrameDecoder};
use crate::sink::video::VideoReport;
use crate::sink::{CommandSink, Sink, SinkWorker, VideoSink};

pub use id::SessionId;
pub use registry::{ActiveSession, SessionRegistry};

/// Why a session stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The device sent a message with the end-of-stream flag.
    EndOfStream,
    /// The connection closed cleanly on a message boundary.
    Disconnected,
}

/// What a successful session captured.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: SessionId,
    pub output_dir: PathBuf,
    pub video_frames: u64,
    pub commands: u64,
    pub sync_lines: u64,
    pub ended_by: EndReason,
}

enum LoopExit {
    Ended(EndReason),
    SinkStopped(&'static str),
    Failed(CaptureError),
}

/// One connection's decode/dispatch/shutdown state.
pub struct Session {
    id: SessionId,
    paths: SessionPaths,
    decoder: FrameDecoder,
}

impl Session {
    /// Allocate an id and create the session directory under `root`.
    pub fn open(root: &OutputRoot, decoder: FrameDecoder) -> Result<Self> {
        let id = SessionId::generate();
        let paths = root.session_dir(&id)?;
        Ok(Self { id, paths, decoder })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn output_dir(&self) -> &Path {
        self.paths.dir()
    }

    /// Capture `reader` until the stream ends, then shut both sinks down.
    ///
    /// Returns only after the command log is closed and the encoder has
    /// exited. Any error is this session's alone.
    pub fn run<R: Read>(self, reader: &mut R, encoders: &dyn EncoderFactory) -> Result<SessionSummary> {
        let commands = CommandSink::create(&self.paths.command_log())?;
        let encoder = encoders.launch(&self.paths.video(encoders.artifact_name()))?;
        let video = VideoSink::new(encoder, &self.paths.sync_index())?;

        let commands = SinkWorker::spawn(commands, self.id.as_str())?;
        let video = match SinkWorker::spawn(video, self.id.as_str()) {
            Ok(worker) => worker,
            Err(e) => {
                if let Err(cmd_err) = commands.shutdown() {
                    tracing::warn!(error = %cmd_err, "command sink failed during aborted start");
                }
                return Err(e);
            }
        };

        tracing::info!(dir = %self.paths.dir().display(), "session started");

        let exit = self.dispatch(reader, &video, &commands);

        tracing::debug!("shutting down sinks");
        let commands = commands.shutdown();
        let video = video.shutdown();

        self.conclude(exit, commands, video)
    }

    fn dispatch<R: Read>(
        &self,
        reader: &mut R,
        video: &SinkWorker<VideoSink>,
        commands: &SinkWorker<CommandSink>,
    ) -> LoopExit {
        loop {
            let frame = match self.decoder.read_frame(reader) {
                Ok(Some(frame)) => frame,
                Ok(None) => return LoopExit::Ended(EndReason::Disconnected),
                Err(e) => return LoopExit::Failed(e),
            };

            match frame {
                Frame::EndOfStream { timestamp } => {
                    tracing::debug!(timestamp, "end of stream received");
                    return LoopExit::Ended(EndReason::EndOfStream);
                }
                Frame::Video(frame) => {
                    if !video.send(frame) {
                        return LoopExit::SinkStopped(VideoSink::NAME);
                    }
                }
                Frame::Command(cmd) => {
                    if !commands.send(cmd) {
                        return LoopExit::SinkStopped(CommandSink::NAME);
                    }
                }
            }
        }
    }

    /// Pick the session result once both sinks are down.
    ///
    /// A read error outranks sink errors; every error not returned is logged.
    fn conclude(
        self,
        exit: LoopExit,
        commands: Result<u64>,
        video: Result<VideoReport>,
    ) -> Result<SessionSummary> {
        let mut errors = Vec::new();
        let (ended_by, stopped) = match exit {
            LoopExit::Ended(reason) => (Some(reason), None),
            LoopExit::SinkStopped(sink) => (None, Some(sink)),
            LoopExit::Failed(e) => {
                errors.push(e);
                (None, None)
            }
        };

        let commands = commands.map_err(|e| errors.push(e)).ok();
        let video = video.map_err(|e| errors.push(e)).ok();

        let mut errors = errors.into_iter();
        if let Some(first) = errors.next() {
            for other in errors {
                tracing::warn!(error = %other, "additional session error");
            }
            return Err(first);
        }

        match (ended_by, commands, video) {
            (Some(ended_by), Some(commands), Some(video)) => Ok(SessionSummary {
                id: self.id,
                output_dir: self.paths.dir().to_path_buf(),
                video_frames: video.frames,
                commands,
                sync_lines: video.sync_lines,
                ended_by,
            }),
            // A sink hung up on the session without reporting an error.
            _ => Err(CaptureError::SinkStopped {
                sink: stopped.unwrap_or("session"),
            }),
        }
    }
}
