//! Error types for the capture server library.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors that can occur while capturing a telemetry connection.
///
/// Every variant is scoped to the connection that produced it, apart from
/// [`Io`](Self::Io) during [`Server::start`](crate::Server::start):
///
/// - **Wire**: [`Framing`](Self::Framing) — malformed or truncated messages.
/// - **Encoder**: [`Encoder`](Self::Encoder) — the video encoder failed to
///   launch, rejected a write, or exited abnormally.
/// - **Output**: [`Storage`](Self::Storage) — an output file or directory
///   could not be created or written.
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Underlying I/O or socket error outside of a session.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The byte stream could not be decoded into a frame.
    #[error("framing error: {kind}")]
    Framing {
        kind: FramingErrorKind,
        #[source]
        source: Option<io::Error>,
    },

    /// The external video encoder failed. `diagnostics` holds whatever the
    /// encoder wrote to its diagnostic stream.
    #[error("encoder error during {stage}: {}", diagnostics_or_cause(.diagnostics, .source))]
    Encoder {
        stage: EncoderStage,
        diagnostics: String,
        #[source]
        source: Option<io::Error>,
    },

    /// An output file or directory could not be created or written.
    #[error("storage error on {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A sink thread exited without reporting a result (it panicked).
    #[error("{sink} sink stopped unexpectedly")]
    SinkStopped { sink: &'static str },

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

impl CaptureError {
    pub(crate) fn framing(kind: FramingErrorKind, source: io::Error) -> Self {
        Self::Framing {
            kind,
            source: Some(source),
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Whether this error came from decoding the wire stream.
    pub fn is_framing(&self) -> bool {
        matches!(self, Self::Framing { .. })
    }
}

fn diagnostics_or_cause(diagnostics: &str, source: &Option<io::Error>) -> String {
    let diagnostics = diagnostics.trim();
    match source {
        Some(e) if diagnostics.is_empty() => e.to_string(),
        Some(e) => format!("{e}: {diagnostics}"),
        None if diagnostics.is_empty() => "no diagnostics".to_string(),
        None => diagnostics.to_string(),
    }
}

/// Specific kind of framing failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingErrorKind {
    /// The stream ended part-way through a 9-byte message header.
    TruncatedHeader,
    /// The stream ended part-way through a command record.
    TruncatedCommand,
    /// The stream ended part-way through a video length prefix.
    TruncatedLength,
    /// The stream ended before the declared video payload was complete.
    TruncatedPayload { expected: u32, received: usize },
    /// A video frame declared a length above the configured maximum.
    FrameTooLarge { len: u32, max: u32 },
    /// Any other read failure, including an expired read deadline.
    Read,
}

impl fmt::Display for FramingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedHeader => write!(f, "truncated header"),
            Self::TruncatedCommand => write!(f, "truncated command record"),
            Self::TruncatedLength => write!(f, "truncated video length prefix"),
            Self::TruncatedPayload { expected, received } => {
                write!(f, "truncated video payload ({received} of {expected} bytes)")
            }
            Self::FrameTooLarge { len, max } => {
                write!(f, "video frame of {len} bytes exceeds limit of {max}")
            }
            Self::Read => write!(f, "read failed"),
        }
    }
}

/// Point in the encoder lifecycle where a failure was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderStage {
    /// The encoder process could not be started.
    Launch,
    /// Writing frame bytes to the encoder's input failed.
    Write,
    /// The encoder exited unsuccessfully or could not be waited on.
    Exit,
}

impl fmt::Display for EncoderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Launch => write!(f, "launch"),
            Self::Write => write!(f, "write"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

/// Convenience alias for `Result<T, CaptureError>`.
pub type Result<T> = std::result::Result<T, CaptureError>;
