//! Telemetry wire protocol.
//!
//! A device multiplexes video frames and drive commands onto one byte
//! stream. Every message starts with a fixed 9-byte header:
//!
//! ```text
//! +--------+-----------------------------------------------+
//! | flags  |  timestamp (f64, little-endian, unix seconds) |
//! | 1 byte |  8 bytes                                      |
//! +--------+-----------------------------------------------+
//! ```
//!
//! The flags select what, if anything, follows:
//!
//! | Flags | Payload |
//! |-------|---------|
//! | `0x80` set | none, end of stream |
//! | command bit set | command record (see [`ProtocolVariant`]) |
//! | otherwise | `u32` LE length, then that many bytes of JPEG data |
//!
//! The bit that marks a command, and the size of the command record, changed
//! over the life of the device firmware without a version marker, so the
//! variant is fixed per server in [`ServerConfig`](crate::ServerConfig).

pub mod decoder;

pub use decoder::FrameDecoder;

/// Header flag marking the end of the stream.
pub const END_OF_STREAM_FLAG: u8 = 0x80;

/// Size of the fixed message header: one flag byte plus an `f64` timestamp.
pub const HEADER_LEN: usize = 9;

/// Which generation of the device protocol the server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVariant {
    /// Command bit `0x01`; command = opcode + left/right `i16` wheel speeds.
    #[default]
    Drive,
    /// Command bit `0x02`; command = opcode only.
    OpcodeOnly,
}

impl ProtocolVariant {
    /// Flag bit that marks a command message.
    pub fn command_flag(self) -> u8 {
        match self {
            Self::Drive => 0x01,
            Self::OpcodeOnly => 0x02,
        }
    }

    /// Size in bytes of the command record following the header.
    pub fn command_len(self) -> usize {
        match self {
            Self::Drive => 5,
            Self::OpcodeOnly => 1,
        }
    }

    /// Whether command records carry wheel speeds.
    pub fn has_speeds(self) -> bool {
        matches!(self, Self::Drive)
    }
}

/// One decoded message.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Video(VideoFrame),
    Command(CommandRecord),
    /// The device announced it is done; nothing follows.
    EndOfStream { timestamp: f64 },
}

impl Frame {
    /// Wall-clock capture time in fractional seconds since the epoch.
    pub fn timestamp(&self) -> f64 {
        match self {
            Self::Video(v) => v.timestamp,
            Self::Command(c) => c.timestamp,
            Self::EndOfStream { timestamp } => *timestamp,
        }
    }
}

/// A single JPEG image as sent by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub timestamp: f64,
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Whole second this frame belongs to in the sync index.
    ///
    /// Timestamps before the epoch (or NaN) collapse to second 0.
    pub fn second(&self) -> u64 {
        self.timestamp.floor() as u64
    }
}

/// A drive command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandRecord {
    pub timestamp: f64,
    pub opcode: u8,
    /// Present only under [`ProtocolVariant::Drive`].
    pub speeds: Option<WheelSpeeds>,
}

/// Signed left/right wheel speeds attached to a drive command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WheelSpeeds {
    pub left: i16,
    pub right: i16,
}
