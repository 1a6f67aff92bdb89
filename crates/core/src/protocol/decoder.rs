use std::io::{self, Read};

use crate::error::{CaptureError, FramingErrorKind, Result};

use super::{
    CommandRecord, END_OF_STREAM_FLAG, Frame, HEADER_LEN, ProtocolVariant, VideoFrame, WheelSpeeds,
};

/// Default upper bound on a single video frame (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Reads one framed message at a time from a byte stream.
///
/// The decoder holds no stream state: every call expects the reader to be
/// positioned at a message boundary and leaves it at the next one. Any
/// failure after the first header byte is a framing error; a frame is never
/// returned truncated.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    variant: ProtocolVariant,
    max_frame_len: u32,
}

impl FrameDecoder {
    pub fn new(variant: ProtocolVariant) -> Self {
        Self::with_max_frame_len(variant, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(variant: ProtocolVariant, max_frame_len: u32) -> Self {
        Self {
            variant,
            max_frame_len,
        }
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly on a message
    /// boundary, before any header byte.
    pub fn read_frame<R: Read>(&self, reader: &mut R) -> Result<Option<Frame>> {
        let Some(flags) = read_flags(reader)? else {
            return Ok(None);
        };

        let mut ts = [0u8; HEADER_LEN - 1];
        reader
            .read_exact(&mut ts)
            .map_err(|e| truncated(e, FramingErrorKind::TruncatedHeader))?;
        let timestamp = f64::from_le_bytes(ts);

        if flags & END_OF_STREAM_FLAG == END_OF_STREAM_FLAG {
            return Ok(Some(Frame::EndOfStream { timestamp }));
        }

        let frame = if flags & self.variant.command_flag() != 0 {
            Frame::Command(self.read_command(reader, timestamp)?)
        } else {
            Frame::Video(self.read_video(reader, timestamp)?)
        };

        tracing::trace!(flags, timestamp, "decoded frame");
        Ok(Some(frame))
    }

    fn read_command<R: Read>(&self, reader: &mut R, timestamp: f64) -> Result<CommandRecord> {
        let mut record = [0u8; 5];
        let record = &mut record[..self.variant.command_len()];
        reader
            .read_exact(record)
            .map_err(|e| truncated(e, FramingErrorKind::TruncatedCommand))?;

        let speeds = self.variant.has_speeds().then(|| WheelSpeeds {
            left: i16::from_le_bytes([record[1], record[2]]),
            right: i16::from_le_bytes([record[3], record[4]]),
        });

        Ok(CommandRecord {
            timestamp,
            opcode: record[0],
            speeds,
        })
    }

    fn read_video<R: Read>(&self, reader: &mut R, timestamp: f64) -> Result<VideoFrame> {
        let mut len = [0u8; 4];
        reader
            .read_exact(&mut len)
            .map_err(|e| truncated(e, FramingErrorKind::TruncatedLength))?;
        let len = u32::from_le_bytes(len);

        if len > self.max_frame_len {
            return Err(CaptureError::Framing {
                kind: FramingErrorKind::FrameTooLarge {
                    len,
                    max: self.max_frame_len,
                },
                source: None,
            });
        }

        // `read_to_end` on a `Take` keeps reading across short reads until
        // the limit is hit or the stream ends.
        let mut data = Vec::with_capacity(len as usize);
        reader
            .take(u64::from(len))
            .read_to_end(&mut data)
            .map_err(|e| CaptureError::framing(FramingErrorKind::Read, e))?;

        if data.len() != len as usize {
            return Err(CaptureError::Framing {
                kind: FramingErrorKind::TruncatedPayload {
                    expected: len,
                    received: data.len(),
                },
                source: Some(io::ErrorKind::UnexpectedEof.into()),
            });
        }

        Ok(VideoFrame { timestamp, data })
    }
}

/// Read the flag byte, distinguishing a clean end of stream from an error.
fn read_flags<R: Read>(reader: &mut R) -> Result<Option<u8>> {
    let mut flags = [0u8; 1];
    loop {
        match reader.read(&mut flags) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(flags[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CaptureError::framing(FramingErrorKind::Read, e)),
        }
    }
}

fn truncated(e: io::Error, kind: FramingErrorKind) -> CaptureError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CaptureError::framing(kind, e)
    } else {
        CaptureError::framing(FramingErrorKind::Read, e)
    }
}

/// Wire encoders used by tests to build device streams.
#[cfg(test)]
pub(crate) mod wire {
    use super::*;

    pub fn video(timestamp: f64, data: &[u8]) -> Vec<u8> {
        let mut out = vec![0x00];
        out.extend_from_slice(&timestamp.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    pub fn drive(timestamp: f64, opcode: u8, left: i16, right: i16) -> Vec<u8> {
        let mut out = vec![ProtocolVariant::Drive.command_flag()];
        out.extend_from_slice(&timestamp.to_le_bytes());
        out.push(opcode);
        out.extend_from_slice(&left.to_le_bytes());
        out.extend_from_slice(&right.to_le_bytes());
        out
    }

    pub fn opcode(timestamp: f64, opcode: u8) -> Vec<u8> {
        let mut out = vec![ProtocolVariant::OpcodeOnly.command_flag()];
        out.extend_from_slice(&timestamp.to_le_bytes());
        out.push(opcode);
        out
    }

    pub fn end(timestamp: f64) -> Vec<u8> {
        let mut out = vec![END_OF_STREAM_FLAG];
        out.extend_from_slice(&timestamp.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out at most `chunk` bytes per `read` call.
    struct Trickle {
        inner: Cursor<Vec<u8>>,
        chunk: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.chunk);
            self.inner.read(&mut buf[..n])
        }
    }

    fn drive_decoder() -> FrameDecoder {
        FrameDecoder::new(ProtocolVariant::Drive)
    }

    #[test]
    fn empty_stream_is_clean_end() {
        let mut input = Cursor::new(Vec::new());
        assert!(drive_decoder().read_frame(&mut input).unwrap().is_none());
    }

    #[test]
    fn decodes_video_frame() {
        let mut input = Cursor::new(wire::video(10.25, b"\xff\xd8jpeg\xff\xd9"));
        let frame = drive_decoder().read_frame(&mut input).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Video(VideoFrame {
                timestamp: 10.25,
                data: b"\xff\xd8jpeg\xff\xd9".to_vec(),
            })
        );
        assert!(drive_decoder().read_frame(&mut input).unwrap().is_none());
    }

    #[test]
    fn decodes_drive_command() {
        let mut input = Cursor::new(wire::drive(3.5, b'f', -120, 300));
        let frame = drive_decoder().read_frame(&mut input).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Command(CommandRecord {
                timestamp: 3.5,
                opcode: b'f',
                speeds: Some(WheelSpeeds {
                    left: -120,
                    right: 300
                }),
            })
        );
    }

    #[test]
    fn decodes_opcode_only_command() {
        let decoder = FrameDecoder::new(ProtocolVariant::OpcodeOnly);
        let mut stream = wire::opcode(1.0, b's');
        stream.extend(wire::video(1.5, b"img"));
        let mut input = Cursor::new(stream);

        let first = decoder.read_frame(&mut input).unwrap().unwrap();
        assert_eq!(
            first,
            Frame::Command(CommandRecord {
                timestamp: 1.0,
                opcode: b's',
                speeds: None,
            })
        );
        let second = decoder.read_frame(&mut input).unwrap().unwrap();
        assert!(matches!(second, Frame::Video(ref v) if v.data == b"img"));
    }

    #[test]
    fn opcode_variant_treats_low_bit_as_video() {
        let decoder = FrameDecoder::new(ProtocolVariant::OpcodeOnly);
        let mut stream = vec![0x01];
        stream.extend_from_slice(&2.0f64.to_le_bytes());
        stream.extend_from_slice(&3u32.to_le_bytes());
        stream.extend_from_slice(b"abc");
        let frame = decoder.read_frame(&mut Cursor::new(stream)).unwrap().unwrap();
        assert!(matches!(frame, Frame::Video(_)));
    }

    #[test]
    fn end_of_stream_has_no_payload() {
        let mut stream = wire::end(99.0);
        stream.extend(wire::video(100.0, b"never read"));
        let mut input = Cursor::new(stream);
        let frame = drive_decoder().read_frame(&mut input).unwrap().unwrap();
        assert_eq!(frame, Frame::EndOfStream { timestamp: 99.0 });
        assert_eq!(input.position() as usize, HEADER_LEN);
    }

    #[test]
    fn end_of_stream_wins_over_command_bit() {
        let mut stream = wire::end(1.0);
        stream[0] |= ProtocolVariant::Drive.command_flag();
        let frame = drive_decoder()
            .read_frame(&mut Cursor::new(stream))
            .unwrap()
            .unwrap();
        assert!(matches!(frame, Frame::EndOfStream { .. }));
    }

    #[test]
    fn partial_reads_are_reassembled() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let mut input = Trickle {
            inner: Cursor::new(wire::video(7.0, &payload)),
            chunk: 3,
        };
        let frame = drive_decoder().read_frame(&mut input).unwrap().unwrap();
        match frame {
            Frame::Video(v) => assert_eq!(v.data, payload),
            other => panic!("expected video, got {other:?}"),
        }
    }

    #[test]
    fn truncated_header_is_framing_error() {
        let stream = wire::video(1.0, b"x")[..5].to_vec();
        let err = drive_decoder()
            .read_frame(&mut Cursor::new(stream))
            .unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Framing {
                kind: FramingErrorKind::TruncatedHeader,
                ..
            }
        ));
    }

    #[test]
    fn truncated_payload_is_framing_error() {
        let mut stream = wire::video(1.0, &[0u8; 1000]);
        stream.truncate(HEADER_LEN + 4 + 500);
        let err = drive_decoder()
            .read_frame(&mut Cursor::new(stream))
            .unwrap_err();
        match err {
            CaptureError::Framing {
                kind: FramingErrorKind::TruncatedPayload { expected, received },
                ..
            } => {
                assert_eq!(expected, 1000);
                assert_eq!(received, 500);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn truncated_command_is_framing_error() {
        let mut stream = wire::drive(1.0, b'f', 1, 2);
        stream.pop();
        let err = drive_decoder()
            .read_frame(&mut Cursor::new(stream))
            .unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Framing {
                kind: FramingErrorKind::TruncatedCommand,
                ..
            }
        ));
    }

    #[test]
    fn oversized_frame_rejected_before_payload() {
        let decoder = FrameDecoder::with_max_frame_len(ProtocolVariant::Drive, 16);
        let err = decoder
            .read_frame(&mut Cursor::new(wire::video(1.0, &[0u8; 17])))
            .unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Framing {
                kind: FramingErrorKind::FrameTooLarge { len: 17, max: 16 },
                ..
            }
        ));
    }

    #[test]
    fn read_error_is_framing_error() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::ErrorKind::ConnectionReset.into())
            }
        }
        let err = drive_decoder().read_frame(&mut Broken).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Framing {
                kind: FramingErrorKind::Read,
                ..
            }
        ));
    }
}
