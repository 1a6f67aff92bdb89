//! Video forwarding and the per-second sync index.
//!
//! Every frame's bytes go to the [`Encoder`] in arrival order. Alongside,
//! frames are counted per whole wall-clock second, and each finished second
//! becomes one `second,count` line in the sync index. The encoder's frame
//! offsets can later be mapped back to wall-clock time by summing counts.
//!
//! A bucket is finalized when a frame lands in a different second, or at
//! shutdown if it holds any frames:
//!
//! ```text
//! frames at 10.1 10.9 11.0 11.4  <end>
//! sync.txt   10,2
//!            11,2
//! ```

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::Sink;
use crate::encoder::{Encoder, EncoderExit};
use crate::error::{CaptureError, EncoderStage, Result};
use crate::protocol::VideoFrame;

/// Frame count for one wall-clock second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncBucket {
    pub second: u64,
    pub frame_count: u32,
}

impl fmt::Display for SyncBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.second, self.frame_count)
    }
}

/// The bucketing state machine, independent of any I/O.
#[derive(Debug, Default)]
pub struct SyncTracker {
    current_second: Option<u64>,
    count: u32,
}

impl SyncTracker {
    /// Move to `second`, returning the previous bucket if it is now final.
    pub fn advance(&mut self, second: u64) -> Option<SyncBucket> {
        match self.current_second {
            None => {
                self.current_second = Some(second);
                None
            }
            Some(current) if current != second => {
                let done = self.take_bucket(current);
                self.current_second = Some(second);
                done
            }
            Some(_) => None,
        }
    }

    /// Count one frame into the current second.
    pub fn count_frame(&mut self) {
        self.count += 1;
    }

    /// Final bucket at end of stream, if it holds any frames.
    pub fn finish(&mut self) -> Option<SyncBucket> {
        let current = self.current_second?;
        self.take_bucket(current)
    }

    fn take_bucket(&mut self, second: u64) -> Option<SyncBucket> {
        let frame_count = std::mem::take(&mut self.count);
        (frame_count > 0).then_some(SyncBucket {
            second,
            frame_count,
        })
    }
}

/// Totals reported by a [`VideoSink`] on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoReport {
    pub frames: u64,
    pub sync_lines: u64,
    pub exit: EncoderExit,
}

pub struct VideoSink {
    encoder: Box<dyn Encoder>,
    sync: BufWriter<File>,
    sync_path: PathBuf,
    tracker: SyncTracker,
    frames: u64,
    sync_lines: u64,
}

impl VideoSink {
    /// Create the sync index at `sync_path` and feed frames to `encoder`.
    pub fn new(encoder: Box<dyn Encoder>, sync_path: &Path) -> Result<Self> {
        let file = File::create(sync_path).map_err(|e| CaptureError::storage(sync_path, e))?;
        tracing::debug!(path = %sync_path.display(), "sync index opened");
        Ok(Self {
            encoder,
            sync: BufWriter::new(file),
            sync_path: sync_path.to_path_buf(),
            tracker: SyncTracker::default(),
            frames: 0,
            sync_lines: 0,
        })
    }

    fn write_bucket(&mut self, bucket: SyncBucket) -> Result<()> {
        writeln!(self.sync, "{bucket}").map_err(|e| CaptureError::storage(&self.sync_path, e))?;
        self.sync_lines += 1;
        tracing::debug!(
            second = bucket.second,
            count = bucket.frame_count,
            "sync bucket written"
        );
        Ok(())
    }

    /// Close the encoder and judge how it exited.
    fn close_encoder(&mut self) -> Result<EncoderExit> {
        let exit = self.encoder.close().map_err(|e| CaptureError::Encoder {
            stage: EncoderStage::Exit,
            diagnostics: self.encoder.diagnostics(),
            source: Some(e),
        })?;

        // The encoder only writes to its diagnostic stream to report errors,
        // so any text there fails the video even on a zero exit code.
        let diagnostics = self.encoder.diagnostics();
        if !exit.success() || !diagnostics.trim().is_empty() {
            return Err(CaptureError::Encoder {
                stage: EncoderStage::Exit,
                diagnostics: format!("exit code {:?}: {}", exit.code, diagnostics.trim()),
                source: None,
            });
        }
        Ok(exit)
    }
}

impl Sink for VideoSink {
    type Record = VideoFrame;
    type Report = VideoReport;
    const NAME: &'static str = "video";

    fn consume(&mut self, frame: VideoFrame) -> Result<()> {
        if let Some(done) = self.tracker.advance(frame.second()) {
            self.write_bucket(done)?;
        }

        if let Err(e) = self.encoder.accept(&frame.data) {
            // Waiting for the encoder lets its diagnostic stream drain fully.
            let _ = self.encoder.close();
            return Err(CaptureError::Encoder {
                stage: EncoderStage::Write,
                diagnostics: self.encoder.diagnostics(),
                source: Some(e),
            });
        }

        self.tracker.count_frame();
        self.frames += 1;

        let diagnostics = self.encoder.diagnostics();
        if !diagnostics.trim().is_empty() {
            let _ = self.encoder.close();
            return Err(CaptureError::Encoder {
                stage: EncoderStage::Write,
                diagnostics: self.encoder.diagnostics(),
                source: None,
            });
        }

        tracing::trace!(
            timestamp = frame.timestamp,
            bytes = frame.data.len(),
            "frame forwarded"
        );
        Ok(())
    }

    fn finish(mut self) -> Result<VideoReport> {
        let flushed = match self.tracker.finish() {
            Some(last) => self.write_bucket(last),
            None => Ok(()),
        }
        .and_then(|()| {
            self.sync
                .flush()
                .and_then(|()| self.sync.get_ref().sync_all())
                .map_err(|e| CaptureError::storage(&self.sync_path, e))
        });

        // The encoder is closed even when the sync index could not be flushed.
        let exit = self.close_encoder();
        flushed?;
        let exit = exit?;

        tracing::debug!(
            frames = self.frames,
            sync_lines = self.sync_lines,
            "video sink closed"
        );
        Ok(VideoReport {
            frames: self.frames,
            sync_lines: self.sync_lines,
            exit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::fake::FakeEncoder;

    fn frame(timestamp: f64, data: &[u8]) -> VideoFrame {
        VideoFrame {
            timestamp,
            data: data.to_vec(),
        }
    }

    fn buckets(timestamps: &[f64]) -> Vec<SyncBucket> {
        let mut tracker = SyncTracker::default();
        let mut out = Vec::new();
        for &ts in timestamps {
            out.extend(tracker.advance(ts.floor() as u64));
            tracker.count_frame();
        }
        out.extend(tracker.finish());
        out
    }

    #[test]
    fn groups_frames_by_whole_second() {
        assert_eq!(
            buckets(&[10.1, 10.9, 11.0, 11.4]),
            vec![
                SyncBucket {
                    second: 10,
                    frame_count: 2
                },
                SyncBucket {
                    second: 11,
                    frame_count: 2
                },
            ]
        );
    }

    #[test]
    fn single_frame_single_line() {
        assert_eq!(
            buckets(&[5.0]),
            vec![SyncBucket {
                second: 5,
                frame_count: 1
            }]
        );
    }

    #[test]
    fn no_frames_no_lines() {
        assert!(buckets(&[]).is_empty());
    }

    #[test]
    fn gaps_do_not_emit_empty_seconds() {
        let lines: Vec<String> = buckets(&[1.2, 4.7, 4.8])
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(lines, vec!["1,1", "4,2"]);
    }

    #[test]
    fn second_zero_is_a_real_second() {
        let lines: Vec<String> = buckets(&[0.1, 0.2, 1.0])
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(lines, vec!["0,2", "1,1"]);
    }

    #[test]
    fn forwards_exact_concatenation_and_writes_index() {
        let dir = tempfile::tempdir().unwrap();
        let sync_path = dir.path().join("sync.txt");
        let (encoder, recorded) = FakeEncoder::new();

        let mut sink = VideoSink::new(Box::new(encoder), &sync_path).unwrap();
        for (ts, data) in [
            (10.1, &b"aa"[..]),
            (10.9, &b"b"[..]),
            (11.0, &b"ccc"[..]),
            (11.4, &b""[..]),
        ] {
            sink.consume(frame(ts, data)).unwrap();
        }
        let report = sink.finish().unwrap();

        assert_eq!(report.frames, 4);
        assert_eq!(report.sync_lines, 2);
        assert!(report.exit.success());

        let rec = recorded.lock();
        assert_eq!(rec.bytes, b"aabccc");
        assert_eq!(rec.writes, 4);
        assert!(rec.closed);
        assert_eq!(std::fs::read_to_string(&sync_path).unwrap(), "10,2\n11,2\n");
    }

    #[test]
    fn write_failure_stops_and_keeps_valid_index() {
        let dir = tempfile::tempdir().unwrap();
        let sync_path = dir.path().join("sync.txt");
        let (mut encoder, recorded) = FakeEncoder::new();
        encoder.fail_on_write = Some(2);

        let mut sink = VideoSink::new(Box::new(encoder), &sync_path).unwrap();
        sink.consume(frame(1.0, b"a")).unwrap();
        sink.consume(frame(1.5, b"b")).unwrap();
        let err = sink.consume(frame(1.7, b"c")).unwrap_err();
        match &err {
            CaptureError::Encoder {
                stage, diagnostics, ..
            } => {
                assert_eq!(*stage, EncoderStage::Write);
                assert!(diagnostics.contains("rejected"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(sink.finish().is_err());
        assert_eq!(recorded.lock().bytes, b"ab");
        assert_eq!(std::fs::read_to_string(&sync_path).unwrap(), "1,2\n");
    }

    #[test]
    fn abnormal_exit_is_encoder_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut encoder, _) = FakeEncoder::new();
        encoder.exit = EncoderExit { code: Some(1) };
        encoder.exit_diagnostics = "Invalid data found when processing input".to_string();

        let mut sink = VideoSink::new(Box::new(encoder), &dir.path().join("sync.txt")).unwrap();
        sink.consume(frame(2.0, b"x")).unwrap();
        let err = sink.finish().unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Encoder {
                stage: EncoderStage::Exit,
                ..
            }
        ));
        assert!(err.to_string().contains("Invalid data"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("sync.txt")).unwrap(),
            "2,1\n"
        );
    }

    #[test]
    fn diagnostics_while_encoding_stop_forwarding() {
        let dir = tempfile::tempdir().unwrap();
        let sync_path = dir.path().join("sync.txt");
        let (mut encoder, recorded) = FakeEncoder::new();
        encoder.diagnostics = "Error while decoding stream #0:0: Invalid data".to_string();

        let mut sink = VideoSink::new(Box::new(encoder), &sync_path).unwrap();
        let err = sink.consume(frame(4.0, b"bad")).unwrap_err();
        match &err {
            CaptureError::Encoder {
                stage, diagnostics, ..
            } => {
                assert_eq!(*stage, EncoderStage::Write);
                assert!(diagnostics.contains("Invalid data"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(recorded.lock().closed);

        // The failure persists through shutdown even though the exit code was 0.
        assert!(matches!(
            sink.finish(),
            Err(CaptureError::Encoder {
                stage: EncoderStage::Exit,
                ..
            })
        ));
        assert_eq!(recorded.lock().writes, 1);
        assert_eq!(std::fs::read_to_string(&sync_path).unwrap(), "4,1\n");
    }

    #[test]
    fn diagnostics_on_clean_exit_fail_the_video() {
        let dir = tempfile::tempdir().unwrap();
        let (mut encoder, _) = FakeEncoder::new();
        encoder.exit_diagnostics = "moov atom not found".to_string();

        let mut sink = VideoSink::new(Box::new(encoder), &dir.path().join("sync.txt")).unwrap();
        sink.consume(frame(8.0, b"x")).unwrap();
        let err = sink.finish().unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Encoder {
                stage: EncoderStage::Exit,
                ..
            }
        ));
        assert!(err.to_string().contains("moov atom"));
    }
}
