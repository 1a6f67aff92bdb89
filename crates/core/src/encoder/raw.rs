//! Encoder that stores the incoming JPEG frames unmodified.
//!
//! The artifact is an MJPEG elementary stream that ffmpeg can transcode
//! later (`ffmpeg -f mjpeg -i video.mjpeg ...`). Useful on hosts without
//! ffmpeg and for end-to-end tests.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{Encoder, EncoderExit, EncoderFactory};
use crate::error::{CaptureError, Result};

pub const RAW_VIDEO_FILENAME: &str = "video.mjpeg";

pub struct RawEncoder {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    status: Option<EncoderExit>,
}

impl RawEncoder {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| CaptureError::storage(path, e))?;
        tracing::info!(path = %path.display(), "raw video sink opened");
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            path: path.to_path_buf(),
            status: None,
        })
    }
}

impl Encoder for RawEncoder {
    fn accept(&mut self, data: &[u8]) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.write_all(data),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "raw video sink already closed",
            )),
        }
    }

    fn close(&mut self) -> io::Result<EncoderExit> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        if let Some(writer) = self.writer.take() {
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        tracing::debug!(path = %self.path.display(), "raw video sink closed");
        self.status = Some(EncoderExit::SUCCESS);
        Ok(EncoderExit::SUCCESS)
    }

    fn diagnostics(&self) -> String {
        String::new()
    }

    fn exit_status(&self) -> Option<EncoderExit> {
        self.status
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawFactory;

impl EncoderFactory for RawFactory {
    fn launch(&self, output: &Path) -> Result<Box<dyn Encoder>> {
        Ok(Box::new(RawEncoder::create(output)?))
    }

    fn artifact_name(&self) -> &'static str {
        RAW_VIDEO_FILENAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_concatenated_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RAW_VIDEO_FILENAME);

        let mut encoder = RawEncoder::create(&path).unwrap();
        encoder.accept(b"first").unwrap();
        encoder.accept(b"second").unwrap();
        assert_eq!(encoder.exit_status(), None);

        let exit = encoder.close().unwrap();
        assert!(exit.success());
        assert_eq!(encoder.close().unwrap(), exit);
        assert_eq!(std::fs::read(&path).unwrap(), b"firstsecond");
    }

    #[test]
    fn accept_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = RawEncoder::create(&dir.path().join("v.mjpeg")).unwrap();
        encoder.close().unwrap();
        assert!(encoder.accept(b"late").is_err());
    }
}
