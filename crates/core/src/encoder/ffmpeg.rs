//! ffmpeg subprocess encoder.
//!
//! Frames are piped into `ffmpeg -f mjpeg -i -` and transcoded to an AVI
//! file. ffmpeg's stderr is drained on a background thread so the child
//! can never block on a full diagnostic pipe while we are blocked writing
//! its stdin.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::{Encoder, EncoderExit, EncoderFactory};
use crate::error::{CaptureError, EncoderStage, Result};

/// File name of the transcoded video inside a session directory.
pub const VIDEO_FILENAME: &str = "video.avi";

/// Diagnostics beyond this many bytes are dropped from the front.
const MAX_DIAGNOSTICS: usize = 64 * 1024;

/// Settings for the ffmpeg command line.
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    /// Path to the ffmpeg executable.
    pub program: PathBuf,
    /// `-vf` filter chain. The default flips the camera image on both axes
    /// and keeps only the lower half.
    pub filters: Option<String>,
    /// Output video codec (`-vcodec`).
    pub codec: String,
    /// Encoder preset (`-preset`).
    pub preset: String,
    /// Output pixel format (`-pix_fmt`).
    pub pixel_format: String,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            filters: Some("vflip,hflip,crop=in_w:in_h/2".to_string()),
            codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            pixel_format: "yuv420p".to_string(),
        }
    }
}

impl FfmpegConfig {
    /// Build the argument list for encoding stdin into `output`.
    pub fn args(&self, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-f", "mjpeg", "-i", "-"]
            .into_iter()
            .map(OsString::from)
            .collect();

        if let Some(filters) = &self.filters {
            args.push("-vf".into());
            args.push(filters.into());
        }

        args.extend(
            [
                "-vcodec",
                self.codec.as_str(),
                "-preset",
                self.preset.as_str(),
                "-an",
                "-f",
                "avi",
                "-pix_fmt",
                self.pixel_format.as_str(),
                "-y",
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.push(output.as_os_str().to_owned());
        args
    }
}

/// A running ffmpeg process fed through its stdin.
pub struct FfmpegEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    diagnostics: Arc<Mutex<Vec<u8>>>,
    stderr_drain: Option<JoinHandle<()>>,
    status: Option<EncoderExit>,
}

impl FfmpegEncoder {
    /// Spawn ffmpeg writing to `output`.
    pub fn spawn(config: &FfmpegConfig, output: &Path) -> Result<Self> {
        let mut child = Command::new(&config.program)
            .args(config.args(output))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CaptureError::Encoder {
                stage: EncoderStage::Launch,
                diagnostics: format!("failed to run {}", config.program.display()),
                source: Some(e),
            })?;

        let diagnostics = Arc::new(Mutex::new(Vec::new()));
        let stderr_drain = child.stderr.take().map(|stderr| {
            let diagnostics = diagnostics.clone();
            thread::spawn(move || drain_diagnostics(stderr, &diagnostics))
        });

        tracing::info!(
            pid = child.id(),
            program = %config.program.display(),
            output = %output.display(),
            "ffmpeg started"
        );

        Ok(Self {
            stdin: child.stdin.take(),
            child,
            diagnostics,
            stderr_drain,
            status: None,
        })
    }
}

/// Collect raw stderr bytes; they are decoded only when read back, so a
/// character split across two reads survives intact.
fn drain_diagnostics(mut stderr: impl Read, sink: &Mutex<Vec<u8>>) {
    let mut buf = [0u8; 4096];
    loop {
        match stderr.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let mut bytes = sink.lock();
                bytes.extend_from_slice(&buf[..n]);
                if bytes.len() > MAX_DIAGNOSTICS {
                    let mut cut = bytes.len() - MAX_DIAGNOSTICS;
                    // Skip UTF-8 continuation bytes so the kept text starts on a character.
                    while cut < bytes.len() && bytes[cut] & 0xC0 == 0x80 {
                        cut += 1;
                    }
                    bytes.drain(..cut);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

impl Encoder for FfmpegEncoder {
    fn accept(&mut self, data: &[u8]) -> io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write_all(data),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "encoder input already closed",
            )),
        }
    }

    fn close(&mut self) -> io::Result<EncoderExit> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        // Dropping stdin delivers EOF so ffmpeg can finalize the container.
        drop(self.stdin.take());
        let status = self.child.wait()?;
        if let Some(drain) = self.stderr_drain.take() {
            let _ = drain.join();
        }

        let exit = EncoderExit {
            code: status.code(),
        };
        tracing::debug!(pid = self.child.id(), code = ?exit.code, "ffmpeg exited");
        self.status = Some(exit);
        Ok(exit)
    }

    fn diagnostics(&self) -> String {
        String::from_utf8_lossy(&self.diagnostics.lock()).into_owned()
    }

    fn exit_status(&self) -> Option<EncoderExit> {
        self.status
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if self.status.is_none() {
            drop(self.stdin.take());
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Launches one ffmpeg process per session.
#[derive(Debug, Clone, Default)]
pub struct FfmpegFactory {
    config: FfmpegConfig,
}

impl FfmpegFactory {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }
}

impl EncoderFactory for FfmpegFactory {
    fn launch(&self, output: &Path) -> Result<Box<dyn Encoder>> {
        Ok(Box::new(FfmpegEncoder::spawn(&self.config, output)?))
    }

    fn artifact_name(&self) -> &'static str {
        VIDEO_FILENAME
    }
}
