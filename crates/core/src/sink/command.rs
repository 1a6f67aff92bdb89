//! Command log writer.
//!
//! One line per command, in arrival order:
//!
//! ```text
//! <timestamp, 2 decimals>,<opcode>[,<left>,<right>]
//! 1718000000.25,f,120,120
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::Sink;
use crate::error::{CaptureError, Result};
use crate::protocol::CommandRecord;

pub struct CommandSink {
    writer: BufWriter<File>,
    path: PathBuf,
    lines: u64,
}

impl CommandSink {
    /// Create (or truncate) the command log at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| CaptureError::storage(path, e))?;
        tracing::debug!(path = %path.display(), "command log opened");
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            lines: 0,
        })
    }
}

/// Render a command as one log line, including the trailing newline.
pub fn format_command(cmd: &CommandRecord) -> String {
    let mut line = format!("{:.2},{}", cmd.timestamp, OpcodeDisplay(cmd.opcode));
    if let Some(speeds) = cmd.speeds {
        line.push_str(&format!(",{},{}", speeds.left, speeds.right));
    }
    line.push('\n');
    line
}

/// Drive opcodes are ASCII letters; anything unprintable is logged as a number.
struct OpcodeDisplay(u8);

impl std::fmt::Display for OpcodeDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_ascii_graphic() {
            write!(f, "{}", self.0 as char)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Sink for CommandSink {
    type Record = CommandRecord;
    type Report = u64;
    const NAME: &'static str = "command";

    fn consume(&mut self, cmd: CommandRecord) -> Result<()> {
        self.writer
            .write_all(format_command(&cmd).as_bytes())
            .map_err(|e| CaptureError::storage(&self.path, e))?;
        self.lines += 1;
        tracing::trace!(opcode = cmd.opcode, timestamp = cmd.timestamp, "command logged");
        Ok(())
    }

    fn finish(mut self) -> Result<u64> {
        self.writer
            .flush()
            .and_then(|()| self.writer.get_ref().sync_all())
            .map_err(|e| CaptureError::storage(&self.path, e))?;
        tracing::debug!(path = %self.path.display(), lines = self.lines, "command log closed");
        Ok(self.lines)
    }
}
