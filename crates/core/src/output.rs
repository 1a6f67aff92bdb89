//! On-disk layout of captured sessions.
//!
//! ```text
//! <output root>/
//!   <session id>/
//!     video.avi       encoder artifact (name depends on the encoder)
//!     sync.txt        "<second>,<count>" per non-empty second
//!     commands.txt    "<timestamp>,<opcode>[,<left>,<right>]" per command
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CaptureError, Result};
use crate::session::SessionId;

pub const SYNC_FILENAME: &str = "sync.txt";
pub const COMMANDS_FILENAME: &str = "commands.txt";

/// Shared directory under which every session gets its own folder.
#[derive(Debug, Clone)]
pub struct OutputRoot {
    root: PathBuf,
}

impl OutputRoot {
    /// Create the root directory if needed.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| CaptureError::storage(&root, e))?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create the directory for one session.
    pub fn session_dir(&self, id: &SessionId) -> Result<SessionPaths> {
        let dir = self.root.join(id.as_str());
        fs::create_dir_all(&dir).map_err(|e| CaptureError::storage(&dir, e))?;
        Ok(SessionPaths { dir })
    }
}

/// File locations inside one session directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    dir: PathBuf,
}

impl SessionPaths {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sync_index(&self) -> PathBuf {
        self.dir.join(SYNC_FILENAME)
    }

    pub fn command_log(&self) -> PathBuf {
        self.dir.join(COMMANDS_FILENAME)
    }

    pub fn video(&self, artifact_name: &str) -> PathBuf {
        self.dir.join(artifact_name)
    }
}
