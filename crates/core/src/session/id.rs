use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique, filesystem-safe identifier for one connection.
///
/// Format: `<UTC start time>_<process counter>_<random hex>`, e.g.
/// `20260118T142501Z_0003_9f2c41d7`. The counter keeps ids unique within a
/// process; the random suffix keeps them unique across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        let n = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
        let suffix = rand::random::<u32>();
        let started = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
        SessionId(format!("{started}_{n:04}_{suffix:08x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
