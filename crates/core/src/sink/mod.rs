//! Sink workers.
//!
//! Each sink runs on its own thread and owns all of its mutable state: file
//! handles, the encoder pipe, the sync counters. The session talks to it
//! only through a rendezvous channel (`sync_channel(0)`), so a send returns
//! once the sink has taken the record. A slow sink therefore stalls the
//! session's read loop, and through it the socket.
//!
//! ## Shutdown barrier
//!
//! ```text
//! session                     sink thread
//!   | -- Envelope::Shutdown -->  |
//!   |                            | finish(): flush, close, wait
//!   | <------ join() ----------- | returns Report
//! ```
//!
//! [`SinkWorker::shutdown`] only returns after the sink thread has exited,
//! so once it returns every file the sink owned is closed.

pub mod command;
pub mod video;

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use crate::error::{CaptureError, Result};

pub use command::CommandSink;
pub use video::{SyncBucket, VideoSink};

/// A consumer of one kind of record.
pub trait Sink: Send + 'static {
    type Record: Send + 'static;
    type Report: Send + 'static;

    /// Short name used in logs and thread names.
    const NAME: &'static str;

    /// Persist one record. An error stops the sink.
    fn consume(&mut self, record: Self::Record) -> Result<()>;

    /// Flush and release everything the sink owns.
    ///
    /// Also called after a failed [`consume`](Self::consume), so state that
    /// is still valid reaches disk.
    fn finish(self) -> Result<Self::Report>;
}

enum Envelope<T> {
    Record(T),
    Shutdown,
}

/// Handle to a sink running on its own thread.
pub struct SinkWorker<S: Sink> {
    tx: SyncSender<Envelope<S::Record>>,
    handle: JoinHandle<Result<S::Report>>,
}

impl<S: Sink> SinkWorker<S> {
    /// Start `sink` on a new thread named `<NAME>-<label>`.
    pub fn spawn(sink: S, label: &str) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(0);
        let span = tracing::info_span!("sink", name = S::NAME, session = %label);
        let handle = thread::Builder::new()
            .name(format!("{}-{}", S::NAME, label))
            .spawn(move || span.in_scope(|| run(sink, rx)))?;
        Ok(Self { tx, handle })
    }

    /// Hand a record to the sink, blocking until it is taken.
    ///
    /// Returns `false` if the sink has stopped; its error is reported by
    /// [`shutdown`](Self::shutdown).
    pub fn send(&self, record: S::Record) -> bool {
        self.tx.send(Envelope::Record(record)).is_ok()
    }

    /// Signal shutdown and wait for the sink to flush and exit.
    pub fn shutdown(self) -> Result<S::Report> {
        // A stopped sink has dropped its receiver; joining still yields its result.
        let _ = self.tx.send(Envelope::Shutdown);
        drop(self.tx);
        self.handle
            .join()
            .map_err(|_| CaptureError::SinkStopped { sink: S::NAME })?
    }
}

fn run<S: Sink>(mut sink: S, rx: Receiver<Envelope<S::Record>>) -> Result<S::Report> {
    loop {
        match rx.recv() {
            Ok(Envelope::Record(record)) => {
                if let Err(e) = sink.consume(record) {
                    tracing::error!(sink = S::NAME, error = %e, "sink failed");
                    if let Err(flush_err) = sink.finish() {
                        tracing::warn!(sink = S::NAME, error = %flush_err, "flush after failure also failed");
                    }
                    return Err(e);
                }
            }
            // A dropped sender means the session went away without a
            // shutdown signal; flush all the same.
            Ok(Envelope::Shutdown) | Err(_) => {
                tracing::debug!(sink = S::NAME, "sink shutting down");
                return sink.finish();
            }
        }
    }
}
