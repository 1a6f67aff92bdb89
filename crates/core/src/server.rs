use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::encoder::{EncoderFactory, FfmpegFactory};
use crate::error::{CaptureError, Result};
use crate::output::OutputRoot;
use crate::protocol::decoder::DEFAULT_MAX_FRAME_LEN;
use crate::protocol::{FrameDecoder, ProtocolVariant};
use crate::session::{ActiveSession, SessionRegistry};
use crate::transport::tcp::{self, ConnectionContext};

/// Server-level configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (`host:port`).
    pub bind_addr: String,
    /// Directory that receives one sub-directory per session.
    pub output_root: PathBuf,
    /// Device protocol generation; fixed for the lifetime of the server.
    pub protocol: ProtocolVariant,
    /// Largest accepted video frame, in bytes.
    pub max_frame_len: u32,
    /// Socket read deadline. `None` waits on a silent peer forever.
    pub read_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            output_root: PathBuf::from("captures"),
            protocol: ProtocolVariant::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            read_timeout: None,
        }
    }
}

/// Capture server orchestrator.
///
/// Owns the listener thread, the session registry and the encoder factory.
/// Delegates connection handling to [`transport::tcp`](crate::transport::tcp);
/// each connection becomes an independent [`Session`](crate::session::Session).
pub struct Server {
    config: ServerConfig,
    encoders: Arc<dyn EncoderFactory>,
    registry: SessionRegistry,
    running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Server {
    /// Create a server that encodes video with ffmpeg defaults.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_encoder(config, FfmpegFactory::default())
    }

    /// Create a server with a custom encoder factory.
    pub fn with_encoder(config: ServerConfig, encoders: impl EncoderFactory + 'static) -> Self {
        Self {
            config,
            encoders: Arc::new(encoders),
            registry: SessionRegistry::new(),
            running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            accept_thread: None,
        }
    }

    /// Create the output root, bind, and start accepting on a background thread.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRunning);
        }

        let root = OutputRoot::create(&self.config.output_root)?;

        let listener = TcpListener::bind(&self.config.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let ctx = ConnectionContext {
            root,
            decoder: FrameDecoder::with_max_frame_len(
                self.config.protocol,
                self.config.max_frame_len,
            ),
            encoders: self.encoders.clone(),
            registry: self.registry.clone(),
            read_timeout: self.config.read_timeout,
        };

        self.running.store(true, Ordering::SeqCst);
        self.local_addr = Some(local_addr);

        let running = self.running.clone();
        let handle = thread::Builder::new()
            .name("accept".to_string())
            .spawn(move || tcp::accept_loop(listener, ctx, running));
        match handle {
            Ok(handle) => self.accept_thread = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        }

        tracing::info!(
            addr = %local_addr,
            output = %self.config.output_root.display(),
            protocol = ?self.config.protocol,
            "capture server listening"
        );
        Ok(())
    }

    /// Stop accepting connections. Sessions in progress run to completion.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        tracing::info!("server stopped");
    }

    /// Block until the accept loop exits.
    pub fn wait(&mut self) {
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.local_addr.ok_or(CaptureError::NotStarted)
    }

    /// Sessions currently being captured.
    pub fn sessions(&self) -> Vec<ActiveSession> {
        self.registry.active()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
