use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::encoder::EncoderFactory;
use crate::output::OutputRoot;
use crate::protocol::FrameDecoder;
use crate::session::{ActiveSession, Session, SessionRegistry};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything a connection thread needs, shared across connections.
#[derive(Clone)]
pub struct ConnectionContext {
    pub root: OutputRoot,
    pub decoder: FrameDecoder,
    pub encoders: Arc<dyn EncoderFactory>,
    pub registry: SessionRegistry,
    pub read_timeout: Option<Duration>,
}

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
/// Sessions already running are not interrupted.
pub fn accept_loop(listener: TcpListener, ctx: ConnectionContext, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    tracing::warn!(%peer_addr, error = %e, "could not configure connection");
                    continue;
                }
                let ctx = ctx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("conn-{peer_addr}"))
                    .spawn(move || Connection::handle(stream, peer_addr, ctx));
                if let Err(e) = spawned {
                    tracing::error!(%peer_addr, error = %e, "could not spawn connection thread");
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A single device connection.
struct Connection;

impl Connection {
    /// Capture one connection; the socket is released only after the
    /// session's sinks have shut down.
    fn handle(stream: TcpStream, peer_addr: SocketAddr, ctx: ConnectionContext) {
        tracing::info!(%peer_addr, "device connected");

        if let Err(e) = stream.set_read_timeout(ctx.read_timeout) {
            tracing::warn!(%peer_addr, error = %e, "could not set read deadline");
        }

        let session = match Session::open(&ctx.root, ctx.decoder) {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(%peer_addr, error = %e, "could not open session");
                return;
            }
        };

        let id = session.id().clone();
        ctx.registry.register(ActiveSession {
            id: id.clone(),
            peer_addr,
            output_dir: session.output_dir().to_path_buf(),
        });

        let span = tracing::info_span!("session", session_id = %id, %peer_addr);
        let _entered = span.enter();

        let mut reader = BufReader::new(stream);
        let result = session.run(&mut reader, ctx.encoders.as_ref());

        match &result {
            Ok(summary) => tracing::info!(
                frames = summary.video_frames,
                commands = summary.commands,
                sync_lines = summary.sync_lines,
                ended_by = ?summary.ended_by,
                "session finished"
            ),
            Err(e) => tracing::error!(error = %e, "session failed"),
        }

        ctx.registry.finish(&id, result.is_ok());
    }
}
