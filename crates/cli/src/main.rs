use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use capture::{FfmpegConfig, FfmpegFactory, ProtocolVariant, RawFactory, Server, ServerConfig};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "capture-server",
    about = "Record robot telemetry streams into video, sync index and command log"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:9000")]
    bind: String,

    /// Directory receiving one sub-directory per connection
    #[arg(long, short, default_value = "captures")]
    output_dir: PathBuf,

    /// Device protocol generation
    #[arg(long, value_enum, default_value_t = Protocol::Drive)]
    protocol: Protocol,

    /// How video frames are stored
    #[arg(long, value_enum, default_value_t = EncoderKind::Ffmpeg)]
    encoder: EncoderKind,

    /// Path to the ffmpeg executable
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// Give up on a connection after this many seconds without data
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    read_timeout: Option<u64>,

    /// Largest accepted video frame in bytes
    #[arg(long, default_value_t = capture::protocol::decoder::DEFAULT_MAX_FRAME_LEN)]
    max_frame_size: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum Protocol {
    /// Command bit 0x01, opcode plus left/right wheel speeds
    Drive,
    /// Command bit 0x02, opcode only
    Opcode,
}

#[derive(Clone, Copy, ValueEnum)]
enum EncoderKind {
    /// Transcode through an ffmpeg subprocess
    Ffmpeg,
    /// Store the JPEG frames unmodified
    Raw,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: args.bind.clone(),
        output_root: args.output_dir,
        protocol: match args.protocol {
            Protocol::Drive => ProtocolVariant::Drive,
            Protocol::Opcode => ProtocolVariant::OpcodeOnly,
        },
        max_frame_len: args.max_frame_size,
        read_timeout: args.read_timeout.map(Duration::from_secs),
    };

    let mut server = match args.encoder {
        EncoderKind::Ffmpeg => Server::with_encoder(
            config,
            FfmpegFactory::new(FfmpegConfig {
                program: args.ffmpeg,
                ..FfmpegConfig::default()
            }),
        ),
        EncoderKind::Raw => Server::with_encoder(config, RawFactory),
    };

    if let Err(e) = server.start() {
        tracing::error!(error = %e, bind = %args.bind, "failed to start server");
        return ExitCode::FAILURE;
    }

    // The accept loop only ends through `Server::stop`; this blocks until the
    // process is terminated.
    server.wait();
    ExitCode::SUCCESS
}
