//! Headless DrawStream recorder.

mod config;
mod record;
mod synthetic;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing::info;

use drawstream_encoder::{negotiate_format, EncoderBackend, FfmpegBackend};
use drawstream_ipc::ContainerFormat;

#[derive(Parser, Debug)]
#[command(name = "drawstream", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a synthetic annotated scene to a file (requires `ffmpeg` on PATH).
    Record(record::RecordArgs),
    /// Show which output containers the local ffmpeg can produce.
    Encoders(EncodersArgs),
}

#[derive(Parser, Debug)]
struct EncodersArgs {
    /// ffmpeg executable.
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "drawstream_cli=debug,drawstream_engine=debug,drawstream_compositor=debug,drawstream_audio=debug,drawstream_encoder=debug,drawstream_ipc=debug".into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Record(args) => record::run(args),
        Command::Encoders(args) => cmd_encoders(args),
    }
}

fn cmd_encoders(args: EncodersArgs) -> anyhow::Result<()> {
    let backend = FfmpegBackend::detect_with(&args.ffmpeg, std::env::temp_dir())
        .with_context(|| format!("run '{}'", args.ffmpeg.display()))?;
    info!(encoders = backend.encoders().len(), "Queried ffmpeg");

    for format in ContainerFormat::PREFERRED {
        let mark = if backend.supports(format) { "yes" } else { "no" };
        println!("{:<28} {}", format.mime_type(), mark);
    }
    match negotiate_format(&backend, &ContainerFormat::PREFERRED) {
        Ok(format) => println!("recordings will use {}", format.mime_type()),
        Err(e) => println!("recording unavailable: {e}"),
    }
    Ok(())
}
