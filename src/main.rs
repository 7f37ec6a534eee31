//! Terminal audio visualizer — core pipeline binary.
//!
//! This binary's CLI surface is a thin interop shim for the downstream
//! renderer, which owns the actual terminal UI. It wires a [`Pipeline`]
//! and keeps it running until interrupted.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audioviz_core::config::{parse_preset, PipelineConfig};
use audioviz_core::error::AudiovizError;
use audioviz_core::pipeline::Pipeline;

const EXIT_SUCCESS: u8 = 0;
const EXIT_INVALID_ARGS: u8 = 2;
const EXIT_AUDIO_UNAVAILABLE: u8 = 3;
const EXIT_DECODER_UNAVAILABLE: u8 = 4;
const EXIT_RUNTIME_ERROR: u8 = 5;

/// Reserved flags for the downstream renderer's future use; the core
/// only consumes the ones that shape pipeline construction.
#[derive(Parser, Debug)]
#[command(name = "audioviz-core")]
#[command(about = "Real-time audio pipeline core for a terminal visualizer")]
#[command(version)]
struct Args {
    /// `system` or `file:<path>`
    #[arg(long)]
    source: Option<String>,

    /// Reserved for the downstream renderer; unused by the core.
    #[arg(long)]
    mode: Option<String>,

    #[arg(long)]
    sample_rate: Option<u32>,

    #[arg(long)]
    channels: Option<u16>,

    #[arg(long)]
    fft_size: Option<usize>,

    #[arg(long)]
    preset: Option<String>,
}

fn version_string() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("GIT_HASH"),
        ", ",
        env!("BUILD_PROFILE"),
        ")"
    )
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audioviz_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

fn build_config(args: &Args) -> Result<PipelineConfig, AudiovizError> {
    let mut config = PipelineConfig::default();
    if let Some(rate) = args.sample_rate {
        config = config.with_sample_rate(rate);
    }
    if let Some(channels) = args.channels {
        config = config.with_channels(channels);
    }
    if let Some(fft_size) = args.fft_size {
        config = config.with_fft_size(fft_size);
    }
    if let Some(preset) = &args.preset {
        config = config.with_preset(parse_preset(preset)?);
    }
    config.validate()?;
    Ok(config)
}

/// Maps a pipeline error to its exit code. The error taxonomy doesn't
/// distinguish "no native audio system" from "no decoder" at the type
/// level, so we fall back to a substring check on the message.
fn exit_code_for(err: &AudiovizError) -> u8 {
    match err {
        AudiovizError::InvalidArgument(_) => EXIT_INVALID_ARGS,
        AudiovizError::UnsupportedEnvironment(msg) => {
            if msg.contains("decoder") {
                EXIT_DECODER_UNAVAILABLE
            } else {
                EXIT_AUDIO_UNAVAILABLE
            }
        }
        AudiovizError::Source(_) | AudiovizError::SwitchFailed(_) | AudiovizError::Buffer(_) | AudiovizError::Io(_) => {
            EXIT_RUNTIME_ERROR
        }
    }
}

fn main() -> ExitCode {
    // The CLI contract requires `--help`/no-args to print usage and
    // exit 0 even though clap's default for an all-optional arg set is
    // to run with defaults on no args.
    if std::env::args().len() <= 1 {
        let mut cmd = <Args as clap::CommandFactory>::command();
        let _ = cmd.print_help();
        println!();
        return ExitCode::from(EXIT_SUCCESS);
    }

    let args = Args::parse();
    init_tracing();
    info!(version = version_string(), "starting audio pipeline core");

    match run(args) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(err) => {
            error!(code = err.error_code(), "{err}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn run(args: Args) -> Result<(), AudiovizError> {
    let config = build_config(&args)?;
    let pipeline = Pipeline::new(&config)?;

    match args.source.as_deref() {
        Some("system") | None => {
            pipeline.source_manager().switch_to_system_audio(None, None)?;
        }
        Some(source) if source.starts_with("file:") => {
            let path = &source["file:".len()..];
            pipeline
                .source_manager()
                .switch_to_file(path, config.channels, None)?;
        }
        Some(other) => {
            return Err(AudiovizError::InvalidArgument(format!(
                "--source must be 'system' or 'file:<path>', got '{other}'"
            )))
        }
    }

    pipeline.start();
    info!("pipeline running; press Ctrl+C to stop");

    wait_for_shutdown_signal();

    pipeline.stop();
    Ok(())
}

fn wait_for_shutdown_signal() {
    let (tx, rx) = std::sync::mpsc::channel();
    let _ = ctrlc_handler(tx);
    let _ = rx.recv();
}

/// Installs a minimal Ctrl+C handler without pulling in a signal
/// crate: std::process alone has no portable hook for this, so we
/// spawn a thread that blocks on stdin EOF as the external collaborator
/// would normally drive shutdown via its own event loop. Left thin
/// deliberately: the downstream renderer owns the real input loop.
fn ctrlc_handler(tx: std::sync::mpsc::Sender<()>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = std::io::stdin().read_line(&mut buf);
        let _ = tx.send(());
    })
}
