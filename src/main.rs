use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};

use media_source::{
    config::SourceConfig,
    source::{open_source_as, Source, SourceKind},
    SourceError,
};

#[derive(Parser)]
#[command(
    name = "media-probe",
    version,
    about = "Inspect a media source and read a few frames from it",
    long_about = "media-probe opens a WAV file, an AviSynth or VapourSynth script, or a file behind an input plugin (plugin.aui://file), reports what it serves and reads a range of frames to check that decoding works."
)]
struct Cli {
    /// Source specifier: a file path or plugin.aui://file
    specifier: String,

    /// Force a backend (wav, avs, vpy, plugin) instead of detecting it
    #[arg(short, long)]
    kind: Option<SourceKind>,

    /// Configuration file (optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Frame rate numerator used for audio windows
    #[arg(long, requires = "scale")]
    rate: Option<u32>,

    /// Frame rate denominator used for audio windows
    #[arg(long, requires = "rate")]
    scale: Option<u32>,

    /// First frame to read
    #[arg(short, long, default_value_t = 0)]
    frame: u32,

    /// Number of frames to read
    #[arg(short = 'n', long, default_value_t = 1)]
    frames: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .init();

    info!("media-probe v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match &cli.config {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            SourceConfig::from_file(config_path)?
        }
        None => SourceConfig::default(),
    };
    config.validate()?;

    let kind = cli.kind.unwrap_or_else(|| SourceKind::detect(&cli.specifier));
    info!("Opening {} with the {} backend", cli.specifier, kind);

    let mut source = open_source_as(kind, &cli.specifier, &config).map_err(|e| {
        warn!("{}", e.user_message());
        e
    })?;
    info!("{}", source.info());

    if let (Some(rate), Some(scale)) = (cli.rate, cli.scale) {
        info!("Overriding frame rate with {}/{}", rate, scale);
        source.set_rate(rate, scale);
    }

    let frames = cli.frame..cli.frame.saturating_add(cli.frames);
    if source.has_video() {
        check_video(&mut *source, frames.clone())?;
    }
    if source.has_audio() {
        check_audio(&mut *source, frames)?;
    }

    Ok(())
}

fn check_video(source: &mut dyn Source, frames: std::ops::Range<u32>) -> Result<()> {
    let info = source.info();
    let mut luma = vec![0u8; info.luma_len()];
    info!(
        "Reading luma of {}x{} (aligned from {}x{})",
        info.aligned_width(),
        info.aligned_height(),
        info.width,
        info.height
    );

    for frame in frames {
        match source.read_video_y8(frame, &mut luma) {
            Ok(()) => {
                let sum: u64 = luma.iter().map(|&y| y as u64).sum();
                let mean = sum as f64 / luma.len().max(1) as f64;
                info!("Frame {}: mean luma {:.2}", frame, mean);
            }
            Err(e) if !e.is_fatal() => warn!("Frame {}: {}", frame, e),
            Err(e) => return Err(e).context(format!("reading video frame {}", frame)),
        }
    }
    Ok(())
}

fn check_audio(source: &mut dyn Source, frames: std::ops::Range<u32>) -> Result<()> {
    let buffer_len = source
        .info()
        .audio_buffer_len()
        .ok_or_else(|| SourceError::InvalidRate {
            rate: source.info().rate,
            scale: source.info().scale,
        })
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    let mut pcm = vec![0u8; buffer_len];

    for frame in frames {
        let window = media_source::TimeWindow::from_info(frame, source.info())?;
        match source.read_audio(frame, &mut pcm) {
            Ok(count) => info!("Frame {}: audio {} -> {} sample frames", frame, window, count),
            Err(e) if !e.is_fatal() => warn!("Frame {}: {}", frame, e),
            Err(e) => return Err(e).context(format!("reading audio of frame {}", frame)),
        }
    }
    Ok(())
}
