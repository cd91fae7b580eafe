mod cli;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use image::ImageFormat;
use tracing::{debug, info, warn};

use viderator_core::{extract_frames, package_binary, DecoderConfig, SelectionPolicy};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Command::Extract {
            input,
            output,
            every,
            every_seconds,
            max_frames,
            packaged,
            archive,
            unpack_dir,
            binary,
            timeout_secs,
        } => {
            let policy = match (every, every_seconds) {
                (Some(n), _) => SelectionPolicy::IndexStride(n),
                (None, Some(seconds)) => SelectionPolicy::TimeStride(seconds),
                (None, None) => SelectionPolicy::All,
            };

            let mut config = DecoderConfig::new(input).with_policy(policy).with_binary(binary);
            if packaged {
                config = config.with_packaged_binary(archive, unpack_dir);
            }
            if let Some(secs) = timeout_secs {
                let timeout = Duration::try_from_secs_f64(secs)
                    .context("timeout must be a non-negative number of seconds")?;
                config = config.with_read_timeout(timeout);
            }

            info!(input = ?config.input_path, ?output, ?policy, "starting extraction");
            let written = write_frames(&config, &output, max_frames)?;

            if written == 0 {
                warn!("no frames were extracted");
            }
            info!(written, ?output, "extraction complete");
            Ok(())
        }
        cli::Command::Package {
            output,
            binary,
            search_path,
        } => {
            let archive = package_binary(&binary, search_path.as_deref(), &output)
                .context("failed to package decoder")?;
            info!(?archive, "decoder packaged");
            Ok(())
        }
    }
}

/// Save every selected frame as `frame_<index>.png` under `output`.
fn write_frames(config: &DecoderConfig, output: &Path, max_frames: Option<usize>) -> Result<usize> {
    std::fs::create_dir_all(output).context("failed to create output directory")?;

    let frames = extract_frames(config).context("failed to start frame extraction")?;
    info!(fps = frames.fps(), stride = frames.stride(), "decoder ready");

    let mut written = 0;
    for frame in frames.take(max_frames.unwrap_or(usize::MAX)) {
        let frame = frame.context("failed to read frame")?;
        let path = output.join(format!("frame_{:08}.png", frame.index));
        frame
            .pixels
            .to_rgb_image()
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("failed to save frame to {}", path.display()))?;
        debug!(?path, timestamp = frame.timestamp, "saved frame");
        written += 1;
    }
    Ok(written)
}
