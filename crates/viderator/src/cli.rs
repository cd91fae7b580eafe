use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "viderator", about = "Extract frames from video files via ffmpeg")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Decode a video file and save the selected frames as PNG images.
    Extract {
        /// Path to the input video file.
        #[arg(short, long)]
        input: PathBuf,

        /// Directory to write frame images into.
        #[arg(short, long)]
        output: PathBuf,

        /// Keep every Nth decoded frame.
        #[arg(long, conflicts_with = "every_seconds")]
        every: Option<u64>,

        /// Keep one frame per this many seconds of video.
        #[arg(long)]
        every_seconds: Option<f64>,

        /// Stop after writing this many frames.
        #[arg(long)]
        max_frames: Option<usize>,

        /// Run ffmpeg from a packaged archive instead of the system install.
        #[arg(long)]
        packaged: bool,

        /// Packaged decoder archive.
        #[arg(long, default_value = "ffmpegbin.tar")]
        archive: PathBuf,

        /// Directory the packaged decoder is unpacked into.
        #[arg(long, default_value = "ffmpegbin")]
        unpack_dir: PathBuf,

        /// Decoder binary name or path.
        #[arg(long, default_value = "ffmpeg")]
        binary: PathBuf,

        /// Kill ffmpeg if it produces no output for this many seconds.
        #[arg(long)]
        timeout_secs: Option<f64>,
    },

    /// Bundle the ffmpeg binary and its shared libraries into an archive.
    Package {
        /// Directory to write ffmpegbin.tar into.
        #[arg(short, long)]
        output: PathBuf,

        /// Decoder binary name.
        #[arg(long, default_value = "ffmpeg")]
        binary: PathBuf,

        /// Directory to find the binary in, instead of PATH.
        #[arg(long)]
        search_path: Option<PathBuf>,
    },
}
