use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::library::LibraryError;

/// Errors surfaced by a frame extraction session.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// No usable decoder binary could be located or launched.
    #[error("failed to start decoder {}: {reason}", .binary.display())]
    Spawn { binary: PathBuf, reason: String },

    /// The diagnostic stream ended, or reported a fatal condition, before a
    /// frame rate was found. `line` holds the offending line when there was one.
    #[error("could not read frame rate from decoder diagnostics{}", describe_line(.line))]
    FpsParse { line: Option<String> },

    /// A pixel-stream record violated the fixed record format.
    #[error("malformed pixel-stream record: {0}")]
    MalformedFrame(String),

    /// The decoder produced no output within the configured read timeout.
    #[error("decoder made no progress for {0:?}")]
    ReadTimeout(Duration),

    #[error("invalid selection policy: {0}")]
    InvalidPolicy(String),

    /// None of the startup seek attempts on a library stream succeeded.
    #[error("no decodable frame found after {attempts} seek attempts")]
    NoDecodableFrame { attempts: u64 },

    #[error(transparent)]
    Library(#[from] LibraryError),

    /// The source handed to the dispatch facade cannot be streamed.
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    /// Packaging or unpacking the decoder archive failed.
    #[error("decoder packaging failed: {0}")]
    Package(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ExtractError>;

fn describe_line(line: &Option<String>) -> String {
    match line {
        Some(line) => format!(": {line}"),
        None => " (stream ended)".to_string(),
    }
}
