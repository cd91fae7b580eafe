use std::path::PathBuf;
use std::time::Duration;

use super::policy::SelectionPolicy;
use crate::error::Result;

/// Decoder executable looked up on `PATH` when no packaged copy is used.
pub const DEFAULT_BINARY: &str = "ffmpeg";
/// Archive produced by [`crate::video::package::package_binary`].
pub const DEFAULT_ARCHIVE: &str = "ffmpegbin.tar";
/// Directory the archive is unpacked into.
pub const DEFAULT_UNPACK_DIR: &str = "ffmpegbin";

/// Parameters for one extraction session.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Video file handed to the decoder.
    pub input_path: PathBuf,
    /// Run the decoder from the unpacked archive instead of the system binary.
    pub use_packaged_binary: bool,
    pub selection_policy: SelectionPolicy,
    /// Binary name searched on `PATH`, or a path used as is. In packaged mode
    /// only its file name is used, relative to `unpack_dir`.
    pub binary: PathBuf,
    pub archive_path: PathBuf,
    pub unpack_dir: PathBuf,
    /// Kill the decoder if it produces nothing for this long.
    pub read_timeout: Option<Duration>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::new(),
            use_packaged_binary: false,
            selection_policy: SelectionPolicy::All,
            binary: PathBuf::from(DEFAULT_BINARY),
            archive_path: PathBuf::from(DEFAULT_ARCHIVE),
            unpack_dir: PathBuf::from(DEFAULT_UNPACK_DIR),
            read_timeout: None,
        }
    }
}

impl DecoderConfig {
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            ..Self::default()
        }
    }

    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.selection_policy = policy;
        self
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Use the packaged decoder from `archive`, unpacked into `unpack_dir`.
    pub fn with_packaged_binary(
        mut self,
        archive: impl Into<PathBuf>,
        unpack_dir: impl Into<PathBuf>,
    ) -> Self {
        self.use_packaged_binary = true;
        self.archive_path = archive.into();
        self.unpack_dir = unpack_dir.into();
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.selection_policy.validate()
    }
}
