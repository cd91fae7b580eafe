//! Frame extraction from video files.
//!
//! Frames come either from an ffmpeg subprocess writing PPM records to a pipe
//! ([`extract_frames`]) or from an already-open decoder library stream
//! ([`LibraryFrames`]). [`convert`] picks between them for a [`Source`].

pub mod config;
pub mod convert;
pub mod error;
pub mod library;
pub mod sequence;
pub mod video;

pub use config::{DecoderConfig, SelectionPolicy};
pub use convert::{convert, convert_with, ConvertMode, Converted, Frames, Source};
pub use error::{ExtractError, Result};
pub use library::{LibraryError, LibraryFrames, LibraryOptions, LibraryStream, Traversal};
pub use sequence::{extract_frames, DecodedFrames, DecoderSession, FrameSequence};
pub use video::frame::{ChannelOrder, Frame, PixelBuffer};
pub use video::package::{package_binary, unpack};
pub use video::process::ProcessHandle;
