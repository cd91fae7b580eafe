//! Routes a video source to the representation a caller asked for.

use std::path::PathBuf;

use tracing::debug;

use crate::config::{DecoderConfig, SelectionPolicy};
use crate::error::{ExtractError, Result};
use crate::library::{LibraryFrames, LibraryOptions, LibraryStream, Traversal};
use crate::sequence::{extract_frames, DecodedFrames};
use crate::video::frame::{ChannelOrder, Frame};

/// Something that may be turned into frames.
#[derive(Debug)]
pub enum Source<L> {
    /// An open decoder-library stream.
    Library(L),
    /// A file to run through the decoder subprocess.
    Decoder(DecoderConfig),
    /// A bare path that was never opened. Not streamable.
    Unopened(PathBuf),
}

/// The representation requested from [`convert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertMode {
    /// Hand the source back untouched.
    AsRawStream,
    /// Every frame, in the given channel order.
    AsFrameIterator(ChannelOrder),
    /// Every `stride`-th frame, in the given channel order.
    AsFrameIteratorWithStride(ChannelOrder, u64),
}

/// Result of [`convert`].
pub enum Converted<L> {
    Raw(Source<L>),
    Frames(Frames<L>),
}

/// Frames from whichever backend served the source.
pub enum Frames<L> {
    Library(LibraryFrames<L>),
    Decoder {
        frames: DecodedFrames,
        order: ChannelOrder,
    },
}

impl<L: LibraryStream> Iterator for Frames<L> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Frames::Library(frames) => frames.next(),
            Frames::Decoder { frames, order } => Some(frames.next()?.map(|frame| Frame {
                pixels: frame.pixels.into_order(*order),
                ..frame
            })),
        }
    }
}

/// [`convert_with`] using seek traversal for library streams.
pub fn convert<L: LibraryStream>(source: Source<L>, mode: ConvertMode) -> Result<Converted<L>> {
    convert_with(source, mode, Traversal::Seek)
}

/// Turn `source` into the representation `mode` asks for. `traversal` only
/// applies to library streams.
pub fn convert_with<L: LibraryStream>(
    source: Source<L>,
    mode: ConvertMode,
    traversal: Traversal,
) -> Result<Converted<L>> {
    let request = match mode {
        ConvertMode::AsRawStream => None,
        ConvertMode::AsFrameIterator(order) => Some((order, SelectionPolicy::All)),
        ConvertMode::AsFrameIteratorWithStride(order, 1) => Some((order, SelectionPolicy::All)),
        ConvertMode::AsFrameIteratorWithStride(order, stride) => {
            Some((order, SelectionPolicy::IndexStride(stride)))
        }
    };

    let frames = match (source, request) {
        (Source::Unopened(path), _) => {
            return Err(ExtractError::UnsupportedSource(format!(
                "{} is not an open video stream",
                path.display()
            )));
        }
        (source, None) => {
            debug!("returning source unchanged");
            return Ok(Converted::Raw(source));
        }
        (Source::Library(stream), Some((order, policy))) => {
            debug!(?order, ?policy, ?traversal, "converting library stream to frames");
            Frames::Library(LibraryFrames::open(
                stream,
                LibraryOptions {
                    order,
                    policy,
                    traversal,
                },
            )?)
        }
        (Source::Decoder(config), Some((order, policy))) => {
            debug!(?order, ?policy, input = ?config.input_path, "converting file to frames");
            Frames::Decoder {
                frames: extract_frames(&config.with_policy(policy))?,
                order,
            }
        }
    };
    Ok(Converted::Frames(frames))
}
