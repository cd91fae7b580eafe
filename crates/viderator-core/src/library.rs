//! Frames from an already-open, in-process decoder handle.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SelectionPolicy;
use crate::error::{ExtractError, Result};
use crate::video::frame::{ChannelOrder, Frame, PixelBuffer};

/// Number of leading frames tried when looking for the first decodable one.
pub const SEEK_START_ATTEMPTS: u64 = 3;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("seek to frame {index} failed: {reason}")]
    Seek { index: u64, reason: String },
    #[error("frame decode failed: {0}")]
    Decode(String),
    /// There is no frame after the current one.
    #[error("end of stream")]
    EndOfStream,
    #[error("stream reports unusable frame rate {0}")]
    InvalidFps(f64),
}

/// Capabilities of an open decoder-library stream.
pub trait LibraryStream {
    /// Position the stream on frame `index`.
    fn seek(&mut self, index: u64) -> std::result::Result<(), LibraryError>;

    fn fps(&self) -> f64;

    /// The frame the stream is positioned on, with its frame number.
    fn current_frame(&mut self) -> std::result::Result<(u64, PixelBuffer), LibraryError>;

    /// Move to the next frame.
    fn advance(&mut self) -> std::result::Result<(), LibraryError>;
}

/// How the adapter moves between selected frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Traversal {
    /// Decode every frame and drop the unselected ones.
    Advance,
    /// Seek straight to the next selected index. Only worth it when the
    /// stream seeks efficiently.
    #[default]
    Seek,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LibraryOptions {
    /// Channel order of the yielded pixels.
    pub order: ChannelOrder,
    pub policy: SelectionPolicy,
    pub traversal: Traversal,
}

/// Lazy sequence of frames pulled from a [`LibraryStream`].
pub struct LibraryFrames<L> {
    stream: L,
    fps: f64,
    stride: u64,
    order: ChannelOrder,
    traversal: Traversal,
    /// Failure to move past the last yielded frame, reported on the next call.
    pending: Option<LibraryError>,
    done: bool,
}

impl<L: LibraryStream> LibraryFrames<L> {
    /// Position `stream` on its first decodable frame.
    pub fn open(mut stream: L, options: LibraryOptions) -> Result<Self> {
        let fps = stream.fps();
        if !fps.is_finite() || fps <= 0.0 {
            return Err(LibraryError::InvalidFps(fps).into());
        }
        let stride = options.policy.resolve(fps)?;

        let start = (0..SEEK_START_ATTEMPTS).find(|&index| match stream.seek(index) {
            Ok(()) => true,
            Err(e) => {
                warn!(index, %e, "start seek failed");
                false
            }
        });
        let Some(start) = start else {
            return Err(ExtractError::NoDecodableFrame {
                attempts: SEEK_START_ATTEMPTS,
            });
        };

        info!(start, fps, stride, traversal = ?options.traversal, "library stream ready");
        Ok(Self {
            stream,
            fps,
            stride,
            order: options.order,
            traversal: options.traversal,
            pending: None,
            done: false,
        })
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Release the underlying stream.
    pub fn into_inner(self) -> L {
        self.stream
    }

    /// Move past the frame just read. Returns `false` when the stream has no
    /// further frame to offer.
    fn step(&mut self, index: u64) -> std::result::Result<bool, LibraryError> {
        match self.traversal {
            Traversal::Advance => match self.stream.advance() {
                Ok(()) => Ok(true),
                Err(LibraryError::EndOfStream) => Ok(false),
                Err(e) => Err(e),
            },
            Traversal::Seek => {
                let Some(target) = index.checked_add(self.stride) else {
                    debug!(index, stride = self.stride, "next seek target is out of range");
                    return Ok(false);
                };
                match self.stream.seek(target) {
                    Ok(()) => Ok(true),
                    Err(e) => {
                        debug!(target, %e, "seek past last frame");
                        Ok(false)
                    }
                }
            }
        }
    }
}

impl<L: LibraryStream> Iterator for LibraryFrames<L> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending.take() {
            self.done = true;
            return Some(Err(e.into()));
        }

        while !self.done {
            let (index, pixels) = match self.stream.current_frame() {
                Ok(current) => current,
                Err(LibraryError::EndOfStream) => break,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            };

            match self.step(index) {
                Ok(more) => self.done = !more,
                Err(e) => {
                    warn!(index, %e, "failed to move past frame");
                    self.pending = Some(e);
                    self.done = true;
                }
            }

            // Seek traversal only ever lands on selected frames.
            if self.traversal == Traversal::Advance && index % self.stride != 0 {
                continue;
            }

            return Some(Ok(Frame {
                index,
                timestamp: index as f64 / self.fps,
                pixels: pixels.into_order(self.order),
            }));
        }
        self.done = true;
        self.pending.take().map(|e| Err(e.into()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// In-memory stream of `len` 1x1 frames; frame `i` has pixel `[i, 0, 255]`.
    #[derive(Debug)]
    pub(crate) struct FakeStream {
        pub id: u32,
        pub len: u64,
        pub position: Option<u64>,
        /// Indices whose seek fails.
        pub broken: Vec<u64>,
        /// Advancing away from this index fails with a decode error.
        pub stuck_at: Option<u64>,
        pub fps: f64,
        pub calls: u32,
    }

    impl FakeStream {
        pub(crate) fn new(len: u64) -> Self {
            Self {
                id: 0,
                len,
                position: None,
                broken: Vec::new(),
                stuck_at: None,
                fps: 10.0,
                calls: 0,
            }
        }
    }

    impl LibraryStream for FakeStream {
        fn seek(&mut self, index: u64) -> std::result::Result<(), LibraryError> {
            self.calls += 1;
            if index >= self.len || self.broken.contains(&index) {
                return Err(LibraryError::Seek {
                    index,
                    reason: "unavailable".to_string(),
                });
            }
            self.position = Some(index);
            Ok(())
        }

        fn fps(&self) -> f64 {
            self.fps
        }

        fn current_frame(&mut self) -> std::result::Result<(u64, PixelBuffer), LibraryError> {
            self.calls += 1;
            let index = self.position.ok_or(LibraryError::EndOfStream)?;
            let pixels = PixelBuffer::from_raw(1, 1, vec![index as u8, 0, 255], ChannelOrder::Rgb)
                .ok_or_else(|| LibraryError::Decode("bad buffer".to_string()))?;
            Ok((index, pixels))
        }

        fn advance(&mut self) -> std::result::Result<(), LibraryError> {
            self.calls += 1;
            match self.position {
                Some(index) if self.stuck_at == Some(index) => {
                    Err(LibraryError::Decode("corrupt packet".to_string()))
                }
                Some(index) if index + 1 < self.len => {
                    self.position = Some(index + 1);
                    Ok(())
                }
                _ => Err(LibraryError::EndOfStream),
            }
        }
    }

    fn collect(stream: FakeStream, options: LibraryOptions) -> Vec<u64> {
        LibraryFrames::open(stream, options)
            .unwrap()
            .map(|frame| frame.unwrap().index)
            .collect()
    }

    #[test]
    fn advance_all_yields_every_frame() {
        let options = LibraryOptions {
            traversal: Traversal::Advance,
            ..LibraryOptions::default()
        };
        assert_eq!(collect(FakeStream::new(4), options), vec![0, 1, 2, 3]);
    }

    #[test]
    fn advance_stride_filters_by_index() {
        let options = LibraryOptions {
            policy: SelectionPolicy::IndexStride(3),
            traversal: Traversal::Advance,
            ..LibraryOptions::default()
        };
        assert_eq!(collect(FakeStream::new(10), options), vec![0, 3, 6, 9]);
    }

    #[test]
    fn seek_stride_jumps_between_frames() {
        let options = LibraryOptions {
            policy: SelectionPolicy::IndexStride(4),
            traversal: Traversal::Seek,
            ..LibraryOptions::default()
        };
        let mut stream = FakeStream::new(10);
        stream.broken = vec![5];
        assert_eq!(collect(stream, options), vec![0, 4, 8]);
    }

    #[test]
    fn time_stride_uses_stream_fps() {
        let options = LibraryOptions {
            policy: SelectionPolicy::TimeStride(0.5),
            traversal: Traversal::Seek,
            ..LibraryOptions::default()
        };
        assert_eq!(collect(FakeStream::new(12), options), vec![0, 5, 10]);
    }

    #[test]
    fn start_skips_undecodable_leading_frames() {
        let mut stream = FakeStream::new(5);
        stream.broken = vec![0, 1];
        let options = LibraryOptions {
            traversal: Traversal::Advance,
            ..LibraryOptions::default()
        };
        assert_eq!(collect(stream, options), vec![2, 3, 4]);
    }

    #[test]
    fn start_gives_up_after_bounded_attempts() {
        let mut stream = FakeStream::new(5);
        stream.broken = vec![0, 1, 2];
        let result = LibraryFrames::open(stream, LibraryOptions::default());
        assert!(matches!(
            result,
            Err(ExtractError::NoDecodableFrame { attempts: 3 })
        ));
    }

    #[test]
    fn frames_carry_timestamps_and_requested_order() {
        let options = LibraryOptions {
            order: ChannelOrder::Bgr,
            traversal: Traversal::Advance,
            ..LibraryOptions::default()
        };
        let frames: Vec<Frame> = LibraryFrames::open(FakeStream::new(3), options)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert!((frames[2].timestamp - 0.2).abs() < 1e-12);
        assert_eq!(frames[2].pixels.pixel(0, 0), [255, 0, 2]);
        assert_eq!(frames[2].channel_order(), ChannelOrder::Bgr);
    }

    #[test]
    fn advance_failure_still_yields_the_current_frame() {
        let mut stream = FakeStream::new(5);
        stream.stuck_at = Some(1);
        let options = LibraryOptions {
            traversal: Traversal::Advance,
            ..LibraryOptions::default()
        };
        let mut frames = LibraryFrames::open(stream, options).unwrap();
        assert_eq!(frames.next().unwrap().unwrap().index, 0);
        assert_eq!(frames.next().unwrap().unwrap().index, 1);
        assert!(matches!(
            frames.next(),
            Some(Err(ExtractError::Library(LibraryError::Decode(_))))
        ));
        assert!(frames.next().is_none());
    }

    #[test]
    fn advance_failure_on_unselected_frame_is_still_reported() {
        let mut stream = FakeStream::new(6);
        stream.stuck_at = Some(2);
        let options = LibraryOptions {
            policy: SelectionPolicy::IndexStride(4),
            traversal: Traversal::Advance,
            ..LibraryOptions::default()
        };
        let mut frames = LibraryFrames::open(stream, options).unwrap();
        assert_eq!(frames.next().unwrap().unwrap().index, 0);
        assert!(matches!(
            frames.next(),
            Some(Err(ExtractError::Library(LibraryError::Decode(_))))
        ));
        assert!(frames.next().is_none());
    }

    #[test]
    fn seek_target_overflow_ends_the_sequence() {
        let mut stream = FakeStream::new(5);
        stream.broken = vec![0];
        let options = LibraryOptions {
            policy: SelectionPolicy::IndexStride(u64::MAX),
            traversal: Traversal::Seek,
            ..LibraryOptions::default()
        };
        assert_eq!(collect(stream, options), vec![1]);
    }

    #[test]
    fn unusable_fps_is_rejected_at_open() {
        for fps in [0.0, -25.0, f64::NAN, f64::INFINITY] {
            let mut stream = FakeStream::new(3);
            stream.fps = fps;
            let result = LibraryFrames::open(stream, LibraryOptions::default());
            assert!(
                matches!(
                    result,
                    Err(ExtractError::Library(LibraryError::InvalidFps(_)))
                ),
                "fps={fps}"
            );
        }
    }

    struct FailingDecode;

    impl LibraryStream for FailingDecode {
        fn seek(&mut self, _index: u64) -> std::result::Result<(), LibraryError> {
            Ok(())
        }

        fn fps(&self) -> f64 {
            25.0
        }

        fn current_frame(&mut self) -> std::result::Result<(u64, PixelBuffer), LibraryError> {
            Err(LibraryError::Decode("corrupt packet".to_string()))
        }

        fn advance(&mut self) -> std::result::Result<(), LibraryError> {
            Ok(())
        }
    }

    #[test]
    fn decode_errors_are_yielded_once() {
        let mut frames = LibraryFrames::open(FailingDecode, LibraryOptions::default()).unwrap();
        assert!(matches!(
            frames.next(),
            Some(Err(ExtractError::Library(LibraryError::Decode(_))))
        ));
        assert!(frames.next().is_none());
    }
}
