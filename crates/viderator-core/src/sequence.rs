use std::io::{BufRead, BufReader};
use std::process::ChildStdout;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{DecoderConfig, SelectionPolicy};
use crate::error::{ExtractError, Result};
use crate::video::diagnostics::read_fps;
use crate::video::frame::Frame;
use crate::video::ppm;
use crate::video::process::ProcessHandle;

/// Lifecycle hooks of whatever produces the pixel stream.
pub trait DecoderSession {
    /// A blocking read is about to start, or the current one just consumed a
    /// record and keeps going. Restarts the read timer.
    fn begin_read(&mut self) {}

    /// The read returned control to the consumer. Stops the read timer until
    /// the next [`begin_read`](DecoderSession::begin_read).
    fn end_read(&mut self) {}

    /// The configured timeout, if the session was killed for exceeding it.
    fn timed_out(&self) -> Option<Duration> {
        None
    }

    /// Terminate the producer and wait for it. Called exactly once per
    /// sequence.
    fn shutdown(&mut self) -> Result<()>;
}

/// Frames pulled from a decoder subprocess.
pub type DecodedFrames = FrameSequence<BufReader<ChildStdout>, ProcessHandle>;

/// Spawn a decoder for `config` and return its selected frames.
pub fn extract_frames(config: &DecoderConfig) -> Result<DecodedFrames> {
    config.validate()?;

    let mut handle = ProcessHandle::start(config)?;
    let (Some(diagnostics), Some(pixels)) = (handle.take_diagnostics(), handle.take_pixels())
    else {
        return Err(ExtractError::Spawn {
            binary: config.binary.clone(),
            reason: "decoder streams were not captured".to_string(),
        });
    };

    FrameSequence::start(
        BufReader::new(diagnostics),
        BufReader::new(pixels),
        handle,
        config.selection_policy,
    )
}

/// Lazy, single-pass sequence of selected frames.
///
/// Each call to [`next`](Iterator::next) reads records from the pixel stream
/// until one is selected or the stream ends. The session is shut down once,
/// when the sequence ends, fails, or is dropped early.
pub struct FrameSequence<R, S: DecoderSession> {
    pixels: R,
    session: S,
    fps: f64,
    stride: u64,
    /// Index the next parsed record will get.
    next_index: u64,
    skip_target: Option<u64>,
    emitted: u64,
    done: bool,
}

impl<R: BufRead, S: DecoderSession> FrameSequence<R, S> {
    /// Read the frame rate from `diagnostics` and prepare to stream.
    ///
    /// On failure the session is shut down before the error is returned.
    pub fn start<D: BufRead>(
        diagnostics: D,
        pixels: R,
        mut session: S,
        policy: SelectionPolicy,
    ) -> Result<Self> {
        session.begin_read();
        let setup = read_fps(diagnostics).and_then(|fps| Ok((fps, policy.resolve(fps)?)));
        let (fps, stride) = match setup {
            Ok(resolved) => resolved,
            Err(e) => {
                let e = session.timed_out().map_or(e, ExtractError::ReadTimeout);
                if let Err(shutdown) = session.shutdown() {
                    warn!(%shutdown, "failed to shut down decoder after setup error");
                }
                return Err(e);
            }
        };
        session.end_read();

        info!(fps, stride, ?policy, "frame sequence ready");
        Ok(Self {
            pixels,
            session,
            fps,
            stride,
            next_index: 0,
            skip_target: None,
            emitted: 0,
            done: false,
        })
    }
}

impl<R, S: DecoderSession> FrameSequence<R, S> {
    /// Frame rate recovered at startup.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Effective index stride (1 selects every frame).
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Index the next parsed record will get.
    pub fn position(&self) -> u64 {
        self.next_index
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Discard records until the running index reaches `index`. Targets at or
    /// behind the current position are ignored.
    pub fn skip_to(&mut self, index: u64) {
        if index > self.next_index {
            debug!(from = self.next_index, to = index, "skipping ahead");
            self.skip_target = Some(index);
        }
    }

    fn is_selected(&self, index: u64) -> bool {
        let skipping = self.skip_target.is_some_and(|target| index < target);
        !skipping && index % self.stride == 0
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        info!(
            emitted = self.emitted,
            parsed = self.next_index,
            "frame sequence finished"
        );
        if let Err(e) = self.session.shutdown() {
            warn!(%e, "failed to shut down decoder");
        }
    }

    /// End the sequence after the pixel stream closed.
    fn end_of_stream(&mut self) -> Option<Result<Frame>> {
        let timed_out = self.session.timed_out();
        self.finish();
        timed_out.map(|timeout| Err(ExtractError::ReadTimeout(timeout)))
    }

    fn fail(&mut self, e: ExtractError) -> Option<Result<Frame>> {
        let e = self.session.timed_out().map_or(e, ExtractError::ReadTimeout);
        self.finish();
        Some(Err(e))
    }
}

impl<R: BufRead, S: DecoderSession> Iterator for FrameSequence<R, S> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        self.session.begin_read();
        loop {
            let index = self.next_index;
            if self.skip_target.is_some_and(|target| index >= target) {
                self.skip_target = None;
            }

            if !self.is_selected(index) {
                match ppm::skip_frame(&mut self.pixels) {
                    Ok(true) => {
                        self.next_index += 1;
                        self.session.begin_read();
                        continue;
                    }
                    Ok(false) => return self.end_of_stream(),
                    Err(e) => return self.fail(e),
                }
            }

            match ppm::read_frame(&mut self.pixels) {
                Ok(Some(pixels)) => {
                    self.next_index += 1;
                    self.emitted += 1;
                    self.session.end_read();
                    let timestamp = index as f64 / self.fps;
                    debug!(index, timestamp, "decoded frame");
                    return Some(Ok(Frame {
                        index,
                        timestamp,
                        pixels,
                    }));
                }
                Ok(None) => return self.end_of_stream(),
                Err(e) => return self.fail(e),
            }
        }
    }
}

impl<R, S: DecoderSession> Drop for FrameSequence<R, S> {
    fn drop(&mut self) {
        self.finish();
    }
}
