use crate::error::{ExtractError, Result};

/// Which decoded frames a session hands to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SelectionPolicy {
    /// Every decoded frame.
    #[default]
    All,
    /// Frames whose index is a multiple of `n`.
    IndexStride(u64),
    /// One frame per `seconds`, resolved to an index stride once the frame
    /// rate is known.
    TimeStride(f64),
}

impl SelectionPolicy {
    /// Reject parameters that can never select a sensible set of frames.
    pub fn validate(&self) -> Result<()> {
        match *self {
            SelectionPolicy::All => Ok(()),
            SelectionPolicy::IndexStride(0) => Err(ExtractError::InvalidPolicy(
                "index stride must be at least 1".to_string(),
            )),
            SelectionPolicy::IndexStride(_) => Ok(()),
            SelectionPolicy::TimeStride(seconds) if seconds.is_finite() && seconds > 0.0 => Ok(()),
            SelectionPolicy::TimeStride(seconds) => Err(ExtractError::InvalidPolicy(format!(
                "time stride must be a positive number of seconds, got {seconds}"
            ))),
        }
    }

    /// Effective index stride at `fps`. `All` is a stride of 1.
    pub fn resolve(&self, fps: f64) -> Result<u64> {
        self.validate()?;
        Ok(match *self {
            SelectionPolicy::All => 1,
            SelectionPolicy::IndexStride(n) => n,
            SelectionPolicy::TimeStride(seconds) => ((fps * seconds).round() as u64).max(1),
        })
    }
}
