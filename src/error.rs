use std::io;
use thiserror::Error;

/// A loop request that violates one of the user-correctable constraints.
///
/// Variants are listed in the order they are checked, so the first
/// violated constraint is always the one reported.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("start time cannot be greater than end time")]
    StartAfterEnd,

    #[error("end time cannot be greater than the audio length")]
    EndBeyondTrack,

    #[error("start time cannot be negative")]
    NegativeStart,

    #[error("crossfade duration cannot be negative")]
    NegativeCrossfade,

    #[error("total duration cannot be negative")]
    NegativeTarget,

    #[error("crossfade duration cannot be greater than start time")]
    CrossfadeExceedsStart,

    #[error("crossfade duration cannot be greater than the loop duration")]
    CrossfadeExceedsLoop,

    /// Raised after segmentation, once the repeat count is known.
    #[error("loop would repeat {count} times, more than the {limit} supported")]
    TooManyRepeats { count: u64, limit: u64 },
}

#[derive(Error, Debug)]
pub enum LoopError {
    #[error("invalid loop request: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to decode audio: {0}")]
    Decode(String),

    #[error("range {from_ms}..{to_ms} ms is outside a {len_ms} ms track")]
    Range { from_ms: u64, to_ms: u64, len_ms: u64 },

    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    #[error("overlay needs equal lengths, got {left} and {right} frames")]
    LengthMismatch { left: usize, right: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to write intermediate audio: {0}")]
    Encode(String),

    #[error("failed to launch {program}: {source}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, LoopError>;

impl From<hound::Error> for LoopError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => LoopError::Io(io),
            other => LoopError::Encode(other.to_string()),
        }
    }
}

impl From<symphonia::core::errors::Error> for LoopError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        LoopError::Decode(e.to_string())
    }
}
