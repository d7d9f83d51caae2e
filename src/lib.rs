pub mod audio;
pub mod crossfade;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod planner;
pub mod progress;
pub mod render;
pub mod segment;

use std::path::PathBuf;
use std::str::FromStr;

use audio::AudioTrack;

pub use error::{LoopError, Result, ValidationError};

pub const MS_PER_HOUR: i64 = 60 * 60 * 1000;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum TimeUnit {
    Seconds,
    #[default]
    Milliseconds,
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s" => Ok(TimeUnit::Seconds),
            "ms" => Ok(TimeUnit::Milliseconds),
            other => Err(format!("unknown time unit '{}', expected 's' or 'ms'", other)),
        }
    }
}

/// A user-entered time value. Kept signed so negative input reaches validation.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct TimeSpec {
    pub value: i64,
    pub unit: TimeUnit,
}

impl TimeSpec {
    pub fn new(value: i64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    pub fn to_ms(self) -> i64 {
        match self.unit {
            TimeUnit::Seconds => self.value.saturating_mul(1000),
            TimeUnit::Milliseconds => self.value,
        }
    }
}

/// Loop points and render target as entered by the user, before decoding.
#[derive(Clone, Debug)]
pub struct LoopSettings {
    pub start: i64,
    pub end: i64,
    pub crossfade: i64,
    pub unit: TimeUnit,
    pub total_duration_hours: i64,
    pub output_path: PathBuf,
    pub is_test: bool,
}

/// Everything needed to cut one loop out of a decoded track. All times in ms.
#[derive(Clone, Debug)]
pub struct LoopRequest {
    pub track: AudioTrack,
    pub start_ms: i64,
    pub end_ms: i64,
    pub crossfade_ms: i64,
    pub output_path: PathBuf,
    pub target_duration_ms: i64, // ignored in test mode
    pub is_test: bool,
}

impl LoopRequest {
    pub fn from_settings(track: AudioTrack, settings: &LoopSettings) -> Self {
        let ms = |value| TimeSpec::new(value, settings.unit).to_ms();
        Self {
            track,
            start_ms: ms(settings.start),
            end_ms: ms(settings.end),
            crossfade_ms: ms(settings.crossfade),
            output_path: settings.output_path.clone(),
            target_duration_ms: settings.total_duration_hours.saturating_mul(MS_PER_HOUR),
            is_test: settings.is_test,
        }
    }
}
