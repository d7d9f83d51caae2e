use std::iter;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{Result, ValidationError};
use crate::export::JobArtifacts;
use crate::segment::Segments;

/// Upper bound on loop repetitions in one render. Every repetition is a
/// manifest line, and the encoder opens the loop file once per line.
pub const MAX_REPEATS: u64 = 1_000_000;

/// Container of the finished file, picked from the output extension.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OutputFormat {
    /// Quality-targeted lossy encode.
    Mp3,
    /// Lossless stream copy of the intermediates.
    Wav,
}

impl OutputFormat {
    /// `.mp3` selects the lossy path; anything else falls back to stream copy.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("mp3") => OutputFormat::Mp3,
            _ => OutputFormat::Wav,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PlanMode {
    /// Render intro, loop and outro once to audition the seam.
    Test,
    /// Repeat the loop until the output approaches `target_ms`.
    Target { target_ms: u64 },
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct RepeatPlan {
    pub repeat_count: u64,
    pub expected_total_ms: u64,
}

/// Works out how many times the loop body has to be played.
///
/// Intro, one loop body and outro form the fixed overhead; whatever the
/// target leaves after that is filled in `loop_ms` steps.
pub fn plan_repeats(intro_ms: u64, loop_body_ms: u64, outro_ms: u64, loop_ms: u64, mode: PlanMode) -> RepeatPlan {
    let overhead = intro_ms + loop_body_ms + outro_ms;
    let repeat_count = match mode {
        PlanMode::Test => 1,
        PlanMode::Target { .. } if loop_ms == 0 => {
            warn!("Loop region is empty, rendering intro and outro only");
            0
        }
        PlanMode::Target { target_ms } => target_ms.saturating_sub(overhead) / loop_ms,
    };

    RepeatPlan {
        repeat_count,
        expected_total_ms: repeat_count
            .saturating_mul(loop_body_ms)
            .saturating_add(intro_ms)
            .saturating_add(outro_ms),
    }
}

/// Plans the repeats for cut segments and refuses counts above
/// [`MAX_REPEATS`].
pub fn plan_segments(segments: &Segments, mode: PlanMode) -> Result<RepeatPlan> {
    let plan = plan_repeats(
        segments.intro.duration_ms(),
        segments.loop_body.duration_ms(),
        segments.outro.duration_ms(),
        segments.loop_ms,
        mode,
    );
    if plan.repeat_count > MAX_REPEATS {
        return Err(ValidationError::TooManyRepeats { count: plan.repeat_count, limit: MAX_REPEATS }.into());
    }
    Ok(plan)
}

/// A fully prepared render: exported intermediates plus how to stitch them.
#[derive(Debug)]
pub struct RenderPlan {
    pub artifacts: JobArtifacts,
    pub repeat_count: u64,
    pub expected_total_ms: u64,
    pub format: OutputFormat,
    pub output_path: PathBuf,
}

impl RenderPlan {
    pub fn new(artifacts: JobArtifacts, repeat: RepeatPlan, output_path: PathBuf) -> Self {
        let format = OutputFormat::from_path(&output_path);
        info!(
            "Planned {} loop repetition(s), about {:.1} min, as {:?}",
            repeat.repeat_count,
            repeat.expected_total_ms as f64 / 60_000.0,
            format
        );

        Self {
            artifacts,
            repeat_count: repeat.repeat_count,
            expected_total_ms: repeat.expected_total_ms,
            format,
            output_path,
        }
    }

    /// Files in playback order: intro, the loop `repeat_count` times, outro.
    pub fn manifest_entries(&self) -> impl Iterator<Item = &Path> + '_ {
        iter::once(self.artifacts.intro.as_path())
            .chain(iter::repeat(self.artifacts.loop_body.as_path()).take(self.repeat_count as usize))
            .chain(iter::once(self.artifacts.outro.as_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_mode_plays_once() {
        let plan = plan_repeats(14_000, 5_000, 11_000, 5_000, PlanMode::Test);
        assert_eq!(plan.repeat_count, 1);
        assert_eq!(plan.expected_total_ms, 30_000);
    }

    #[test]
    fn test_one_hour_target() {
        let plan = plan_repeats(14_000, 5_000, 11_000, 5_000, PlanMode::Target { target_ms: 3_600_000 });
        assert_eq!(plan.repeat_count, (3_600_000 - 30_000) / 5_000);
        assert_eq!(plan.expected_total_ms, 14_000 + 714 * 5_000 + 11_000);
    }

    #[test]
    fn test_short_target_clamps_to_zero() {
        let plan = plan_repeats(14_000, 5_000, 11_000, 5_000, PlanMode::Target { target_ms: 20_000 });
        assert_eq!(plan.repeat_count, 0);
        assert_eq!(plan.expected_total_ms, 25_000);

        let plan = plan_repeats(14_000, 5_000, 11_000, 5_000, PlanMode::Target { target_ms: 0 });
        assert_eq!(plan.repeat_count, 0);
    }

    #[test]
    fn test_empty_loop_does_not_divide_by_zero() {
        let plan = plan_repeats(1_000, 0, 1_000, 0, PlanMode::Target { target_ms: 3_600_000 });
        assert_eq!(plan.repeat_count, 0);
        assert_eq!(plan.expected_total_ms, 2_000);
    }

    #[test]
    fn test_huge_target_does_not_overflow_total() {
        let plan = plan_repeats(1_000, 2, 1_000, 1, PlanMode::Target { target_ms: u64::MAX });
        assert_eq!(plan.repeat_count, u64::MAX - 2_002);
        assert_eq!(plan.expected_total_ms, u64::MAX);
    }

    #[test]
    fn test_manifest_entries_are_lazy() {
        let dir = tempfile::tempdir().unwrap();
        let plan = RenderPlan {
            artifacts: JobArtifacts::create(dir.path()).unwrap(),
            repeat_count: u64::MAX / 2,
            expected_total_ms: 0,
            format: OutputFormat::Wav,
            output_path: PathBuf::from("out.wav"),
        };
        let mut entries = plan.manifest_entries();
        assert_eq!(entries.next(), Some(plan.artifacts.intro.as_path()));
        assert!(entries.take(3).all(|e| e == plan.artifacts.loop_body.as_path()));
    }

    #[test]
    fn test_output_format_from_extension() {
        assert_eq!(OutputFormat::from_path(Path::new("a/b.mp3")), OutputFormat::Mp3);
        assert_eq!(OutputFormat::from_path(Path::new("LOUD.MP3")), OutputFormat::Mp3);
        assert_eq!(OutputFormat::from_path(Path::new("a/b.wav")), OutputFormat::Wav);
        assert_eq!(OutputFormat::from_path(Path::new("a/b.flac")), OutputFormat::Wav);
        assert_eq!(OutputFormat::from_path(Path::new("noext")), OutputFormat::Wav);
    }
}
