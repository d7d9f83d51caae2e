//! Entry points used by front-ends: turn user input into a running render.

use std::path::Path;

use log::info;

use crate::audio::load_audio_file;
use crate::error::Result;
use crate::export::JobArtifacts;
use crate::planner::{plan_segments, PlanMode, RenderPlan};
use crate::render::{RenderConfig, RenderJobHandle, Renderer};
use crate::segment::segment;
use crate::{LoopRequest, LoopSettings};

/// Validates the request, cuts and crossfades the segments, writes them to a
/// fresh job directory and works out the repeat count.
///
/// Nothing touches the disk if validation or planning fails.
pub fn validate_and_plan(request: &LoopRequest, config: &RenderConfig) -> Result<RenderPlan> {
    let segments = segment(request)?;

    let mode = if request.is_test {
        PlanMode::Test
    } else {
        PlanMode::Target { target_ms: request.target_duration_ms.max(0) as u64 }
    };
    let repeat = plan_segments(&segments, mode)?;

    let artifacts = JobArtifacts::export(&config.work_dir, &segments)?;
    Ok(RenderPlan::new(artifacts, repeat, request.output_path.clone()))
}

/// Decodes `source` and starts rendering the loop it describes.
pub fn create_loop<P: AsRef<Path>>(source: P, settings: &LoopSettings, renderer: &Renderer) -> Result<RenderJobHandle> {
    let source = source.as_ref();
    let track = load_audio_file(source)?;
    info!(
        "Loaded {}: {} Hz, {} channel(s), {} ms",
        source.display(),
        track.sample_rate(),
        track.channels(),
        track.duration_ms()
    );

    let request = LoopRequest::from_settings(track, settings);
    let plan = validate_and_plan(&request, renderer.config())?;
    renderer.start_render(plan)
}
