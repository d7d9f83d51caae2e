use log::debug;

use crate::audio::AudioTrack;
use crate::crossfade::crossfade;
use crate::error::{Result, ValidationError};
use crate::LoopRequest;

/// Audio cut from one request. `seam` is the blended join and opens both
/// `loop_body` and `outro`.
#[derive(Clone, Debug)]
pub struct Segments {
    pub intro: AudioTrack,
    pub seam: AudioTrack,
    pub loop_body: AudioTrack,
    pub outro: AudioTrack,
    /// `end - start`, the step used when repeating the loop.
    pub loop_ms: u64,
}

/// First violated constraint wins; checks run in a fixed order.
pub fn validate(request: &LoopRequest) -> std::result::Result<(), ValidationError> {
    let track_ms = request.track.duration_ms() as i64;
    let (start, end, fade) = (request.start_ms, request.end_ms, request.crossfade_ms);

    if start > end {
        return Err(ValidationError::StartAfterEnd);
    }
    if end > track_ms {
        return Err(ValidationError::EndBeyondTrack);
    }
    if start < 0 {
        return Err(ValidationError::NegativeStart);
    }
    if fade < 0 {
        return Err(ValidationError::NegativeCrossfade);
    }
    if !request.is_test && request.target_duration_ms < 0 {
        return Err(ValidationError::NegativeTarget);
    }
    if fade > start {
        return Err(ValidationError::CrossfadeExceedsStart);
    }
    if fade > end - start {
        return Err(ValidationError::CrossfadeExceedsLoop);
    }
    Ok(())
}

pub fn segment(request: &LoopRequest) -> Result<Segments> {
    validate(request)?;

    let track = &request.track;
    let start = request.start_ms as u64;
    let end = request.end_ms as u64;
    let fade = request.crossfade_ms as u64;

    let initial = track.slice(0, end)?;
    let loop_region = track.slice(start - fade, end)?;
    let seam = crossfade(&initial.tail(fade)?, &loop_region.head(fade)?, fade)?;

    let intro = initial.trim(0, fade);
    let loop_body = seam.concat(&loop_region.trim(fade, fade))?;
    // Continue from the frame right after the seam, not a fresh rounding of `start`
    let rest = track.slice_frames(track.frames_for_ms(end), track.frames());
    let outro = seam.concat(&loop_region.trim(fade, 0))?.concat(&rest)?;

    debug!(
        "Segmented: intro {} ms, seam {} ms, loop {} ms, outro {} ms",
        intro.duration_ms(),
        seam.duration_ms(),
        loop_body.duration_ms(),
        outro.duration_ms()
    );

    Ok(Segments { intro, seam, loop_body, outro, loop_ms: end - start })
}
