use crate::audio::AudioTrack;
use crate::error::{LoopError, Result};

/// Gain floor so a full fade never reaches `log10(0)`.
pub const MIN_AMPLITUDE: f64 = 0.000001;

/// Fade-out and fade-in gains in dB for ramp position `t` in `[0, 1]`.
pub fn fade_gains_db(t: f64) -> (f64, f64) {
    let out = 20.0 * ((1.0 - MIN_AMPLITUDE) * (1.0 - t) + MIN_AMPLITUDE).log10();
    let into = 20.0 * ((1.0 - MIN_AMPLITUDE) * t + MIN_AMPLITUDE).log10();
    (out, into)
}

/// Blends `tail_of_a` into `head_of_b` over `duration_ms`.
///
/// The fade advances in 1 ms steps: all frames inside millisecond `i` get
/// the gains for `t = i / duration_ms`, then the two scaled pieces are
/// overlaid. Both inputs must carry at least `duration_ms` of audio.
pub fn crossfade(tail_of_a: &AudioTrack, head_of_b: &AudioTrack, duration_ms: u64) -> Result<AudioTrack> {
    tail_of_a.check_format(head_of_b)?;
    if duration_ms == 0 {
        return Ok(AudioTrack::empty(tail_of_a.sample_rate(), tail_of_a.channels()));
    }

    let total = tail_of_a.frames_for_ms(duration_ms);
    for input in [tail_of_a, head_of_b] {
        if input.frames() < total {
            return Err(LoopError::Range {
                from_ms: 0,
                to_ms: duration_ms,
                len_ms: input.duration_ms(),
            });
        }
    }

    let step = 1.0 / duration_ms as f64;
    let mut blended = Vec::with_capacity(total * tail_of_a.channels() as usize);
    for i in 0..duration_ms {
        let start = tail_of_a.frames_for_ms(i);
        let end = tail_of_a.frames_for_ms(i + 1);
        if start == end {
            continue;
        }

        let (gain_out, gain_in) = fade_gains_db(i as f64 * step);
        let outgoing = tail_of_a.slice_frames(start, end).apply_gain(gain_out);
        let incoming = head_of_b.slice_frames(start, end).apply_gain(gain_in);
        blended.extend_from_slice(outgoing.overlay(&incoming)?.samples());
    }

    Ok(tail_of_a.with_samples(blended))
}
