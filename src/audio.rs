use log::{debug, info};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;

use std::fs::File;
use std::io::{Cursor, ErrorKind};
use std::path::Path;

use crate::error::{LoopError, Result};

/// Decoded, immutable audio. Samples are interleaved `f32` in `[-1, 1)`.
///
/// Every operation returns a new track; nothing is mutated after
/// construction, so a track can be shared across threads while it is
/// being exported.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioTrack {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioTrack {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 || channels == 0 {
            return Err(LoopError::FormatMismatch(format!(
                "invalid format {} Hz / {} channels",
                sample_rate, channels
            )));
        }
        if samples.len() % channels as usize != 0 {
            return Err(LoopError::FormatMismatch(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }
        Ok(Self { samples, sample_rate, channels })
    }

    pub fn empty(sample_rate: u32, channels: u16) -> Self {
        Self { samples: Vec::new(), sample_rate, channels }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length in whole milliseconds (rounded down).
    pub fn duration_ms(&self) -> u64 {
        self.frames() as u64 * 1000 / self.sample_rate as u64
    }

    /// Number of frames covered by `ms` milliseconds at this track's rate.
    pub fn frames_for_ms(&self, ms: u64) -> usize {
        (ms as u128 * self.sample_rate as u128 / 1000) as usize
    }

    /// Audio between two millisecond offsets from the start of the track.
    pub fn slice(&self, from_ms: u64, to_ms: u64) -> Result<AudioTrack> {
        if from_ms > to_ms || to_ms > self.duration_ms() {
            return Err(self.range_error(from_ms, to_ms));
        }
        Ok(self.slice_frames(self.frames_for_ms(from_ms), self.frames_for_ms(to_ms)))
    }

    /// The first `ms` milliseconds.
    pub fn head(&self, ms: u64) -> Result<AudioTrack> {
        let n = self.frames_for_ms(ms);
        if n > self.frames() {
            return Err(self.range_error(0, ms));
        }
        Ok(self.slice_frames(0, n))
    }

    /// The last `ms` milliseconds. Always holds exactly as many frames as
    /// `head(ms)` of a track with the same rate.
    pub fn tail(&self, ms: u64) -> Result<AudioTrack> {
        let n = self.frames_for_ms(ms);
        if n > self.frames() {
            return Err(self.range_error(0, ms));
        }
        Ok(self.slice_frames(self.frames() - n, self.frames()))
    }

    /// Drops `head_ms` from the front and `tail_ms` from the back. Yields an
    /// empty track when the two overlap.
    pub fn trim(&self, head_ms: u64, tail_ms: u64) -> AudioTrack {
        let frames = self.frames();
        let start = self.frames_for_ms(head_ms).min(frames);
        let end = frames.saturating_sub(self.frames_for_ms(tail_ms)).max(start);
        self.slice_frames(start, end)
    }

    pub fn concat(&self, other: &AudioTrack) -> Result<AudioTrack> {
        self.check_format(other)?;
        let mut samples = Vec::with_capacity(self.samples.len() + other.samples.len());
        samples.extend_from_slice(&self.samples);
        samples.extend_from_slice(&other.samples);
        Ok(self.with_samples(samples))
    }

    /// Scales every sample by `10^(db/20)`. No clipping is applied.
    pub fn apply_gain(&self, db: f64) -> AudioTrack {
        let factor = db_to_amplitude(db) as f32;
        self.with_samples(self.samples.iter().map(|s| s * factor).collect())
    }

    /// Additive mix of two tracks of identical format and length.
    pub fn overlay(&self, other: &AudioTrack) -> Result<AudioTrack> {
        self.check_format(other)?;
        if self.frames() != other.frames() {
            return Err(LoopError::LengthMismatch {
                left: self.frames(),
                right: other.frames(),
            });
        }
        let mixed = self.samples.iter().zip(&other.samples).map(|(a, b)| a + b).collect();
        Ok(self.with_samples(mixed))
    }

    pub(crate) fn slice_frames(&self, start: usize, end: usize) -> AudioTrack {
        let ch = self.channels as usize;
        self.with_samples(self.samples[start * ch..end * ch].to_vec())
    }

    pub(crate) fn with_samples(&self, samples: Vec<f32>) -> AudioTrack {
        AudioTrack { samples, sample_rate: self.sample_rate, channels: self.channels }
    }

    pub(crate) fn check_format(&self, other: &AudioTrack) -> Result<()> {
        if self.sample_rate != other.sample_rate || self.channels != other.channels {
            return Err(LoopError::FormatMismatch(format!(
                "{} Hz/{} ch vs {} Hz/{} ch",
                self.sample_rate, self.channels, other.sample_rate, other.channels
            )));
        }
        Ok(())
    }

    fn range_error(&self, from_ms: u64, to_ms: u64) -> LoopError {
        LoopError::Range { from_ms, to_ms, len_ms: self.duration_ms() }
    }
}

pub fn db_to_amplitude(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

// Core loading function that takes a generic MediaSource
pub fn load_audio_from_source(source: Box<dyn MediaSource>, hint: &Hint) -> Result<AudioTrack> {
    let mss = MediaSourceStream::new(source, Default::default());

    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();

    let mut probed = symphonia::default::get_probe()
        .format(hint, mss, &fmt_opts, &meta_opts)
        .map_err(|e| LoopError::Decode(format!("unsupported format: {}", e)))?;

    if let Some(metadata) = probed.format.metadata().current() {
        for tag in metadata.tags() {
            match tag.std_key {
                Some(StandardTagKey::TrackTitle) => info!("Title: {}", tag.value),
                Some(StandardTagKey::Artist) => info!("Artist: {}", tag.value),
                _ => (),
            }
        }
    }

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| LoopError::Decode("no supported audio track".into()))?;

    let dec_opts: DecoderOptions = Default::default();
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &dec_opts)
        .map_err(|e| LoopError::Decode(format!("unsupported codec: {}", e)))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);
    let mut samples: Vec<f32> = Vec::new();
    let mut buffer: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(Error::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;

                let needed = decoded.capacity() * spec.channels.count();
                if buffer.as_ref().map_or(true, |b| b.capacity() < needed) {
                    buffer = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = buffer.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            // Corrupt packets are skipped, the rest of the stream is still usable.
            Err(Error::DecodeError(msg)) => debug!("Skipping undecodable packet: {}", msg),
            Err(e) => return Err(e.into()),
        }
    }

    AudioTrack::new(samples, sample_rate, channels)
        .map_err(|e| LoopError::Decode(e.to_string()))
}

pub fn load_audio_file<P: AsRef<Path>>(path: P) -> Result<AudioTrack> {
    let path = path.as_ref();
    let src = File::open(path)
        .map_err(|e| LoopError::Decode(format!("failed to open {}: {}", path.display(), e)))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    load_audio_from_source(Box::new(src), &hint)
}

pub fn load_audio_from_bytes(data: Vec<u8>, extension_hint: Option<&str>) -> Result<AudioTrack> {
    let src = Cursor::new(data);

    let mut hint = Hint::new();
    if let Some(ext) = extension_hint {
        hint.with_extension(ext);
    }

    load_audio_from_source(Box::new(src), &hint)
}
