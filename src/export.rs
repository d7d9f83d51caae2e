use std::fs::{self, File};
use std::io::{BufWriter, Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use uuid::Uuid;

use crate::audio::AudioTrack;
use crate::error::Result;
use crate::segment::Segments;

/// Temporary files of one render job, kept in a directory of their own so
/// concurrent jobs never share names.
#[derive(Debug, Clone)]
pub struct JobArtifacts {
    pub job_id: Uuid,
    pub dir: PathBuf,
    pub intro: PathBuf,
    pub loop_body: PathBuf,
    pub outro: PathBuf,
    pub manifest: PathBuf,
}

impl JobArtifacts {
    /// Creates `<work_dir>/echo-blend-<job id>/`.
    pub fn create(work_dir: &Path) -> Result<Self> {
        let job_id = Uuid::new_v4();
        let dir = work_dir.join(format!("echo-blend-{}", job_id));
        fs::create_dir_all(&dir)?;
        // The manifest must reference absolute paths
        let dir = fs::canonicalize(&dir)?;

        Ok(Self {
            job_id,
            intro: dir.join("intro.wav"),
            loop_body: dir.join("loop.wav"),
            outro: dir.join("outro.wav"),
            manifest: dir.join("concat_list.txt"),
            dir,
        })
    }

    /// Writes intro, loop and outro as lossless intermediates.
    pub fn export(work_dir: &Path, segments: &Segments) -> Result<Self> {
        let artifacts = Self::create(work_dir)?;
        let written = write_wav(&artifacts.intro, &segments.intro)
            .and_then(|_| write_wav(&artifacts.loop_body, &segments.loop_body))
            .and_then(|_| write_wav(&artifacts.outro, &segments.outro));
        if let Err(e) = written {
            artifacts.cleanup();
            return Err(e);
        }
        debug!("Exported intermediates to {}", artifacts.dir.display());
        Ok(artifacts)
    }

    /// Streams one concat line per entry to the manifest file.
    pub fn write_manifest<'a, I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let mut writer = BufWriter::new(File::create(&self.manifest)?);
        for entry in entries {
            writeln!(writer, "{}", manifest_line(entry))?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn files(&self) -> [&Path; 4] {
        [
            self.intro.as_path(),
            self.loop_body.as_path(),
            self.outro.as_path(),
            self.manifest.as_path(),
        ]
    }

    pub fn any_exist(&self) -> bool {
        self.files().iter().any(|f| f.exists())
    }

    /// Removes every file and the job directory. Safe to call repeatedly.
    pub fn cleanup(&self) {
        for file in self.files() {
            match fs::remove_file(file) {
                Ok(()) => debug!("Deleted temporary file: {}", file.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => (),
                Err(e) => warn!("Error deleting temporary file {}: {}", file.display(), e),
            }
        }
        match fs::remove_dir(&self.dir) {
            Ok(()) => (),
            Err(e) if e.kind() == ErrorKind::NotFound => (),
            Err(e) => warn!("Error deleting job directory {}: {}", self.dir.display(), e),
        }
    }
}

/// One concat-demuxer line. Single quotes are closed, escaped and reopened.
pub fn manifest_line(path: &Path) -> String {
    let escaped = path.to_string_lossy().replace('\'', r"'\''");
    format!("file '{}'", escaped)
}

fn encode_wav(track: &AudioTrack) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: track.channels(),
        sample_rate: track.sample_rate(),
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut buffer = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut buffer, spec)?;
    for &sample in track.samples() {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(buffer.into_inner())
}

pub fn write_wav<P: AsRef<Path>>(output_path: P, track: &AudioTrack) -> Result<()> {
    let wav_data = encode_wav(track)?;
    fs::write(output_path, wav_data)?;
    Ok(())
}
