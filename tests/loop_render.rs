#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use echo_blend::render::{RenderConfig, RenderEvent, RenderOutcome, Renderer};
use echo_blend::{pipeline, LoopError, LoopSettings, TimeUnit, ValidationError};
use tempfile::{tempdir, TempDir};

/// Copies the manifest to the output path and records its arguments next to it.
const COPY_MANIFEST: &str = r#"
prev=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then manifest="$arg"; fi
  prev="$arg"
  out="$arg"
done
printf '%s\n' "$@" > "$out.args"
cp "$manifest" "$out"
echo "Input #0, concat, from '$manifest':" >&2
printf 'size=  1kB time=00:00:15.00 bitrate=1\r' >&2
printf 'size=  2kB time=00:00:30.00 bitrate=1\n' >&2
exit 0
"#;

const FAIL: &str = r#"
echo "Invalid data found when processing input" >&2
exit 1
"#;

const HANG: &str = r#"
echo "started" >&2
exec sleep 30
"#;

/// Goes quiet on stderr but keeps running.
const SILENT_HANG: &str = r#"
echo "started" >&2
exec 2>&-
exec sleep 30
"#;

struct Fixture {
    _root: TempDir,
    source: PathBuf,
    work_dir: PathBuf,
    out_dir: PathBuf,
    tools: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = tempdir().unwrap();
        let work_dir = root.path().join("work");
        let out_dir = root.path().join("out");
        let tools = root.path().join("tools");
        for dir in [&work_dir, &out_dir, &tools] {
            fs::create_dir(dir).unwrap();
        }
        let source = root.path().join("source.wav");
        write_source(&source, 20_000);
        Self { _root: root, source, work_dir, out_dir, tools }
    }

    fn renderer(&self, name: &str, script: &str) -> Renderer {
        let path = self.tools.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}", script)).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();

        Renderer::new(RenderConfig {
            ffmpeg_path: path,
            work_dir: self.work_dir.clone(),
            ..Default::default()
        })
    }

    fn settings(&self, output: &str, is_test: bool) -> LoopSettings {
        LoopSettings {
            start: 10,
            end: 15,
            crossfade: 1,
            unit: TimeUnit::Seconds,
            total_duration_hours: 1,
            output_path: self.out_dir.join(output),
            is_test,
        }
    }

    fn work_dir_entries(&self) -> usize {
        fs::read_dir(&self.work_dir).unwrap().count()
    }
}

fn write_source(path: &Path, duration_ms: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..duration_ms * 8 {
        let t = i as f32 / 8000.0;
        let sample = (t * 440.0 * std::f32::consts::TAU).sin() * 0.4;
        writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn manifest_lines(output: &Path) -> Vec<String> {
    fs::read_to_string(output).unwrap().lines().map(String::from).collect()
}

#[test]
fn preview_renders_each_segment_once() {
    let fx = Fixture::new();
    let renderer = fx.renderer("ffmpeg-ok", COPY_MANIFEST);
    let settings = fx.settings("preview.mp3", true);

    let mut job = pipeline::create_loop(&fx.source, &settings, &renderer).unwrap();
    assert_eq!(job.await_result(), RenderOutcome::Completed);

    let lines = manifest_lines(&settings.output_path);
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("intro.wav'"));
    assert!(lines[1].ends_with("loop.wav'"));
    assert!(lines[2].ends_with("outro.wav'"));

    let args = fs::read_to_string(fx.out_dir.join("preview.mp3.args")).unwrap();
    assert!(args.lines().any(|a| a == "-q:a"));
    assert!(args.lines().any(|a| a == "concat"));

    let events: Vec<RenderEvent> = job.events().try_iter().collect();
    let logs: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            RenderEvent::Log(line) => Some(line.as_str()),
            RenderEvent::Progress(_) => None,
        })
        .collect();
    let progress: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            RenderEvent::Progress(p) => Some(*p),
            RenderEvent::Log(_) => None,
        })
        .collect();
    assert_eq!(logs.len(), 3);
    assert!(logs[0].starts_with("Input #0, concat"));
    assert_eq!(progress, vec![0.5, 1.0, 1.0]);

    assert_eq!(fx.work_dir_entries(), 0);
    assert!(renderer.registry().is_empty());
}

#[test]
fn progress_listeners_see_completion() {
    let fx = Fixture::new();
    let renderer = fx.renderer("ffmpeg-ok", COPY_MANIFEST);

    let mut job = pipeline::create_loop(&fx.source, &fx.settings("p.wav", true), &renderer).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    job.subscribe_progress(move |p| sink.lock().unwrap().push(p));

    assert_eq!(job.await_result(), RenderOutcome::Completed);
    // Early updates may go out before the listener is attached, the final one never does
    assert_eq!(seen.lock().unwrap().last(), Some(&1.0));
}

#[test]
fn one_hour_target_repeats_loop() {
    let fx = Fixture::new();
    let renderer = fx.renderer("ffmpeg-ok", COPY_MANIFEST);
    let settings = fx.settings("long.wav", false);

    let mut job = pipeline::create_loop(&fx.source, &settings, &renderer).unwrap();
    assert_eq!(job.await_result(), RenderOutcome::Completed);

    // intro 14 s + loop 5 s + outro 11 s of overhead, 5 s per repetition
    let repeat_count = (3_600_000 - 30_000) / 5_000;
    let lines = manifest_lines(&settings.output_path);
    assert_eq!(lines.len(), repeat_count + 2);
    assert!(lines[1..=repeat_count].iter().all(|l| l.ends_with("loop.wav'")));

    let args = fs::read_to_string(fx.out_dir.join("long.wav.args")).unwrap();
    let args: Vec<&str> = args.lines().collect();
    assert!(args.windows(2).any(|w| w == ["-c", "copy"]));
    assert_eq!(fx.work_dir_entries(), 0);
}

#[test]
fn failed_render_keeps_artifacts() {
    let fx = Fixture::new();
    let renderer = fx.renderer("ffmpeg-fail", FAIL);

    let mut job = pipeline::create_loop(&fx.source, &fx.settings("x.mp3", true), &renderer).unwrap();
    match job.await_result() {
        RenderOutcome::Failed(detail) => assert!(detail.contains("Invalid data found")),
        other => panic!("expected failure, got {:?}", other),
    }

    let job_dir = fs::read_dir(&fx.work_dir).unwrap().next().unwrap().unwrap().path();
    for file in ["intro.wav", "loop.wav", "outro.wav", "concat_list.txt"] {
        assert!(job_dir.join(file).exists(), "{} was removed", file);
    }
    assert!(renderer.registry().is_empty());
}

#[test]
fn cancel_stops_process_and_cleans_up() {
    let fx = Fixture::new();
    let renderer = fx.renderer("ffmpeg-hang", HANG);

    let mut job = pipeline::create_loop(&fx.source, &fx.settings("x.wav", true), &renderer).unwrap();
    let first = job.events().recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(first, RenderEvent::Log("started".into()));
    assert!(renderer.registry().contains(&job.id()));

    assert!(job.cancel());
    assert_eq!(fx.work_dir_entries(), 0);
    assert_eq!(job.await_result(), RenderOutcome::Cancelled);
    assert!(!renderer.registry().contains(&job.id()));
    assert!(!job.cancel());
}

#[test]
fn cancel_kills_encoder_after_its_output_closes() {
    let fx = Fixture::new();
    let renderer = fx.renderer("ffmpeg-silent", SILENT_HANG);

    let mut job = pipeline::create_loop(&fx.source, &fx.settings("x.wav", true), &renderer).unwrap();
    let first = job.events().recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(first, RenderEvent::Log("started".into()));
    // let the reader see end of output so only the exit wait is pending
    std::thread::sleep(Duration::from_millis(300));

    let started = Instant::now();
    assert!(job.cancel());
    assert_eq!(job.await_result(), RenderOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10), "cancel took {:?}", started.elapsed());
    assert_eq!(fx.work_dir_entries(), 0);
    assert!(renderer.registry().is_empty());
}

#[test]
fn shutdown_cancels_every_job() {
    let fx = Fixture::new();
    let renderer = fx.renderer("ffmpeg-hang", HANG);

    let mut jobs: Vec<_> = ["a.wav", "b.wav", "c.wav"]
        .iter()
        .map(|out| pipeline::create_loop(&fx.source, &fx.settings(out, true), &renderer).unwrap())
        .collect();
    assert_eq!(renderer.registry().len(), 3);

    renderer.shutdown();
    assert_eq!(fx.work_dir_entries(), 0);
    for job in &mut jobs {
        assert_eq!(job.await_result(), RenderOutcome::Cancelled);
    }
    assert!(renderer.registry().is_empty());
}

#[test]
fn invalid_request_is_rejected_before_render() {
    let fx = Fixture::new();
    let renderer = fx.renderer("ffmpeg-ok", COPY_MANIFEST);
    let mut settings = fx.settings("x.wav", false);
    settings.start = 5;
    settings.end = 3;
    settings.crossfade = -1;

    let err = pipeline::create_loop(&fx.source, &settings, &renderer).err().unwrap();
    assert!(matches!(err, LoopError::Validation(ValidationError::StartAfterEnd)));
    assert_eq!(err.to_string(), "invalid loop request: start time cannot be greater than end time");
    assert_eq!(fx.work_dir_entries(), 0);
}

#[test]
fn undecodable_source_is_decode_error() {
    let fx = Fixture::new();
    let renderer = fx.renderer("ffmpeg-ok", COPY_MANIFEST);
    let bogus = fx.out_dir.join("notes.txt");
    fs::write(&bogus, "not audio").unwrap();

    let err = pipeline::create_loop(&bogus, &fx.settings("x.wav", true), &renderer).err().unwrap();
    assert!(matches!(err, LoopError::Decode(_)));
    assert_eq!(fx.work_dir_entries(), 0);
}
