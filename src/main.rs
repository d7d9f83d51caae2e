use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::debug;

use echo_blend::render::{RenderConfig, RenderOutcome, Renderer};
use echo_blend::{pipeline, LoopSettings, TimeUnit};

#[derive(Parser)]
#[command(author, version, about = "Stitch a seamless, arbitrarily long loop out of an audio file", long_about = None)]
struct Cli {
    /// Audio file to loop
    input: PathBuf,
    /// Output file; `.mp3` is encoded, anything else is stream-copied
    #[arg(short, long)]
    output: PathBuf,
    /// Loop start
    #[arg(short, long, allow_negative_numbers = true)]
    start: i64,
    /// Loop end
    #[arg(short, long, allow_negative_numbers = true)]
    end: i64,
    /// Crossfade length at the loop seam
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    crossfade: i64,
    /// Unit of start, end and crossfade (`s` or `ms`)
    #[arg(short, long, default_value = "ms")]
    unit: TimeUnit,
    /// Approximate length of the result in hours
    #[arg(long, default_value_t = 10, allow_negative_numbers = true)]
    hours: i64,
    /// Render the loop only once to check the seam
    #[arg(long)]
    test: bool,
    /// Encoder executable
    #[arg(long, env = "ECHO_BLEND_FFMPEG", default_value = "ffmpeg")]
    ffmpeg: PathBuf,
    /// Directory for temporary files
    #[arg(long, env = "ECHO_BLEND_WORK_DIR")]
    work_dir: Option<PathBuf>,
    /// Fail instead of replacing an existing output file
    #[arg(long)]
    no_overwrite: bool,
    /// Lossy quality for mp3 output (0 best, 9 worst)
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..=9))]
    quality: u8,
}

fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();
    let cli = Cli::parse();

    let defaults = RenderConfig::default();
    let renderer = Renderer::new(RenderConfig {
        ffmpeg_path: cli.ffmpeg,
        work_dir: cli.work_dir.unwrap_or(defaults.work_dir),
        overwrite: !cli.no_overwrite,
        mp3_quality: cli.quality,
    });

    let settings = LoopSettings {
        start: cli.start,
        end: cli.end,
        crossfade: cli.crossfade,
        unit: cli.unit,
        total_duration_hours: cli.hours,
        output_path: cli.output.clone(),
        is_test: cli.test,
    };

    println!("Loading audio: {:?}", cli.input);
    let mut job = pipeline::create_loop(&cli.input, &settings, &renderer)
        .with_context(|| format!("An error occurred while creating the loop from {:?}", cli.input))?;

    let last_percent = Arc::new(AtomicI64::new(-1));
    job.subscribe_progress(move |fraction| {
        let percent = (fraction * 100.0) as i64;
        if last_percent.swap(percent, Ordering::Relaxed) != percent {
            eprint!("\r{}% completed", percent);
        }
    });
    job.subscribe_log(|line| debug!("ffmpeg: {}", line));

    let outcome = job.await_result();
    eprintln!();
    match outcome {
        RenderOutcome::Completed => {
            println!("Audio loop created successfully: {:?}", cli.output);
            Ok(ExitCode::SUCCESS)
        }
        RenderOutcome::Failed(detail) => {
            eprintln!("An error occurred while creating the loop:\n{}", detail);
            Ok(ExitCode::FAILURE)
        }
        RenderOutcome::Cancelled => {
            eprintln!("Render cancelled");
            Ok(ExitCode::FAILURE)
        }
    }
}
