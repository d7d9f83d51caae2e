use std::collections::{HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{LoopError, Result};
use crate::export::JobArtifacts;
use crate::planner::{OutputFormat, RenderPlan};
use crate::progress::ProgressReporter;

/// Diagnostic lines kept per job to explain a failed render.
const DIAGNOSTIC_TAIL_LINES: usize = 50;

/// How often a finished encoder is checked for, once its output has closed.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Clone, Debug)]
pub struct RenderConfig {
    /// Encoder executable, looked up on `PATH` when not absolute.
    pub ffmpeg_path: PathBuf,
    /// Parent directory for per-job temporary files.
    pub work_dir: PathBuf,
    /// Replace an existing output file instead of failing.
    pub overwrite: bool,
    /// `-q:a` value for lossy output, lower is better.
    pub mp3_quality: u8,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            work_dir: env::temp_dir(),
            overwrite: true,
            mp3_quality: 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    Completed,
    /// Non-zero exit; carries the encoder's own diagnostics.
    Failed(String),
    Cancelled,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RenderEvent {
    Log(String),
    Progress(f64),
}

type ProgressListener = Box<dyn Fn(f64) + Send>;
type LogListener = Box<dyn Fn(&str) + Send>;

#[derive(Default)]
struct Listeners {
    progress: Vec<ProgressListener>,
    log: Vec<LogListener>,
}

impl Listeners {
    fn emit(&self, events: &Sender<RenderEvent>, event: RenderEvent) {
        match &event {
            RenderEvent::Log(line) => self.log.iter().for_each(|f| f(line.as_str())),
            RenderEvent::Progress(p) => self.progress.iter().for_each(|f| f(*p)),
        }
        // Nobody has to drain the channel; a dropped handle just discards events
        events.send(event).ok();
    }
}

#[derive(Clone)]
struct JobEntry {
    child: Arc<Mutex<Child>>,
    cancelled: Arc<AtomicBool>,
    artifacts: JobArtifacts,
}

/// Live encoder processes, keyed by job id. Entries are added on spawn and
/// removed once the job reaches a terminal state.
#[derive(Clone, Default)]
pub struct ProcessRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, JobEntry>>>,
}

impl ProcessRegistry {
    fn insert(&self, id: Uuid, entry: JobEntry) {
        lock(&self.jobs).insert(id, entry);
    }

    fn remove(&self, id: &Uuid) {
        lock(&self.jobs).remove(id);
    }

    fn get(&self, id: &Uuid) -> Option<JobEntry> {
        lock(&self.jobs).get(id).cloned()
    }

    fn snapshot(&self) -> Vec<(Uuid, JobEntry)> {
        lock(&self.jobs).iter().map(|(id, e)| (*id, e.clone())).collect()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        lock(&self.jobs).contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives the external concatenation process for any number of jobs.
#[derive(Clone, Default)]
pub struct Renderer {
    config: Arc<RenderConfig>,
    registry: ProcessRegistry,
}

impl Renderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config: Arc::new(config), registry: ProcessRegistry::default() }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Encoder arguments for `plan`, without the program name.
    pub fn command_args(&self, plan: &RenderPlan) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-nostdin".into()];
        if self.config.overwrite {
            args.push("-y".into());
        }
        args.extend(["-f", "concat", "-safe", "0", "-i"].map(OsString::from));
        args.push(plan.artifacts.manifest.clone().into_os_string());
        match plan.format {
            OutputFormat::Mp3 => {
                args.push("-q:a".into());
                args.push(self.config.mp3_quality.to_string().into());
            }
            OutputFormat::Wav => args.extend(["-c", "copy"].map(OsString::from)),
        }
        args.push(plan.output_path.clone().into_os_string());
        args
    }

    /// Writes the manifest, launches the encoder and starts tracking it.
    ///
    /// Returns immediately; the process output is consumed on a separate
    /// thread. If the encoder cannot be launched the intermediates are left
    /// on disk.
    pub fn start_render(&self, plan: RenderPlan) -> Result<RenderJobHandle> {
        let id = plan.artifacts.job_id;
        plan.artifacts.write_manifest(plan.manifest_entries())?;

        let program = self.config.ffmpeg_path.display().to_string();
        let args = self.command_args(&plan);
        debug!("Running {} {:?}", program, args);

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| LoopError::ProcessSpawn { program: program.clone(), source })?;

        let stderr = match child.stderr.take() {
            Some(stderr) => stderr,
            None => {
                child.kill().ok();
                child.wait().ok();
                return Err(io::Error::other("encoder stderr was not captured").into());
            }
        };

        let entry = JobEntry {
            child: Arc::new(Mutex::new(child)),
            cancelled: Arc::new(AtomicBool::new(false)),
            artifacts: plan.artifacts.clone(),
        };
        self.registry.insert(id, entry.clone());
        info!(
            "Render job {} started: {} file(s) -> {}",
            id,
            plan.repeat_count + 2,
            plan.output_path.display()
        );

        let listeners = Arc::new(Mutex::new(Listeners::default()));
        let (event_tx, event_rx) = unbounded();
        let (result_tx, result_rx) = bounded(1);

        let reporter = ProgressReporter::new(plan.expected_total_ms);
        let reader = spawn_reader(stderr, reporter, listeners.clone(), event_tx.clone());

        let registry = self.registry.clone();
        let supervisor_listeners = listeners.clone();
        thread::spawn(move || {
            let diagnostics = reader.join().unwrap_or_default();
            let status = wait_for_exit(&entry.child);

            let outcome = if entry.cancelled.load(Ordering::SeqCst) {
                entry.artifacts.cleanup();
                warn!("Render job {} cancelled", id);
                RenderOutcome::Cancelled
            } else {
                match status {
                    Ok(status) if status.success() => {
                        entry.artifacts.cleanup();
                        lock(&supervisor_listeners).emit(&event_tx, RenderEvent::Progress(1.0));
                        info!("Render job {} completed", id);
                        RenderOutcome::Completed
                    }
                    Ok(status) => {
                        let detail = failure_detail(&program, status, diagnostics);
                        error!("Render job {} failed: {}", id, detail);
                        RenderOutcome::Failed(detail)
                    }
                    Err(e) => {
                        error!("Render job {} could not be reaped: {}", id, e);
                        RenderOutcome::Failed(format!("failed to wait for {}: {}", program, e))
                    }
                }
            };

            registry.remove(&id);
            result_tx.send(outcome).ok();
        });

        Ok(RenderJobHandle {
            id,
            renderer: self.clone(),
            listeners,
            events: event_rx,
            result: result_rx,
            outcome: None,
        })
    }

    /// Stops one job: kill, wait for exit, remove its temporary files.
    /// Returns `false` if the job is no longer running.
    ///
    /// The encoder is killed outright, so whatever it had written to the
    /// output path is left truncated.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.registry.get(&id) {
            Some(entry) => {
                terminate(id, &entry);
                true
            }
            None => false,
        }
    }

    /// Cancels every live job and returns once all of them have exited and
    /// their files are gone.
    pub fn shutdown(&self) {
        let jobs = self.registry.snapshot();
        if !jobs.is_empty() {
            info!("Stopping {} render job(s)", jobs.len());
        }
        for (id, entry) in jobs {
            terminate(id, &entry);
        }
    }
}

fn terminate(id: Uuid, entry: &JobEntry) {
    entry.cancelled.store(true, Ordering::SeqCst);
    if let Err(e) = lock(&entry.child).kill() {
        debug!("Job {} already exited: {}", id, e);
    }
    if let Err(e) = wait_for_exit(&entry.child) {
        warn!("Failed to wait for job {}: {}", id, e);
    }
    entry.artifacts.cleanup();
}

/// Reaps the child without holding its lock across a blocking wait, so
/// `terminate` can always get in to kill it.
fn wait_for_exit(child: &Mutex<Child>) -> io::Result<ExitStatus> {
    loop {
        if let Some(status) = lock(child).try_wait()? {
            return Ok(status);
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

fn spawn_reader(
    stderr: ChildStderr,
    reporter: ProgressReporter,
    listeners: Arc<Mutex<Listeners>>,
    events: Sender<RenderEvent>,
) -> JoinHandle<Vec<String>> {
    thread::spawn(move || {
        let mut tail = VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES);
        let read = for_each_line(stderr, |line| {
            if tail.len() == DIAGNOSTIC_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.to_string());

            let listeners = lock(&listeners);
            listeners.emit(&events, RenderEvent::Log(line.to_string()));
            if let Some(fraction) = reporter.observe(line) {
                listeners.emit(&events, RenderEvent::Progress(fraction));
            }
        });
        if let Err(e) = read {
            warn!("Lost encoder output: {}", e);
        }
        tail.into()
    })
}

/// Calls `f` for every non-empty line, splitting on both `\n` and `\r`
/// since the encoder redraws its status line in place.
fn for_each_line<R: Read>(reader: R, mut f: impl FnMut(&str)) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        let buf = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if buf.is_empty() {
            break;
        }
        let len = buf.len();
        for &byte in buf {
            if byte == b'\n' || byte == b'\r' {
                if !line.is_empty() {
                    f(&String::from_utf8_lossy(&line));
                    line.clear();
                }
            } else {
                line.push(byte);
            }
        }
        reader.consume(len);
    }
    if !line.is_empty() {
        f(&String::from_utf8_lossy(&line));
    }
    Ok(())
}

fn failure_detail(program: &str, status: ExitStatus, diagnostics: Vec<String>) -> String {
    if diagnostics.is_empty() {
        format!("{} exited with {}", program, status)
    } else {
        diagnostics.join("\n")
    }
}

/// Caller-side view of a running render.
pub struct RenderJobHandle {
    id: Uuid,
    renderer: Renderer,
    listeners: Arc<Mutex<Listeners>>,
    events: Receiver<RenderEvent>,
    result: Receiver<RenderOutcome>,
    outcome: Option<RenderOutcome>,
}

impl RenderJobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Called from the reader thread for every progress update. Listeners
    /// must not subscribe from inside the callback.
    pub fn subscribe_progress<F>(&self, callback: F)
    where
        F: Fn(f64) + Send + 'static,
    {
        lock(&self.listeners).progress.push(Box::new(callback));
    }

    /// Called from the reader thread for every encoder output line.
    pub fn subscribe_log<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + 'static,
    {
        lock(&self.listeners).log.push(Box::new(callback));
    }

    /// Every event since the job started, for consumers that poll.
    pub fn events(&self) -> &Receiver<RenderEvent> {
        &self.events
    }

    pub fn cancel(&self) -> bool {
        self.renderer.cancel(self.id)
    }

    pub fn is_finished(&mut self) -> bool {
        self.try_result().is_some()
    }

    pub fn try_result(&mut self) -> Option<RenderOutcome> {
        if self.outcome.is_none() {
            self.outcome = self.result.try_recv().ok();
        }
        self.outcome.clone()
    }

    /// Blocks until the job reaches a terminal state.
    pub fn await_result(&mut self) -> RenderOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let outcome = self.result.recv().unwrap_or_else(|_| {
            RenderOutcome::Failed("render supervisor stopped unexpectedly".to_string())
        });
        self.outcome = Some(outcome.clone());
        outcome
    }
}
