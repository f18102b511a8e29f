//! Bounded child process execution.
//!
//! Every external program this crate runs (interpreter probes, package managers,
//! the conversion entrypoint) goes through a [`ProcessInvoker`]. Arguments are a
//! discrete vector handed straight to the OS, never a shell string, so file names
//! containing shell metacharacters reach the child verbatim.

use std::ffi::OsString;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::ProcessResult;

pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// How often a running child is checked for cancellation.
const POLL_SLICE: Duration = Duration::from_millis(50);

/// How long output readers may lag behind a killed child before they are abandoned.
///
/// A grandchild that inherited the pipes can keep them open after the child dies.
const READER_GRACE: Duration = Duration::from_millis(500);

/// One program launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub workdir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: None,
            env: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn envs<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Human-readable command line for log messages only. Never executed.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                parts.push(format!("\"{arg}\""));
            } else {
                parts.push(arg.into_owned());
            }
        }
        parts.join(" ")
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

/// Cooperative cancellation flag shared between a caller and a running invocation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs external programs. Implementations never panic and never return errors:
/// every failure is described by the returned [`ProcessResult`].
pub trait ProcessInvoker: Send + Sync {
    fn run_cancellable(&self, invocation: &Invocation, cancel: &CancelToken) -> ProcessResult;

    fn run(&self, invocation: &Invocation) -> ProcessResult {
        self.run_cancellable(invocation, &CancelToken::new())
    }
}

/// Invoker backed by `std::process`.
#[derive(Debug, Clone)]
pub struct SystemInvoker {
    output_limit_bytes: usize,
}

impl Default for SystemInvoker {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_LIMIT_BYTES)
    }
}

impl SystemInvoker {
    pub fn new(output_limit_bytes: usize) -> Self {
        Self { output_limit_bytes }
    }
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
    WaitFailed(std::io::Error),
}

/// Status fields of a [`ProcessResult`] for one wait outcome.
#[derive(Debug, PartialEq, Eq)]
struct Settled {
    exit_code: Option<i32>,
    timed_out: bool,
    cancelled: bool,
    wait_error: Option<String>,
}

impl Settled {
    fn from_outcome(outcome: &WaitOutcome) -> Self {
        let (exit_code, timed_out, cancelled, wait_error) = match outcome {
            WaitOutcome::Exited(status) => (Some(exit_code_of(status)), false, false, None),
            WaitOutcome::TimedOut => (None, true, false, None),
            WaitOutcome::Cancelled => (None, false, true, None),
            WaitOutcome::WaitFailed(err) => (None, false, false, Some(err.to_string())),
        };
        Self {
            exit_code,
            timed_out,
            cancelled,
            wait_error,
        }
    }
}

/// Bytes kept so far and bytes dropped past the limit.
type Captured = (Vec<u8>, usize);

/// Output of one stream, filled incrementally by a reader thread.
struct StreamReader {
    captured: Arc<Mutex<Captured>>,
    done: mpsc::Receiver<std::io::Result<()>>,
}

impl ProcessInvoker for SystemInvoker {
    #[instrument(
        skip_all,
        fields(
            program = %invocation.program.display(),
            timeout_ms = invocation.timeout.as_millis() as u64
        )
    )]
    fn run_cancellable(&self, invocation: &Invocation, cancel: &CancelToken) -> ProcessResult {
        let started = Instant::now();
        let deadline = started + invocation.timeout;

        debug!(command = %invocation.display_command(), "spawning child process");
        let mut child = match invocation.to_command().spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(err = %err, "failed to spawn command");
                return ProcessResult::not_started(err.to_string(), started.elapsed());
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            terminate(&mut child);
            return ProcessResult::not_started("output was not piped", started.elapsed());
        };
        let stdout_reader = spawn_reader(stdout, self.output_limit_bytes);
        let stderr_reader = spawn_reader(stderr, self.output_limit_bytes);

        let outcome = wait_until(&mut child, deadline, cancel);
        match &outcome {
            WaitOutcome::Exited(_) => {}
            WaitOutcome::TimedOut => {
                warn!(
                    timeout_ms = invocation.timeout.as_millis() as u64,
                    "command timed out, killing"
                );
                terminate(&mut child);
            }
            WaitOutcome::Cancelled => {
                warn!("command cancelled, killing");
                terminate(&mut child);
            }
            WaitOutcome::WaitFailed(err) => {
                warn!(err = %err, "wait for command failed, killing");
                terminate(&mut child);
            }
        }
        let settled = Settled::from_outcome(&outcome);

        // One deadline for both streams.
        let readers_until = reader_deadline(&outcome, deadline, Instant::now());
        let (stdout, stdout_truncated) = collect_output(&stdout_reader, readers_until, "stdout");
        let (stderr, stderr_truncated) = collect_output(&stderr_reader, readers_until, "stderr");

        if stdout_truncated > 0 || stderr_truncated > 0 {
            warn!(stdout_truncated, stderr_truncated, "output truncated");
        }

        let elapsed = started.elapsed();
        debug!(
            exit_code = ?settled.exit_code,
            timed_out = settled.timed_out,
            cancelled = settled.cancelled,
            elapsed_ms = elapsed.as_millis() as u64,
            "command finished"
        );
        ProcessResult {
            exit_code: settled.exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            elapsed,
            timed_out: settled.timed_out,
            cancelled: settled.cancelled,
            spawn_error: None,
            wait_error: settled.wait_error,
            stdout_truncated,
            stderr_truncated,
        }
    }
}

fn wait_until(child: &mut Child, deadline: Instant, cancel: &CancelToken) -> WaitOutcome {
    loop {
        if cancel.is_cancelled() {
            return WaitOutcome::Cancelled;
        }
        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        let slice = deadline.saturating_duration_since(now).min(POLL_SLICE);
        match child.wait_timeout(slice) {
            Ok(Some(status)) => return WaitOutcome::Exited(status),
            Ok(None) => {}
            Err(err) => return WaitOutcome::WaitFailed(err),
        }
    }
}

/// Latest instant the output readers may run to.
///
/// After a normal exit the readers stay within the call's own deadline, with one
/// poll slice of drain time if the child exited right at it. After a kill they
/// get [`READER_GRACE`].
fn reader_deadline(outcome: &WaitOutcome, deadline: Instant, now: Instant) -> Instant {
    match outcome {
        WaitOutcome::Exited(_) => (now + READER_GRACE).min(deadline.max(now + POLL_SLICE)),
        _ => now + READER_GRACE,
    }
}

/// Kill and reap. Only the direct child is signalled; descendants that
/// detached from it are outside our reach.
fn terminate(child: &mut Child) {
    if let Err(err) = child.kill() {
        warn!(err = %err, "failed to kill child process");
    }
    if let Err(err) = child.wait() {
        warn!(err = %err, "failed to reap child process");
    }
}

#[cfg(unix)]
fn exit_code_of(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> StreamReader {
    let captured = Arc::new(Mutex::new((Vec::new(), 0)));
    let sink = Arc::clone(&captured);
    let (tx, done) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(read_stream_limited(reader, limit, &sink));
    });
    StreamReader { captured, done }
}

/// Wait for the reader until `until`, then take whatever it has captured.
///
/// A reader still blocked (a descendant holding the pipe open) is abandoned, but
/// the bytes it already read are kept.
fn collect_output(reader: &StreamReader, until: Instant, stream: &str) -> Captured {
    match reader
        .done
        .recv_timeout(until.saturating_duration_since(Instant::now()))
    {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(stream, err = %err, "failed to read child output"),
        Err(_) => warn!(stream, "child output still open after exit, abandoning reader"),
    }
    let mut captured = reader
        .captured
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    std::mem::take(&mut *captured)
}

fn read_stream_limited<R: Read>(
    mut reader: R,
    limit: usize,
    captured: &Mutex<Captured>,
) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(());
        }
        let mut guard = captured.lock().unwrap_or_else(PoisonError::into_inner);
        let (buf, truncated) = &mut *guard;
        let remaining = limit.saturating_sub(buf.len());
        let keep = n.min(remaining);
        buf.extend_from_slice(&chunk[..keep]);
        *truncated += n - keep;
    }
}
