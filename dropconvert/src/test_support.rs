//! Test-only helpers: scripted process results, an in-memory sink, and a
//! scratch workspace with an entrypoint script in place.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::bootstrap::BootstrapReport;
use crate::core::types::{
    DependencyStatus, EnvironmentState, Interpreter, ProbeSource, ProcessResult,
};
use crate::io::config::BridgeConfig;
use crate::io::process::{CancelToken, Invocation, ProcessInvoker};
use crate::sink::LogSink;

/// Sink that records every message in order.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|message| message.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn log(&self, message: &str) {
        if let Ok(mut guard) = self.messages.lock() {
            guard.push(message.to_string());
        }
    }
}

/// One canned process result, optionally delayed to simulate a slow child.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub result: ProcessResult,
    pub delay: Duration,
}

impl ScriptedRun {
    pub fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            result: ProcessResult {
                exit_code: Some(code),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                elapsed: Duration::from_millis(1),
                ..ProcessResult::default()
            },
            delay: Duration::ZERO,
        }
    }

    pub fn ok(stdout: &str) -> Self {
        Self::exit(0, stdout, "")
    }

    pub fn not_found() -> Self {
        Self {
            result: ProcessResult::not_started(
                "No such file or directory (os error 2)",
                Duration::ZERO,
            ),
            delay: Duration::ZERO,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            result: ProcessResult {
                timed_out: true,
                ..ProcessResult::default()
            },
            delay: Duration::ZERO,
        }
    }

    /// Started, then lost: the wait itself failed.
    pub fn wait_failed(error: &str) -> Self {
        Self {
            result: ProcessResult {
                wait_error: Some(error.to_string()),
                elapsed: Duration::from_millis(1),
                ..ProcessResult::default()
            },
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A call seen by [`ScriptedInvoker`].
///
/// `file_args` snapshots the contents of every argument that named an existing
/// regular file at call time, so tests can inspect exchange artifacts that are
/// deleted by the time the call returns.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub invocation: Invocation,
    pub file_args: Vec<(PathBuf, String)>,
}

/// Invoker that replays queued results in order without spawning anything.
///
/// Once the queue is exhausted every call reports "not started".
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    queue: Mutex<VecDeque<ScriptedRun>>,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedInvoker {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            queue: Mutex::new(runs.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    /// Program plus arguments of every call, space-joined.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|call| call.invocation.display_command())
            .collect()
    }

    /// Highest number of calls that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().map(|guard| guard.len()).unwrap_or_default()
    }
}

impl ProcessInvoker for ScriptedInvoker {
    fn run_cancellable(&self, invocation: &Invocation, cancel: &CancelToken) -> ProcessResult {
        let file_args = invocation
            .args
            .iter()
            .map(PathBuf::from)
            .filter(|path| path.is_file())
            .filter_map(|path| {
                let contents = fs::read_to_string(&path).ok()?;
                Some((path, contents))
            })
            .collect();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                invocation: invocation.clone(),
                file_args,
            });
        }

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let next = self.queue.lock().ok().and_then(|mut queue| queue.pop_front());
        let result = match next {
            Some(run) => {
                if wait_or_cancel(run.delay, cancel) {
                    run.result
                } else {
                    ProcessResult {
                        cancelled: true,
                        elapsed: run.delay,
                        ..ProcessResult::default()
                    }
                }
            }
            None => ProcessResult::not_started(
                format!("no scripted result for {}", invocation.display_command()),
                Duration::ZERO,
            ),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Sleep for `delay`; false if cancelled first.
fn wait_or_cancel(delay: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + delay;
    while Instant::now() < deadline {
        if cancel.is_cancelled() {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    !cancel.is_cancelled()
}

/// Scratch layout: `<root>/work` (entrypoint cwd, holds `scripts/convert_files.py`)
/// and `<root>/exchange` (exchange artifact parent).
pub struct TestWorkspace {
    temp: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let ws = Self { temp };
        fs::create_dir_all(ws.exchange_dir()).context("create exchange dir")?;
        ws.write_entrypoint("print('converted')\n")?;
        Ok(ws)
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn working_dir(&self) -> PathBuf {
        self.root().join("work")
    }

    pub fn exchange_dir(&self) -> PathBuf {
        self.root().join("exchange")
    }

    pub fn entrypoint(&self) -> PathBuf {
        self.working_dir().join("scripts").join("convert_files.py")
    }

    pub fn write_entrypoint(&self, contents: &str) -> Result<PathBuf> {
        let path = self.entrypoint();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create scripts dir")?;
        }
        fs::write(&path, contents).context("write entrypoint")?;
        Ok(path)
    }

    /// Create a file under `<root>/inputs`.
    pub fn input_file(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.root().join("inputs").join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create input parent")?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Create a directory under `<root>/inputs`.
    pub fn input_dir(&self, rel: &str) -> Result<PathBuf> {
        let path = self.root().join("inputs").join(rel);
        fs::create_dir_all(&path).with_context(|| format!("create {}", path.display()))?;
        Ok(path)
    }

    /// Number of entries currently in the exchange dir.
    pub fn exchange_entries(&self) -> Result<usize> {
        Ok(fs::read_dir(self.exchange_dir())
            .context("read exchange dir")?
            .count())
    }

    /// Config pointing at this workspace with the secondary tool disabled.
    pub fn config(&self) -> BridgeConfig {
        let mut cfg = BridgeConfig {
            working_dir: Some(self.working_dir()),
            exchange_dir: Some(self.exchange_dir()),
            ..BridgeConfig::default()
        };
        cfg.interpreter.candidates = vec!["python".to_string()];
        cfg.secondary.enabled = false;
        cfg
    }
}

/// Bootstrap report for a resolved interpreter with the primary package present.
pub fn ready_report(executable: impl Into<PathBuf>) -> BootstrapReport {
    BootstrapReport {
        environment: EnvironmentState::Resolved(Interpreter {
            executable: executable.into(),
            version: Some("Python 3.12.4".to_string()),
            source: ProbeSource::SearchPath,
        }),
        primary: DependencyStatus::Present,
        secondary: None,
    }
}

/// Bootstrap report for a host without any usable interpreter.
pub fn unavailable_report() -> BootstrapReport {
    BootstrapReport {
        environment: EnvironmentState::Unavailable,
        primary: DependencyStatus::Unknown,
        secondary: None,
    }
}
