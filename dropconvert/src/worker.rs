//! Background conversion queue.
//!
//! A single named thread owns the orchestrator. It runs the full bootstrap
//! before taking any request, then serves requests strictly in submission
//! order, one at a time. Callers never block on the thread except when they
//! choose to wait for a reply.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::bootstrap::{BootstrapMode, BootstrapReport, bootstrap};
use crate::intake::classify;
use crate::io::config::BridgeConfig;
use crate::io::process::{CancelToken, ProcessInvoker};
use crate::orchestrator::{ConversionOrchestrator, ConversionOutcome, ConversionSettings};
use crate::sink::SharedSink;

const THREAD_NAME: &str = "dropconvert-worker";

struct Request {
    paths: Vec<String>,
    cancel: CancelToken,
    reply: Sender<ConversionOutcome>,
}

/// Handle for one submitted conversion.
pub struct PendingConversion {
    reply: Receiver<ConversionOutcome>,
    cancel: CancelToken,
}

impl PendingConversion {
    /// Block until the worker has finished this request.
    pub fn wait(self) -> Result<ConversionOutcome> {
        self.reply
            .recv()
            .map_err(|_| anyhow!("conversion worker stopped before replying"))
    }

    /// Ask the worker to stop this request. A queued request is still
    /// dequeued but its entrypoint is killed as soon as it starts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

pub struct ConversionWorker {
    requests: Option<Sender<Request>>,
    ready: Mutex<Receiver<BootstrapReport>>,
    report: OnceLock<Option<BootstrapReport>>,
    handle: Option<JoinHandle<()>>,
}

impl ConversionWorker {
    /// Start the worker thread. Bootstrap begins immediately in the background.
    pub fn spawn(
        config: BridgeConfig,
        invoker: Arc<dyn ProcessInvoker>,
        sink: SharedSink,
    ) -> Result<Self> {
        let settings = ConversionSettings::from_config(&config)?;
        let (ready_tx, ready_rx) = mpsc::channel();
        let (request_tx, request_rx) = mpsc::channel::<Request>();

        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let report = bootstrap(
                    &config,
                    invoker.as_ref(),
                    sink.as_ref(),
                    BootstrapMode::Ensure,
                );
                let orchestrator =
                    ConversionOrchestrator::new(settings, report.clone(), invoker, sink.clone());
                if ready_tx.send(report).is_err() {
                    debug!("worker handle dropped before bootstrap finished");
                }
                serve(&orchestrator, &sink, request_rx);
            })
            .context("spawn conversion worker thread")?;

        Ok(Self {
            requests: Some(request_tx),
            ready: Mutex::new(ready_rx),
            report: OnceLock::new(),
            handle: Some(handle),
        })
    }

    /// Block until bootstrap has finished and return its report.
    ///
    /// `None` if the worker thread died during bootstrap.
    pub fn wait_ready(&self) -> Option<BootstrapReport> {
        self.report
            .get_or_init(|| {
                let ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
                ready.recv().ok()
            })
            .clone()
    }

    /// Queue `paths` for conversion. Returns immediately.
    pub fn submit<S: AsRef<str>>(&self, paths: &[S]) -> Result<PendingConversion> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| anyhow!("conversion worker is shut down"))?;
        let (reply_tx, reply_rx) = mpsc::channel();
        let cancel = CancelToken::new();
        requests
            .send(Request {
                paths: paths.iter().map(|p| p.as_ref().to_string()).collect(),
                cancel: cancel.clone(),
                reply: reply_tx,
            })
            .map_err(|_| anyhow!("conversion worker has stopped"))?;
        Ok(PendingConversion {
            reply: reply_rx,
            cancel,
        })
    }

    /// Submit and wait.
    pub fn convert<S: AsRef<str>>(&self, paths: &[S]) -> Result<ConversionOutcome> {
        self.submit(paths)?.wait()
    }

    /// Stop accepting requests, let queued ones finish, and join the thread.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("conversion worker thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for ConversionWorker {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(err = %err, "conversion worker did not stop cleanly");
        }
    }
}

fn serve(orchestrator: &ConversionOrchestrator, sink: &SharedSink, requests: Receiver<Request>) {
    for request in requests {
        debug!(paths = request.paths.len(), "conversion request received");
        let batch = classify(&request.paths, sink.as_ref());
        let outcome = orchestrator.convert_with_cancel(&batch, &request.cancel);
        if request.reply.send(outcome).is_err() {
            debug!("requester went away before the reply");
        }
    }
    info!("conversion worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DependencyStatus;
    use crate::error::AbortReason;
    use crate::test_support::{MemorySink, ScriptedInvoker, ScriptedRun, TestWorkspace};

    #[test]
    fn bootstrap_runs_before_first_request() {
        let ws = TestWorkspace::new().expect("workspace");
        let input = ws.input_file("a.docx", "x").expect("input");
        let invoker = Arc::new(ScriptedInvoker::new(vec![
            ScriptedRun::ok("Python 3.12.4"),
            ScriptedRun::ok(""),
            ScriptedRun::ok("converted"),
        ]));
        let sink = Arc::new(MemorySink::new());
        let worker =
            ConversionWorker::spawn(ws.config(), invoker.clone(), sink.clone()).expect("spawn");

        let outcome = worker.convert(&[input.to_string_lossy()]).expect("outcome");

        assert!(outcome.is_success());
        let lines = invoker.command_lines();
        assert_eq!(lines[0], "python --version");
        assert_eq!(lines[1], "python -c \"import markitdown\"");
        assert!(lines[2].contains("convert_files.py"));
        let report = worker.wait_ready().expect("report");
        assert_eq!(report.primary, DependencyStatus::Present);
        worker.shutdown().expect("shutdown");
    }

    #[test]
    fn unavailable_environment_rejects_every_request() {
        let ws = TestWorkspace::new().expect("workspace");
        let input = ws.input_file("a.docx", "x").expect("input");
        let invoker = Arc::new(ScriptedInvoker::new(vec![]));
        let sink = Arc::new(MemorySink::new());
        let worker =
            ConversionWorker::spawn(ws.config(), invoker.clone(), sink).expect("spawn");

        let report = worker.wait_ready().expect("report");
        assert!(!report.is_ready());
        let launched = invoker.call_count();

        let outcome = worker.convert(&[input.to_string_lossy()]).expect("outcome");

        assert_eq!(
            outcome,
            ConversionOutcome::Aborted(AbortReason::EnvironmentUnavailable)
        );
        assert_eq!(invoker.call_count(), launched);
        assert_eq!(ws.exchange_entries().expect("entries"), 0);
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let ws = TestWorkspace::new().expect("workspace");
        let invoker = Arc::new(ScriptedInvoker::new(vec![]));
        let sink = Arc::new(MemorySink::new());
        let mut worker = ConversionWorker::spawn(ws.config(), invoker, sink).expect("spawn");

        worker.stop().expect("stop");

        assert!(worker.submit(&["/tmp"]).is_err());
    }
}
