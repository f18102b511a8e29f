//! Hands a classified batch to the external conversion entrypoint.
//!
//! Per call: `Idle → CheckingPreconditions → {Aborted | Serializing} → Invoking →
//! CleaningUp → Idle`. A failed precondition writes nothing and launches nothing.
//! Once the exchange artifacts exist, their removal is attempted on every path
//! out of the call; removal failures are logged and otherwise ignored.
//!
//! At most one conversion runs at a time per orchestrator: concurrent callers
//! queue on an internal lock.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::bootstrap::BootstrapReport;
use crate::core::types::{EnvironmentState, Interpreter, PathBatch, ProcessResult};
use crate::error::{AbortReason, ConversionFailure};
use crate::io::config::BridgeConfig;
use crate::io::exchange::ExchangeArtifacts;
use crate::io::process::{CancelToken, Invocation, ProcessInvoker};
use crate::sink::SharedSink;

/// Steps of a single `convert` call, recorded in debug traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionPhase {
    CheckingPreconditions,
    Aborted,
    Serializing,
    Invoking,
    CleaningUp,
    Idle,
}

/// Captured output of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub files: usize,
    pub directories: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    Succeeded(ConversionReport),
    Aborted(AbortReason),
    Failed(ConversionFailure),
}

impl ConversionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ConversionOutcome::Succeeded(_))
    }
}

/// Everything the orchestrator needs from configuration, resolved up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSettings {
    pub working_dir: PathBuf,
    pub exchange_dir: PathBuf,
    pub entrypoint: PathBuf,
    pub timeout: Duration,
    pub preflight_check: bool,
    pub preflight_timeout: Duration,
    pub package: String,
    pub preflight_code: String,
    pub child_env: Vec<(String, String)>,
}

impl ConversionSettings {
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let working_dir = config.resolved_working_dir()?;
        let entrypoint = if config.entrypoint.script.is_absolute() {
            config.entrypoint.script.clone()
        } else {
            working_dir.join(&config.entrypoint.script)
        };
        Ok(Self {
            exchange_dir: config.resolved_exchange_dir(),
            entrypoint,
            working_dir,
            timeout: config.entrypoint.timeout(),
            preflight_check: config.entrypoint.preflight_check,
            preflight_timeout: config.entrypoint.preflight_timeout(),
            package: config.primary.package.clone(),
            preflight_code: config.primary.preflight_code(),
            child_env: config
                .interpreter
                .encoding_env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }
}

pub struct ConversionOrchestrator {
    settings: ConversionSettings,
    report: BootstrapReport,
    invoker: Arc<dyn ProcessInvoker>,
    sink: SharedSink,
    in_flight: Mutex<()>,
}

impl ConversionOrchestrator {
    pub fn new(
        settings: ConversionSettings,
        report: BootstrapReport,
        invoker: Arc<dyn ProcessInvoker>,
        sink: SharedSink,
    ) -> Self {
        Self {
            settings,
            report,
            invoker,
            sink,
            in_flight: Mutex::new(()),
        }
    }

    pub fn report(&self) -> &BootstrapReport {
        &self.report
    }

    pub fn settings(&self) -> &ConversionSettings {
        &self.settings
    }

    pub fn convert(&self, batch: &PathBatch) -> ConversionOutcome {
        self.convert_with_cancel(batch, &CancelToken::new())
    }

    /// Convert `batch`, killing the entrypoint early if `cancel` is raised.
    #[instrument(
        skip_all,
        fields(files = batch.files().len(), directories = batch.directories().len())
    )]
    pub fn convert_with_cancel(
        &self,
        batch: &PathBatch,
        cancel: &CancelToken,
    ) -> ConversionOutcome {
        let _serial = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        enter(ConversionPhase::CheckingPreconditions);
        let interpreter = match self.check_preconditions(batch) {
            Ok(interpreter) => interpreter,
            Err(reason) => return self.abort(reason),
        };
        if self.settings.preflight_check {
            match self.preflight(interpreter, cancel) {
                Preflight::Passed => {}
                Preflight::Failed => {
                    return self.abort(AbortReason::PreflightFailed {
                        package: self.settings.package.clone(),
                    });
                }
                Preflight::Cancelled => {
                    self.sink.log("Conversion cancelled");
                    enter(ConversionPhase::Idle);
                    return ConversionOutcome::Failed(ConversionFailure::Cancelled);
                }
            }
        }

        self.sink.log(&format!(
            "Processing {} file(s) and {} folder(s)",
            batch.files().len(),
            batch.directories().len()
        ));
        for file in batch.files() {
            self.sink.log(&format!("File: {}", file.display()));
        }
        for dir in batch.directories() {
            self.sink.log(&format!("Folder: {}", dir.display()));
        }

        enter(ConversionPhase::Serializing);
        let artifacts = match ExchangeArtifacts::create(&self.settings.exchange_dir) {
            Ok(artifacts) => artifacts,
            Err(err) => {
                self.sink
                    .log(&format!("Could not create exchange artifacts: {err:#}"));
                enter(ConversionPhase::Idle);
                return ConversionOutcome::Failed(ConversionFailure::ArtifactWrite(format!(
                    "{err:#}"
                )));
            }
        };

        let outcome = match artifacts.write(batch.files(), batch.directories()) {
            Ok(()) => {
                enter(ConversionPhase::Invoking);
                self.invoke(interpreter, &artifacts, batch, cancel)
            }
            Err(err) => {
                self.sink
                    .log(&format!("Could not write exchange artifacts: {err:#}"));
                ConversionOutcome::Failed(ConversionFailure::ArtifactWrite(format!("{err:#}")))
            }
        };

        enter(ConversionPhase::CleaningUp);
        if let Err(err) = artifacts.cleanup() {
            warn!(err = %format!("{err:#}"), "exchange cleanup failed");
            self.sink
                .log(&format!("Could not remove exchange artifacts: {err:#}"));
        }
        enter(ConversionPhase::Idle);
        outcome
    }

    fn check_preconditions(&self, batch: &PathBatch) -> Result<&Interpreter, AbortReason> {
        let interpreter = match &self.report.environment {
            EnvironmentState::Resolved(interpreter) => interpreter,
            EnvironmentState::Unresolved => {
                return Err(AbortReason::EnvironmentUnresolved);
            }
            EnvironmentState::Unavailable => {
                return Err(AbortReason::EnvironmentUnavailable);
            }
        };
        if !self.report.primary.is_ready() {
            return Err(AbortReason::DependencyNotReady {
                package: self.settings.package.clone(),
                status: self.report.primary,
            });
        }
        if !self.settings.entrypoint.is_file() {
            return Err(AbortReason::EntrypointMissing(self.settings.entrypoint.clone()));
        }
        if batch.is_empty() {
            return Err(AbortReason::EmptyBatch);
        }
        Ok(interpreter)
    }

    fn abort(&self, reason: AbortReason) -> ConversionOutcome {
        enter(ConversionPhase::Aborted);
        info!(%reason, "conversion aborted");
        self.sink.log(&format!("Conversion aborted: {reason}"));
        enter(ConversionPhase::Idle);
        ConversionOutcome::Aborted(reason)
    }

    /// Load the package in a throwaway interpreter.
    fn preflight(&self, interpreter: &Interpreter, cancel: &CancelToken) -> Preflight {
        self.sink
            .log(&format!("Checking that {} loads", self.settings.package));
        let invocation = self
            .interpreter_call(interpreter, self.settings.preflight_timeout)
            .arg("-c")
            .arg(&self.settings.preflight_code);
        let result = self.invoker.run_cancellable(&invocation, cancel);
        self.log_streams(&result);
        if result.cancelled {
            Preflight::Cancelled
        } else if result.success() {
            self.sink
                .log(&format!("{} is available", self.settings.package));
            Preflight::Passed
        } else {
            debug!(exit_code = ?result.exit_code, timed_out = result.timed_out, "preflight failed");
            Preflight::Failed
        }
    }

    fn invoke(
        &self,
        interpreter: &Interpreter,
        artifacts: &ExchangeArtifacts,
        batch: &PathBatch,
        cancel: &CancelToken,
    ) -> ConversionOutcome {
        let invocation = self
            .interpreter_call(interpreter, self.settings.timeout)
            .arg(&self.settings.entrypoint)
            .arg(artifacts.files_path())
            .arg(artifacts.folders_path())
            .current_dir(&self.settings.working_dir);
        self.sink.log(&format!(
            "Running conversion entrypoint: {}",
            self.settings.entrypoint.display()
        ));

        let result = self.invoker.run_cancellable(&invocation, cancel);
        self.sink
            .log(&format!("Process execution time: {}ms", result.elapsed_ms()));
        self.log_streams(&result);

        if let Some(err) = &result.spawn_error {
            self.sink
                .log(&format!("Could not start conversion entrypoint: {err}"));
            return ConversionOutcome::Failed(ConversionFailure::SpawnFailed(err.clone()));
        }
        if let Some(err) = &result.wait_error {
            self.sink
                .log(&format!("Lost track of conversion entrypoint: {err}"));
            return ConversionOutcome::Failed(ConversionFailure::WaitFailed(err.clone()));
        }
        if result.cancelled {
            self.sink.log("Conversion cancelled");
            return ConversionOutcome::Failed(ConversionFailure::Cancelled);
        }
        if result.timed_out {
            self.sink.log(&format!(
                "Conversion timed out after {}ms",
                self.settings.timeout.as_millis()
            ));
            return ConversionOutcome::Failed(ConversionFailure::TimedOut {
                timeout: self.settings.timeout,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }

        match result.exit_code {
            Some(0) => {
                self.sink.log("Conversion finished successfully");
                ConversionOutcome::Succeeded(ConversionReport {
                    stdout: result.stdout,
                    stderr: result.stderr,
                    elapsed: result.elapsed,
                    files: batch.files().len(),
                    directories: batch.directories().len(),
                })
            }
            code => {
                let code = code.unwrap_or(-1);
                self.sink
                    .log(&format!("Conversion failed with exit code {code}"));
                ConversionOutcome::Failed(ConversionFailure::NonZeroExit {
                    code,
                    stdout: result.stdout,
                    stderr: result.stderr,
                })
            }
        }
    }

    fn interpreter_call(&self, interpreter: &Interpreter, timeout: Duration) -> Invocation {
        let mut invocation = Invocation::new(&interpreter.executable, timeout);
        invocation.env.extend(self.settings.child_env.iter().cloned());
        invocation
    }

    /// Both streams go to the sink verbatim.
    fn log_streams(&self, result: &ProcessResult) {
        if !result.stdout.is_empty() {
            self.sink
                .log(&format!("Entrypoint output:\n{}", result.stdout.trim_end()));
        }
        if !result.stderr.is_empty() {
            self.sink
                .log(&format!("Entrypoint error output:\n{}", result.stderr.trim_end()));
        }
        if result.stdout_truncated > 0 || result.stderr_truncated > 0 {
            self.sink.log(&format!(
                "Output truncated ({} stdout bytes, {} stderr bytes dropped)",
                result.stdout_truncated, result.stderr_truncated
            ));
        }
    }
}

enum Preflight {
    Passed,
    Failed,
    Cancelled,
}

fn enter(phase: ConversionPhase) {
    debug!(?phase, "conversion phase");
}
