//! Startup sequence: resolve the interpreter, then bring dependencies up.
//!
//! The resulting [`BootstrapReport`] is the only environment state the
//! orchestrator sees. It is built once and handed over by value; a host that
//! wants to re-bootstrap builds a new report and a new orchestrator.

use tracing::{info, instrument};

use crate::core::types::{DependencyStatus, EnvironmentState};
use crate::dependencies::DependencyInstaller;
use crate::environment::EnvironmentResolver;
use crate::io::config::BridgeConfig;
use crate::io::process::ProcessInvoker;
use crate::sink::LogSink;

/// What bootstrap is allowed to change on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapMode {
    /// Check and install anything missing.
    Ensure,
    /// Check only; never install.
    CheckOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub environment: EnvironmentState,
    /// Last known status of the primary package.
    pub primary: DependencyStatus,
    /// `None` when the secondary tool is disabled or was never reached.
    pub secondary: Option<DependencyStatus>,
}

impl BootstrapReport {
    /// Interpreter resolved and primary package usable.
    pub fn is_ready(&self) -> bool {
        self.environment.interpreter().is_some() && self.primary.is_ready()
    }

    /// One line per component, for `doctor`-style output.
    pub fn summary_lines(&self, config: &BridgeConfig) -> Vec<String> {
        let interpreter = match &self.environment {
            EnvironmentState::Resolved(interpreter) => format!(
                "interpreter: {}{}",
                interpreter.executable.display(),
                interpreter
                    .version
                    .as_deref()
                    .map(|v| format!(" ({v})"))
                    .unwrap_or_default()
            ),
            EnvironmentState::Unresolved => "interpreter: unresolved".to_string(),
            EnvironmentState::Unavailable => "interpreter: unavailable".to_string(),
        };
        let mut lines = vec![
            interpreter,
            format!("{}: {}", config.primary.package, self.primary),
        ];
        if let Some(status) = self.secondary {
            lines.push(format!("{}: {status}", config.secondary.command));
        }
        lines
    }
}

/// Run the startup sequence. Never fails: every problem is a status in the report.
///
/// Without an interpreter nothing else is attempted, including the secondary tool.
#[instrument(skip_all, fields(mode = ?mode))]
pub fn bootstrap(
    config: &BridgeConfig,
    invoker: &dyn ProcessInvoker,
    sink: &dyn LogSink,
    mode: BootstrapMode,
) -> BootstrapReport {
    let resolver = EnvironmentResolver::new(&config.interpreter, invoker, sink);
    let environment = resolver.resolve();

    let interpreter = match environment.interpreter() {
        Some(interpreter) => interpreter.clone(),
        None => {
            sink.log("Skipping dependency setup: no interpreter");
            return BootstrapReport {
                environment,
                primary: DependencyStatus::Unknown,
                secondary: None,
            };
        }
    };

    let installer = DependencyInstaller::new(&config.interpreter, invoker, sink);
    let primary = match mode {
        BootstrapMode::Ensure => installer.ensure_installed(&interpreter, &config.primary),
        BootstrapMode::CheckOnly => installer.check_installed(&interpreter, &config.primary),
    };
    if primary == DependencyStatus::InstallFailed {
        sink.log(&format!(
            "{} could not be installed; conversions will be refused",
            config.primary.package
        ));
    }

    let secondary = config.secondary.enabled.then(|| match mode {
        BootstrapMode::Ensure => installer.ensure_secondary_tool(&config.secondary),
        BootstrapMode::CheckOnly => installer.check_secondary_tool(&config.secondary),
    });

    let report = BootstrapReport {
        environment,
        primary,
        secondary,
    };
    info!(
        ready = report.is_ready(),
        primary = %report.primary,
        secondary = ?report.secondary,
        "bootstrap finished"
    );
    report
}
