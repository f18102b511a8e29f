//! Idempotent check → install workflows for the packages the entrypoint needs.
//!
//! The primary package lives inside the interpreter and is installed with its
//! package installer. The secondary tool is a native program installed through
//! the platform package manager; its absence is tolerated.
//!
//! Nothing here retries. A failed install is reported once and left for the
//! conversion run to surface if it actually matters.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::types::{DependencyStatus, Interpreter, ProcessResult};
use crate::io::config::{InterpreterConfig, PackageConfig, ToolConfig, is_package_token};
use crate::io::process::{Invocation, ProcessInvoker};
use crate::sink::LogSink;

pub struct DependencyInstaller<'a> {
    interpreter_config: &'a InterpreterConfig,
    invoker: &'a dyn ProcessInvoker,
    sink: &'a dyn LogSink,
}

impl<'a> DependencyInstaller<'a> {
    pub fn new(
        interpreter_config: &'a InterpreterConfig,
        invoker: &'a dyn ProcessInvoker,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            interpreter_config,
            invoker,
            sink,
        }
    }

    /// `Present` if the package imports under `interpreter`, else `Missing`.
    pub fn check_installed(
        &self,
        interpreter: &Interpreter,
        package: &PackageConfig,
    ) -> DependencyStatus {
        if !is_package_token(&package.package) {
            self.sink
                .log(&format!("Refusing to check invalid package name: {}", package.package));
            return DependencyStatus::Missing;
        }
        self.transition(&package.package, DependencyStatus::Checking);
        let invocation = self
            .interpreter_call(interpreter, package.check_timeout())
            .arg("-c")
            .arg(format!("import {}", package.import_name()));
        let result = self.invoker.run(&invocation);

        let status = if result.success() {
            DependencyStatus::Present
        } else {
            debug!(
                package = %package.package,
                exit_code = ?result.exit_code,
                timed_out = result.timed_out,
                stderr = %result.stderr.trim(),
                "import check failed"
            );
            DependencyStatus::Missing
        };
        self.transition(&package.package, status);
        status
    }

    /// Check, and install with all optional extras if missing.
    ///
    /// The installer's exit code is the only verification; a package that installs
    /// but fails at use is reported by the conversion run.
    pub fn ensure_installed(
        &self,
        interpreter: &Interpreter,
        package: &PackageConfig,
    ) -> DependencyStatus {
        if !is_package_token(&package.package) {
            self.sink
                .log(&format!("Refusing to install invalid package name: {}", package.package));
            return DependencyStatus::InstallFailed;
        }
        let status = self.check_installed(interpreter, package);
        if status != DependencyStatus::Missing {
            return status;
        }

        let requirement = package.requirement();
        self.sink.log(&format!(
            "Package {} is missing, installing {requirement}",
            package.package
        ));
        self.transition(&package.package, DependencyStatus::Installing);
        let invocation = self
            .interpreter_call(interpreter, package.install_timeout())
            .args(["-m", "pip", "install"])
            .arg(&requirement);
        let result = self.invoker.run(&invocation);
        self.log_output("pip", &result);

        let status = if result.success() {
            self.sink.log(&format!("Installed {requirement}"));
            DependencyStatus::Installed
        } else {
            self.sink.log(&format!(
                "Failed to install {requirement}: {}",
                describe_failure(&result)
            ));
            DependencyStatus::InstallFailed
        };
        self.transition(&package.package, status);
        status
    }

    /// Probe the secondary tool without installing anything.
    ///
    /// Returns `Present`, `NotOnPath` (the package manager lists it but the command
    /// does not launch), or `Missing`.
    pub fn check_secondary_tool(&self, tool: &ToolConfig) -> DependencyStatus {
        self.transition(&tool.command, DependencyStatus::Checking);

        let probe = self.invoker.run(
            &Invocation::new(&tool.command, tool.check_timeout()).arg(&tool.version_arg),
        );
        if probe.success() {
            let first_line = probe.stdout.lines().next().unwrap_or_default().trim();
            self.sink
                .log(&format!("{} is already installed: {first_line}", tool.command));
            self.transition(&tool.command, DependencyStatus::Present);
            return DependencyStatus::Present;
        }
        debug!(
            tool = %tool.command,
            err = ?probe.spawn_error,
            exit_code = ?probe.exit_code,
            "tool probe failed"
        );

        let listing = self.invoker.run(
            &Invocation::new(&tool.manager, tool.check_timeout())
                .arg("list")
                .arg(&tool.package_id),
        );
        if listing.success() && listing.stdout.contains(&tool.package_id) {
            self.sink.log(&format!(
                "{} is installed via {} but not on PATH",
                tool.package_id, tool.manager
            ));
            self.sink.log(&format!(
                "Add {} to PATH or restart the session to use it",
                tool.command
            ));
            warn!(tool = %tool.command, "installed but not on search path");
            self.transition(&tool.command, DependencyStatus::NotOnPath);
            return DependencyStatus::NotOnPath;
        }
        if !listing.started() {
            debug!(
                manager = %tool.manager,
                err = ?listing.spawn_error,
                "package manager unavailable"
            );
        }

        self.transition(&tool.command, DependencyStatus::Missing);
        DependencyStatus::Missing
    }

    /// Best-effort install of the secondary tool. Never fatal.
    ///
    /// A tool the package manager already lists is never reinstalled, even if it
    /// cannot be launched yet.
    pub fn ensure_secondary_tool(&self, tool: &ToolConfig) -> DependencyStatus {
        let status = self.check_secondary_tool(tool);
        if status != DependencyStatus::Missing {
            return status;
        }

        self.sink.log(&format!(
            "Installing {} with {}",
            tool.package_id, tool.manager
        ));
        self.transition(&tool.command, DependencyStatus::Installing);
        let result = self.invoker.run(
            &Invocation::new(&tool.manager, tool.install_timeout())
                .arg("install")
                .arg(&tool.package_id),
        );
        self.log_output(&tool.manager, &result);

        let status = if result.success() {
            self.sink.log(&format!("Installed {}", tool.package_id));
            DependencyStatus::Installed
        } else {
            if result.started() {
                self.sink.log(&format!(
                    "Failed to install {}: {}",
                    tool.package_id,
                    describe_failure(&result)
                ));
            } else {
                self.sink.log(&format!(
                    "{} is not available, skipping {} install",
                    tool.manager, tool.package_id
                ));
            }
            self.sink.log(&format!(
                "Conversion still works for inputs that do not need {}",
                tool.command
            ));
            DependencyStatus::InstallFailed
        };
        self.transition(&tool.command, status);
        status
    }

    fn interpreter_call(&self, interpreter: &Interpreter, timeout: Duration) -> Invocation {
        Invocation::new(&interpreter.executable, timeout)
            .envs(&self.interpreter_config.encoding_env)
    }

    fn transition(&self, name: &str, status: DependencyStatus) {
        debug!(dependency = name, %status, "dependency status");
        if status.is_terminal() {
            info!(dependency = name, %status, "dependency resolved");
        }
    }

    fn log_output(&self, label: &str, result: &ProcessResult) {
        let stdout = result.stdout.trim();
        if !stdout.is_empty() {
            self.sink.log(&format!("{label} output: {stdout}"));
        }
        let stderr = result.stderr.trim();
        if !stderr.is_empty() {
            self.sink.log(&format!("{label} error output: {stderr}"));
        }
    }
}

fn describe_failure(result: &ProcessResult) -> String {
    if let Some(err) = &result.spawn_error {
        return format!("could not start ({err})");
    }
    if let Some(err) = &result.wait_error {
        return format!("could not be waited on ({err})");
    }
    if result.timed_out {
        return format!("timed out after {}ms", result.elapsed_ms());
    }
    match result.exit_code {
        Some(code) => format!("exit code {code}"),
        None => "terminated".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::types::ProbeSource;
    use crate::test_support::{MemorySink, ScriptedInvoker, ScriptedRun};

    fn python() -> Interpreter {
        Interpreter {
            executable: PathBuf::from("python3"),
            version: None,
            source: ProbeSource::SearchPath,
        }
    }

    #[test]
    fn present_package_is_left_alone() {
        let cfg = InterpreterConfig::default();
        let invoker = ScriptedInvoker::new(vec![ScriptedRun::ok("")]);
        let sink = MemorySink::new();
        let installer = DependencyInstaller::new(&cfg, &invoker, &sink);

        let status = installer.ensure_installed(&python(), &PackageConfig::default());

        assert_eq!(status, DependencyStatus::Present);
        assert_eq!(
            invoker.command_lines(),
            vec!["python3 -c \"import markitdown\""]
        );
    }

    #[test]
    fn missing_package_is_installed_with_extras() {
        let cfg = InterpreterConfig::default();
        let invoker = ScriptedInvoker::new(vec![
            ScriptedRun::exit(1, "", "ModuleNotFoundError: No module named 'markitdown'"),
            ScriptedRun::ok("Successfully installed markitdown-0.1.2"),
        ]);
        let sink = MemorySink::new();
        let installer = DependencyInstaller::new(&cfg, &invoker, &sink);

        let status = installer.ensure_installed(&python(), &PackageConfig::default());

        assert_eq!(status, DependencyStatus::Installed);
        let calls = invoker.calls();
        assert_eq!(calls[1].invocation.args, vec!["-m", "pip", "install", "markitdown[all]"]);
        assert_eq!(calls[1].invocation.timeout, PackageConfig::default().install_timeout());
        assert!(sink.contains("pip output: Successfully installed"));
    }

    #[test]
    fn failed_install_is_reported_without_retry() {
        let cfg = InterpreterConfig::default();
        let invoker = ScriptedInvoker::new(vec![
            ScriptedRun::exit(1, "", ""),
            ScriptedRun::exit(1, "", "network unreachable"),
        ]);
        let sink = MemorySink::new();
        let installer = DependencyInstaller::new(&cfg, &invoker, &sink);

        let status = installer.ensure_installed(&python(), &PackageConfig::default());

        assert_eq!(status, DependencyStatus::InstallFailed);
        assert_eq!(invoker.call_count(), 2);
        assert!(sink.contains("Failed to install markitdown[all]: exit code 1"));
    }

    #[test]
    fn invalid_package_name_never_reaches_the_interpreter() {
        let cfg = InterpreterConfig::default();
        let invoker = ScriptedInvoker::new(vec![]);
        let sink = MemorySink::new();
        let installer = DependencyInstaller::new(&cfg, &invoker, &sink);
        let package = PackageConfig {
            package: "os; import shutil".to_string(),
            ..PackageConfig::default()
        };

        let status = installer.ensure_installed(&python(), &package);

        assert_eq!(status, DependencyStatus::InstallFailed);
        assert_eq!(invoker.call_count(), 0);
    }

    #[test]
    fn secondary_tool_on_path_is_present() {
        let cfg = InterpreterConfig::default();
        let invoker = ScriptedInvoker::new(vec![ScriptedRun::ok(
            "ffmpeg version 7.1 Copyright (c) 2000-2024\nbuilt with gcc",
        )]);
        let sink = MemorySink::new();
        let installer = DependencyInstaller::new(&cfg, &invoker, &sink);

        let status = installer.ensure_secondary_tool(&ToolConfig::default());

        assert_eq!(status, DependencyStatus::Present);
        assert_eq!(invoker.command_lines(), vec!["ffmpeg -version"]);
        assert!(sink.contains("ffmpeg is already installed: ffmpeg version 7.1"));
    }

    #[test]
    fn listed_but_unlaunchable_tool_is_not_reinstalled() {
        let cfg = InterpreterConfig::default();
        let invoker = ScriptedInvoker::new(vec![
            ScriptedRun::not_found(),
            ScriptedRun::ok("Name    Id           Version\nFFmpeg  Gyan.FFmpeg  7.1"),
        ]);
        let sink = MemorySink::new();
        let installer = DependencyInstaller::new(&cfg, &invoker, &sink);

        let status = installer.ensure_secondary_tool(&ToolConfig::default());

        assert_eq!(status, DependencyStatus::NotOnPath);
        assert_eq!(
            invoker.command_lines(),
            vec!["ffmpeg -version", "winget list Gyan.FFmpeg"]
        );
        assert!(sink.contains("not on PATH"));
    }

    #[test]
    fn unlisted_tool_is_installed_once() {
        let cfg = InterpreterConfig::default();
        let invoker = ScriptedInvoker::new(vec![
            ScriptedRun::not_found(),
            ScriptedRun::exit(1, "No installed package found matching input criteria.", ""),
            ScriptedRun::ok("Successfully installed"),
        ]);
        let sink = MemorySink::new();
        let installer = DependencyInstaller::new(&cfg, &invoker, &sink);

        let status = installer.ensure_secondary_tool(&ToolConfig::default());

        assert_eq!(status, DependencyStatus::Installed);
        let calls = invoker.calls();
        assert_eq!(calls[2].invocation.args, vec!["install", "Gyan.FFmpeg"]);
        assert_eq!(calls[2].invocation.timeout, ToolConfig::default().install_timeout());
    }

    #[test]
    fn missing_package_manager_is_tolerated() {
        let cfg = InterpreterConfig::default();
        let invoker = ScriptedInvoker::new(vec![
            ScriptedRun::not_found(),
            ScriptedRun::not_found(),
            ScriptedRun::not_found(),
        ]);
        let sink = MemorySink::new();
        let installer = DependencyInstaller::new(&cfg, &invoker, &sink);

        let status = installer.ensure_secondary_tool(&ToolConfig::default());

        assert_eq!(status, DependencyStatus::InstallFailed);
        assert!(sink.contains("winget is not available"));
        assert!(sink.contains("Conversion still works"));
    }

    #[test]
    fn check_only_never_installs() {
        let cfg = InterpreterConfig::default();
        let invoker = ScriptedInvoker::new(vec![
            ScriptedRun::not_found(),
            ScriptedRun::exit(1, "", ""),
        ]);
        let sink = MemorySink::new();
        let installer = DependencyInstaller::new(&cfg, &invoker, &sink);

        let status = installer.check_secondary_tool(&ToolConfig::default());

        assert_eq!(status, DependencyStatus::Missing);
        assert_eq!(invoker.call_count(), 2);
    }
}
