//! Discovery of a usable script interpreter on an unmanaged host.
//!
//! Search-path probes run first because the user's active `PATH` reflects which
//! of several installs they mean to use. Only if every one fails are the
//! conventional installation locations checked, by file existence alone.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::{debug, info, instrument};

use crate::core::types::{EnvironmentState, Interpreter, ProbeSource};
use crate::io::config::InterpreterConfig;
use crate::io::process::{Invocation, ProcessInvoker};
use crate::sink::LogSink;

/// Interpreter versions with a well-known Windows install layout.
const WINDOWS_VERSION_DIRS: &[&str] = &[
    "Python39",
    "Python310",
    "Python311",
    "Python312",
    "Python313",
    "Python314",
];

/// Resolves the interpreter once and caches the answer.
///
/// A fresh probe requires [`EnvironmentResolver::reset`], which takes `&mut self`
/// so it cannot race with readers.
pub struct EnvironmentResolver<'a> {
    config: &'a InterpreterConfig,
    invoker: &'a dyn ProcessInvoker,
    sink: &'a dyn LogSink,
    state: OnceLock<EnvironmentState>,
}

impl<'a> EnvironmentResolver<'a> {
    pub fn new(
        config: &'a InterpreterConfig,
        invoker: &'a dyn ProcessInvoker,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            config,
            invoker,
            sink,
            state: OnceLock::new(),
        }
    }

    /// Probe on first call; later calls return the cached state.
    pub fn resolve(&self) -> EnvironmentState {
        self.state.get_or_init(|| self.probe()).clone()
    }

    /// Current state without probing.
    pub fn state(&self) -> EnvironmentState {
        self.state.get().cloned().unwrap_or_default()
    }

    pub fn reset(&mut self) {
        self.state = OnceLock::new();
    }

    #[instrument(skip_all)]
    fn probe(&self) -> EnvironmentState {
        self.sink.log("Searching for a script interpreter");

        for candidate in &self.config.candidates {
            if let Some(interpreter) = self.probe_search_path(candidate) {
                return self.found(interpreter);
            }
        }

        let mut locations = conventional_install_paths();
        locations.extend(self.config.extra_install_paths.iter().cloned());
        for location in locations {
            if location.is_file() {
                return self.found(Interpreter {
                    executable: location,
                    version: None,
                    source: ProbeSource::InstallLocation,
                });
            }
            debug!(path = %location.display(), "no interpreter at install location");
        }

        self.sink.log("No usable interpreter was found");
        info!("interpreter unavailable");
        EnvironmentState::Unavailable
    }

    fn probe_search_path(&self, candidate: &str) -> Option<Interpreter> {
        let invocation = Invocation::new(candidate, self.config.probe_timeout())
            .arg(&self.config.version_arg)
            .envs(&self.config.encoding_env);
        let result = self.invoker.run(&invocation);

        if !result.started() {
            debug!(candidate, err = ?result.spawn_error, "probe could not start");
            return None;
        }
        if result.timed_out {
            self.sink.log(&format!(
                "Interpreter probe timed out: {candidate} ({}ms)",
                result.elapsed_ms()
            ));
            return None;
        }
        if !result.success() {
            debug!(candidate, exit_code = ?result.exit_code, "probe failed");
            return None;
        }

        // Old interpreters print their version on stderr.
        let version = [result.stdout.trim(), result.stderr.trim()]
            .into_iter()
            .find(|text| !text.is_empty())
            .map(str::to_string);
        if let Some(version) = &version {
            self.sink
                .log(&format!("Found interpreter on PATH: {candidate} ({version})"));
        }
        Some(Interpreter {
            executable: PathBuf::from(candidate),
            version,
            source: ProbeSource::SearchPath,
        })
    }

    fn found(&self, interpreter: Interpreter) -> EnvironmentState {
        self.sink.log(&format!(
            "Interpreter executable: {}",
            interpreter.executable.display()
        ));
        info!(
            executable = %interpreter.executable.display(),
            source = ?interpreter.source,
            "interpreter resolved"
        );
        EnvironmentState::Resolved(interpreter)
    }
}

/// Conventional per-version install locations for this platform, system-wide first.
///
/// Empty on platforms without a standard layout.
pub fn conventional_install_paths() -> Vec<PathBuf> {
    if !cfg!(windows) {
        return Vec::new();
    }
    let local_app_data = std::env::var_os("LOCALAPPDATA")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("USERPROFILE")
                .map(|profile| Path::new(&profile).join("AppData").join("Local"))
        });
    windows_install_paths(Path::new(r"C:\"), local_app_data.as_deref())
}

fn windows_install_paths(system_root: &Path, local_app_data: Option<&Path>) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WINDOWS_VERSION_DIRS
        .iter()
        .map(|dir| system_root.join(dir).join("python.exe"))
        .collect();
    if let Some(local) = local_app_data {
        paths.extend(WINDOWS_VERSION_DIRS.iter().map(|dir| {
            local
                .join("Programs")
                .join("Python")
                .join(dir)
                .join("python.exe")
        }));
    }
    paths
}
