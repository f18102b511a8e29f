//! Shared data model for intake, bootstrap and conversion.
//!
//! These types carry no behavior beyond small accessors. They are produced by
//! the side-effecting modules and consumed by callers and tests.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Classification of a single candidate path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    File,
    Directory,
    Rejected,
}

/// Why a candidate path was excluded from a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Empty or whitespace-only input.
    Blank,
    /// The input contains a `..` segment.
    ParentTraversal,
    /// Nothing exists at the location.
    NotFound,
    /// Canonicalization failed for a reason other than absence.
    Canonicalize(String),
    /// The canonical form is not absolute.
    NotAbsolute,
    /// The canonical form cannot be represented as UTF-8 text.
    NotUnicode,
    /// The target exists but is neither a regular file nor a directory.
    UnsupportedType,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Blank => f.write_str("empty path"),
            RejectReason::ParentTraversal => f.write_str("parent directory traversal"),
            RejectReason::NotFound => f.write_str("no file or directory at this location"),
            RejectReason::Canonicalize(err) => write!(f, "cannot canonicalize: {err}"),
            RejectReason::NotAbsolute => f.write_str("canonical path is not absolute"),
            RejectReason::NotUnicode => f.write_str("path is not valid UTF-8"),
            RejectReason::UnsupportedType => f.write_str("neither a regular file nor a directory"),
        }
    }
}

/// A candidate path after classification.
///
/// `resolved` is set only for `File`/`Directory` entries and is always an
/// absolute, canonical path without `..` segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    pub original: String,
    pub resolved: Option<PathBuf>,
    pub kind: PathKind,
    pub reason: Option<RejectReason>,
}

impl PathEntry {
    pub fn accepted(original: &str, resolved: PathBuf, kind: PathKind) -> Self {
        Self {
            original: original.to_string(),
            resolved: Some(resolved),
            kind,
            reason: None,
        }
    }

    pub fn rejected(original: &str, reason: RejectReason) -> Self {
        Self {
            original: original.to_string(),
            resolved: None,
            kind: PathKind::Rejected,
            reason: Some(reason),
        }
    }
}

/// Deduplicated file and directory sets produced by one intake call.
///
/// A canonical path lands in at most one of the two sets; insertion order is
/// preserved so the exchange artifacts list paths in the order they arrived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathBatch {
    files: Vec<PathBuf>,
    directories: Vec<PathBuf>,
    rejected: Vec<PathEntry>,
    duplicates: usize,
}

impl PathBatch {
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    pub fn rejected(&self) -> &[PathEntry] {
        &self.rejected
    }

    /// Number of accepted inputs dropped because an equivalent path was already present.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.directories.is_empty()
    }

    pub(crate) fn push_file(&mut self, path: PathBuf) {
        self.files.push(path);
    }

    pub(crate) fn push_directory(&mut self, path: PathBuf) {
        self.directories.push(path);
    }

    pub(crate) fn push_rejected(&mut self, entry: PathEntry) {
        self.rejected.push(entry);
    }

    pub(crate) fn count_duplicate(&mut self) {
        self.duplicates += 1;
    }
}

/// Where a resolved interpreter was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeSource {
    /// Found by launching a command name through the executable search path.
    SearchPath,
    /// Found by file existence at a conventional installation location.
    InstallLocation,
}

/// A usable script interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub executable: PathBuf,
    /// Output of the version query, when the interpreter was launched to find it.
    pub version: Option<String>,
    pub source: ProbeSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentStatus {
    Unresolved,
    Resolved,
    Unavailable,
}

/// Result of interpreter discovery. Terminal once resolved for a resolver's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EnvironmentState {
    #[default]
    Unresolved,
    Resolved(Interpreter),
    Unavailable,
}

impl EnvironmentState {
    pub fn status(&self) -> EnvironmentStatus {
        match self {
            EnvironmentState::Unresolved => EnvironmentStatus::Unresolved,
            EnvironmentState::Resolved(_) => EnvironmentStatus::Resolved,
            EnvironmentState::Unavailable => EnvironmentStatus::Unavailable,
        }
    }

    pub fn interpreter(&self) -> Option<&Interpreter> {
        match self {
            EnvironmentState::Resolved(interpreter) => Some(interpreter),
            _ => None,
        }
    }

    pub fn executable(&self) -> Option<&Path> {
        self.interpreter().map(|i| i.executable.as_path())
    }
}

/// Lifecycle of one named dependency.
///
/// `Unknown → Checking → {Present | Missing} → Installing → {Installed | InstallFailed}`.
/// `NotOnPath` is the secondary-tool outcome where the platform package manager lists
/// the package but the command cannot be launched yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyStatus {
    #[default]
    Unknown,
    Checking,
    Present,
    Missing,
    Installing,
    Installed,
    InstallFailed,
    NotOnPath,
}

impl DependencyStatus {
    /// `Present` or `Installed`.
    pub fn is_ready(self) -> bool {
        matches!(self, DependencyStatus::Present | DependencyStatus::Installed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DependencyStatus::Present
                | DependencyStatus::Installed
                | DependencyStatus::InstallFailed
                | DependencyStatus::NotOnPath
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DependencyStatus::Unknown => "unknown",
            DependencyStatus::Checking => "checking",
            DependencyStatus::Present => "present",
            DependencyStatus::Missing => "missing",
            DependencyStatus::Installing => "installing",
            DependencyStatus::Installed => "installed",
            DependencyStatus::InstallFailed => "install_failed",
            DependencyStatus::NotOnPath => "not_on_path",
        }
    }
}

impl fmt::Display for DependencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Captured outcome of one child process.
///
/// `exit_code` is `None` iff the process never started, was abandoned after a
/// timeout or cancellation, or could not be waited on. On Unix a child terminated
/// by signal `n` reports `128 + n`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub timed_out: bool,
    pub cancelled: bool,
    /// Why the process could not be started (not found, permission denied).
    pub spawn_error: Option<String>,
    /// Waiting on a started process failed; it was killed and its status is unknown.
    pub wait_error: Option<String>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
}

impl ProcessResult {
    pub fn not_started(error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            spawn_error: Some(error.into()),
            elapsed,
            ..Self::default()
        }
    }

    pub fn started(&self) -> bool {
        self.spawn_error.is_none()
    }

    /// Ran to completion in time with exit code zero.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && !self.cancelled
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.elapsed.as_millis()
    }
}
