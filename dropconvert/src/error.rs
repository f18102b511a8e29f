//! Failure taxonomy for bootstrap and conversion.
//!
//! Nothing here is returned as `Err` from the public component entrypoints;
//! these values travel inside typed outcomes so callers can match on them.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::types::DependencyStatus;

/// Coarse failure kind, shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    #[error("invalid path")]
    PathInvalid,
    #[error("interpreter unavailable")]
    EnvironmentUnavailable,
    #[error("dependency missing")]
    DependencyMissing,
    #[error("dependency install failed")]
    InstallFailed,
    #[error("process timed out")]
    ProcessTimeout,
    #[error("process cancelled")]
    ProcessCancelled,
    #[error("process exited with a non-zero code")]
    ProcessNonZeroExit,
    #[error("process could not be started")]
    SpawnFailed,
    #[error("i/o failure")]
    IoFailure,
}

/// Why a conversion stopped before anything was written or launched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortReason {
    #[error("interpreter environment has not been resolved")]
    EnvironmentUnresolved,
    #[error("no usable interpreter was found")]
    EnvironmentUnavailable,
    #[error("required package `{package}` is not ready (status: {status})")]
    DependencyNotReady {
        package: String,
        status: DependencyStatus,
    },
    #[error("conversion entrypoint not found at {}", .0.display())]
    EntrypointMissing(PathBuf),
    #[error("nothing to convert: no valid files or directories")]
    EmptyBatch,
    #[error("package `{package}` could not be loaded by the interpreter")]
    PreflightFailed { package: String },
}

impl AbortReason {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AbortReason::EnvironmentUnresolved | AbortReason::EnvironmentUnavailable => {
                ErrorKind::EnvironmentUnavailable
            }
            AbortReason::DependencyNotReady { status, .. } => {
                if *status == DependencyStatus::InstallFailed {
                    ErrorKind::InstallFailed
                } else {
                    ErrorKind::DependencyMissing
                }
            }
            AbortReason::PreflightFailed { .. } => ErrorKind::DependencyMissing,
            AbortReason::EntrypointMissing(_) | AbortReason::EmptyBatch => ErrorKind::PathInvalid,
        }
    }
}

/// Why a conversion that passed its preconditions did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionFailure {
    #[error("could not write exchange artifacts: {0}")]
    ArtifactWrite(String),
    #[error("could not start conversion entrypoint: {0}")]
    SpawnFailed(String),
    #[error("conversion entrypoint timed out after {}ms", .timeout.as_millis())]
    TimedOut {
        timeout: Duration,
        stdout: String,
        stderr: String,
    },
    #[error("conversion entrypoint could not be waited on: {0}")]
    WaitFailed(String),
    #[error("conversion was cancelled")]
    Cancelled,
    #[error("conversion entrypoint exited with code {code}")]
    NonZeroExit {
        code: i32,
        stdout: String,
        stderr: String,
    },
}

impl ConversionFailure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConversionFailure::ArtifactWrite(_) => ErrorKind::IoFailure,
            ConversionFailure::SpawnFailed(_) => ErrorKind::SpawnFailed,
            ConversionFailure::WaitFailed(_) => ErrorKind::IoFailure,
            ConversionFailure::TimedOut { .. } => ErrorKind::ProcessTimeout,
            ConversionFailure::Cancelled => ErrorKind::ProcessCancelled,
            ConversionFailure::NonZeroExit { .. } => ErrorKind::ProcessNonZeroExit,
        }
    }
}
