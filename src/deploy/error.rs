// ABOUTME: Error types for deployment attempts.
// ABOUTME: One variant per failure class, with a kind enum for programmatic matching.

use chrono::{DateTime, Utc};

use crate::runtime::{ContainerError, ImageError};

/// Errors that end a deployment attempt.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Image build or tagging failed.
    #[error("build failed: {0}")]
    Build(String),

    /// The smoke test exited non-zero or timed out.
    #[error("smoke test failed: {0}")]
    TestFailure(String),

    /// The pre-deployment snapshot could not be taken.
    #[error("backup failed: {0}")]
    Backup(String),

    /// The candidate never reached the success threshold.
    #[error("health check timed out after {attempts} attempts ({secs}s)")]
    HealthCheckTimeout { attempts: usize, secs: u64 },

    /// Proxy rewrite, reload or public verification failed.
    #[error("traffic cutover failed: {message}")]
    Cutover {
        message: String,
        /// Whether the live proxy configuration was replaced before the failure.
        proxy_touched: bool,
    },

    /// Restoring the previous release failed. Requires manual intervention.
    #[error("rollback failed: {0}")]
    Rollback(String),

    /// Another deployment of the same service holds the lock.
    #[error("deployment in progress by {holder} (pid {pid}) since {started_at}")]
    DeployInProgress {
        holder: String,
        pid: u32,
        started_at: DateTime<Utc>,
    },

    /// The lock file could not be created or read.
    #[error("deploy lock error: {0}")]
    Lock(String),

    /// The operator interrupted the deployment.
    #[error("deployment cancelled")]
    Cancelled,

    /// A container runtime call failed.
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// Persisted state could not be read or written.
    #[error("state error: {0}")]
    State(String),
}

/// Classification of a `DeployError` without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployErrorKind {
    Build,
    TestFailure,
    Backup,
    HealthCheckTimeout,
    Cutover,
    Rollback,
    DeployInProgress,
    Lock,
    Cancelled,
    Runtime,
    State,
}

/// Holder of a contended deploy lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolderInfo {
    pub holder: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

impl DeployError {
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            DeployError::Build(_) => DeployErrorKind::Build,
            DeployError::TestFailure(_) => DeployErrorKind::TestFailure,
            DeployError::Backup(_) => DeployErrorKind::Backup,
            DeployError::HealthCheckTimeout { .. } => DeployErrorKind::HealthCheckTimeout,
            DeployError::Cutover { .. } => DeployErrorKind::Cutover,
            DeployError::Rollback(_) => DeployErrorKind::Rollback,
            DeployError::DeployInProgress { .. } => DeployErrorKind::DeployInProgress,
            DeployError::Lock(_) => DeployErrorKind::Lock,
            DeployError::Cancelled => DeployErrorKind::Cancelled,
            DeployError::Runtime(_) => DeployErrorKind::Runtime,
            DeployError::State(_) => DeployErrorKind::State,
        }
    }

    /// Lock holder details when the lock was contended.
    pub fn lock_holder_info(&self) -> Option<LockHolderInfo> {
        match self {
            DeployError::DeployInProgress {
                holder,
                pid,
                started_at,
            } => Some(LockHolderInfo {
                holder: holder.clone(),
                pid: *pid,
                started_at: *started_at,
            }),
            _ => None,
        }
    }

    /// A failed rollback leaves the service in an unknown state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeployError::Rollback(_))
    }

    pub(crate) fn lock_held(holder: String, pid: u32, started_at: DateTime<Utc>) -> Self {
        DeployError::DeployInProgress {
            holder,
            pid,
            started_at,
        }
    }

    pub(crate) fn lock_error(message: impl Into<String>) -> Self {
        DeployError::Lock(message.into())
    }

    pub(crate) fn state(message: impl std::fmt::Display) -> Self {
        DeployError::State(message.to_string())
    }
}

impl From<ImageError> for DeployError {
    fn from(err: ImageError) -> Self {
        DeployError::Build(err.to_string())
    }
}

impl From<ContainerError> for DeployError {
    fn from(err: ContainerError) -> Self {
        DeployError::Runtime(err.to_string())
    }
}
