// ABOUTME: Diagnostics accumulator for non-fatal warnings during deployment.
// ABOUTME: Collects warnings that shouldn't fail a deployment but should be shown to users.

/// Collects non-fatal warnings during deployment operations.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{}", warning.message);
        self.warnings.push(warning);
    }

    /// Get all collected warnings.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Check if any warnings were collected.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

/// A non-fatal warning collected during deployment.
#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a lock release warning.
    pub fn lock_release(message: impl Into<String>) -> Self {
        Self::new(WarningKind::LockRelease, message)
    }

    pub fn notify_failed(message: impl Into<String>) -> Self {
        Self::new(WarningKind::NotifyFailed, message)
    }

    pub fn prune_failed(message: impl Into<String>) -> Self {
        Self::new(WarningKind::PruneFailed, message)
    }

    pub fn backup_skipped(message: impl Into<String>) -> Self {
        Self::new(WarningKind::BackupSkipped, message)
    }

    pub fn cleanup(message: impl Into<String>) -> Self {
        Self::new(WarningKind::Cleanup, message)
    }

    pub fn history_write(message: impl Into<String>) -> Self {
        Self::new(WarningKind::HistoryWrite, message)
    }
}

/// Categories of warnings that can occur during deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Failed to release deploy lock (lock file may remain).
    LockRelease,
    /// The outcome notification could not be delivered.
    NotifyFailed,
    /// Old backups could not be removed.
    PruneFailed,
    /// Deployed without a fresh snapshot.
    BackupSkipped,
    /// The previous container could not be stopped after promotion.
    Cleanup,
    /// The deployment record could not be persisted.
    HistoryWrite,
}
