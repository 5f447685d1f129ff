// ABOUTME: Deploy lock to prevent concurrent deployments to the same service.
// ABOUTME: Exclusive lock file creation with holder info stored as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::types::{EnvironmentName, ServiceName};

use super::DeployError;

/// Information about who holds a deploy lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
    /// Service and environment being deployed.
    pub service: String,
}

impl LockInfo {
    /// Create new lock info for the current process.
    pub fn new(service: &ServiceName, environment: &EnvironmentName) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
            service: format!("{}/{}", service, environment),
        }
    }

    /// Check if this lock is stale (older than 1 hour).
    pub fn is_stale(&self) -> bool {
        let age = Utc::now() - self.started_at;
        age.num_hours() >= 1
    }

    fn read(path: &Path) -> Option<LockInfo> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

/// A held deploy lock that releases on drop.
#[derive(Debug)]
pub struct DeployLock {
    path: PathBuf,
    released: bool,
}

impl DeployLock {
    /// Acquire the lock at `path`.
    ///
    /// Creation uses `create_new`, so two processes cannot both succeed.
    /// Returns `DeployInProgress` when the lock is held. Stale locks
    /// (>1 hour) are broken with a warning; `force` breaks any lock.
    pub fn acquire(
        path: &Path,
        service: &ServiceName,
        environment: &EnvironmentName,
        force: bool,
    ) -> Result<Self, DeployError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DeployError::lock_error(format!("failed to create lock directory: {}", e))
            })?;
        }

        let lock_info = LockInfo::new(service, environment);
        let lock_json = serde_json::to_vec(&lock_info)
            .map_err(|e| DeployError::lock_error(format!("failed to serialize lock: {}", e)))?;

        match Self::try_create(path, &lock_json) {
            Ok(lock) => return Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(DeployError::lock_error(format!(
                    "failed to acquire lock: {}",
                    e
                )));
            }
        }

        if !Self::should_break(path, force)? {
            return match LockInfo::read(path) {
                Some(existing) => Err(DeployError::lock_held(
                    existing.holder,
                    existing.pid,
                    existing.started_at,
                )),
                None => Err(DeployError::lock_error(
                    "lock held by another process".to_string(),
                )),
            };
        }

        tracing::debug!("Removing stale/forced lock at {}", path.display());
        if let Err(e) = std::fs::remove_file(path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(DeployError::lock_error(format!(
                "failed to break lock: {}",
                e
            )));
        }

        Self::try_create(path, &lock_json).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                DeployError::lock_error("lock acquired by another process during break")
            } else {
                DeployError::lock_error(format!("failed to acquire lock: {}", e))
            }
        })
    }

    fn try_create(path: &Path, contents: &[u8]) -> std::io::Result<Self> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        Ok(Self {
            path: path.to_path_buf(),
            released: false,
        })
    }

    /// Check if an existing lock should be broken (stale, forced, or corrupted).
    fn should_break(path: &Path, force: bool) -> Result<bool, DeployError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            // Released between our create attempt and now.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => {
                return Err(DeployError::lock_error(format!(
                    "failed to read lock info: {}",
                    e
                )));
            }
        };

        match serde_json::from_str::<LockInfo>(&content) {
            Ok(existing_lock) => {
                if force {
                    tracing::warn!(
                        "Breaking lock held by {} (pid {}) since {}",
                        existing_lock.holder,
                        existing_lock.pid,
                        existing_lock.started_at
                    );
                    Ok(true)
                } else if existing_lock.is_stale() {
                    tracing::warn!(
                        "Auto-breaking stale lock held by {} (pid {}) since {}",
                        existing_lock.holder,
                        existing_lock.pid,
                        existing_lock.started_at
                    );
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Err(_) => {
                tracing::warn!("Lock info corrupted, breaking lock");
                Ok(true)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock, reporting a failure to remove the file.
    pub fn release(mut self) -> Result<(), DeployError> {
        self.released = true;
        std::fs::remove_file(&self.path).map_err(|e| {
            DeployError::lock_error(format!(
                "failed to remove lock {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> (ServiceName, EnvironmentName) {
        (
            ServiceName::new("lnapi").unwrap(),
            EnvironmentName::new("production").unwrap(),
        )
    }

    #[test]
    fn lock_info_creates_with_current_host_and_pid() {
        let (service, env) = names();
        let info = LockInfo::new(&service, &env);

        assert_eq!(info.service, "lnapi/production");
        assert_eq!(info.pid, std::process::id());
        assert!(!info.holder.is_empty());
    }

    #[test]
    fn fresh_lock_is_not_stale() {
        let (service, env) = names();
        assert!(!LockInfo::new(&service, &env).is_stale());
    }

    #[test]
    fn old_lock_is_stale() {
        let (service, env) = names();
        let mut info = LockInfo::new(&service, &env);
        info.started_at = Utc::now() - chrono::Duration::hours(2);
        assert!(info.is_stale());
    }

    #[test]
    fn second_acquire_reports_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.lock");
        let (service, env) = names();

        let _held = DeployLock::acquire(&path, &service, &env, false).unwrap();
        let err = DeployLock::acquire(&path, &service, &env, false).unwrap_err();

        let info = err.lock_holder_info().unwrap();
        assert_eq!(info.pid, std::process::id());
    }

    #[test]
    fn drop_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.lock");
        let (service, env) = names();

        drop(DeployLock::acquire(&path, &service, &env, false).unwrap());

        assert!(!path.exists());
        assert!(DeployLock::acquire(&path, &service, &env, false).is_ok());
    }

    #[test]
    fn stale_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.lock");
        let (service, env) = names();
        let mut stale = LockInfo::new(&service, &env);
        stale.started_at = Utc::now() - chrono::Duration::hours(3);
        std::fs::write(&path, serde_json::to_vec(&stale).unwrap()).unwrap();

        let lock = DeployLock::acquire(&path, &service, &env, false).unwrap();
        lock.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn force_breaks_live_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.lock");
        let (service, env) = names();
        let held = DeployLock::acquire(&path, &service, &env, false).unwrap();
        std::mem::forget(held);

        assert!(DeployLock::acquire(&path, &service, &env, true).is_ok());
    }
}
