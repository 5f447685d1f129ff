// ABOUTME: Append-and-update log of deployment records.
// ABOUTME: A JSON array file rewritten atomically whenever a record changes.

use std::path::{Path, PathBuf};

use super::DeployError;
use super::atomic::write_atomic;
use super::record::{DeployStatus, DeploymentRecord};

pub const HISTORY_FILENAME: &str = "history.json";

/// Deployment history of one service environment.
#[derive(Debug, Clone)]
pub struct DeploymentHistory {
    path: PathBuf,
}

impl DeploymentHistory {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(HISTORY_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records, oldest first. A missing file is an empty history.
    pub fn load(&self) -> Result<Vec<DeploymentRecord>, DeployError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(DeployError::state(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        serde_json::from_str(&content).map_err(|e| {
            DeployError::state(format!("corrupt history {}: {}", self.path.display(), e))
        })
    }

    /// Insert the record, or replace the one with the same id.
    pub fn upsert(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        let mut records = self.load()?;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        let json = serde_json::to_vec_pretty(&records).map_err(DeployError::state)?;
        write_atomic(&self.path, &json).map_err(|e| {
            DeployError::state(format!("failed to write {}: {}", self.path.display(), e))
        })
    }

    /// The newest `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<DeploymentRecord>, DeployError> {
        let mut records = self.load()?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    pub fn last_promoted(&self) -> Result<Option<DeploymentRecord>, DeployError> {
        Ok(self
            .load()?
            .into_iter()
            .rev()
            .find(|r| r.status == DeployStatus::Promoted))
    }
}
