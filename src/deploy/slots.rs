// ABOUTME: Tracks which slot is live and which version it runs.
// ABOUTME: State is a small JSON file replaced atomically by mark_live.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::DeployError;
use super::atomic::write_atomic;
use crate::types::{Slot, VersionTag};

pub const SLOT_STATE_FILENAME: &str = "slot-state.json";

/// Persisted live-slot state. `live_slot` is `None` before the first promotion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotState {
    pub live_slot: Option<Slot>,
    pub live_version_tag: Option<VersionTag>,
    pub promoted_at: Option<DateTime<Utc>>,
}

impl SlotState {
    pub fn live(&self) -> Option<(Slot, VersionTag)> {
        match (self.live_slot, &self.live_version_tag) {
            (Some(slot), Some(tag)) => Some((slot, tag.clone())),
            _ => None,
        }
    }
}

/// Allocates slots for candidates and records promotions.
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    path: PathBuf,
}

impl SlotAllocator {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(SLOT_STATE_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> Result<SlotState, DeployError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SlotState::default());
            }
            Err(e) => {
                return Err(DeployError::state(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        serde_json::from_str(&content).map_err(|e| {
            DeployError::state(format!("corrupt slot state {}: {}", self.path.display(), e))
        })
    }

    pub fn current_live(&self) -> Result<Option<(Slot, VersionTag)>, DeployError> {
        Ok(self.state()?.live())
    }

    /// The slot a candidate goes into: the one not live, BLUE on first deploy.
    pub fn free_slot(&self) -> Result<Slot, DeployError> {
        Ok(match self.state()?.live_slot {
            Some(live) => live.other(),
            None => Slot::Blue,
        })
    }

    /// Record `slot` as live. Only called once the slot serves public traffic.
    pub fn mark_live(&self, slot: Slot, version_tag: &VersionTag) -> Result<SlotState, DeployError> {
        let state = SlotState {
            live_slot: Some(slot),
            live_version_tag: Some(version_tag.clone()),
            promoted_at: Some(Utc::now()),
        };
        let json = serde_json::to_vec_pretty(&state).map_err(DeployError::state)?;
        write_atomic(&self.path, &json).map_err(|e| {
            DeployError::state(format!("failed to write {}: {}", self.path.display(), e))
        })?;
        tracing::info!(slot = %slot, version = %version_tag, "marked slot live");
        Ok(state)
    }
}
