// ABOUTME: Blue/green deployment orchestration.
// ABOUTME: Controller, health gating, cutover, rollback, backups and persisted state.

mod atomic;
mod backup;
mod cancel;
mod containers;
mod controller;
mod cutover;
mod error;
mod health;
mod history;
mod lock;
mod record;
mod rollback;
mod slots;

pub use backup::{BackupEntry, BackupError, BackupManager};
pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use containers::{container_name, find_slot_container, slot_target};
pub use controller::{
    DeployReport, DeployRequest, DeploymentController, EXIT_DEPLOY_IN_PROGRESS, EXIT_ERROR,
    EXIT_FAILED, EXIT_PROMOTED, EXIT_ROLLBACK_FAILED, EXIT_ROLLED_BACK,
};
pub use cutover::{CutoverSettings, TrafficCutover};
pub use error::{DeployError, DeployErrorKind, LockHolderInfo};
pub use health::{HealthFailure, HealthPolicy, Probe, ProbeTarget, wait_healthy};
pub use history::{DeploymentHistory, HISTORY_FILENAME};
pub use lock::{DeployLock, LockInfo};
pub use record::{DeployStatus, DeploymentRecord, LiveRelease, ProbeResult};
pub use rollback::{RollbackManager, RollbackPlan};
pub use slots::{SLOT_STATE_FILENAME, SlotAllocator, SlotState};
