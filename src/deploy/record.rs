// ABOUTME: Deployment record and probe result types.
// ABOUTME: The record is the audit trail of one attempt, persisted on every status change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{EnvironmentName, ServiceName, Slot, VersionTag};

/// Where a deployment attempt is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeployStatus {
    Building,
    Testing,
    Starting,
    HealthChecking,
    Promoting,
    Promoted,
    RolledBack,
    Failed,
}

impl DeployStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeployStatus::Promoted | DeployStatus::RolledBack | DeployStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeployStatus::Building => "BUILDING",
            DeployStatus::Testing => "TESTING",
            DeployStatus::Starting => "STARTING",
            DeployStatus::HealthChecking => "HEALTH_CHECKING",
            DeployStatus::Promoting => "PROMOTING",
            DeployStatus::Promoted => "PROMOTED",
            DeployStatus::RolledBack => "ROLLED_BACK",
            DeployStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single health or verification probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
    /// HTTP status code, or the transport error.
    pub raw_status: String,
    /// Value of the slot header, when the response carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_by: Option<String>,
}

impl ProbeResult {
    pub fn transport_error(latency: Duration, error: impl fmt::Display) -> Self {
        Self {
            timestamp: Utc::now(),
            success: false,
            latency,
            raw_status: error.to_string(),
            served_by: None,
        }
    }
}

/// The release that was live when an attempt began.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveRelease {
    pub slot: Slot,
    pub version_tag: VersionTag,
}

/// Audit record of one deployment attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: String,
    pub service: ServiceName,
    pub environment: EnvironmentName,
    #[serde(default)]
    pub version_tag: Option<VersionTag>,
    #[serde(default)]
    pub slot: Option<Slot>,
    pub status: DeployStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub health_check_attempts: Vec<ProbeResult>,
    /// Archive of the snapshot taken before the candidate started.
    #[serde(default)]
    pub backup: Option<PathBuf>,
    #[serde(default)]
    pub previous: Option<LiveRelease>,
    #[serde(default)]
    pub error: Option<String>,
}

impl DeploymentRecord {
    pub fn new(service: ServiceName, environment: EnvironmentName, now: DateTime<Utc>) -> Self {
        Self {
            id: now.format("%Y%m%d-%H%M%S-%3f").to_string(),
            service,
            environment,
            version_tag: None,
            slot: None,
            status: DeployStatus::Building,
            started_at: now,
            ended_at: None,
            health_check_attempts: Vec::new(),
            backup: None,
            previous: None,
            error: None,
        }
    }

    /// Move to a terminal status, stamping the end time.
    pub fn finish(&mut self, status: DeployStatus, error: Option<String>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.ended_at = Some(Utc::now());
        self.error = error;
    }
}
