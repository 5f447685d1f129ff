// ABOUTME: Container operations trait for container runtimes.
// ABOUTME: Create, start, stop, remove, list and wait for containers.

use super::shared_types::ContainerConfig;
use crate::types::{ContainerId, EnvironmentName, ServiceName, Slot};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Label marking containers created by switchyard.
pub const LABEL_MANAGED: &str = "switchyard.managed";
/// Label carrying the service name.
pub const LABEL_SERVICE: &str = "switchyard.service";
/// Label carrying the environment name.
pub const LABEL_ENVIRONMENT: &str = "switchyard.environment";
/// Label carrying the slot (`blue`/`green`).
pub const LABEL_SLOT: &str = "switchyard.slot";
/// Label carrying the release version tag.
pub const LABEL_VERSION: &str = "switchyard.version";

/// Container lifecycle operations.
#[async_trait]
pub trait ContainerOps: Send + Sync {
    /// Create a container from the given configuration.
    async fn create_container(&self, config: &ContainerConfig)
    -> Result<ContainerId, ContainerError>;

    /// Start a created container.
    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError>;

    /// Stop a running container.
    async fn stop_container(&self, id: &ContainerId, timeout: Duration)
    -> Result<(), ContainerError>;

    /// Remove a container.
    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError>;

    /// List containers matching the given filters.
    async fn list_containers(
        &self,
        filters: &ContainerFilters,
    ) -> Result<Vec<ContainerSummary>, ContainerError>;

    /// Block until the container exits and return its exit code.
    async fn wait_container(&self, id: &ContainerId) -> Result<i64, ContainerError>;
}

/// Filters for listing containers.
#[derive(Debug, Clone, Default)]
pub struct ContainerFilters {
    /// Filter by label (key=value).
    pub labels: HashMap<String, String>,
    /// Filter by name (supports partial match).
    pub name: Option<String>,
    /// Include stopped containers.
    pub all: bool,
}

impl ContainerFilters {
    /// Managed containers of a service in one environment.
    pub fn for_service(service: &ServiceName, environment: &EnvironmentName, all: bool) -> Self {
        let mut labels = HashMap::new();
        labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
        labels.insert(LABEL_SERVICE.to_string(), service.to_string());
        labels.insert(LABEL_ENVIRONMENT.to_string(), environment.to_string());
        Self {
            labels,
            name: None,
            all,
        }
    }

    /// Narrow the filter to a single slot.
    pub fn in_slot(mut self, slot: Slot) -> Self {
        self.labels
            .insert(LABEL_SLOT.to_string(), slot.as_str().to_string());
        self
    }
}

/// Summary information about a container.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    /// Container ID.
    pub id: ContainerId,
    /// Container name.
    pub name: String,
    /// Image used.
    pub image: String,
    /// Current state (`running`, `exited`, ...).
    pub state: String,
    /// Status message.
    pub status: String,
    /// Labels.
    pub labels: HashMap<String, String>,
}

impl ContainerSummary {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Errors from container operations.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("container already exists: {0}")]
    AlreadyExists(String),

    #[error("container not running: {0}")]
    NotRunning(String),

    #[error("container already running: {0}")]
    AlreadyRunning(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
