// ABOUTME: Naming and lookup of the containers occupying blue/green slots.
// ABOUTME: Shared by the controller, rollback and the status command.

use std::time::Duration;

use super::health::ProbeTarget;
use crate::config::Config;
use crate::runtime::{ContainerError, ContainerFilters, ContainerOps, ContainerSummary};
use crate::types::{EnvironmentName, ServiceName, Slot};

/// `<service>-<environment>-<slot>`; one container per slot.
pub fn container_name(service: &ServiceName, environment: &EnvironmentName, slot: Slot) -> String {
    format!("{}-{}-{}", service, environment, slot.as_str())
}

/// The managed container in `slot`, running or not.
pub async fn find_slot_container<R: ContainerOps + ?Sized>(
    runtime: &R,
    service: &ServiceName,
    environment: &EnvironmentName,
    slot: Slot,
) -> Result<Option<ContainerSummary>, ContainerError> {
    let filters = ContainerFilters::for_service(service, environment, true).in_slot(slot);
    let mut containers = runtime.list_containers(&filters).await?;
    // Prefer a running one if stale duplicates exist.
    containers.sort_by_key(|c| !c.is_running());
    Ok(containers.into_iter().next())
}

/// Stop a container, treating "already stopped" and "gone" as done.
pub async fn stop_quietly<R: ContainerOps + ?Sized>(
    runtime: &R,
    container: &crate::types::ContainerId,
    timeout: Duration,
) -> Result<(), ContainerError> {
    match runtime.stop_container(container, timeout).await {
        Ok(()) | Err(ContainerError::NotRunning(_)) | Err(ContainerError::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Health probe aimed at a slot's host port.
pub fn slot_target(config: &Config, slot: Slot) -> ProbeTarget {
    let path = if config.health.path.starts_with('/') {
        config.health.path.clone()
    } else {
        format!("/{}", config.health.path)
    };
    let mut target = ProbeTarget::new(format!("http://{}{}", config.slots.address(slot), path));
    target.host_header = config.health.host.clone();
    target.expected_status = config.health.expected_status;
    target
}
