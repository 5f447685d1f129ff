// ABOUTME: Shared types used across runtime trait definitions.
// ABOUTME: ContainerConfig with its port, volume and restart settings.

use crate::types::ImageRef;
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for creating a container.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Name for the container.
    pub name: String,
    /// Image to run.
    pub image: ImageRef,
    /// Environment variables.
    pub env: HashMap<String, String>,
    /// Labels to apply.
    pub labels: HashMap<String, String>,
    /// Published ports.
    pub ports: Vec<PortMapping>,
    /// Volume mounts.
    pub volumes: Vec<VolumeMount>,
    /// Command to run (overrides image CMD).
    pub command: Option<Vec<String>>,
    /// Restart policy.
    pub restart_policy: RestartPolicyConfig,
    /// Stop timeout.
    pub stop_timeout: Option<Duration>,
    /// Network to attach to.
    pub network: Option<String>,
}

/// Port published on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    /// Host interface to bind.
    pub host_ip: Option<String>,
    /// Host port.
    pub host_port: u16,
    /// Container port (TCP).
    pub container_port: u16,
}

/// Volume mount configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    /// Source path or volume name.
    pub source: String,
    /// Target path in container.
    pub target: String,
    /// Read-only flag.
    pub read_only: bool,
}

impl VolumeMount {
    /// Parse `source:target` or `source:target:ro`.
    pub fn parse(mount: &str) -> Option<Self> {
        let parts: Vec<&str> = mount.split(':').collect();
        match parts.as_slice() {
            [source, target] => Some(Self {
                source: source.to_string(),
                target: target.to_string(),
                read_only: false,
            }),
            [source, target, mode] => Some(Self {
                source: source.to_string(),
                target: target.to_string(),
                read_only: *mode == "ro",
            }),
            _ => None,
        }
    }
}

/// Restart policy configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RestartPolicyConfig {
    /// Never restart.
    No,
    /// Restart unless explicitly stopped.
    #[default]
    UnlessStopped,
}
