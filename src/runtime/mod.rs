// ABOUTME: Container runtime access for Docker and Podman.
// ABOUTME: Capability traits, socket detection, and the bollard-backed implementation.

mod bollard;
mod detection;
mod error;
mod traits;
mod types;

pub use bollard::BollardRuntime;
pub use detection::{DetectionError, detect_local, resolve_runtime};
pub use error::{RuntimeError, RuntimeErrorKind};
pub use traits::*;
pub use types::{RuntimeConfig, RuntimeEndpoint, RuntimeType};

/// Resolve the runtime socket and connect to it, checking reachability.
pub async fn connect_local(config: &RuntimeConfig) -> Result<BollardRuntime, RuntimeError> {
    let endpoint = resolve_runtime(config)?;
    tracing::debug!(
        "Connecting to {} at {}",
        endpoint.runtime_type,
        endpoint.socket_path
    );
    let runtime = BollardRuntime::connect(&endpoint)?;
    runtime.ping().await?;
    Ok(runtime)
}
