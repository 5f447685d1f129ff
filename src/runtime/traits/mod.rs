// ABOUTME: Composable capability traits for container runtimes.
// ABOUTME: ImageOps, ContainerOps, LogOps and RuntimeInfo, implemented by BollardRuntime.

mod container;
mod image;
mod logs;
mod runtime_info;
mod shared_types;

pub use container::{
    ContainerError, ContainerFilters, ContainerOps, ContainerSummary, LABEL_ENVIRONMENT,
    LABEL_MANAGED, LABEL_SERVICE, LABEL_SLOT, LABEL_VERSION,
};
pub use image::{BuildRequest, ImageError, ImageOps};
pub use logs::{LogError, LogLine, LogOps, LogOptions, LogStream, tail_logs};
pub use runtime_info::{RuntimeInfo, RuntimeInfoError};
pub use shared_types::*;
