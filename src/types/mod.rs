// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Names, slots, version tags and image references used across the crate.

mod id;
mod image_ref;
mod service_name;
mod slot;
mod version_tag;

pub use id::ContainerId;
pub use image_ref::{ImageRef, ParseImageRefError};
pub use service_name::{EnvironmentName, NameError, ServiceName};
pub use slot::{ParseSlotError, Slot};
pub use version_tag::{VersionTag, VersionTagError};
