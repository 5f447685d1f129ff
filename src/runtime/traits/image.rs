// ABOUTME: Image operations trait for container runtimes.
// ABOUTME: Build from an in-memory tar context and add tags.

use crate::types::ImageRef;
use async_trait::async_trait;
use bytes::Bytes;

/// A build of one image from an in-memory tar build context.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Tar archive of the build context.
    pub context: Bytes,
    /// Dockerfile path relative to the context root.
    pub dockerfile: String,
    /// Tag applied to the resulting image.
    pub image: ImageRef,
}

/// Image operations: build and tag.
#[async_trait]
pub trait ImageOps: Send + Sync {
    /// Build an image. Fails with `BuildFailed` when the build itself fails.
    async fn build_image(&self, request: &BuildRequest) -> Result<(), ImageError>;

    /// Add `target` as another tag of `source`.
    async fn tag_image(&self, source: &ImageRef, target: &ImageRef) -> Result<(), ImageError>;
}

/// Errors from image operations.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
