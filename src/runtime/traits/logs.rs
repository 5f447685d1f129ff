// ABOUTME: Log operations trait for container runtimes.
// ABOUTME: Stream container logs, plus a helper collecting the last lines.

use crate::types::ContainerId;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// Log streaming operations.
#[async_trait]
pub trait LogOps: Send + Sync {
    /// Stream logs from a container.
    async fn container_logs(
        &self,
        id: &ContainerId,
        opts: &LogOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<LogLine, LogError>> + Send>>, LogError>;
}

/// Options for log streaming.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Include stdout.
    pub stdout: bool,
    /// Include stderr.
    pub stderr: bool,
    /// Number of lines to show from end (None = all).
    pub tail: Option<u64>,
}

impl LogOptions {
    /// Create options for tailing the last N lines.
    pub fn tail(n: u64) -> Self {
        Self {
            stdout: true,
            stderr: true,
            tail: Some(n),
        }
    }
}

/// A single log line from a container.
#[derive(Debug, Clone)]
pub struct LogLine {
    /// The log content.
    pub content: String,
    /// Whether this is from stdout or stderr.
    pub stream: LogStream,
}

/// Log stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Errors from log operations.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Collect the last `n` log lines of a container.
pub async fn tail_logs<L: LogOps + ?Sized>(
    runtime: &L,
    id: &ContainerId,
    n: u64,
) -> Result<Vec<LogLine>, LogError> {
    let mut stream = runtime.container_logs(id, &LogOptions::tail(n)).await?;
    let mut lines = Vec::new();
    while let Some(line) = stream.next().await {
        lines.push(line?);
    }
    Ok(lines)
}
