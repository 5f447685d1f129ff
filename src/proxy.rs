// ABOUTME: Reverse proxy control: config template rendering, validation and reload.
// ABOUTME: CommandProxy shells out to the operator's proxy commands (nginx by default).

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

use crate::types::{EnvironmentName, ServiceName, Slot, VersionTag};

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("proxy configuration rejected: {0}")]
    Invalid(String),

    #[error("proxy reload failed: {0}")]
    ReloadFailed(String),

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Operations on the reverse proxy in front of the slots.
#[async_trait]
pub trait ProxyOps: Send + Sync {
    /// Check a candidate configuration file without applying it.
    async fn validate(&self, config_path: &Path) -> Result<(), ProxyError>;

    /// Make the proxy pick up the live configuration file.
    async fn reload(&self) -> Result<(), ProxyError>;
}

/// Runs shell commands. `{config}` in the validate command is replaced by the
/// path being validated.
#[derive(Debug, Clone)]
pub struct CommandProxy {
    validate_command: String,
    reload_command: String,
}

impl CommandProxy {
    pub fn new(validate_command: impl Into<String>, reload_command: impl Into<String>) -> Self {
        Self {
            validate_command: validate_command.into(),
            reload_command: reload_command.into(),
        }
    }

    async fn run(command: &str) -> Result<std::process::Output, ProxyError> {
        tracing::debug!(command, "running proxy command");
        Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|source| ProxyError::Spawn {
                command: command.to_string(),
                source,
            })
    }
}

fn describe_failure(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exit status {}", output.status)
    } else {
        stderr.to_string()
    }
}

#[async_trait]
impl ProxyOps for CommandProxy {
    async fn validate(&self, config_path: &Path) -> Result<(), ProxyError> {
        let command = self
            .validate_command
            .replace("{config}", &config_path.to_string_lossy());
        let output = Self::run(&command).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ProxyError::Invalid(describe_failure(&output)))
        }
    }

    async fn reload(&self) -> Result<(), ProxyError> {
        let output = Self::run(&self.reload_command).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ProxyError::ReloadFailed(describe_failure(&output)))
        }
    }
}

/// Values substituted into the proxy template.
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    pub service: &'a ServiceName,
    pub environment: &'a EnvironmentName,
    pub slot: Slot,
    /// `host:port` of the slot.
    pub upstream: &'a str,
    pub version: &'a VersionTag,
}

/// Replace `{{service}}`, `{{environment}}`, `{{slot}}`, `{{upstream}}` and
/// `{{version}}`. Unknown placeholders are left alone.
pub fn render_template(template: &str, ctx: &TemplateContext<'_>) -> String {
    template
        .replace("{{service}}", ctx.service.as_str())
        .replace("{{environment}}", ctx.environment.as_str())
        .replace("{{slot}}", ctx.slot.as_str())
        .replace("{{upstream}}", ctx.upstream)
        .replace("{{version}}", ctx.version.as_str())
}
