// ABOUTME: Moves public traffic to a slot by rewriting and reloading the proxy.
// ABOUTME: Verifies through the public URL before the slot is marked live.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::DeployError;
use super::atomic::write_atomic;
use super::health::{Probe, ProbeTarget};
use super::record::ProbeResult;
use super::slots::{SlotAllocator, SlotState};
use crate::config::Config;
use crate::proxy::{ProxyOps, TemplateContext, render_template};
use crate::types::Slot;

/// Proxy files and public verification settings for one environment.
#[derive(Debug, Clone)]
pub struct CutoverSettings {
    pub config_path: PathBuf,
    pub template_path: PathBuf,
    /// Public URL probe without a slot expectation.
    pub public: ProbeTarget,
    pub verify_attempts: u32,
    pub verify_interval: Duration,
    pub request_timeout: Duration,
}

impl CutoverSettings {
    pub fn from_config(config: &Config) -> Self {
        let mut public = ProbeTarget::new(config.proxy.public_url.clone());
        public.host_header = config.proxy.public_host.clone();
        public.expected_status = config.health.expected_status;
        public.slot_header = config.proxy.slot_header.clone();
        Self {
            config_path: config.proxy.config_path.clone(),
            template_path: config.proxy.template.clone(),
            public,
            verify_attempts: config.proxy.verify_attempts.max(1),
            verify_interval: config.proxy.verify_interval,
            request_timeout: config.health.request_timeout,
        }
    }
}

/// Live configuration bytes replaced by a rewrite, for putting them back.
#[derive(Debug, Clone)]
pub(crate) struct PreviousConfig(Option<Vec<u8>>);

pub struct TrafficCutover<'a> {
    proxy: &'a dyn ProxyOps,
    probe: &'a dyn Probe,
    slots: &'a SlotAllocator,
    settings: &'a CutoverSettings,
}

impl<'a> TrafficCutover<'a> {
    pub fn new(
        proxy: &'a dyn ProxyOps,
        probe: &'a dyn Probe,
        slots: &'a SlotAllocator,
        settings: &'a CutoverSettings,
    ) -> Self {
        Self {
            proxy,
            probe,
            slots,
            settings,
        }
    }

    /// Point the proxy at `ctx.slot`, verify publicly, then mark the slot live.
    ///
    /// On failure the error reports whether the live configuration was
    /// replaced. A replaced configuration is restored and reloaded before
    /// returning, including when `mark_live` itself fails.
    pub async fn promote(
        &self,
        ctx: &TemplateContext<'_>,
        attempts: &mut Vec<ProbeResult>,
    ) -> Result<SlotState, DeployError> {
        let previous = self.rewrite(ctx).await?;

        if let Err(e) = self.proxy.reload().await {
            return Err(self.revert(previous, format!("{}", e)).await);
        }
        tracing::info!(slot = %ctx.slot, "proxy reloaded");

        if let Err(message) = self.verify_public(ctx.slot, attempts).await {
            return Err(self.revert(previous, message).await);
        }

        match self.slots.mark_live(ctx.slot, ctx.version) {
            Ok(state) => Ok(state),
            // Traffic already moved; the slot state still names the old release.
            Err(e) => Err(self.revert(previous, e.to_string()).await),
        }
    }

    /// Render, validate and swap in the configuration for `ctx`. The live file
    /// is untouched unless this returns `Ok`.
    pub(crate) async fn rewrite(
        &self,
        ctx: &TemplateContext<'_>,
    ) -> Result<PreviousConfig, DeployError> {
        let untouched = |message: String| DeployError::Cutover {
            message,
            proxy_touched: false,
        };

        let template = std::fs::read_to_string(&self.settings.template_path).map_err(|e| {
            untouched(format!(
                "failed to read proxy template {}: {}",
                self.settings.template_path.display(),
                e
            ))
        })?;
        let rendered = render_template(&template, ctx);

        let live = &self.settings.config_path;
        let dir = parent_dir(live);
        let mut tmp = tempfile::Builder::new()
            .prefix(".switchyard-")
            .suffix(".conf")
            .tempfile_in(dir)
            .map_err(|e| untouched(format!("failed to create temp file in {}: {}", dir.display(), e)))?;
        tmp.write_all(rendered.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| untouched(format!("failed to write candidate proxy config: {}", e)))?;

        self.proxy
            .validate(tmp.path())
            .await
            .map_err(|e| untouched(e.to_string()))?;

        let previous = match std::fs::read(live) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(untouched(format!(
                    "failed to read {}: {}",
                    live.display(),
                    e
                )));
            }
        };

        tmp.persist(live).map_err(|e| {
            untouched(format!("failed to replace {}: {}", live.display(), e.error))
        })?;
        tracing::debug!(path = %live.display(), slot = %ctx.slot, "proxy configuration replaced");

        Ok(PreviousConfig(previous))
    }

    /// Put back the bytes replaced by `rewrite` and reload.
    async fn revert(&self, previous: PreviousConfig, cause: String) -> DeployError {
        let live = &self.settings.config_path;
        let restored = match previous.0 {
            Some(bytes) => write_atomic(live, &bytes),
            None => std::fs::remove_file(live),
        };

        let message = match restored {
            Err(e) => format!("{}; restoring {} failed: {}", cause, live.display(), e),
            Ok(()) => match self.proxy.reload().await {
                Ok(()) => {
                    tracing::warn!("cutover failed, previous proxy configuration restored");
                    cause
                }
                Err(e) => format!("{}; reload after restore failed: {}", cause, e),
            },
        };

        DeployError::Cutover {
            message,
            proxy_touched: true,
        }
    }

    /// Probe the public URL until it answers healthy from `slot`.
    pub async fn verify_public(
        &self,
        slot: Slot,
        attempts: &mut Vec<ProbeResult>,
    ) -> Result<(), String> {
        let mut target = self.settings.public.clone();
        if target.slot_header.is_some() {
            target.expect_served_by = Some(slot.as_str().to_string());
        }

        let mut last = String::new();
        for attempt in 0..self.settings.verify_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.settings.verify_interval).await;
            }
            let result =
                match tokio::time::timeout(self.settings.request_timeout, self.probe.probe(&target))
                    .await
                {
                    Ok(r) => r,
                    Err(_) => ProbeResult::transport_error(
                        self.settings.request_timeout,
                        "request timed out",
                    ),
                };
            tracing::debug!(
                url = %target.url,
                success = result.success,
                status = %result.raw_status,
                served_by = ?result.served_by,
                "public verification probe"
            );
            let success = result.success;
            last = match &result.served_by {
                Some(served) => format!("status {} served by {}", result.raw_status, served),
                None => format!("status {}", result.raw_status),
            };
            attempts.push(result);
            if success {
                return Ok(());
            }
        }

        Err(format!(
            "public verification of {} slot failed after {} attempts ({})",
            slot, self.settings.verify_attempts, last
        ))
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
