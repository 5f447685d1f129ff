// ABOUTME: Restores the previous release after a failed deployment attempt.
// ABOUTME: Stops the candidate, restores the snapshot and re-verifies the old slot.

use super::DeployError;
use super::backup::{BackupEntry, BackupManager};
use super::cancel::CancelSignal;
use super::containers::{find_slot_container, slot_target, stop_quietly};
use super::cutover::TrafficCutover;
use super::health::{HealthPolicy, Probe, wait_healthy};
use super::record::{LiveRelease, ProbeResult};
use crate::config::{Config, OnFailure};
use crate::proxy::{ProxyOps, TemplateContext};
use crate::runtime::ContainerOps;
use crate::types::{ContainerId, EnvironmentName};

/// What the failed attempt left behind.
///
/// The backup is restored only when `proxy_touched` is set. Restoring puts
/// every snapshotted path back, so writes the still-live previous release
/// made to those paths after the snapshot are lost. An attempt that never
/// replaced the live proxy configuration leaves the paths alone.
#[derive(Debug, Clone, Copy)]
pub struct RollbackPlan<'p> {
    pub candidate: Option<&'p ContainerId>,
    /// The live proxy configuration was replaced at some point.
    pub proxy_touched: bool,
    pub backup: Option<&'p BackupEntry>,
    pub previous: Option<&'p LiveRelease>,
}

pub struct RollbackManager<'a, R> {
    runtime: &'a R,
    proxy: &'a dyn ProxyOps,
    probe: &'a dyn Probe,
    cutover: &'a TrafficCutover<'a>,
    backups: &'a BackupManager,
    config: &'a Config,
    environment: &'a EnvironmentName,
}

impl<'a, R: ContainerOps> RollbackManager<'a, R> {
    pub fn new(
        runtime: &'a R,
        proxy: &'a dyn ProxyOps,
        probe: &'a dyn Probe,
        cutover: &'a TrafficCutover<'a>,
        backups: &'a BackupManager,
        config: &'a Config,
        environment: &'a EnvironmentName,
    ) -> Self {
        Self {
            runtime,
            proxy,
            probe,
            cutover,
            backups,
            config,
            environment,
        }
    }

    /// Return the service to the release that was live before the attempt.
    ///
    /// Every failure is fatal: the caller escalates and does not retry.
    pub async fn rollback(
        &self,
        plan: RollbackPlan<'_>,
        attempts: &mut Vec<ProbeResult>,
    ) -> Result<(), DeployError> {
        if let Some(candidate) = plan.candidate {
            match self.config.on_failure {
                OnFailure::Rollback => {
                    stop_quietly(self.runtime, candidate, self.config.stop.timeout)
                        .await
                        .map_err(|e| {
                            DeployError::Rollback(format!("failed to stop candidate: {}", e))
                        })?;
                    tracing::info!(container = %candidate, "candidate stopped");
                }
                OnFailure::KeepCandidate => {
                    tracing::warn!(container = %candidate, "leaving failed candidate running for inspection");
                }
            }
        }

        if plan.proxy_touched
            && let Some(entry) = plan.backup
        {
            self.backups.restore(entry).map_err(|e| {
                DeployError::Rollback(format!("failed to restore backup {}: {}", entry.id, e))
            })?;
            self.proxy.reload().await.map_err(|e| {
                DeployError::Rollback(format!("proxy reload after restore failed: {}", e))
            })?;
        }

        let Some(previous) = plan.previous else {
            tracing::info!("no previous release to restore");
            return Ok(());
        };

        self.revive(previous, attempts).await?;

        if plan.proxy_touched {
            self.confirm_public(previous, attempts).await?;
        }

        tracing::info!(slot = %previous.slot, version = %previous.version_tag, "previous release restored");
        Ok(())
    }

    /// Make sure the previous container runs and answers healthy on its slot.
    async fn revive(
        &self,
        previous: &LiveRelease,
        attempts: &mut Vec<ProbeResult>,
    ) -> Result<(), DeployError> {
        let container =
            find_slot_container(self.runtime, &self.config.service, self.environment, previous.slot)
                .await
                .map_err(|e| DeployError::Rollback(format!("failed to list containers: {}", e)))?
                .ok_or_else(|| {
                    DeployError::Rollback(format!(
                        "no container found for previous {} slot",
                        previous.slot
                    ))
                })?;

        if !container.is_running() {
            tracing::warn!(container = %container.name, "previous container not running, starting it");
            self.runtime.start_container(&container.id).await.map_err(|e| {
                DeployError::Rollback(format!("failed to start previous container: {}", e))
            })?;
        }

        let policy = HealthPolicy::from(&self.config.health);
        let target = slot_target(self.config, previous.slot);
        // Cancellation does not apply once rolling back.
        let mut never = CancelSignal::never();
        match wait_healthy(self.probe, &target, &policy, &mut never).await {
            Ok(results) => {
                attempts.extend(results);
                Ok(())
            }
            Err(failure) => {
                attempts.extend(failure.into_attempts());
                Err(DeployError::Rollback(format!(
                    "previous release on {} slot is not healthy",
                    previous.slot
                )))
            }
        }
    }

    /// Check the public path is served by the previous slot, re-pointing the
    /// proxy at it if the restored configuration does not.
    async fn confirm_public(
        &self,
        previous: &LiveRelease,
        attempts: &mut Vec<ProbeResult>,
    ) -> Result<(), DeployError> {
        if self.cutover.verify_public(previous.slot, attempts).await.is_ok() {
            return Ok(());
        }

        tracing::warn!(slot = %previous.slot, "public path not served by previous slot, rewriting proxy");
        let upstream = self.config.slots.address(previous.slot);
        let ctx = TemplateContext {
            service: &self.config.service,
            environment: self.environment,
            slot: previous.slot,
            upstream: &upstream,
            version: &previous.version_tag,
        };
        self.cutover
            .rewrite(&ctx)
            .await
            .map_err(|e| DeployError::Rollback(format!("failed to rewrite proxy: {}", e)))?;
        self.proxy
            .reload()
            .await
            .map_err(|e| DeployError::Rollback(format!("proxy reload failed: {}", e)))?;

        self.cutover
            .verify_public(previous.slot, attempts)
            .await
            .map_err(DeployError::Rollback)
    }
}
