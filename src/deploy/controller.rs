// ABOUTME: Drives one blue/green deployment attempt through its status machine.
// ABOUTME: Build, test, start, health check, promote; roll back or fail otherwise.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;

use super::DeployError;
use super::backup::{BackupEntry, BackupManager};
use super::cancel::CancelSignal;
use super::containers::{container_name, find_slot_container, slot_target, stop_quietly};
use super::cutover::{CutoverSettings, TrafficCutover};
use super::health::{HealthFailure, HealthPolicy, Probe, wait_healthy};
use super::history::DeploymentHistory;
use super::lock::DeployLock;
use super::record::{DeployStatus, DeploymentRecord, LiveRelease};
use super::rollback::{RollbackManager, RollbackPlan};
use super::slots::SlotAllocator;
use crate::builder::{BuiltImage, ImageBuilder, SmokeTest, SourceRef, run_smoke_test};
use crate::config::{Config, resolve_env_map};
use crate::diagnostics::{Diagnostics, Warning};
use crate::notify::{Notification, Notifier};
use crate::proxy::{ProxyOps, TemplateContext};
use crate::runtime::{
    ContainerConfig, ContainerOps, ImageOps, LABEL_ENVIRONMENT, LABEL_MANAGED, LABEL_SERVICE,
    LABEL_SLOT, LABEL_VERSION, LogOps, PortMapping, RestartPolicyConfig, VolumeMount, tail_logs,
};
use crate::types::{ContainerId, EnvironmentName, Slot};

pub const EXIT_PROMOTED: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_FAILED: i32 = 2;
pub const EXIT_ROLLED_BACK: i32 = 3;
pub const EXIT_ROLLBACK_FAILED: i32 = 4;
pub const EXIT_DEPLOY_IN_PROGRESS: i32 = 5;

/// Candidate log lines logged when a health check fails.
const FAILURE_LOG_LINES: u64 = 50;

/// Operator options for one `deploy` invocation.
#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    pub skip_tests: bool,
    /// Overrides the health check timeout.
    pub timeout: Option<Duration>,
    pub allow_missing_backup: bool,
    /// Break an existing deploy lock.
    pub force: bool,
}

/// How an attempt ended.
#[derive(Debug)]
pub struct DeployReport {
    pub record: DeploymentRecord,
    /// The error that ended the attempt; `None` when promoted.
    pub error: Option<DeployError>,
    pub history_path: PathBuf,
    pub warnings: Vec<Warning>,
}

impl DeployReport {
    pub fn exit_code(&self) -> i32 {
        match &self.error {
            Some(e) if e.is_fatal() => EXIT_ROLLBACK_FAILED,
            _ => match self.record.status {
                DeployStatus::Promoted => EXIT_PROMOTED,
                DeployStatus::RolledBack => EXIT_ROLLED_BACK,
                _ => EXIT_FAILED,
            },
        }
    }
}

/// Mutable state of the attempt in flight.
struct Attempt {
    record: DeploymentRecord,
    diagnostics: Diagnostics,
    built: Option<BuiltImage>,
    candidate: Option<ContainerId>,
    backup: Option<BackupEntry>,
    proxy_touched: bool,
}

pub struct DeploymentController<'a, R> {
    config: &'a Config,
    environment: &'a EnvironmentName,
    runtime: &'a R,
    probe: &'a dyn Probe,
    proxy: &'a dyn ProxyOps,
    notifier: &'a dyn Notifier,
    container_env: HashMap<String, String>,
}

impl<'a, R> DeploymentController<'a, R>
where
    R: ImageOps + ContainerOps + LogOps,
{
    /// `config` must already have the environment's overrides applied.
    pub fn new(
        config: &'a Config,
        environment: &'a EnvironmentName,
        runtime: &'a R,
        probe: &'a dyn Probe,
        proxy: &'a dyn ProxyOps,
        notifier: &'a dyn Notifier,
    ) -> crate::error::Result<Self> {
        Ok(Self {
            config,
            environment,
            runtime,
            probe,
            proxy,
            notifier,
            container_env: resolve_env_map(&config.env)?,
        })
    }

    /// Run one attempt to a terminal status.
    ///
    /// Returns `Err` only when the attempt could not begin (lock held,
    /// unreadable state). Everything after that is reported in the
    /// `DeployReport`, which has been persisted and notified.
    pub async fn run(
        &self,
        request: &DeployRequest,
        mut cancel: CancelSignal,
    ) -> Result<DeployReport, DeployError> {
        let config = self.config;
        let state_dir = config.state_dir_for(self.environment);
        let lock = DeployLock::acquire(
            &config.lock_path_for(self.environment),
            &config.service,
            self.environment,
            request.force,
        )?;

        let history = DeploymentHistory::new(&state_dir);
        let slots = SlotAllocator::new(&state_dir);
        let backups = BackupManager::new(&config.backup.dir);
        let settings = CutoverSettings::from_config(config);
        let cutover = TrafficCutover::new(self.proxy, self.probe, &slots, &settings);

        let mut attempt = Attempt {
            record: DeploymentRecord::new(
                config.service.clone(),
                self.environment.clone(),
                Utc::now(),
            ),
            diagnostics: Diagnostics::default(),
            built: None,
            candidate: None,
            backup: None,
            proxy_touched: false,
        };
        attempt.record.previous = slots
            .current_live()?
            .map(|(slot, version_tag)| LiveRelease { slot, version_tag });

        tracing::info!(
            id = %attempt.record.id,
            service = %config.service,
            environment = %self.environment,
            previous = ?attempt.record.previous,
            "deployment started"
        );

        let mut status = DeployStatus::Building;
        let outcome = loop {
            attempt.record.status = status;
            self.persist(&history, &mut attempt);
            tracing::info!(status = %status, "deployment step");

            let step = match status {
                DeployStatus::Building => self.build(&mut attempt, &mut cancel).await,
                DeployStatus::Testing => self.smoke_test(&mut attempt, request, &mut cancel).await,
                DeployStatus::Starting => {
                    self.start_candidate(&mut attempt, request, &slots, &backups, &mut cancel)
                        .await
                }
                DeployStatus::HealthChecking => {
                    self.health_check(&mut attempt, request, &mut cancel).await
                }
                DeployStatus::Promoting => self.promote(&mut attempt, &cutover).await,
                DeployStatus::Promoted | DeployStatus::RolledBack | DeployStatus::Failed => {
                    break Ok(());
                }
            };

            match step {
                Ok(next) => status = next,
                Err(e) => break Err(e),
            }
        };

        let error = match outcome {
            Ok(()) => {
                self.after_promotion(&mut attempt, &backups).await;
                attempt.record.finish(DeployStatus::Promoted, None);
                None
            }
            Err(error) => {
                self.fail(&mut attempt, error, &backups, &cutover, status)
                    .await
            }
        };

        self.persist(&history, &mut attempt);
        self.send_notification(&mut attempt, error.as_ref()).await;

        if let Err(e) = lock.release() {
            attempt.diagnostics.warn(Warning::lock_release(e.to_string()));
        }

        tracing::info!(
            id = %attempt.record.id,
            status = %attempt.record.status,
            version = ?attempt.record.version_tag,
            "deployment finished"
        );

        Ok(DeployReport {
            record: attempt.record,
            error,
            history_path: history.path().to_path_buf(),
            warnings: attempt.diagnostics.into_warnings(),
        })
    }

    async fn build(
        &self,
        attempt: &mut Attempt,
        cancel: &mut CancelSignal,
    ) -> Result<DeployStatus, DeployError> {
        let builder = ImageBuilder::new(self.runtime, &self.config.image, &self.config.build.dockerfile);
        let source = SourceRef::from_config(&self.config.build);
        let built = cancellable(cancel, builder.build(&source))
            .await?
            .map_err(|e| DeployError::Build(e.to_string()))?;

        tracing::info!(image = %built.image, "image built");
        attempt.record.version_tag = Some(built.version_tag.clone());
        attempt.built = Some(built);
        Ok(DeployStatus::Testing)
    }

    async fn smoke_test(
        &self,
        attempt: &mut Attempt,
        request: &DeployRequest,
        cancel: &mut CancelSignal,
    ) -> Result<DeployStatus, DeployError> {
        let command = match (&self.config.test.command, request.skip_tests) {
            (Some(command), false) => command,
            (_, true) => {
                tracing::info!("smoke test skipped (--skip-tests)");
                return Ok(DeployStatus::Starting);
            }
            (None, false) => {
                tracing::debug!("no smoke test configured");
                return Ok(DeployStatus::Starting);
            }
        };
        let built = built_image(attempt)?;

        let test = SmokeTest {
            container_name: format!("{}-{}-smoke-test", self.config.service, self.environment),
            image: &built.image,
            command,
            env: self.container_env.clone(),
            timeout: self.config.test.timeout,
        };
        cancellable(cancel, run_smoke_test(self.runtime, &test))
            .await?
            .map_err(DeployError::TestFailure)?;

        tracing::info!("smoke test passed");
        Ok(DeployStatus::Starting)
    }

    async fn start_candidate(
        &self,
        attempt: &mut Attempt,
        request: &DeployRequest,
        slots: &SlotAllocator,
        backups: &BackupManager,
        cancel: &mut CancelSignal,
    ) -> Result<DeployStatus, DeployError> {
        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        match backups.snapshot(&self.config.backup.paths) {
            Ok(entry) => {
                attempt.record.backup = Some(entry.archive_location.clone());
                attempt.backup = Some(entry);
            }
            Err(e) if request.allow_missing_backup || !self.config.backup.required => {
                attempt
                    .diagnostics
                    .warn(Warning::backup_skipped(format!("continuing without backup: {}", e)));
            }
            Err(e) => return Err(DeployError::Backup(e.to_string())),
        }

        let slot = slots.free_slot()?;
        attempt.record.slot = Some(slot);
        let service = &self.config.service;

        // A release decommissioned by an earlier promotion still occupies the slot.
        if let Some(old) = find_slot_container(self.runtime, service, self.environment, slot).await? {
            tracing::info!(container = %old.name, slot = %slot, "removing previous occupant of slot");
            stop_quietly(self.runtime, &old.id, self.config.stop.timeout).await?;
            self.runtime.remove_container(&old.id, true).await?;
        }

        let built = built_image(attempt)?;
        let container_config = self.candidate_config(built, slot);
        let id = self.runtime.create_container(&container_config).await?;
        attempt.candidate = Some(id.clone());

        self.runtime.start_container(&id).await?;
        tracing::info!(
            container = %container_config.name,
            slot = %slot,
            address = %self.config.slots.address(slot),
            "candidate started"
        );
        Ok(DeployStatus::HealthChecking)
    }

    fn candidate_config(&self, built: &BuiltImage, slot: Slot) -> ContainerConfig {
        let config = self.config;
        let mut labels = HashMap::new();
        labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
        labels.insert(LABEL_SERVICE.to_string(), config.service.to_string());
        labels.insert(LABEL_ENVIRONMENT.to_string(), self.environment.to_string());
        labels.insert(LABEL_SLOT.to_string(), slot.as_str().to_string());
        labels.insert(LABEL_VERSION.to_string(), built.version_tag.to_string());

        ContainerConfig {
            name: container_name(&config.service, self.environment, slot),
            image: built.image.clone(),
            env: self.container_env.clone(),
            labels,
            ports: vec![PortMapping {
                host_ip: Some(config.slots.host_ip.clone()),
                host_port: config.slots.port(slot),
                container_port: config.slots.container_port,
            }],
            volumes: config
                .volumes
                .iter()
                .filter_map(|v| VolumeMount::parse(v))
                .collect(),
            command: config.command.clone(),
            restart_policy: RestartPolicyConfig::UnlessStopped,
            stop_timeout: Some(config.stop.timeout),
            network: config.network.clone(),
        }
    }

    async fn health_check(
        &self,
        attempt: &mut Attempt,
        request: &DeployRequest,
        cancel: &mut CancelSignal,
    ) -> Result<DeployStatus, DeployError> {
        let slot = attempt
            .record
            .slot
            .ok_or_else(|| DeployError::state("no slot assigned before health check"))?;
        let mut policy = HealthPolicy::from(&self.config.health);
        if let Some(timeout) = request.timeout {
            policy.timeout = timeout;
        }
        let target = slot_target(self.config, slot);

        match wait_healthy(self.probe, &target, &policy, cancel).await {
            Ok(results) => {
                tracing::info!(attempts = results.len(), "candidate healthy");
                attempt.record.health_check_attempts.extend(results);
                Ok(DeployStatus::Promoting)
            }
            Err(failure) => {
                let cancelled = matches!(failure, HealthFailure::Cancelled { .. });
                let results = failure.into_attempts();
                let count = results.len();
                attempt.record.health_check_attempts.extend(results);
                self.log_candidate_tail(attempt).await;
                if cancelled {
                    Err(DeployError::Cancelled)
                } else {
                    Err(DeployError::HealthCheckTimeout {
                        attempts: count,
                        secs: policy.timeout.as_secs(),
                    })
                }
            }
        }
    }

    async fn log_candidate_tail(&self, attempt: &Attempt) {
        let Some(ref id) = attempt.candidate else {
            return;
        };
        match tail_logs(self.runtime, id, FAILURE_LOG_LINES).await {
            Ok(lines) => {
                for line in lines {
                    tracing::warn!(target: "switchyard::candidate", "{}", line.content.trim_end());
                }
            }
            Err(e) => tracing::debug!("failed to read candidate logs: {}", e),
        }
    }

    async fn promote(
        &self,
        attempt: &mut Attempt,
        cutover: &TrafficCutover<'_>,
    ) -> Result<DeployStatus, DeployError> {
        let slot = attempt
            .record
            .slot
            .ok_or_else(|| DeployError::state("no slot assigned before promotion"))?;
        let built = built_image(attempt)?.clone();
        let upstream = self.config.slots.address(slot);
        let ctx = TemplateContext {
            service: &self.config.service,
            environment: self.environment,
            slot,
            upstream: &upstream,
            version: &built.version_tag,
        };

        match cutover
            .promote(&ctx, &mut attempt.record.health_check_attempts)
            .await
        {
            Ok(state) => {
                tracing::info!(slot = %slot, promoted_at = ?state.promoted_at, "traffic cut over");
                Ok(DeployStatus::Promoted)
            }
            Err(e) => {
                if let DeployError::Cutover { proxy_touched, .. } = &e {
                    attempt.proxy_touched |= *proxy_touched;
                }
                Err(e)
            }
        }
    }

    /// Retire the previous release and prune old backups. Failures here do
    /// not change the outcome.
    async fn after_promotion(&self, attempt: &mut Attempt, backups: &BackupManager) {
        if let Some(previous) = attempt.record.previous.clone() {
            let grace = self.config.cleanup.grace_period;
            if !grace.is_zero() {
                tracing::info!(grace_secs = grace.as_secs(), "draining previous release");
                tokio::time::sleep(grace).await;
            }
            match find_slot_container(
                self.runtime,
                &self.config.service,
                self.environment,
                previous.slot,
            )
            .await
            {
                Ok(Some(old)) => {
                    if let Err(e) = stop_quietly(self.runtime, &old.id, self.config.stop.timeout).await {
                        attempt
                            .diagnostics
                            .warn(Warning::cleanup(format!("failed to stop {}: {}", old.name, e)));
                    } else {
                        tracing::info!(container = %old.name, "previous release stopped");
                    }
                }
                Ok(None) => tracing::debug!(slot = %previous.slot, "no previous container to stop"),
                Err(e) => attempt
                    .diagnostics
                    .warn(Warning::cleanup(format!("failed to list containers: {}", e))),
            }
        }

        match backups.prune(self.config.backup.retain_count) {
            Ok(removed) if !removed.is_empty() => {
                tracing::info!(removed = removed.len(), "pruned old backups");
            }
            Ok(_) => {}
            Err(e) => attempt.diagnostics.warn(Warning::prune_failed(e.to_string())),
        }
    }

    /// Settle a failed attempt as FAILED or ROLLED_BACK. Returns the error to report.
    async fn fail(
        &self,
        attempt: &mut Attempt,
        error: DeployError,
        backups: &BackupManager,
        cutover: &TrafficCutover<'_>,
        failed_in: DeployStatus,
    ) -> Option<DeployError> {
        tracing::error!(status = %failed_in, "deployment failed: {}", error);

        // Nothing was started: nothing to undo.
        if attempt.candidate.is_none() && failed_in != DeployStatus::Promoting {
            attempt
                .record
                .finish(DeployStatus::Failed, Some(error.to_string()));
            return Some(error);
        }

        let manager = RollbackManager::new(
            self.runtime,
            self.proxy,
            self.probe,
            cutover,
            backups,
            self.config,
            self.environment,
        );
        let plan = RollbackPlan {
            candidate: attempt.candidate.as_ref(),
            proxy_touched: attempt.proxy_touched,
            backup: attempt.backup.as_ref(),
            previous: attempt.record.previous.as_ref(),
        };

        let mut probes = Vec::new();
        let result = manager.rollback(plan, &mut probes).await;
        attempt.record.health_check_attempts.extend(probes);

        match result {
            Ok(()) => {
                attempt
                    .record
                    .finish(DeployStatus::RolledBack, Some(error.to_string()));
                Some(error)
            }
            Err(rollback_error) => {
                tracing::error!("rollback failed, manual intervention required: {}", rollback_error);
                attempt.record.finish(
                    DeployStatus::Failed,
                    Some(format!("{}; {}", error, rollback_error)),
                );
                Some(rollback_error)
            }
        }
    }

    fn persist(&self, history: &DeploymentHistory, attempt: &mut Attempt) {
        if let Err(e) = history.upsert(&attempt.record) {
            attempt.diagnostics.warn(Warning::history_write(e.to_string()));
        }
    }

    async fn send_notification(&self, attempt: &mut Attempt, error: Option<&DeployError>) {
        let fatal = error.is_some_and(DeployError::is_fatal);
        let notification = Notification::for_record(&attempt.record, fatal);
        if fatal {
            tracing::error!("{}", notification.text);
        }
        if let Err(e) = self.notifier.notify(&notification).await {
            attempt
                .diagnostics
                .warn(Warning::notify_failed(format!("notification not delivered: {}", e)));
        }
    }
}

fn built_image(attempt: &Attempt) -> Result<&BuiltImage, DeployError> {
    attempt
        .built
        .as_ref()
        .ok_or_else(|| DeployError::state("no image built"))
}

/// Run `fut` unless cancellation arrives first.
async fn cancellable<F: Future>(cancel: &mut CancelSignal, fut: F) -> Result<F::Output, DeployError> {
    if cancel.is_cancelled() {
        return Err(DeployError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DeployError::Cancelled),
        out = fut => Ok(out),
    }
}
