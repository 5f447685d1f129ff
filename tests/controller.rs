// ABOUTME: End-to-end deployment scenarios against in-memory runtime and proxy fakes.
// ABOUTME: Covers promotion, smoke tests, health timeout rollback, cutover failure and locking.

mod support;

use std::time::Duration;
use support::{Harness, SLOT_HEADER};
use switchyard::deploy::{
    DeployError, DeployErrorKind, DeployLock, DeployRequest, DeployStatus, DeploymentHistory,
    EXIT_FAILED, EXIT_PROMOTED, EXIT_ROLLBACK_FAILED, EXIT_ROLLED_BACK, SlotAllocator, cancel_pair,
};
use switchyard::notify::Priority;
use switchyard::runtime::{
    LABEL_ENVIRONMENT, LABEL_MANAGED, LABEL_SERVICE, LABEL_SLOT, LABEL_VERSION,
};
use switchyard::types::Slot;

#[tokio::test(start_paused = true)]
async fn first_deploy_promotes_blue() {
    let h = Harness::new();

    let report = h.deploy(&DeployRequest::default()).await.unwrap();

    assert_eq!(report.record.status, DeployStatus::Promoted);
    assert_eq!(report.exit_code(), EXIT_PROMOTED);
    assert_eq!(report.record.slot, Some(Slot::Blue));
    assert!(report.record.previous.is_none());
    assert!(report.record.ended_at.is_some());

    let state = SlotAllocator::new(&h.state_dir()).state().unwrap();
    assert_eq!(state.live_slot, Some(Slot::Blue));
    assert_eq!(state.live_version_tag, report.record.version_tag);
    assert!(h.live_config().contains("# slot=blue"));
    assert_eq!(h.world.lock().proxy_slot, Some(Slot::Blue));
}

#[tokio::test(start_paused = true)]
async fn second_deploy_flips_to_green_and_stops_blue() {
    let h = Harness::new();
    h.deploy(&DeployRequest::default()).await.unwrap();

    let report = h.deploy(&DeployRequest::default()).await.unwrap();

    assert_eq!(report.record.status, DeployStatus::Promoted);
    assert_eq!(report.record.slot, Some(Slot::Green));
    assert_eq!(report.record.previous.as_ref().map(|p| p.slot), Some(Slot::Blue));
    assert_eq!(
        SlotAllocator::new(&h.state_dir()).current_live().unwrap().map(|(s, _)| s),
        Some(Slot::Green)
    );

    let world = h.world.lock();
    assert_eq!(world.proxy_slot, Some(Slot::Green));
    let blue = world.container(&h.slot_container_name(Slot::Blue)).unwrap();
    assert!(!blue.running, "previous release is stopped");
    let green = world.container(&h.slot_container_name(Slot::Green)).unwrap();
    assert!(green.running);
}

#[tokio::test(start_paused = true)]
async fn stopped_previous_release_is_kept_until_its_slot_is_reused() {
    let h = Harness::new();
    h.deploy(&DeployRequest::default()).await.unwrap();
    h.deploy(&DeployRequest::default()).await.unwrap();

    let blue_name = h.slot_container_name(Slot::Blue);
    assert!(h.world.lock().container(&blue_name).is_some());
    assert_eq!(h.world.lock().count_calls(&format!("remove {}", blue_name)), 0);

    let report = h.deploy(&DeployRequest::default()).await.unwrap();

    assert_eq!(report.record.slot, Some(Slot::Blue));
    let world = h.world.lock();
    assert_eq!(world.count_calls(&format!("remove {}", blue_name)), 1);
    assert!(world.container(&blue_name).unwrap().running);
    assert!(!world.container(&h.slot_container_name(Slot::Green)).unwrap().running);
}

#[tokio::test(start_paused = true)]
async fn unhealthy_candidate_times_out_and_rolls_back() {
    let h = Harness::new();
    let v1 = h.deploy(&DeployRequest::default()).await.unwrap();
    h.world.lock().new_containers_healthy = false;

    let report = h.deploy(&DeployRequest::default()).await.unwrap();

    assert_eq!(report.record.status, DeployStatus::RolledBack);
    assert_eq!(report.exit_code(), EXIT_ROLLED_BACK);
    assert_eq!(
        report.error.as_ref().map(|e| e.kind()),
        Some(DeployErrorKind::HealthCheckTimeout)
    );
    // 60s timeout at a 5s interval: polls at 0, 5, ... 55s. The previous
    // release is then re-verified once.
    let failed_polls = report
        .record
        .health_check_attempts
        .iter()
        .filter(|a| !a.success)
        .count();
    assert_eq!(failed_polls, 12);

    let state = SlotAllocator::new(&h.state_dir()).state().unwrap();
    assert_eq!(state.live_slot, Some(Slot::Blue));
    assert_eq!(state.live_version_tag, v1.record.version_tag);

    let world = h.world.lock();
    assert_eq!(world.proxy_slot, Some(Slot::Blue));
    assert!(world.container(&h.slot_container_name(Slot::Blue)).unwrap().running);
    assert!(!world.container(&h.slot_container_name(Slot::Green)).unwrap().running);
    assert_eq!(world.reload_count, 1, "proxy untouched by the failed attempt");
}

#[tokio::test(start_paused = true)]
async fn timeout_override_limits_polls() {
    let h = Harness::new();
    h.world.lock().new_containers_healthy = false;

    let request = DeployRequest {
        timeout: Some(Duration::from_secs(20)),
        ..DeployRequest::default()
    };
    let report = h.deploy(&request).await.unwrap();

    // No previous release: nothing to restore, the candidate is just stopped.
    assert_eq!(report.record.status, DeployStatus::RolledBack);
    assert_eq!(report.record.health_check_attempts.len(), 4);
    assert!(SlotAllocator::new(&h.state_dir()).current_live().unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn public_verification_failure_restores_previous_proxy() {
    let h = Harness::new();
    h.deploy(&DeployRequest::default()).await.unwrap();
    let blue_config = h.live_config();
    h.world.lock().public_broken_for = Some(Slot::Green);

    let report = h.deploy(&DeployRequest::default()).await.unwrap();

    assert_eq!(report.record.status, DeployStatus::RolledBack);
    assert_eq!(
        report.error.as_ref().map(|e| e.kind()),
        Some(DeployErrorKind::Cutover)
    );
    assert_eq!(h.live_config(), blue_config);
    assert_eq!(
        SlotAllocator::new(&h.state_dir()).current_live().unwrap().map(|(s, _)| s),
        Some(Slot::Blue)
    );

    // The last probe confirms BLUE answers on the public path.
    let last = report.record.health_check_attempts.last().unwrap();
    assert!(last.success);
    assert_eq!(last.served_by.as_deref(), Some("blue"));

    let world = h.world.lock();
    assert_eq!(world.proxy_slot, Some(Slot::Blue));
    assert!(!world.container(&h.slot_container_name(Slot::Green)).unwrap().running);
}

#[tokio::test(start_paused = true)]
async fn reload_failure_is_rolled_back_without_marking_live() {
    let h = Harness::new();
    h.deploy(&DeployRequest::default()).await.unwrap();
    h.world.lock().fail_reload = true;

    let report = h.deploy(&DeployRequest::default()).await.unwrap();

    // The restore reload fails too, so the rollback cannot complete.
    assert_eq!(report.record.status, DeployStatus::Failed);
    assert_eq!(report.exit_code(), EXIT_ROLLBACK_FAILED);
    assert_eq!(
        SlotAllocator::new(&h.state_dir()).current_live().unwrap().map(|(s, _)| s),
        Some(Slot::Blue)
    );
    let sent = h.notifier.sent.lock();
    assert_eq!(sent.last().map(|n| n.priority), Some(Priority::Critical));
}

#[tokio::test(start_paused = true)]
async fn build_failure_fails_without_touching_slots() {
    let h = Harness::new();
    h.world.lock().build_fails = true;

    let report = h.deploy(&DeployRequest::default()).await.unwrap();

    assert_eq!(report.record.status, DeployStatus::Failed);
    assert_eq!(report.exit_code(), EXIT_FAILED);
    assert!(report.record.slot.is_none());
    assert!(report.record.error.as_deref().unwrap().contains("step 3/7 failed"));
    let world = h.world.lock();
    assert!(world.containers.is_empty());
    assert_eq!(world.reload_count, 0);
}

#[tokio::test(start_paused = true)]
async fn held_lock_rejects_second_deploy() {
    let h = Harness::new();
    let lock = DeployLock::acquire(
        &h.config.lock_path_for(&h.environment),
        &h.config.service,
        &h.environment,
        false,
    )
    .unwrap();

    let err = h.deploy(&DeployRequest::default()).await.unwrap_err();

    assert_eq!(err.kind(), DeployErrorKind::DeployInProgress);
    assert!(err.lock_holder_info().is_some());
    let world = h.world.lock();
    assert!(world.calls.is_empty(), "no build or container work: {:?}", world.calls);
    drop(world);
    lock.release().unwrap();
}

#[tokio::test(start_paused = true)]
async fn force_breaks_a_held_lock() {
    let h = Harness::new();
    let _lock = DeployLock::acquire(
        &h.config.lock_path_for(&h.environment),
        &h.config.service,
        &h.environment,
        false,
    )
    .unwrap();

    let request = DeployRequest {
        force: true,
        ..DeployRequest::default()
    };
    let report = h.deploy(&request).await.unwrap();
    assert_eq!(report.record.status, DeployStatus::Promoted);
}

#[tokio::test(start_paused = true)]
async fn lock_is_released_after_each_attempt() {
    let h = Harness::new();
    h.world.lock().new_containers_healthy = false;
    h.deploy(&DeployRequest::default()).await.unwrap();

    assert!(!h.config.lock_path_for(&h.environment).exists());
    h.world.lock().new_containers_healthy = true;
    let report = h.deploy(&DeployRequest::default()).await.unwrap();
    assert_eq!(report.record.status, DeployStatus::Promoted);
}

#[tokio::test(start_paused = true)]
async fn history_records_every_attempt_newest_first() {
    let h = Harness::new();
    h.deploy(&DeployRequest::default()).await.unwrap();
    h.world.lock().new_containers_healthy = false;
    let failed = h.deploy(&DeployRequest::default()).await.unwrap();

    let history = DeploymentHistory::new(&h.state_dir());
    let records = history.recent(10).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, failed.record.id);
    assert_eq!(records[0].status, DeployStatus::RolledBack);
    assert_eq!(records[1].status, DeployStatus::Promoted);
    assert!(records.iter().all(|r| r.status.is_terminal()));
    assert_eq!(
        history.last_promoted().unwrap().map(|r| r.slot),
        Some(Some(Slot::Blue))
    );
}

#[tokio::test(start_paused = true)]
async fn missing_backup_blocks_unless_allowed() {
    let h = Harness::new();
    // A file where the backup directory should be makes snapshots fail.
    std::fs::write(&h.config.backup.dir, "not a directory").unwrap();

    let report = h.deploy(&DeployRequest::default()).await.unwrap();
    assert_eq!(report.record.status, DeployStatus::Failed);
    assert_eq!(
        report.error.as_ref().map(|e| e.kind()),
        Some(DeployErrorKind::Backup)
    );
    assert!(h.world.lock().count_calls("create") == 0);

    let request = DeployRequest {
        allow_missing_backup: true,
        ..DeployRequest::default()
    };
    let report = h.deploy(&request).await.unwrap();
    assert_eq!(report.record.status, DeployStatus::Promoted);
    assert!(report.record.backup.is_none());
    assert!(!report.warnings.is_empty());
}

#[tokio::test(start_paused = true)]
async fn backups_are_pruned_after_promotion() {
    let h = Harness::new();
    for _ in 0..4 {
        h.deploy(&DeployRequest::default()).await.unwrap();
    }

    let entries = switchyard::deploy::BackupManager::new(&h.config.backup.dir)
        .list()
        .unwrap();
    assert_eq!(entries.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn keep_candidate_leaves_failed_container_running() {
    let h = Harness::with_extra_yaml("on_failure: keep-candidate\n");
    h.deploy(&DeployRequest::default()).await.unwrap();
    h.world.lock().new_containers_healthy = false;

    let report = h.deploy(&DeployRequest::default()).await.unwrap();

    assert_eq!(report.record.status, DeployStatus::RolledBack);
    let world = h.world.lock();
    assert!(world.container(&h.slot_container_name(Slot::Green)).unwrap().running);
    assert_eq!(world.proxy_slot, Some(Slot::Blue));
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_health_check_rolls_back() {
    let h = Harness::new();
    h.deploy(&DeployRequest::default()).await.unwrap();
    h.world.lock().new_containers_healthy = false;

    let (handle, signal) = cancel_pair();
    let req = DeployRequest::default();
    let deploy = h.deploy_with(&req, signal);
    let cancel = async {
        // Wait for the candidate to start so the interrupt lands in the health check.
        while h.world.lock().count_calls("start") < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_secs(12)).await;
        handle.cancel();
    };
    let (report, ()) = tokio::join!(deploy, cancel);
    let report = report.unwrap();

    assert_eq!(report.record.status, DeployStatus::RolledBack);
    assert_eq!(
        report.error.as_ref().map(|e| e.kind()),
        Some(DeployErrorKind::Cancelled)
    );
    // Polls at 0, 5 and 10s, then one check of the revived BLUE slot.
    assert_eq!(report.record.health_check_attempts.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn notification_failure_does_not_change_outcome() {
    let mut h = Harness::new();
    h.notifier.fail = true;

    let report = h.deploy(&DeployRequest::default()).await.unwrap();

    assert_eq!(report.record.status, DeployStatus::Promoted);
    assert_eq!(h.notifier.sent.lock().len(), 1);
    assert!(report.warnings.iter().any(|w| w.message.contains("webhook unreachable")));
}

#[tokio::test(start_paused = true)]
async fn slot_header_is_required_on_public_verification() {
    let h = Harness::new();
    let report = h.deploy(&DeployRequest::default()).await.unwrap();

    let public: Vec<_> = report
        .record
        .health_check_attempts
        .iter()
        .filter(|a| a.served_by.is_some())
        .collect();
    assert!(!public.is_empty(), "{} probes carry a slot", SLOT_HEADER);
    assert!(public.iter().all(|a| a.served_by.as_deref() == Some("blue")));
}

#[tokio::test(start_paused = true)]
async fn candidate_carries_slot_labels() {
    let h = Harness::new();
    let report = h.deploy(&DeployRequest::default()).await.unwrap();

    let world = h.world.lock();
    let blue = world.container(&h.slot_container_name(Slot::Blue)).unwrap();
    assert_eq!(blue.labels[LABEL_MANAGED], "true");
    assert_eq!(blue.labels[LABEL_SERVICE], "lnapi");
    assert_eq!(blue.labels[LABEL_ENVIRONMENT], "production");
    assert_eq!(blue.labels[LABEL_SLOT], Slot::Blue.as_str());
    assert_eq!(
        blue.labels[LABEL_VERSION],
        report.record.version_tag.as_ref().unwrap().to_string()
    );
}

#[tokio::test(start_paused = true)]
async fn slot_state_write_failure_after_cutover_restores_previous_proxy() {
    let h = Harness::new();
    h.deploy(&DeployRequest::default()).await.unwrap();
    let blue_config = h.live_config();
    h.world.lock().block_on_public = Some(h.state_dir().join("slot-state.json"));

    let report = h.deploy(&DeployRequest::default()).await.unwrap();

    assert_eq!(report.record.status, DeployStatus::RolledBack);
    assert_eq!(report.exit_code(), EXIT_ROLLED_BACK);
    assert!(matches!(
        report.error,
        Some(DeployError::Cutover { proxy_touched: true, ref message }) if message.contains("slot-state.json")
    ));
    assert_eq!(h.live_config(), blue_config);

    // The public path answers from BLUE again.
    let last = report.record.health_check_attempts.last().unwrap();
    assert!(last.success);
    assert_eq!(last.served_by.as_deref(), Some("blue"));

    let world = h.world.lock();
    assert_eq!(world.proxy_slot, Some(Slot::Blue));
    assert!(world.container(&h.slot_container_name(Slot::Blue)).unwrap().running);
    assert!(!world.container(&h.slot_container_name(Slot::Green)).unwrap().running);
}

const SMOKE_TEST: &str = "test:\n  command: npm test\n  timeout: 30s\n";

#[tokio::test(start_paused = true)]
async fn failing_smoke_test_fails_before_any_slot_is_used() {
    let h = Harness::with_extra_yaml(SMOKE_TEST);
    h.world.lock().test_exit_code = 1;

    let report = h.deploy(&DeployRequest::default()).await.unwrap();

    assert_eq!(report.record.status, DeployStatus::Failed);
    assert_eq!(report.exit_code(), EXIT_FAILED);
    assert_eq!(
        report.error.as_ref().map(|e| e.kind()),
        Some(DeployErrorKind::TestFailure)
    );
    assert!(report.record.error.as_deref().unwrap().contains("exited with code 1"));
    assert!(report.record.slot.is_none());
    assert!(report.record.backup.is_none());

    let world = h.world.lock();
    assert_eq!(world.count_calls("create lnapi-production-smoke-test"), 1);
    assert_eq!(world.count_calls(&format!("create {}", h.slot_container_name(Slot::Blue))), 0);
    assert!(world.containers.is_empty(), "test container removed");
    assert_eq!(world.reload_count, 0);
}

#[tokio::test(start_paused = true)]
async fn hung_smoke_test_times_out() {
    let h = Harness::with_extra_yaml(SMOKE_TEST);
    h.world.lock().test_hangs = true;

    let report = h.deploy(&DeployRequest::default()).await.unwrap();

    assert_eq!(report.record.status, DeployStatus::Failed);
    assert_eq!(report.exit_code(), EXIT_FAILED);
    assert!(report.record.error.as_deref().unwrap().contains("timed out after 30s"));
    let world = h.world.lock();
    assert_eq!(world.count_calls("stop lnapi-production-smoke-test"), 1);
    assert!(world.containers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn passing_smoke_test_leads_to_promotion() {
    let h = Harness::with_extra_yaml(SMOKE_TEST);

    let report = h.deploy(&DeployRequest::default()).await.unwrap();

    assert_eq!(report.record.status, DeployStatus::Promoted);
    let world = h.world.lock();
    assert_eq!(world.count_calls("wait"), 1);
    assert!(world.container("lnapi-production-smoke-test").is_none());
}

#[tokio::test(start_paused = true)]
async fn skip_tests_bypasses_smoke_test() {
    let h = Harness::with_extra_yaml(SMOKE_TEST);
    h.world.lock().test_exit_code = 1;

    let request = DeployRequest {
        skip_tests: true,
        ..DeployRequest::default()
    };
    let report = h.deploy(&request).await.unwrap();

    assert_eq!(report.record.status, DeployStatus::Promoted);
    let world = h.world.lock();
    assert_eq!(world.count_calls("create lnapi-production-smoke-test"), 0);
    assert_eq!(world.count_calls("wait"), 0);
}

#[tokio::test(start_paused = true)]
async fn rejected_proxy_config_leaves_data_alone() {
    let h = Harness::new();
    h.deploy(&DeployRequest::default()).await.unwrap();
    let data = h.dir.path().join("data/app.db");
    {
        let mut world = h.world.lock();
        world.write_on_start = Some((data.clone(), "rows v2".to_string()));
        world.fail_validate = true;
    }

    let report = h.deploy(&DeployRequest::default()).await.unwrap();

    assert_eq!(report.record.status, DeployStatus::RolledBack);
    assert!(matches!(
        report.error,
        Some(DeployError::Cutover { proxy_touched: false, .. })
    ));
    // The live proxy file was never replaced, so the snapshot is not restored.
    assert_eq!(std::fs::read_to_string(&data).unwrap(), "rows v2");
    assert_eq!(h.world.lock().reload_count, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_verification_restores_snapshot() {
    let h = Harness::new();
    h.deploy(&DeployRequest::default()).await.unwrap();
    let data = h.dir.path().join("data/app.db");
    {
        let mut world = h.world.lock();
        world.write_on_start = Some((data.clone(), "rows v2".to_string()));
        world.public_broken_for = Some(Slot::Green);
    }

    let report = h.deploy(&DeployRequest::default()).await.unwrap();

    assert_eq!(report.record.status, DeployStatus::RolledBack);
    assert_eq!(std::fs::read_to_string(&data).unwrap(), "rows v1");
}
