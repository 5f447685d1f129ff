// ABOUTME: Integration tests for the switchyard CLI commands.
// ABOUTME: Help output, init, offline status/history/backups and exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn switchyard_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("switchyard"))
}

fn write_config(dir: &Path) {
    fs::write(
        dir.join("switchyard.yml"),
        r#"
service: lnapi
image: registry.example.com/lnapi
proxy:
  config_path: proxy/lnapi.conf
  template: proxy/lnapi.conf.tmpl
  public_url: http://127.0.0.1/health
environments:
  production: {}
  staging:
    slots:
      blue_port: 9081
      green_port: 9082
"#,
    )
    .unwrap();
}

#[test]
fn help_shows_commands() {
    switchyard_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("history"));
}

#[test]
fn deploy_help_lists_options() {
    switchyard_cmd()
        .args(["deploy", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--skip-tests"))
        .stdout(predicate::str::contains("--timeout"))
        .stdout(predicate::str::contains("--allow-missing-backup"))
        .stdout(predicate::str::contains("--force"));
}

#[test]
fn init_creates_config_and_template() {
    let temp_dir = tempfile::tempdir().unwrap();

    switchyard_cmd()
        .current_dir(temp_dir.path())
        .args(["init", "--service", "lnapi"])
        .assert()
        .success();

    let content = fs::read_to_string(temp_dir.path().join("switchyard.yml")).unwrap();
    assert!(content.contains("service: lnapi"));
    assert!(content.contains("image:"));
    assert!(temp_dir.path().join("nginx.conf.tmpl").exists());
}

#[test]
fn init_refuses_to_overwrite_existing_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    fs::write(temp_dir.path().join("switchyard.yml"), "existing: config").unwrap();

    switchyard_cmd()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn deploy_without_config_fails() {
    let temp_dir = tempfile::tempdir().unwrap();

    switchyard_cmd()
        .current_dir(temp_dir.path())
        .args(["deploy", "production"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("configuration file not found"));
}

#[test]
fn deploy_to_unknown_environment_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    write_config(temp_dir.path());

    switchyard_cmd()
        .current_dir(temp_dir.path())
        .args(["deploy", "qa"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown environment: qa"));
}

#[test]
fn invalid_env_override_is_rejected() {
    let temp_dir = tempfile::tempdir().unwrap();
    write_config(temp_dir.path());

    switchyard_cmd()
        .current_dir(temp_dir.path())
        .env("SWITCHYARD_SUCCESS_THRESHOLD", "many")
        .args(["status", "production"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("SWITCHYARD_SUCCESS_THRESHOLD"));
}

#[test]
fn status_before_first_deploy() {
    let temp_dir = tempfile::tempdir().unwrap();
    write_config(temp_dir.path());

    switchyard_cmd()
        .current_dir(temp_dir.path())
        .args(["status", "staging"])
        .assert()
        .success()
        .stdout(predicate::str::contains("never promoted"));
}

#[test]
fn status_reads_slot_state() {
    let temp_dir = tempfile::tempdir().unwrap();
    write_config(temp_dir.path());
    let state_dir = temp_dir.path().join(".switchyard/state/lnapi-staging");
    fs::create_dir_all(&state_dir).unwrap();
    fs::write(
        state_dir.join("slot-state.json"),
        r#"{"live_slot":"GREEN","live_version_tag":"20260101-120000-abc1234","promoted_at":"2026-01-01T12:00:00Z"}"#,
    )
    .unwrap();

    switchyard_cmd()
        .current_dir(temp_dir.path())
        .args(["status", "staging"])
        .assert()
        .success()
        .stdout(predicate::str::contains("GREEN (127.0.0.1:9082)"))
        .stdout(predicate::str::contains("20260101-120000-abc1234"));
}

#[test]
fn history_json_is_an_empty_list_before_first_deploy() {
    let temp_dir = tempfile::tempdir().unwrap();
    write_config(temp_dir.path());

    let output = switchyard_cmd()
        .current_dir(temp_dir.path())
        .args(["--json", "history", "production"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let line = String::from_utf8(output).unwrap();
    let event: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(event["event"], "history");
    assert_eq!(event["data"], serde_json::json!([]));
}

#[test]
fn backups_lists_nothing_when_empty() {
    let temp_dir = tempfile::tempdir().unwrap();
    write_config(temp_dir.path());

    switchyard_cmd()
        .current_dir(temp_dir.path())
        .args(["backups", "production"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No backups"));
}

#[test]
fn explicit_config_path_is_used() {
    let temp_dir = tempfile::tempdir().unwrap();
    let project = temp_dir.path().join("project");
    fs::create_dir_all(&project).unwrap();
    write_config(&project);

    switchyard_cmd()
        .current_dir(temp_dir.path())
        .args(["--config"])
        .arg(project.join("switchyard.yml"))
        .args(["status", "production"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Service:     lnapi"));
}
