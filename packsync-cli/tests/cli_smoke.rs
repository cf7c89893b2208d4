use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use chrono::Utc;
use predicates::str::contains;
use tempfile::TempDir;

use packsync_core::types::{ReleaseDescriptor, ScopeId};
use packsync_engine::store;

fn packsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("packsync"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

/// Stage one committed + activated record directly through the store.
fn stage_active_record(home: &Path, scope: &ScopeId, version: &str, bytes: &[u8]) {
    let descriptor = ReleaseDescriptor {
        tag: version.to_owned(),
        download_url: format!("https://example.com/{version}/pack.zip"),
        asset_name: "pack.zip".to_owned(),
        size_bytes: Some(bytes.len() as u64),
        published_at: Utc::now(),
    };
    let record = store::commit_at(home, scope, bytes, &descriptor, false).expect("commit");
    store::activate_at(home, scope, &record.content_hash).expect("activate");
}

#[test]
fn init_writes_config_and_refuses_overwrite() {
    let home = TempDir::new().expect("home");

    packsync_cmd(home.path())
        .args(["init", "--repo", "alathra/server-pack"])
        .assert()
        .success()
        .stdout(contains("scope 'global' tracking alathra/server-pack"));
    assert!(home.path().join(".packsync/config.yaml").exists());

    // Second init without --force must fail.
    packsync_cmd(home.path())
        .args(["init", "--repo", "alathra/server-pack"])
        .assert()
        .failure()
        .stderr(contains("config already exists"));

    packsync_cmd(home.path())
        .args(["init", "--repo", "alathra/server-pack", "--force"])
        .assert()
        .success();
}

#[test]
fn init_rejects_malformed_repo() {
    let home = TempDir::new().expect("home");

    packsync_cmd(home.path())
        .args(["init", "--repo", "not-a-repo"])
        .assert()
        .failure()
        .stderr(contains("invalid repository"));
}

#[test]
fn status_without_config_points_at_init() {
    let home = TempDir::new().expect("home");

    packsync_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("Run `packsync init` first"));
}

#[test]
fn offline_status_reports_store_contents() {
    let home = TempDir::new().expect("home");
    packsync_cmd(home.path())
        .args(["init", "--repo", "alathra/server-pack"])
        .assert()
        .success();
    stage_active_record(home.path(), &ScopeId::global(), "v1.4.2", b"pack-bytes");

    packsync_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("not running"))
        .stdout(contains("v1.4.2"));

    // JSON form carries the same facts.
    packsync_cmd(home.path())
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"))
        .stdout(contains("\"active_version\": \"v1.4.2\""));
}

#[test]
fn active_lists_records_with_active_marker() {
    let home = TempDir::new().expect("home");
    let scope = ScopeId::global();
    stage_active_record(home.path(), &scope, "v1.0.0", b"first");
    stage_active_record(home.path(), &scope, "v1.1.0", b"second");

    packsync_cmd(home.path())
        .arg("active")
        .assert()
        .success()
        .stdout(contains("v1.0.0"))
        .stdout(contains("v1.1.0"));

    packsync_cmd(home.path())
        .args(["active", "lobby"])
        .assert()
        .success()
        .stdout(contains("No pack records stored for scope 'lobby'"));
}

#[test]
fn control_commands_degrade_without_daemon() {
    let home = TempDir::new().expect("home");
    packsync_cmd(home.path())
        .args(["init", "--repo", "alathra/server-pack"])
        .assert()
        .success();

    for args in [
        vec!["reconcile"],
        vec!["rollback", "global"],
        vec!["cancel", "global"],
        vec!["reload"],
    ] {
        packsync_cmd(home.path())
            .args(&args)
            .assert()
            .success()
            .stdout(contains("daemon is not running"));
    }

    packsync_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));
}
