//! CLI tests for the loopcheck binary

use super::helpers::*;
use assert_cmd::Command;
use loopcheck::config::FaultPlan;
use loopcheck::device::sim::reference_board;
use predicates::prelude::*;
use std::io::Write;

#[allow(deprecated)]
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("loopcheck").unwrap();
    cmd.arg("--version").assert().success();
}

#[allow(deprecated)]
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("loopcheck").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("emulate"));
}

#[allow(deprecated)]
#[test]
fn test_cli_missing_config_exit_code() {
    let mut cmd = Command::cargo_bin("loopcheck").unwrap();
    cmd.args(["-c", "/nonexistent/loopcheck.toml", "run"])
        .assert()
        .code(8);
}

#[allow(deprecated)]
#[test]
fn test_cli_rejects_bad_iterations() {
    let mut cmd = Command::cargo_bin("loopcheck").unwrap();
    cmd.args(["-c", "/nonexistent/loopcheck.toml", "run", "-n", "abc"])
        .assert()
        .failure();
}

#[allow(deprecated)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cli_run_writes_report() {
    let config = device_config(FaultPlan::default());
    let device = start_device(|| reference_board(&config).unwrap(), &config).await;

    let dir = tempfile::tempdir().unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "[ports]\ninit_port = {}\ngroup_port_base = {}\n\n[host]\ndevice_addr = \"127.0.0.1\"\ndiscovery_timeout_ms = 2000\n",
        device.ports.init_port, device.ports.group_port_base
    )
    .unwrap();

    let config_path = file.path().to_path_buf();
    let out = dir.path().to_path_buf();
    let assert = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("loopcheck")
            .unwrap()
            .env("NO_COLOR", "1")
            .arg("-c")
            .arg(&config_path)
            .args(["run", "-n", "2", "--format", "json", "--seed", "3", "-o"])
            .arg(&out)
            .assert()
    })
    .await
    .unwrap();

    assert
        .success()
        .stdout(predicate::str::contains("Report written to"));
    let reports: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .collect();
    assert_eq!(reports.len(), 1);
}

#[allow(deprecated)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cli_catalog_lists_groups() {
    let config = device_config(FaultPlan::default());
    let device = start_device(|| reference_board(&config).unwrap(), &config).await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "[ports]\ninit_port = {}\ngroup_port_base = {}\n\n[host]\ndevice_addr = \"127.0.0.1\"\ndiscovery_timeout_ms = 2000\n",
        device.ports.init_port, device.ports.group_port_base
    )
    .unwrap();

    let config_path = file.path().to_path_buf();
    let assert = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("loopcheck")
            .unwrap()
            .env("NO_COLOR", "1")
            .arg("-c")
            .arg(&config_path)
            .arg("catalog")
            .assert()
    })
    .await
    .unwrap();

    assert
        .success()
        .stdout(predicate::str::contains("dac1 to adc3"))
        .stdout(predicate::str::contains("sequential"));
}
