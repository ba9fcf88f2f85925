//! End-to-end tests for the pktq binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn pktq() -> Command {
    Command::cargo_bin("pktq").unwrap()
}

fn run_json(args: &[&str]) -> serde_json::Value {
    let output = pktq()
        .args(["--quiet", "run", "--json", "--seed", "11", "--timeout", "20"])
        .args(args)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_help_lists_commands() {
    pktq()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("completions"));
}

#[test]
fn test_list_json() {
    let output = pktq().args(["list", "--adapters", "3", "--json"]).output().unwrap();
    assert!(output.status.success());

    let adapters: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let adapters = adapters.as_array().unwrap();
    assert_eq!(adapters.len(), 6);
    assert_eq!(adapters[0]["friendly_name"], "Simulated Ethernet 1");
    assert_eq!(adapters[3]["friendly_name"], "WAN Network Interface (IP)");
}

#[test]
fn test_run_passes_everything() {
    let report = run_json(&["--packets", "500", "--pool-size", "4", "--packets-per-block", "32"]);

    assert_eq!(report["completed"], true);
    assert_eq!(report["packets_injected"], 500);
    let delivered = report["delivered_to_stack"].as_u64().unwrap()
        + report["delivered_to_wire"].as_u64().unwrap();
    assert_eq!(delivered, 500);
    assert_eq!(report["packets_forwarded"], 500);
    assert_eq!(report["overflowed"], 0);
    assert_eq!(report["stats"]["packets_dropped"], 0);
    assert_eq!(report["blocks_reclaimed"], 4);
}

#[test]
fn test_run_drop_outbound() {
    let report = run_json(&["--packets", "300", "--outbound", "drop"]);

    assert_eq!(report["completed"], true);
    assert_eq!(report["delivered_to_wire"], 0);
    let dropped = report["stats"]["packets_dropped"].as_u64().unwrap();
    let to_stack = report["delivered_to_stack"].as_u64().unwrap();
    assert_eq!(dropped + to_stack, 300);
}

#[test]
fn test_run_without_inbound_classifier_bypasses() {
    let report = run_json(&["--packets", "200", "--inbound", "none"]);

    assert_eq!(report["completed"], true);
    assert_eq!(report["bypassed"], report["delivered_to_stack"]);
    assert_eq!(report["stats"]["packets_captured"], report["delivered_to_wire"]);
}

#[test]
fn test_run_long_burst_stays_within_backlog() {
    let report = run_json(&[
        "--packets",
        "20000",
        "--burst",
        "100000",
        "--pool-size",
        "2",
        "--packets-per-block",
        "16",
    ]);

    assert_eq!(report["completed"], true);
    assert_eq!(report["overflowed"], 0);
    assert_eq!(report["packets_forwarded"], 20000);
}

#[test]
fn test_run_rejects_bad_adapter() {
    pktq()
        .args(["--quiet", "run", "--adapter", "42", "--packets", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("adapter_index"));
}

#[test]
fn test_config_generate_and_validate() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pktq.toml");
    let path_str = path.to_str().unwrap();

    pktq()
        .args(["config", "generate", "--output", path_str])
        .assert()
        .success();
    assert!(std::fs::read_to_string(&path).unwrap().contains("pool_size = 10"));

    pktq()
        .args(["config", "generate", "--output", path_str])
        .assert()
        .failure();

    pktq()
        .args(["config", "validate", path_str])
        .assert()
        .success()
        .stdout(predicate::str::contains("Buffers: 2560"));
}

#[test]
fn test_config_validate_rejects_zero_pool() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "pool_size = 0\n").unwrap();

    pktq()
        .args(["config", "validate", path.to_str().unwrap()])
        .assert()
        .failure();
}

#[test]
fn test_run_from_simulation_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sim.toml");
    std::fs::write(
        &path,
        "packets = 100\noutbound_ratio = 0.0\ninbound = \"redirect\"\n\n[filter]\npool_size = 2\n",
    )
    .unwrap();

    let report = run_json(&["--config", path.to_str().unwrap()]);
    assert_eq!(report["completed"], true);
    assert_eq!(report["delivered_to_wire"], 100);
    assert_eq!(report["stats"]["packets_redirected"], 100);
    assert_eq!(report["blocks_reclaimed"], 2);
}

#[test]
fn test_completions() {
    pktq()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pktq"));
}
