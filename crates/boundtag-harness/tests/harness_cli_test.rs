//! Integration tests: harness CLI subcommands and their JSONL output.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use boundtag_harness::scenarios::scenario_names;
use boundtag_harness::structured_log::{LogEntry, Outcome};

fn unique_tmp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after UNIX_EPOCH")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn read_entries(path: &std::path::Path) -> Vec<LogEntry> {
    std::fs::read_to_string(path)
        .expect("log should be readable")
        .lines()
        .map(|line| serde_json::from_str(line).expect("every line is a log entry"))
        .collect()
}

#[test]
fn scenarios_subcommand_logs_one_passing_entry_per_case() {
    let run_dir = unique_tmp_dir("boundtag-scenarios");
    let log_path = run_dir.join("scenarios.jsonl");

    let output = Command::new(env!("CARGO_BIN_EXE_harness"))
        .arg("scenarios")
        .arg("--arena-size")
        .arg("4096")
        .arg("--log")
        .arg(&log_path)
        .output()
        .expect("harness scenarios should execute");
    assert!(
        output.status.success(),
        "scenarios failed:\nstderr={}",
        String::from_utf8_lossy(&output.stderr)
    );

    let entries = read_entries(&log_path);
    let ends: Vec<&LogEntry> = entries.iter().filter(|e| e.event == "scenario_end").collect();
    assert_eq!(ends.len(), scenario_names().len());
    for entry in &ends {
        assert_eq!(entry.outcome, Some(Outcome::Pass), "{:?}", entry.case);
        let details = entry.details.as_ref().expect("scenario details");
        assert!(details["check"]["allocated_blocks"].is_u64());
    }
    let ids: HashSet<&str> = entries.iter().map(|e| e.trace_id.as_str()).collect();
    assert_eq!(ids.len(), entries.len(), "trace ids must be unique");

    let _ = std::fs::remove_dir_all(run_dir);
}

#[test]
fn scenarios_lifecycle_flag_interleaves_allocator_records() {
    let run_dir = unique_tmp_dir("boundtag-lifecycle");
    let log_path = run_dir.join("lifecycle.jsonl");

    let status = Command::new(env!("CARGO_BIN_EXE_harness"))
        .args(["scenarios", "--lifecycle", "--arena-size", "4096", "--log"])
        .arg(&log_path)
        .status()
        .expect("harness scenarios should execute");
    assert!(status.success());

    let entries = read_entries(&log_path);
    let grows: Vec<&LogEntry> = entries
        .iter()
        .filter(|e| e.suite.as_deref() == Some("allocator") && e.event == "arena_grow")
        .collect();
    assert!(!grows.is_empty(), "expected arena_grow lifecycle records");
    assert!(
        grows.iter().any(|e| e.case.as_deref() == Some("arena_growth")),
        "lifecycle records carry the scenario name"
    );

    let _ = std::fs::remove_dir_all(run_dir);
}

#[test]
fn stress_subcommand_reports_a_fully_free_heap() {
    let run_dir = unique_tmp_dir("boundtag-stress");
    let log_path = run_dir.join("stress.jsonl");

    let output = Command::new(env!("CARGO_BIN_EXE_harness"))
        .args([
            "stress",
            "--threads",
            "4",
            "--ops",
            "400",
            "--max-size",
            "512",
            "--seed",
            "0x2a",
            "--arena-size",
            "8192",
            "--log",
        ])
        .arg(&log_path)
        .output()
        .expect("harness stress should execute");
    assert!(
        output.status.success(),
        "stress failed:\nstderr={}",
        String::from_utf8_lossy(&output.stderr)
    );

    let entries = read_entries(&log_path);
    assert_eq!(entries.first().map(|e| e.event.as_str()), Some("stress_start"));
    let end = entries
        .iter()
        .find(|e| e.event == "stress_end")
        .expect("stress_end entry");
    assert_eq!(end.outcome, Some(Outcome::Pass));
    let details = end.details.as_ref().expect("stress details");
    assert_eq!(details["config"]["seed"], 42);
    assert_eq!(details["check"]["allocated_blocks"], 0);
    assert_eq!(details["workers"].as_array().map(Vec::len), Some(4));

    let _ = std::fs::remove_dir_all(run_dir);
}

#[test]
fn stress_rejects_a_malformed_seed() {
    let output = Command::new(env!("CARGO_BIN_EXE_harness"))
        .args(["stress", "--seed", "0xnope"])
        .output()
        .expect("harness should execute");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid seed"));
}

#[test]
fn config_subcommand_reflects_the_environment() {
    let output = Command::new(env!("CARGO_BIN_EXE_harness"))
        .arg("config")
        .env("MALLOCVERBOSE", "NO")
        .env("BOUNDTAG_ARENA_SIZE", "0x2000")
        .env("BOUNDTAG_LOG", "warn")
        .output()
        .expect("harness config should execute");
    assert!(output.status.success());

    let config: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("config is JSON");
    assert_eq!(config["verbose"], false);
    assert_eq!(config["arena_size"], 8192);
    assert_eq!(config["log_level"], "warn");
}
