mod stub;

use std::path::Path;

use predicates::prelude::*;
use serde_json::Value;
use stub::{ApiStub, PAGE_ID, SUMMARY_TEXT, course_workspace};

const FAST_CONFIG: &str = "\
retry:
  max_attempts: 2
  base_delay_ms: 1
  max_delay_ms: 5
";

fn pagedigest(stub: &ApiStub) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("pagedigest");
    cmd.env("NOTION_TOKEN", "secret")
        .env("PAGEDIGEST_NOTION_BASE_URL", &stub.base_url)
        .env("OPENAI_API_KEY", "sk-test")
        .env("PAGEDIGEST_OPENAI_BASE_URL", &stub.base_url)
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &Path) -> String {
    let path = dir.join("pagedigest.yaml");
    std::fs::write(&path, FAST_CONFIG).expect("write config");
    path.display().to_string()
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is json")
}

#[test]
fn run_prints_and_persists_one_summary() {
    let stub = ApiStub::spawn(course_workspace());
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path());
    let store = dir.path().join("store");

    let output = pagedigest(&stub)
        .args(["run", "--page", PAGE_ID, "--user", "ada", "--config", &config])
        .arg("--store")
        .arg(&store)
        .args(["--style", "bullet-points", "--perspective", "practitioner"])
        .assert()
        .success()
        .get_output()
        .clone();

    let result = stdout_json(&output);
    assert_eq!(result["summary"], SUMMARY_TEXT);
    assert_eq!(result["style"], "bullet_points");
    assert_eq!(result["source_content"].as_array().map(Vec::len), Some(1));
    assert_eq!(result["is_repetition"], false);

    let id = result["id"].as_str().expect("summary id");
    assert!(store.join(format!("users/ada/summaries/{id}.json")).exists());
    assert_eq!(stub.models(), ["gpt-4.1", "gpt-4.1", "gpt-4.1"]);
}

#[test]
fn second_run_picks_a_different_unit() {
    let stub = ApiStub::spawn(course_workspace());
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path());
    let store = dir.path().join("store");

    let mut picked = Vec::new();
    for _ in 0..2 {
        let output = pagedigest(&stub)
            .args(["run", "--page", PAGE_ID, "--user", "ada", "--config", &config])
            .arg("--store")
            .arg(&store)
            .assert()
            .success()
            .get_output()
            .clone();
        let result = stdout_json(&output);
        picked.push(result["source_content"][0]["unit_id"].clone());
    }
    assert_ne!(picked[0], picked[1]);
}

#[test]
fn candidates_lists_ranked_units_without_openai() {
    let stub = ApiStub::spawn(course_workspace());

    let output = pagedigest(&stub)
        .env_remove("OPENAI_API_KEY")
        .args(["candidates", "--page", PAGE_ID, "--limit", "2"])
        .assert()
        .success()
        .get_output()
        .clone();

    let report = stdout_json(&output);
    assert_eq!(report["pattern"], "hierarchical_toggles");
    assert_eq!(report["strategy"], "hierarchical_toggle");
    assert_eq!(report["total_candidates"], 5);
    let rows = report["candidates"].as_array().expect("candidates array");
    assert_eq!(rows.len(), 2);
    let first = rows[0]["total"].as_f64().expect("first total");
    let second = rows[1]["total"].as_f64().expect("second total");
    assert!(first >= second);
    assert!(stub.models().is_empty());
}

#[test]
fn analyze_prints_the_structural_profile() {
    let stub = ApiStub::spawn(course_workspace());

    let output = pagedigest(&stub)
        .args(["analyze", "--page", PAGE_ID])
        .assert()
        .success()
        .get_output()
        .clone();

    let report = stdout_json(&output);
    assert_eq!(report["title"], "Rust course notes");
    assert_eq!(report["profile"]["primary_pattern"], "hierarchical_toggles");
    assert_eq!(report["profile"]["counts"]["toggles"], 3);
}

#[test]
fn missing_notion_token_fails_with_a_message() {
    let stub = ApiStub::spawn(course_workspace());

    pagedigest(&stub)
        .env_remove("NOTION_TOKEN")
        .args(["analyze", "--page", PAGE_ID])
        .assert()
        .failure()
        .stderr(predicate::str::contains("NOTION_TOKEN is not set"));
}

#[test]
fn invalid_config_is_rejected() {
    let stub = ApiStub::spawn(course_workspace());
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("bad.yaml");
    std::fs::write(&config, "fetch:\n  concurrency: 0\n").expect("write config");

    pagedigest(&stub)
        .args(["analyze", "--page", PAGE_ID, "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("fetch.concurrency must be > 0"));
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() {
    let stub = ApiStub::spawn(course_workspace());

    pagedigest(&stub)
        .env("RUST_LOG", "debug")
        .args(["analyze", "--page", PAGE_ID])
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));
}
