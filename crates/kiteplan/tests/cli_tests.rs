//! Integration tests for the kiteplan binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

const TEST_PIPELINE: &str = r#"
steps:
  - label: Basic Correctness
    command: pytest -v -s basic_correctness
  - label: Kernels Test
    source_file_dependencies: ["csrc/"]
    command: pytest -v -s kernels
  - label: Entrypoints
    mirror_hardwares: [amd]
    command: pytest -v -s entrypoints
"#;

/// Create a work directory holding the test pipeline at the default path
fn create_test_dir(pipeline: &str) -> TempDir {
    let temp_dir = tempfile::Builder::new()
        .prefix("kiteplan_test_")
        .tempdir()
        .unwrap();
    fs::create_dir_all(temp_dir.path().join(".buildkite")).unwrap();
    fs::write(temp_dir.path().join(".buildkite/test-pipeline.yaml"), pipeline).unwrap();
    temp_dir
}

/// kiteplan command running in `dir` without inheriting CI variables
fn kiteplan(dir: &Path) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("kiteplan").unwrap();
    cmd.current_dir(dir)
        .env_remove("TEST_PATH")
        .env_remove("RUN_ALL")
        .env_remove("LIST_FILE_DIFF")
        .env_remove("BUILDKITE_COMMIT")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1");
    cmd
}

fn read_pipeline(dir: &Path) -> serde_yaml::Value {
    let written = fs::read_to_string(dir.join(".buildkite/pipeline.yaml")).unwrap();
    serde_yaml::from_str(&written).unwrap()
}

fn keys(pipeline: &serde_yaml::Value) -> Vec<String> {
    pipeline["steps"]
        .as_sequence()
        .unwrap()
        .iter()
        .map(|step| step["key"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_writes_default_output() {
    let temp_dir = create_test_dir(TEST_PIPELINE);

    kiteplan(temp_dir.path())
        .args(["--commit", COMMIT])
        .env("LIST_FILE_DIFF", "vllm/engine.py|docs/index.md")
        .assert()
        .success();

    let pipeline = read_pipeline(temp_dir.path());
    assert_eq!(
        keys(&pipeline),
        vec![
            "build",
            "basic-correctness",
            "block-kernels-test",
            "kernels-test",
            "entrypoints",
            "amd_entrypoints",
        ]
    );
    assert_eq!(pipeline["steps"][3]["depends_on"].as_str(), Some("block-kernels-test"));
}

#[test]
fn test_changed_files_clear_gate() {
    let temp_dir = create_test_dir(TEST_PIPELINE);

    kiteplan(temp_dir.path())
        .args(["--commit", COMMIT, "--list-file-diff", "csrc/attention.cu"])
        .assert()
        .success();

    let keys = keys(&read_pipeline(temp_dir.path()));
    assert!(!keys.iter().any(|k| k.starts_with("block-")));
}

#[test]
fn test_run_all_from_environment() {
    let temp_dir = create_test_dir(TEST_PIPELINE);

    kiteplan(temp_dir.path())
        .env("BUILDKITE_COMMIT", COMMIT)
        .env("RUN_ALL", "1")
        .assert()
        .success();

    let keys = keys(&read_pipeline(temp_dir.path()));
    assert!(keys.contains(&"kernels-test".to_string()));
    assert!(!keys.contains(&"block-kernels-test".to_string()));
}

#[test]
fn test_stdout_output() {
    let temp_dir = create_test_dir(TEST_PIPELINE);

    kiteplan(temp_dir.path())
        .args(["--commit", COMMIT, "--output", "-"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("steps:"))
        .stdout(predicate::str::contains("key: basic-correctness"));

    assert!(!temp_dir.path().join(".buildkite/pipeline.yaml").exists());
}

#[test]
fn test_external_hardware_steps_from_default_path() {
    let temp_dir = create_test_dir(TEST_PIPELINE);
    fs::write(
        temp_dir.path().join(".buildkite/external-tests.yaml"),
        "steps:\n  - label: AMD Build\n    no_gpu: true\n    command: docker build -t DOCKER_IMAGE_AMD .\n",
    )
    .unwrap();

    kiteplan(temp_dir.path())
        .args(["--commit", COMMIT, "--output", "-"])
        .assert()
        .success()
        .stdout(predicate::str::contains("key: amd-build"))
        .stdout(predicate::str::contains(format!("rocm/vllm-ci:{COMMIT}")))
        .stdout(predicate::str::contains("DOCKER_IMAGE_AMD").not());
}

#[test]
fn test_missing_explicit_external_path_fails() {
    let temp_dir = create_test_dir(TEST_PIPELINE);

    kiteplan(temp_dir.path())
        .args([
            "--commit",
            COMMIT,
            "--external-hardware-test-path",
            "missing.yaml",
        ])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("missing.yaml"));
}

#[test]
fn test_missing_test_path_fails() {
    let temp_dir = tempfile::tempdir().unwrap();

    kiteplan(temp_dir.path())
        .args(["--commit", COMMIT])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("kiteplan::cli::other"));
}

#[test]
fn test_invalid_commit_fails() {
    let temp_dir = create_test_dir(TEST_PIPELINE);

    kiteplan(temp_dir.path())
        .args(["--commit", "HEAD"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("kiteplan::cli::config"))
        .stderr(predicate::str::contains("'HEAD'"));

    assert!(!temp_dir.path().join(".buildkite/pipeline.yaml").exists());
}

#[test]
fn test_invalid_step_aborts_run() {
    let temp_dir = create_test_dir(
        "steps:\n  - label: Good\n    command: pytest a\n  - label: Broken\n    command: pytest b\n    commands: [pytest c]\n",
    );

    kiteplan(temp_dir.path())
        .args(["--commit", COMMIT])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("'Broken'"));

    assert!(!temp_dir.path().join(".buildkite/pipeline.yaml").exists());
}

#[test]
fn test_config_file_overrides_queues() {
    let temp_dir = create_test_dir(TEST_PIPELINE);
    fs::write(
        temp_dir.path().join("kiteplan.toml"),
        "[queues]\naws1x_l4 = \"l4-pool\"\n",
    )
    .unwrap();

    kiteplan(temp_dir.path())
        .args(["--commit", COMMIT, "--config", "kiteplan.toml", "--output", "-"])
        .assert()
        .success()
        .stdout(predicate::str::contains("queue: l4-pool"))
        .stdout(predicate::str::contains("queue: cpu_queue"));
}
