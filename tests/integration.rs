use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docsync_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docsync"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs = root.join("documents");
    fs::create_dir_all(&docs).unwrap();
    fs::write(
        docs.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    ).unwrap();
    fs::write(
        docs.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    ).unwrap();
    fs::write(
        docs.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    ).unwrap();
    fs::write(docs.join("ignored.rs"), "fn main() {}").unwrap();

    let config_content = format!(
        r#"[paths]
documents_dir = "{root}/documents"
state_dir = "{root}/processed"

[index]
backend = "sqlite"
path = "{root}/vector_store/index.sqlite"

[chunking]
chunk_size = 512
chunk_overlap = 64

[server]
bind = "127.0.0.1:7331"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("docsync.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docsync(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docsync_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docsync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_state() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docsync(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Initialized"));
    assert!(tmp.path().join("processed").is_dir());
    assert!(tmp.path().join("vector_store/index.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_docsync(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_docsync(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_sync_processes_supported_files() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docsync(&config_path, &["sync"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("processed: 3"), "{}", stdout);
    assert!(stdout.contains("ok"));

    let ledger = fs::read_to_string(tmp.path().join("processed/signatures.json")).unwrap();
    let ledger: serde_json::Value = serde_json::from_str(&ledger).unwrap();
    assert_eq!(ledger["version"], 1);
    assert_eq!(ledger["files"].as_object().unwrap().len(), 3);
}

#[test]
fn test_sync_incremental() {
    let (tmp, config_path) = setup_test_env();
    run_docsync(&config_path, &["sync"]);

    fs::write(
        tmp.path().join("documents/delta.md"),
        "# Delta\n\nA brand new document.",
    )
    .unwrap();
    fs::remove_file(tmp.path().join("documents/beta.md")).unwrap();

    let (stdout, _, success) = run_docsync(&config_path, &["sync"]);
    assert!(success);
    assert!(stdout.contains("deleted: 1"), "{}", stdout);
    assert!(stdout.contains("processed: 1"), "{}", stdout);
    assert!(stdout.contains("unchanged: 2"), "{}", stdout);
}

#[test]
fn test_search_finds_relevant_document() {
    let (_tmp, config_path) = setup_test_env();
    run_docsync(&config_path, &["sync"]);

    let (stdout, _, success) = run_docsync(
        &config_path,
        &["search", "Kubernetes and Docker deployment", "--limit", "1"],
    );
    assert!(success);
    assert!(stdout.contains("gamma.txt"), "{}", stdout);
    assert!(stdout.starts_with("1. ["));
}

#[test]
fn test_search_no_results_on_empty_index() {
    let (_tmp, config_path) = setup_test_env();
    run_docsync(&config_path, &["init"]);

    let (stdout, _, success) = run_docsync(&config_path, &["search", "anything"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_status_after_sync() {
    let (_tmp, config_path) = setup_test_env();
    run_docsync(&config_path, &["sync"]);

    let (stdout, _, success) = run_docsync(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("known files: 3"), "{}", stdout);
    assert!(stdout.contains("indexed sources: 3"), "{}", stdout);
    assert!(!stdout.contains("last processed: never"), "{}", stdout);
}

#[test]
fn test_forget_removes_from_index_but_not_disk() {
    let (tmp, config_path) = setup_test_env();
    run_docsync(&config_path, &["sync"]);

    let (stdout, stderr, success) = run_docsync(&config_path, &["forget", "alpha.md"]);
    assert!(success, "forget failed: {} {}", stdout, stderr);
    assert!(tmp.path().join("documents/alpha.md").exists());

    let (stdout, _, _) = run_docsync(&config_path, &["status"]);
    assert!(stdout.contains("known files: 2"), "{}", stdout);
}

#[test]
fn test_forget_unknown_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_docsync(&config_path, &["sync"]);

    let (_, stderr, success) = run_docsync(&config_path, &["forget", "nope.md"]);
    assert!(!success);
    assert!(stderr.contains("unknown document"), "{}", stderr);
}

#[test]
fn test_corrupt_ledger_is_fatal() {
    let (tmp, config_path) = setup_test_env();
    run_docsync(&config_path, &["sync"]);
    fs::write(tmp.path().join("processed/signatures.json"), "{ truncated").unwrap();

    let output = Command::new(docsync_binary())
        .arg("--config")
        .arg(&config_path)
        .arg("sync")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("corrupt"), "{}", stderr);
}

#[test]
fn test_missing_explicit_config_errors() {
    let (tmp, _config_path) = setup_test_env();
    let (_, stderr, success) = run_docsync(&tmp.path().join("nope.toml"), &["status"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}

#[test]
fn test_invalid_config_is_fatal() {
    let (tmp, _config_path) = setup_test_env();
    let bad = tmp.path().join("config").join("bad.toml");
    fs::write(&bad, "[chunking]\nchunk_size = 10\nchunk_overlap = 50\n").unwrap();

    let output = Command::new(docsync_binary())
        .arg("--config")
        .arg(&bad)
        .arg("status")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("fatal:"), "{}", stderr);
    assert!(stderr.contains("chunk_overlap"), "{}", stderr);
}

#[test]
fn test_log_file_is_written() {
    let (tmp, config_path) = setup_test_env();
    let log_path = tmp.path().join("logs").join("docsync.log");
    let mut content = fs::read_to_string(&config_path).unwrap();
    content.push_str(&format!(
        "\n[logging]\nlevel = \"info\"\nfile = \"{}\"\n",
        log_path.display()
    ));
    fs::write(&config_path, content).unwrap();

    let (stdout, stderr, success) = run_docsync(&config_path, &["sync"]);
    assert!(success, "sync failed: {} {}", stdout, stderr);
    let log = fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("startup reconciliation complete"), "{}", log);
}
