//! Runs the built `kchat` binary for commands that need no model server.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn kchat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kchat");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let knowledge = root.join("knowledge");
    fs::create_dir_all(&knowledge).unwrap();
    fs::write(
        knowledge.join("contact.md"),
        "For tree planting, contact the Parks Department.",
    )
    .unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[models]
provider = "disabled"

[knowledge]
root = "{root}/knowledge"

[storage]
index_dir = "{root}/storage/index"
history_path = "{root}/storage/chat/chat_store.json"
"#,
        root = root.display()
    );
    let config_path = config_dir.join("kchat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kchat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn history_is_empty_at_first() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_kchat(&config, &["history"]);
    assert!(ok, "history failed: {}", stderr);
    assert!(stdout.contains("No chat history."));

    let (stdout, _, ok) = run_kchat(&config, &["history", "--json"]);
    assert!(ok);
    assert_eq!(stdout.trim(), "[]");
}

#[test]
fn history_prints_stored_conversation() {
    let (tmp, config) = setup_test_env();
    let chat_dir = tmp.path().join("storage/chat");
    fs::create_dir_all(&chat_dir).unwrap();
    fs::write(
        chat_dir.join("chat_store.json"),
        r#"{"store": {"default": [
            {"role": "user", "content": "Who plants trees?", "created_at": "2025-04-01T10:00:00Z"},
            {"role": "assistant", "content": "The Parks Department.", "created_at": "2025-04-01T10:00:05Z"}
        ]}}"#,
    )
    .unwrap();

    let (stdout, stderr, ok) = run_kchat(&config, &["history"]);
    assert!(ok, "history failed: {}", stderr);
    assert!(stdout.contains("user: Who plants trees?"));
    assert!(stdout.contains("assistant: The Parks Department."));
}

#[test]
fn sessions_lists_stored_conversations() {
    let (tmp, config) = setup_test_env();
    let (stdout, _, ok) = run_kchat(&config, &["sessions"]);
    assert!(ok);
    assert!(stdout.contains("No chat history."));

    let chat_dir = tmp.path().join("storage/chat");
    fs::create_dir_all(&chat_dir).unwrap();
    fs::write(
        chat_dir.join("chat_store.json"),
        r#"{"store": {
            "alice": [{"role": "user", "content": "hi"}, {"role": "assistant", "content": "hello"}],
            "bob": [{"role": "user", "content": "hey"}, {"role": "assistant", "content": "hi"}]
        }}"#,
    )
    .unwrap();
    let (stdout, stderr, ok) = run_kchat(&config, &["sessions"]);
    assert!(ok, "sessions failed: {}", stderr);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, vec!["alice  (2 messages)", "bob  (2 messages)"]);
}

#[test]
fn reset_is_idempotent() {
    let (tmp, config) = setup_test_env();
    let chat_dir = tmp.path().join("storage/chat");
    fs::create_dir_all(&chat_dir).unwrap();
    fs::write(
        chat_dir.join("chat_store.json"),
        r#"{"store": {"default": [{"role": "user", "content": "hi"}]}}"#,
    )
    .unwrap();

    let (stdout, stderr, ok) = run_kchat(&config, &["reset"]);
    assert!(ok, "reset failed: {}", stderr);
    assert!(stdout.contains("Chat history cleared."));
    assert!(!chat_dir.join("chat_store.json").exists());

    let (_, stderr, ok) = run_kchat(&config, &["reset"]);
    assert!(ok, "second reset failed: {}", stderr);
}

#[test]
fn index_with_disabled_provider_fails_cleanly() {
    let (tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_kchat(&config, &["index"]);
    assert!(!ok);
    assert!(stderr.contains("disabled"), "stderr: {}", stderr);
    assert!(!tmp.path().join("storage/index").exists());
}

#[test]
fn json_progress_reports_scanning() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_kchat(&config, &["index", "--progress", "json"]);
    assert!(!ok);
    let scanning = stderr
        .lines()
        .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
        .find(|v| v["phase"] == "scanning")
        .expect("no scanning event on stderr");
    assert_eq!(scanning["event"], "progress");
    assert!(scanning["location"].as_str().unwrap().ends_with("knowledge"));
}

#[test]
fn index_dir_inside_corpus_is_rejected() {
    let (tmp, config) = setup_test_env();
    let content = fs::read_to_string(&config)
        .unwrap()
        .replace("/storage/index", "/knowledge/.index");
    fs::write(&config, content).unwrap();

    let (_, stderr, ok) = run_kchat(&config, &["relearn", "--yes"]);
    assert!(!ok);
    assert!(stderr.contains("must not overlap"), "stderr: {}", stderr);
    assert!(tmp.path().join("knowledge/contact.md").exists());
}

#[test]
fn relearn_requires_confirmation_when_not_interactive() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_kchat(&config, &["relearn"]);
    assert!(!ok);
    assert!(stderr.contains("--yes"), "stderr: {}", stderr);
}

#[test]
fn invalid_config_is_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(&bad, "[retrieval]\ntop_k = 0\n").unwrap();
    let (_, stderr, ok) = run_kchat(&bad, &["history"]);
    assert!(!ok);
    assert!(stderr.contains("top_k"), "stderr: {}", stderr);
}

#[test]
fn completions_for_bash() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, ok) = run_kchat(&config, &["completions", "bash"]);
    assert!(ok);
    assert!(stdout.contains("kchat"));
    assert!(stdout.contains("relearn"));
}
