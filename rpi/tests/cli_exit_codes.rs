//! CLI tests: spawn the `rpi` binary and check exit codes and output.

use std::io::Write;
use std::process::{Command, Stdio};

use rpi::exit_codes;
use rpi::io::init::{InitOptions, init_workspace};

fn rpi(root: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_rpi"));
    cmd.arg("--root").arg(root).env_remove("RUST_LOG");
    cmd
}

#[test]
fn feature_id_prints_slug() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_workspace(temp.path(), &InitOptions::default()).expect("init");

    let output = rpi(temp.path())
        .args(["feature-id", "Add rate limiting to API endpoints"])
        .output()
        .expect("rpi feature-id");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "add-rate-limiting-to-api-endpoints"
    );
}

#[test]
fn non_qualifying_label_exits_ignored() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_workspace(temp.path(), &InitOptions::default()).expect("init");

    let mut child = rpi(temp.path())
        .arg("dispatch")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("rpi dispatch");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(
            br#"{"kind":"label","item_id":"7","title":"Docs","label":"bug","actor":"alice"}"#,
        )
        .expect("write event");
    let status = child.wait().expect("wait");

    assert_eq!(status.code(), Some(exit_codes::IGNORED));
}

#[test]
fn malformed_event_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_workspace(temp.path(), &InitOptions::default()).expect("init");
    let event = temp.path().join("event.json");
    std::fs::write(&event, r#"{"kind":"label","title":"Docs"}"#).expect("write event");

    let output = rpi(temp.path())
        .arg("dispatch")
        .arg(&event)
        .output()
        .expect("rpi dispatch");
    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(!output.stderr.is_empty());
}

#[test]
fn status_of_unknown_feature_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_workspace(temp.path(), &InitOptions::default()).expect("init");

    let output = rpi(temp.path())
        .args(["status", "nope"])
        .output()
        .expect("rpi status");
    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no pipeline run for 'nope'"));
}

#[test]
fn init_twice_without_force_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let first = rpi(temp.path()).arg("init").output().expect("rpi init");
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    let second = rpi(temp.path()).arg("init").output().expect("rpi init");
    assert_eq!(second.status.code(), Some(exit_codes::FAILED));
    let forced = rpi(temp.path())
        .args(["init", "--force"])
        .output()
        .expect("rpi init --force");
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn sweep_with_no_artifacts_reports_nothing() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_workspace(temp.path(), &InitOptions::default()).expect("init");

    let output = rpi(temp.path())
        .args(["sweep", "--now", "2026-03-01T00:00:00Z"])
        .output()
        .expect("rpi sweep");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["removed"], serde_json::json!([]));
    assert_eq!(report["commit"], serde_json::Value::Null);
}

#[test]
fn status_refuses_paths_outside_the_run_store() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_workspace(temp.path(), &InitOptions::default()).expect("init");
    std::fs::write(temp.path().join("x.json"), "{}").expect("write decoy");

    let output = rpi(temp.path())
        .args(["status", "../../x"])
        .output()
        .expect("rpi status");
    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not a valid feature id"));
}
