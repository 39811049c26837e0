use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn evs() -> Command {
    Command::new(env!("CARGO_BIN_EXE_evs"))
}

fn write_jsonl(dir: &Path, name: &str, lines: &[serde_json::Value]) -> PathBuf {
    let path = dir.join(name);
    let mut text = String::new();
    for line in lines {
        text.push_str(&line.to_string());
        text.push('\n');
    }
    std::fs::write(&path, text).unwrap();
    path
}

fn read_entries(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn run(cmd: &mut Command) -> Output {
    cmd.env("NO_COLOR", "1").output().expect("binary runs")
}

fn broken_session(dir: &Path) -> PathBuf {
    write_jsonl(
        dir,
        "session.jsonl",
        &[
            serde_json::json!({"type": "user", "uuid": "u1", "parentUuid": null,
                   "message": {"role": "user", "content": "hello"}}),
            serde_json::json!({"type": "assistant", "uuid": "a1", "parentUuid": "u1",
                   "message": {"role": "assistant", "content": [
                       {"type": "text", "text": "answer"},
                       {"type": "thinking", "thinking": "hmm"},
                   ]}}),
            serde_json::json!({"type": "user", "uuid": "u2", "parentUuid": "a1",
                   "message": {"role": "user", "content": [
                       {"type": "tool_result", "tool_use_id": "T-gone", "content": "x"},
                       {"type": "text", "text": "and more"},
                   ]}}),
        ],
    )
}

#[test]
fn fix_repairs_and_validate_goes_quiet() {
    let dir = tempfile::tempdir().unwrap();
    let path = broken_session(dir.path());

    let out = run(evs().arg("fix").arg(&path));
    assert!(out.status.success(), "fix failed: {:?}", out);

    // Backup sits next to the transcript.
    let backups: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".backup-"))
        .collect();
    assert_eq!(backups.len(), 1);

    // Thinking block now leads; orphan tool_result is gone.
    let entries = read_entries(&path);
    let blocks = entries[1]["message"]["content"].as_array().unwrap();
    assert_eq!(blocks[0]["type"], "thinking");
    let u2_blocks = entries[2]["message"]["content"].as_array().unwrap();
    assert!(u2_blocks.iter().all(|b| b["type"] != "tool_result"));

    let check = run(evs().arg("validate").arg(&path));
    assert!(check.status.success());
}

#[test]
fn fix_is_idempotent_across_invocations() {
    let dir = tempfile::tempdir().unwrap();
    let path = broken_session(dir.path());

    run(evs().arg("fix").arg(&path));
    let after_first = std::fs::read_to_string(&path).unwrap();

    let second = run(evs().arg("fix").arg(&path));
    assert!(second.status.success());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), after_first);

    // No second backup for a zero-change pass.
    let backups = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".backup-"))
        .count();
    assert_eq!(backups, 1);
}

#[test]
fn validate_exit_one_on_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_jsonl(
        dir.path(),
        "session.jsonl",
        &[serde_json::json!({"type": "user", "uuid": "u1", "parentUuid": "ghost",
               "message": {"role": "user", "content": "hi"}})],
    );

    let out = run(evs().arg("validate").arg(&path));
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn dry_run_plans_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let path = broken_session(dir.path());
    let before = std::fs::read_to_string(&path).unwrap();

    let out = run(evs().arg("fix").arg(&path).arg("--dry-run"));
    assert!(out.status.success());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), before);

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("update_line"), "plan missing: {stdout}");
}

#[test]
fn remove_deletes_selected_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = broken_session(dir.path());

    let out = run(evs().arg("remove").arg(&path).args(["--lines", "2"]));
    assert!(out.status.success());

    let entries = read_entries(&path);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1]["uuid"], "u2");
    assert_eq!(entries[1]["parentUuid"], "u1");
}

#[test]
fn trim_reroots_remaining_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = broken_session(dir.path());

    let out = run(evs()
        .arg("trim")
        .arg(&path)
        .args(["--count", "1", "--keep-last", "1"]));
    assert!(out.status.success());

    let entries = read_entries(&path);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["uuid"], "a1");
    assert_eq!(entries[0]["parentUuid"], serde_json::Value::Null);
}

#[test]
fn compact_trims_logs_and_arms_pending_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = broken_session(dir.path());
    let control_dir = dir.path().join("control");

    let out = run(evs()
        .env("EVS_CONTROL_DIR", &control_dir)
        .arg("compact")
        .arg(&path)
        .args(["--percent", "50", "--keep-last", "1"]));
    assert!(out.status.success(), "compact failed: {out:?}");

    assert!(read_entries(&path).len() < 3);

    // Automated-path artifacts: per-session log event + supervisor trigger.
    let log = std::fs::read_to_string(dir.path().join("session.evs.log")).unwrap();
    assert!(log.contains("auto_compact"));
    let pending: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(control_dir.join("pending-reload.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(pending["reason"], "auto_compact");
}

#[test]
fn diff_exit_codes_mirror_differences() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_jsonl(dir.path(), "a.jsonl", &[serde_json::json!({"n": 1})]);
    let b = write_jsonl(dir.path(), "b.jsonl", &[serde_json::json!({"n": 1})]);
    let c = write_jsonl(dir.path(), "c.jsonl", &[serde_json::json!({"n": 2})]);

    assert_eq!(run(evs().arg("diff").arg(&a).arg(&b)).status.code(), Some(0));
    assert_eq!(run(evs().arg("diff").arg(&a).arg(&c)).status.code(), Some(1));
}

#[test]
fn missing_file_is_a_usage_error() {
    let out = run(evs().arg("validate").arg("/nonexistent/nope.jsonl"));
    assert_eq!(out.status.code(), Some(2));

    let unknown = run(evs().arg("frobnicate"));
    assert_eq!(unknown.status.code(), Some(2));
}

#[test]
fn reload_appends_a_control_command() {
    let dir = tempfile::tempdir().unwrap();
    let control_dir = dir.path().join("control");

    let out = run(evs()
        .env("EVS_CONTROL_DIR", &control_dir)
        .arg("reload")
        .args(["--reason", "smoke test"]));
    assert!(out.status.success());

    let log = std::fs::read_to_string(control_dir.join("control.jsonl")).unwrap();
    let record: serde_json::Value = serde_json::from_str(log.lines().next().unwrap()).unwrap();
    assert_eq!(record["cmd"], "reload");
    assert_eq!(record["reason"], "smoke test");
    assert!(record["ts"].is_string());
}
