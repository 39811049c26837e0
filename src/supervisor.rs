use crate::config::{Config, ReloadMode};
use crate::jsonl;
use crate::lockfile;
use crate::models::Agent;
use crate::parser::parse_claude;
use crate::session_log;
use crate::transform::fix::{fix, FixOptions};
use crate::transform::write_with_backup;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::{Child, Command};

/// Written by the child (or a wrapper around it) into the control
/// directory; identifies the runtime ids the supervisor needs for resume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Handshake {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
}

pub fn handshake_path(control_dir: &Path) -> PathBuf {
    control_dir.join("handshake.json")
}

pub fn control_log_path(control_dir: &Path) -> PathBuf {
    control_dir.join("control.jsonl")
}

pub fn pending_reload_path(control_dir: &Path) -> PathBuf {
    control_dir.join("pending-reload.json")
}

/// Handshake reads always see a complete document: writes go through the
/// temp + rename path.
pub fn write_handshake(control_dir: &Path, handshake: &Handshake) -> Result<()> {
    let body = serde_json::to_string(handshake)?;
    jsonl::write_atomic(&handshake_path(control_dir), body.as_bytes())
        .context("writing handshake")
}

/// A malformed handshake is non-fatal: the supervisor falls back to the
/// initial arguments.
pub fn read_handshake(control_dir: &Path) -> Option<Handshake> {
    let content = std::fs::read_to_string(handshake_path(control_dir)).ok()?;
    serde_json::from_str(&content).ok()
}

/// Append a reload command for the supervisor to pick up on its next tick.
pub fn request_reload(control_dir: &Path, reason: &str) -> Result<()> {
    std::fs::create_dir_all(control_dir)?;
    let line = json!({
        "ts": chrono::Utc::now().to_rfc3339(),
        "cmd": "reload",
        "reason": reason,
    });
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(control_log_path(control_dir))
        .context("opening control log")?;
    writeln!(file, "{line}")?;
    Ok(())
}

/// Count reload commands appended since the cursor, then advance it.
/// Every control line is acted on at most once per supervisor lifetime.
pub fn drain_control(control_log: &Path, cursor: &mut usize) -> usize {
    let Ok(content) = std::fs::read_to_string(control_log) else {
        return 0;
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = (*cursor).min(lines.len());
    let reloads = lines[start..]
        .iter()
        .filter(|l| {
            serde_json::from_str::<serde_json::Value>(l)
                .map(|v| v["cmd"] == "reload")
                .unwrap_or(false)
        })
        .count();
    *cursor = lines.len();
    reloads
}

/// Trigger file placed by automated paths (e.g. a successful auto-compact).
/// Consumed when acted on.
pub fn consume_pending_reload(control_dir: &Path) -> bool {
    let path = pending_reload_path(control_dir);
    path.exists() && std::fs::remove_file(&path).is_ok()
}

/// Arguments that resume the host agent against its previous conversation.
/// Codex resumes by thread id, Claude by session id.
pub fn resume_args(agent: Agent, handshake: &Handshake) -> Option<Vec<String>> {
    match agent {
        Agent::Codex => handshake
            .thread_id
            .as_ref()
            .map(|id| vec!["resume".to_string(), id.clone()]),
        Agent::Claude => handshake
            .session_id
            .as_ref()
            .map(|id| vec!["--resume".to_string(), id.clone()]),
        Agent::Unknown => None,
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub agent: Agent,
    pub binary: String,
    pub initial_args: Vec<String>,
    pub config: Config,
}

/// Run the host agent under supervision: poll the control channel, restart
/// on reload commands, propagate the child's exit code when it leaves on
/// its own. Restarts never interleave: the next child is spawned only
/// after the previous one is gone.
pub async fn run(opts: &SupervisorOptions) -> Result<i32> {
    let cfg = &opts.config;
    std::fs::create_dir_all(&cfg.control_dir).context("creating control directory")?;

    let control_log = control_log_path(&cfg.control_dir);
    let mut cursor = 0usize;
    let mut current_args = opts.initial_args.clone();
    let mut restarts = 0u32;

    loop {
        let mut child = Command::new(&opts.binary)
            .args(&current_args)
            .spawn()
            .with_context(|| format!("spawning {}", opts.binary))?;

        log_lifecycle_event(restarts, &cfg.control_dir, &cfg.run_id);

        // One cooperative loop: each tick checks the child's exit, then the
        // control channel. Events are handled in arrival order and the next
        // child is only spawned after this one is fully gone.
        let exit = loop {
            if let Some(status) = child.try_wait().context("polling child")? {
                break Some(status.code().unwrap_or(1));
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    terminate(&mut child, cfg.restart_timeout_ms).await;
                    break Some(130);
                }
                _ = tokio::time::sleep(Duration::from_millis(cfg.poll_interval_ms)) => {}
            }

            if cfg.reload_mode == ReloadMode::Off {
                continue;
            }
            let mut reload = drain_control(&control_log, &mut cursor) > 0;
            if cfg.reload_mode == ReloadMode::Auto && consume_pending_reload(&cfg.control_dir) {
                reload = true;
            }
            if !reload {
                continue;
            }

            terminate(&mut child, cfg.restart_timeout_ms).await;

            let handshake = read_handshake(&cfg.control_dir).unwrap_or_default();
            if opts.agent == Agent::Claude {
                if let Some(transcript) = handshake.transcript_path.as_deref() {
                    fix_session_before_reload(Path::new(transcript), cfg).await;
                }
            }
            current_args =
                resume_args(opts.agent, &handshake).unwrap_or_else(|| opts.initial_args.clone());
            restarts += 1;
            break None;
        };

        if let Some(code) = exit {
            return Ok(code);
        }
    }
}

/// SIGTERM first; SIGKILL if the child outlives the grace period.
async fn terminate(child: &mut Child, timeout_ms: u64) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    if tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait())
        .await
        .is_err()
    {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}

fn log_lifecycle_event(restarts: u32, control_dir: &Path, run_id: &str) {
    let Some(handshake) = read_handshake(control_dir) else {
        return;
    };
    let (Some(transcript), Some(session_id)) = (
        handshake.transcript_path.as_deref(),
        handshake.session_id.as_deref().or(handshake.thread_id.as_deref()),
    ) else {
        return;
    };
    let Some(dir) = Path::new(transcript).parent() else {
        return;
    };
    let name = if restarts == 0 {
        "supervisor_start"
    } else {
        "supervisor_restart"
    };
    let record = session_log::event(name, json!({"run_id": run_id, "restarts": restarts}));
    if let Err(e) = session_log::append_event(&session_log::session_log_path(dir, session_id), &record) {
        eprintln!("[evs] session log append failed: {e}");
    }
}

/// The pre-reload hook: wait for the host agent's writes to settle, take
/// the session lock, run the default fix pass, rewrite atomically with a
/// backup. Every failure is swallowed, because a broken hook must never
/// wedge the reload, but each one is logged.
pub async fn fix_session_before_reload(transcript_path: &Path, cfg: &Config) {
    if !lockfile::wait_stable(
        transcript_path,
        cfg.stable_timeout_ms,
        cfg.stable_window_ms,
        100,
    )
    .await
    {
        eprintln!(
            "[evs] transcript {} never stabilized; skipping pre-reload fix",
            transcript_path.display()
        );
        return;
    }

    let Some(dir) = transcript_path.parent() else {
        return;
    };
    let session_id = transcript_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "session".to_string());
    let lock_path = session_log::session_lock_path(dir, &session_id);
    let log_path = session_log::session_log_path(dir, &session_id);

    let Some(lock) = lockfile::acquire_lock(&lock_path, cfg.lock_timeout_ms) else {
        eprintln!("[evs] another EverSession operation is in progress; skipping pre-reload fix");
        return;
    };

    let result: Result<usize> = (|| {
        let parsed = parse_claude(transcript_path)
            .map_err(|issues| anyhow::anyhow!("parse failed: {} issue(s)", issues.len()))?;
        let outcome = fix(&parsed.session, &FixOptions::default());
        let changed = outcome.changes.len();
        if changed > 0 {
            write_with_backup(transcript_path, &outcome.changes, cfg.backup_keep)?;
        }
        Ok(changed)
    })();
    lock.release();

    match result {
        Ok(changed) => {
            let record = session_log::event(
                "pre_reload_fix",
                json!({"path": transcript_path.display().to_string(), "changes": changed}),
            );
            if let Err(e) = session_log::append_event(&log_path, &record) {
                eprintln!("[evs] session log append failed: {e}");
            }
        }
        Err(e) => {
            eprintln!("[evs] pre-reload fix failed: {e}");
            let record = session_log::event(
                "pre_reload_fix",
                json!({"path": transcript_path.display().to_string(), "error": e.to_string()}),
            );
            let _ = session_log::append_event(&log_path, &record);
        }
    }
}
