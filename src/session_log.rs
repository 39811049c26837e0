use anyhow::{Context, Result};
use fs2::FileExt;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// `<dir>/<session_id>.evs.log`: the durable JSONL event stream for one
/// session, written next to its transcript.
pub fn session_log_path(dir: &Path, session_id: &str) -> PathBuf {
    dir.join(format!("{session_id}.evs.log"))
}

/// `<dir>/<session_id>.evs.lock` serializes transcript rewrites.
pub fn session_lock_path(dir: &Path, session_id: &str) -> PathBuf {
    dir.join(format!("{session_id}.evs.lock"))
}

/// Build a `{ts, event, ...}` record.
pub fn event(name: &str, mut fields: Value) -> Value {
    let mut record = serde_json::json!({
        "ts": chrono::Utc::now().to_rfc3339(),
        "event": name,
    });
    if let (Some(obj), Some(extra)) = (record.as_object_mut(), fields.as_object_mut()) {
        obj.append(extra);
    }
    record
}

pub fn append_event(log_path: &Path, record: &Value) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).context("creating session log directory")?;
        }
    }

    let line = {
        let mut s = record.to_string();
        s.push('\n');
        s
    };

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .context("opening session log")?;

    file.lock_exclusive().context("locking session log")?;
    file.write_all(line.as_bytes())?;
    file.flush()?;
    file.unlock().ok();

    Ok(())
}
