pub mod compact;
pub mod fix;
pub mod remove;
pub mod strip;
pub mod trim;

use crate::error::EvsError;
use crate::jsonl::{self, JsonlLine};
use crate::models::{ChangeSet, ClaudeSession};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_BACKUP_KEEP: usize = 10;

/// Every transformer returns the authoritative next content plus the
/// descriptive edit plan. The input session is never mutated.
#[derive(Debug)]
pub struct TransformOutcome {
    pub next_values: Vec<Value>,
    pub changes: ChangeSet,
}

impl TransformOutcome {
    pub fn unchanged(values: Vec<Value>) -> Self {
        TransformOutcome {
            next_values: values,
            changes: ChangeSet::new(),
        }
    }
}

/// Apply a ChangeSet to an in-memory value sequence where `values[i]`
/// corresponds to line `i + 1`. Updates first, then deletes descending,
/// then inserts descending. All change targets are original line numbers,
/// so insert positions must discount the deletions that precede them.
pub fn apply(values: &[Value], cs: &ChangeSet) -> Vec<Value> {
    let mut out: Vec<Value> = values.to_vec();

    for (line, value) in &cs.updates {
        let idx = (*line as usize).saturating_sub(1);
        if idx < out.len() {
            out[idx] = value.clone();
        }
    }

    let mut deletes = cs.deleted_lines();
    deletes.sort_unstable();
    deletes.dedup();
    for &line in deletes.iter().rev() {
        let idx = (line as usize).saturating_sub(1);
        if idx < out.len() {
            out.remove(idx);
        }
    }

    let mut inserts: Vec<(u32, &Vec<Value>)> =
        cs.inserts.iter().map(|(l, v)| (*l, v)).collect();
    inserts.sort_by_key(|(l, _)| *l);
    for (after_line, values) in inserts.into_iter().rev() {
        // "After original line L" lands after however many of the first L
        // lines survived the deletions.
        let removed_before = deletes.partition_point(|&d| d <= after_line);
        let idx = (after_line as usize)
            .saturating_sub(removed_before)
            .min(out.len());
        for v in values.iter().rev() {
            out.insert(idx, v.clone());
        }
    }

    out
}

/// Apply a ChangeSet against the file itself, keyed by real line numbers.
/// Untouched lines, including ones that never parsed as JSON, are kept
/// byte-for-byte; only targeted lines are re-serialized.
pub fn render_file(path: &Path, cs: &ChangeSet) -> std::io::Result<String> {
    let deletes: HashSet<u32> = cs.deleted_lines().into_iter().collect();
    let mut out = String::new();

    if let Some(head) = cs.inserts.get(&0) {
        for v in head {
            out.push_str(&v.to_string());
            out.push('\n');
        }
    }

    for jl in jsonl::read_jsonl(path)? {
        let line = jl.line();
        if !deletes.contains(&line) {
            match cs.updates.get(&line) {
                Some(v) => out.push_str(&v.to_string()),
                None => match &jl {
                    JsonlLine::Json { raw, .. } | JsonlLine::Invalid { raw, .. } => {
                        out.push_str(raw)
                    }
                },
            }
            out.push('\n');
        }
        if let Some(values) = cs.inserts.get(&line) {
            for v in values {
                out.push_str(&v.to_string());
                out.push('\n');
            }
        }
    }

    Ok(out)
}

// ── Backup policy ────────────────────────────────────────────────────────────

pub fn backup_path(path: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    PathBuf::from(format!("{}.backup-{stamp}", path.display()))
}

/// Keep the N most recent backups of `path`; prune the rest. Backup names
/// embed a zero-padded local timestamp, so lexical order is age order.
pub fn prune_backups(path: &Path, keep: usize) -> std::io::Result<usize> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let prefix = format!(
        "{}.backup-",
        path.file_name().unwrap_or_default().to_string_lossy()
    );

    let mut backups: Vec<PathBuf> = fs::read_dir(parent)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        .map(|e| e.path())
        .collect();
    backups.sort();

    let mut removed = 0;
    if backups.len() > keep {
        let excess = backups.len() - keep;
        for old in backups.into_iter().take(excess) {
            if fs::remove_file(&old).is_ok() {
                removed += 1;
            }
        }
    }
    Ok(removed)
}

/// Write a transform result back to disk: timestamped backup, atomic
/// rewrite, retention prune. A zero-change outcome skips everything and
/// returns `None`.
pub fn write_with_backup(
    path: &Path,
    changes: &ChangeSet,
    keep: usize,
) -> Result<Option<PathBuf>, EvsError> {
    if changes.is_empty() {
        return Ok(None);
    }

    let content = render_file(path, changes)?;
    let backup = backup_path(path);
    fs::copy(path, &backup)?;
    jsonl::write_atomic(path, content.as_bytes())?;
    let _ = prune_backups(path, keep);
    Ok(Some(backup))
}

// ── Shared Claude relinking ──────────────────────────────────────────────────

/// For every surviving entry whose parent is being deleted, repoint
/// `parentUuid` at the nearest surviving ancestor, or null when the whole
/// ancestry is gone. `work` holds the mutable per-entry values; returns the
/// indices that were relinked.
pub(crate) fn relink_children(
    session: &ClaudeSession,
    deleted: &HashSet<usize>,
    work: &mut [Value],
) -> Vec<usize> {
    let mut relinked = Vec::new();

    for (idx, entry) in session.entries.iter().enumerate() {
        if deleted.contains(&idx) {
            continue;
        }
        let Some(parent) = entry.parent_uuid() else {
            continue;
        };
        let Some(&pi) = session.by_uuid.get(parent) else {
            continue;
        };
        if !deleted.contains(&pi) {
            continue;
        }

        // Walk up through deleted ancestors.
        let mut cursor = pi;
        let new_parent = loop {
            match session.entries[cursor]
                .parent_uuid()
                .and_then(|p| session.by_uuid.get(p))
            {
                Some(&up) if deleted.contains(&up) => cursor = up,
                Some(&up) => break session.entries[up].uuid().map(|s| s.to_string()),
                None => break None,
            }
        };

        work[idx]["parentUuid"] = match new_parent {
            Some(uuid) => Value::String(uuid),
            None => Value::Null,
        };
        relinked.push(idx);
    }

    relinked
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_updates_deletes_inserts() {
        let values = vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})];
        let mut cs = ChangeSet::new();
        cs.update(2, json!({"n": 20}), "upd");
        cs.delete(1, "del");
        cs.insert_after(3, vec![json!({"n": 4})], "ins");
        cs.sort();

        let out = apply(&values, &cs);
        assert_eq!(out, vec![json!({"n": 20}), json!({"n": 3}), json!({"n": 4})]);
    }

    #[test]
    fn apply_insert_position_survives_earlier_delete() {
        // Insert targets an original line number; a deletion before it must
        // not shift the splice point past its neighbor.
        let values = vec![
            json!({"n": 1}),
            json!({"n": 2}),
            json!({"n": 3}),
            json!({"n": 4}),
        ];
        let mut cs = ChangeSet::new();
        cs.delete(2, "del");
        cs.insert_after(3, vec![json!({"n": 99})], "ins");
        cs.sort();

        let out = apply(&values, &cs);
        assert_eq!(
            out,
            vec![json!({"n": 1}), json!({"n": 3}), json!({"n": 99}), json!({"n": 4})]
        );
    }

    #[test]
    fn apply_insert_at_head_and_after_deleted_line() {
        let values = vec![json!({"n": 1}), json!({"n": 2})];
        let mut cs = ChangeSet::new();
        cs.insert_after(0, vec![json!({"n": 0})], "head");
        cs.delete(1, "del");
        // After a line that was itself deleted: lands where it used to be.
        cs.insert_after(1, vec![json!({"n": 10})], "ins");
        cs.sort();

        let out = apply(&values, &cs);
        assert_eq!(out, vec![json!({"n": 0}), json!({"n": 10}), json!({"n": 2})]);
    }

    #[test]
    fn apply_empty_changeset_is_identity() {
        let values = vec![json!({"a": 1}), json!({"b": 2})];
        assert_eq!(apply(&values, &ChangeSet::new()), values);
    }

    #[test]
    fn render_file_preserves_untouched_raw_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        // Second line is invalid JSON and must survive an unrelated edit.
        fs::write(&path, "{\"n\": 1}\nnot-json{\n{\"n\":3}\n").unwrap();

        let mut cs = ChangeSet::new();
        cs.delete(3, "del");
        let rendered = render_file(&path, &cs).unwrap();
        assert_eq!(rendered, "{\"n\": 1}\nnot-json{\n");
    }

    #[test]
    fn write_with_backup_skips_zero_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        fs::write(&path, "{\"n\":1}\n").unwrap();

        let result = write_with_backup(&path, &ChangeSet::new(), DEFAULT_BACKUP_KEEP).unwrap();
        assert!(result.is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn write_with_backup_creates_backup_and_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        fs::write(&path, "{\"n\":1}\n{\"n\":2}\n").unwrap();

        let mut cs = ChangeSet::new();
        cs.delete(1, "del");
        let backup = write_with_backup(&path, &cs, DEFAULT_BACKUP_KEEP)
            .unwrap()
            .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"n\":2}\n");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "{\"n\":1}\n{\"n\":2}\n");
        assert!(backup.to_string_lossy().contains(".backup-"));
    }

    #[test]
    fn prune_backups_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        fs::write(&path, "{}\n").unwrap();
        for i in 0..5 {
            fs::write(
                dir.path().join(format!("t.jsonl.backup-20250101-00000{i}")),
                "{}\n",
            )
            .unwrap();
        }

        let removed = prune_backups(&path, 2).unwrap();
        assert_eq!(removed, 3);

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.contains(".backup-"))
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                "t.jsonl.backup-20250101-000003".to_string(),
                "t.jsonl.backup-20250101-000004".to_string(),
            ]
        );
    }
}
