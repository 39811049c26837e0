use crate::models::{block_type, ChangeSet, ClaudeSession, CodexSession, Session};
use crate::transform::{relink_children, TransformOutcome};
use serde_json::Value;
use std::collections::HashSet;

/// Remove bookkeeping entries that carry nothing a user would ever see.
pub fn strip(session: &Session) -> TransformOutcome {
    match session {
        Session::Claude(s) => strip_claude(s),
        Session::Codex(s) => strip_codex(s),
    }
}

pub fn strip_claude(session: &ClaudeSession) -> TransformOutcome {
    let mut deleted: HashSet<usize> = HashSet::new();
    let mut changes = ChangeSet::new();
    let mut work: Vec<Value> = session.entries.iter().map(|e| e.value.clone()).collect();

    for (idx, entry) in session.entries.iter().enumerate() {
        let reason = match entry.entry_type() {
            Some("file-history-snapshot") => Some("strip file-history snapshot"),
            Some("system") => Some("strip system entry"),
            Some("user" | "assistant") if claude_content_is_empty(entry.content()) => {
                Some("strip entry with no observable content")
            }
            _ => None,
        };
        if let Some(reason) = reason {
            deleted.insert(idx);
            changes.delete(entry.line, reason);
        }
    }

    for idx in relink_children(session, &deleted, &mut work) {
        changes.update(
            session.entries[idx].line,
            work[idx].clone(),
            "relink to surviving ancestor",
        );
    }
    changes.sort();

    let next_values = session
        .entries
        .iter()
        .enumerate()
        .filter(|(idx, _)| !deleted.contains(idx))
        .map(|(idx, _)| work[idx].clone())
        .collect();

    TransformOutcome {
        next_values,
        changes,
    }
}

pub fn strip_codex(session: &CodexSession) -> TransformOutcome {
    let mut changes = ChangeSet::new();
    let mut next_values = Vec::new();

    for entry in &session.entries {
        let noise = matches!(
            entry.record_type(),
            Some("turn_context" | "event_msg")
        ) || matches!(entry.payload_type(), Some("turn_context" | "event_msg"))
            || codex_message_is_empty(entry.payload());

        if noise {
            changes.delete(entry.line, "strip noise record");
        } else {
            next_values.push(entry.value.clone());
        }
    }
    changes.sort();

    TransformOutcome {
        next_values,
        changes,
    }
}

fn claude_content_is_empty(content: Option<&Value>) -> bool {
    match content {
        None => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(blocks)) => {
            blocks.is_empty()
                || blocks.iter().all(|b| {
                    block_type(b) == Some("text")
                        && b["text"].as_str().map(|t| t.trim().is_empty()).unwrap_or(true)
                })
        }
        Some(_) => false,
    }
}

fn codex_message_is_empty(payload: Option<&Value>) -> bool {
    let Some(payload) = payload else { return false };
    payload["type"].as_str() == Some("message")
        && payload["content"]
            .as_array()
            .map(|c| c.is_empty())
            .unwrap_or(false)
}
