use crate::error::EvsError;
use crate::models::{ChangeSet, ClaudeSession, CodexSession, Session};
use crate::transform::{relink_children, TransformOutcome};
use serde_json::Value;
use std::collections::HashSet;

pub const DEFAULT_KEEP_LAST: usize = 2;

#[derive(Debug, Clone, Copy)]
pub enum TrimAmount {
    Count(usize),
    Percent(u8),
}

#[derive(Debug, Clone, Copy)]
pub struct TrimParams {
    pub amount: TrimAmount,
    pub keep_last_messages: usize,
}

/// Remove the oldest messages: the Claude leaf chain prefix, or the oldest
/// Codex `response_item`s. `keep_last_messages` caps how deep the cut goes.
pub fn trim(session: &Session, params: TrimParams) -> Result<TransformOutcome, EvsError> {
    match session {
        Session::Claude(s) => trim_claude(s, params),
        Session::Codex(s) => trim_codex(s, params),
    }
}

fn resolve_count(amount: TrimAmount, total: usize, keep_last: usize) -> usize {
    let requested = match amount {
        TrimAmount::Count(n) => n,
        TrimAmount::Percent(p) => total * (p.min(100) as usize) / 100,
    };
    requested.min(total.saturating_sub(keep_last))
}

pub fn trim_claude(session: &ClaudeSession, params: TrimParams) -> Result<TransformOutcome, EvsError> {
    let chain = &session.leaf_chain;
    if chain.is_empty() {
        return Err(EvsError::transform("session has no leaf chain to trim"));
    }

    let remove_count = resolve_count(params.amount, chain.len(), params.keep_last_messages);
    let all_values: Vec<Value> = session.entries.iter().map(|e| e.value.clone()).collect();
    if remove_count == 0 {
        return Ok(TransformOutcome::unchanged(all_values));
    }

    let deleted: HashSet<usize> = chain[..remove_count].iter().copied().collect();
    let mut work = all_values;
    let mut changes = ChangeSet::new();

    for &idx in &chain[..remove_count] {
        changes.delete(session.entries[idx].line, "trim oldest chain message");
    }
    // The new chain root (and any sidechain rooted in the removed prefix)
    // loses its entire ancestry, so relinking lands on null.
    for idx in relink_children(session, &deleted, &mut work) {
        changes.update(
            session.entries[idx].line,
            work[idx].clone(),
            "reroot after trim",
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

    Ok(TransformOutcome {
        next_values,
        changes,
    })
}

pub fn trim_codex(session: &CodexSession, params: TrimParams) -> Result<TransformOutcome, EvsError> {
    let items: Vec<usize> = session
        .entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_response_item())
        .map(|(i, _)| i)
        .collect();
    if items.is_empty() {
        return Err(EvsError::transform("session has no response items to trim"));
    }

    let remove_count = resolve_count(params.amount, items.len(), params.keep_last_messages);
    let all_values: Vec<Value> = session.entries.iter().map(|e| e.value.clone()).collect();
    if remove_count == 0 {
        return Ok(TransformOutcome::unchanged(all_values));
    }

    let deleted: HashSet<usize> = items[..remove_count].iter().copied().collect();
    let mut changes = ChangeSet::new();
    for &idx in &items[..remove_count] {
        changes.delete(session.entries[idx].line, "trim oldest response item");
    }
    changes.sort();

    let next_values = session
        .entries
        .iter()
        .enumerate()
        .filter(|(idx, _)| !deleted.contains(idx))
        .map(|(_, e)| e.value.clone())
        .collect();

    Ok(TransformOutcome {
        next_values,
        changes,
    })
}
