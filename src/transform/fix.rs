use crate::models::{block_type, is_thinking_block, ChangeSet, ClaudeSession};
use crate::transform::{relink_children, TransformOutcome};
use crate::validate::is_api_error_entry;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// What the fix pass is allowed to touch. The pre-reload default leaves
/// orphan tool_use blocks alone: a call that looks unanswered may simply
/// still be running.
#[derive(Debug, Clone)]
pub struct FixOptions {
    pub repair_broken_parent_uuids: bool,
    pub fix_thinking_block_order: bool,
    pub remove_orphan_tool_results: bool,
    pub remove_api_error_messages: bool,
    pub remove_orphan_tool_uses: bool,
}

impl Default for FixOptions {
    fn default() -> Self {
        FixOptions {
            repair_broken_parent_uuids: true,
            fix_thinking_block_order: true,
            remove_orphan_tool_results: true,
            remove_api_error_messages: true,
            remove_orphan_tool_uses: false,
        }
    }
}

pub fn fix(session: &ClaudeSession, opts: &FixOptions) -> TransformOutcome {
    let mut work: Vec<Value> = session.entries.iter().map(|e| e.value.clone()).collect();
    let mut deleted: HashSet<usize> = HashSet::new();
    let mut delete_reasons: HashMap<usize, String> = HashMap::new();
    let mut update_reasons: HashMap<usize, Vec<String>> = HashMap::new();

    let (use_ids, result_ids) = pairing_sets(session);

    for (idx, entry) in session.entries.iter().enumerate() {
        if opts.remove_api_error_messages && is_api_error_entry(entry) {
            deleted.insert(idx);
            delete_reasons.insert(idx, "remove API error message".to_string());
            continue;
        }

        let Some(blocks) = entry.content_blocks() else {
            continue;
        };

        let mut new_blocks: Vec<Value> = Vec::with_capacity(blocks.len());
        let mut drops: Vec<String> = Vec::new();
        for block in blocks {
            match orphan_drop(block, entry.is_sidechain(), opts, &use_ids, &result_ids) {
                Some(reason) => drops.push(reason),
                None => new_blocks.push(block.clone()),
            }
        }

        if !drops.is_empty() && new_blocks.is_empty() {
            deleted.insert(idx);
            delete_reasons.insert(idx, format!("message is only orphan blocks ({})", drops.join(", ")));
            continue;
        }

        let mut reordered = false;
        if opts.fix_thinking_block_order
            && entry.entry_type() == Some("assistant")
            && thinking_misordered(&new_blocks)
        {
            new_blocks = reorder_thinking_first(new_blocks);
            reordered = true;
        }

        if !drops.is_empty() || reordered {
            work[idx]["message"]["content"] = Value::Array(new_blocks);
            let entry_reasons = update_reasons.entry(idx).or_default();
            entry_reasons.extend(drops);
            if reordered {
                entry_reasons.push("reorder thinking blocks before other content".to_string());
            }
        }
    }

    for idx in relink_children(session, &deleted, &mut work) {
        update_reasons
            .entry(idx)
            .or_default()
            .push("relink to surviving ancestor".to_string());
    }

    if opts.repair_broken_parent_uuids {
        for (idx, missing) in &session.broken_parents {
            if deleted.contains(idx) {
                continue;
            }
            let new_parent = nearest_present_ancestor(session, *idx, &deleted);
            work[*idx]["parentUuid"] = match new_parent {
                Some(uuid) => Value::String(uuid),
                None => Value::Null,
            };
            update_reasons
                .entry(*idx)
                .or_default()
                .push(format!("repair broken parentUuid {missing}"));
        }
    }

    let mut changes = ChangeSet::new();
    let mut next_values = Vec::new();
    for (idx, entry) in session.entries.iter().enumerate() {
        if deleted.contains(&idx) {
            changes.delete(entry.line, delete_reasons[&idx].clone());
            continue;
        }
        if work[idx] != entry.value {
            let reason = update_reasons
                .get(&idx)
                .map(|r| r.join("; "))
                .unwrap_or_else(|| "update entry".to_string());
            changes.update(entry.line, work[idx].clone(), reason);
        }
        next_values.push(work[idx].clone());
    }
    changes.sort();

    TransformOutcome {
        next_values,
        changes,
    }
}

fn pairing_sets(session: &ClaudeSession) -> (HashSet<String>, HashSet<String>) {
    let mut use_ids = HashSet::new();
    let mut result_ids = HashSet::new();
    for entry in session.entries.iter().filter(|e| !e.is_sidechain()) {
        let Some(blocks) = entry.content_blocks() else {
            continue;
        };
        for block in blocks {
            match block_type(block) {
                Some("tool_use") => {
                    if let Some(id) = block["id"].as_str() {
                        use_ids.insert(id.to_string());
                    }
                }
                Some("tool_result") => {
                    if let Some(id) = block["tool_use_id"].as_str() {
                        result_ids.insert(id.to_string());
                    }
                }
                _ => {}
            }
        }
    }
    (use_ids, result_ids)
}

fn orphan_drop(
    block: &Value,
    sidechain: bool,
    opts: &FixOptions,
    use_ids: &HashSet<String>,
    result_ids: &HashSet<String>,
) -> Option<String> {
    if sidechain {
        return None;
    }
    match block_type(block) {
        Some("tool_result") if opts.remove_orphan_tool_results => {
            let id = block["tool_use_id"].as_str()?;
            (!use_ids.contains(id)).then(|| format!("drop orphan tool_result {id}"))
        }
        Some("tool_use") if opts.remove_orphan_tool_uses => {
            let id = block["id"].as_str()?;
            (!result_ids.contains(id)).then(|| format!("drop orphan tool_use {id}"))
        }
        _ => None,
    }
}

fn thinking_misordered(blocks: &[Value]) -> bool {
    let mut saw_non_thinking = false;
    for block in blocks {
        if is_thinking_block(block) {
            if saw_non_thinking {
                return true;
            }
        } else {
            saw_non_thinking = true;
        }
    }
    false
}

/// Stable partition: thinking blocks first, both groups keeping their
/// original relative order.
fn reorder_thinking_first(blocks: Vec<Value>) -> Vec<Value> {
    let (thinking, rest): (Vec<Value>, Vec<Value>) =
        blocks.into_iter().partition(|b| is_thinking_block(b));
    let mut out = thinking;
    out.extend(rest);
    out
}

/// The broken link makes real ancestors unknowable; repair to the nearest
/// earlier mainline entry that owns a uuid and survives this pass.
fn nearest_present_ancestor(
    session: &ClaudeSession,
    idx: usize,
    deleted: &HashSet<usize>,
) -> Option<String> {
    session.entries[..idx]
        .iter()
        .enumerate()
        .rev()
        .find(|(j, e)| !deleted.contains(j) && !e.is_sidechain() && e.uuid().is_some())
        .and_then(|(_, e)| e.uuid().map(|s| s.to_string()))
}
