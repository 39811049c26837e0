use crate::models::{block_type, ClaudeEntry, ClaudeSession, CodexSession};
use serde_json::Value;

/// Opaque token estimator. Roughly four bytes per token; good enough for
/// compaction budgets, never authoritative.
pub fn count_tokens(text: &str) -> u32 {
    (text.len() as u32 + 3) / 4
}

/// Per-message token estimates along the leaf chain, oldest first. This is
/// the vector the compact planner walks.
pub fn chain_message_tokens(session: &ClaudeSession) -> Vec<u64> {
    session.chain_entries().map(message_tokens).collect()
}

/// Total of the leaf chain. Sidechains and entries unreachable from the
/// leaf contribute nothing; this mirrors the host agent's own context
/// calculus.
pub fn count_claude_messages_tokens(session: &ClaudeSession) -> u64 {
    chain_message_tokens(session).iter().sum()
}

fn message_tokens(entry: &ClaudeEntry) -> u64 {
    let Some(content) = entry.content() else {
        return 0;
    };

    match content {
        Value::String(s) => count_tokens(&format!("{s}\n")) as u64,
        Value::Array(blocks) => {
            let mut total: u64 = 0;
            let mut has_text_block = false;
            for block in blocks {
                match block_type(block) {
                    Some("text") => {
                        has_text_block = true;
                        total += count_tokens(block["text"].as_str().unwrap_or("")) as u64;
                    }
                    Some("thinking") => {
                        total += count_tokens(block["thinking"].as_str().unwrap_or("")) as u64;
                    }
                    Some("tool_result") => {
                        total += count_tokens(&flatten_text(&block["content"])) as u64;
                    }
                    _ => {}
                }
            }
            // One trailing newline per assistant message with text output.
            if entry.entry_type() == Some("assistant") && has_text_block {
                total += count_tokens("\n") as u64;
            }
            total
        }
        _ => 0,
    }
}

/// Per-item estimates over Codex `response_item` records, oldest first,
/// aligned with the item list the codex trim operates on.
pub fn codex_item_tokens(session: &CodexSession) -> Vec<u64> {
    session
        .entries
        .iter()
        .filter(|e| e.is_response_item())
        .map(|e| {
            let Some(payload) = e.payload() else { return 0 };
            let mut total: u64 = count_tokens(&flatten_text(&payload["content"])) as u64;
            total += count_tokens(&flatten_text(&payload["summary"])) as u64;
            total += count_tokens(payload["arguments"].as_str().unwrap_or("")) as u64;
            total += count_tokens(&flatten_text(&payload["output"])) as u64;
            total
        })
        .collect()
}

/// Collect the text carried by a content value: a plain string, or an
/// array of blocks with `text` fields.
fn flatten_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| {
                b["text"]
                    .as_str()
                    .or_else(|| b.as_str())
                    .map(|s| s.to_string())
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}
