use crate::models::{
    block_type, is_thinking_block, ClaudeEntry, ClaudeSession, CodexSession, Issue, Location,
    Session, Severity,
};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// The host agent writes upstream API failures as assistant messages whose
/// text starts with this payload.
fn api_error_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^API Error\b").unwrap())
}

pub fn validate(session: &Session) -> Vec<Issue> {
    match session {
        Session::Claude(s) => validate_claude(s),
        Session::Codex(s) => validate_codex(s),
    }
}

// ── Claude checks ────────────────────────────────────────────────────────────

pub fn validate_claude(session: &ClaudeSession) -> Vec<Issue> {
    let mut issues = Vec::new();
    let path = session.path.display().to_string();

    invalid_line_issues(&session.invalid_lines, &path, &mut issues);

    for (idx, parent) in &session.broken_parents {
        let entry = &session.entries[*idx];
        issues.push(
            Issue::new(
                Severity::Error,
                "claude.broken_parent",
                format!(
                    "entry {} references missing parent {parent}",
                    entry.uuid().unwrap_or("<no uuid>")
                ),
            )
            .at(entry_location(&path, entry))
            .suggest("repair parentUuid to the nearest present ancestor"),
        );
    }

    duplicate_uuids(session, &path, &mut issues);
    thinking_block_order(session, &path, &mut issues);
    tool_pairing(session, &path, &mut issues);
    api_error_messages(session, &path, &mut issues);

    issues
}

fn entry_location(path: &str, entry: &ClaudeEntry) -> Location {
    match entry.uuid() {
        Some(uuid) => Location::Entry {
            path: path.to_string(),
            entry_id: uuid.to_string(),
        },
        None => Location::Line {
            path: path.to_string(),
            line: entry.line,
        },
    }
}

fn duplicate_uuids(session: &ClaudeSession, path: &str, issues: &mut Vec<Issue>) {
    let mut seen: HashMap<&str, u32> = HashMap::new();
    for entry in &session.entries {
        let Some(uuid) = entry.uuid() else { continue };
        if let Some(first_line) = seen.insert(uuid, entry.line) {
            issues.push(
                Issue::new(
                    Severity::Error,
                    "claude.duplicate_uuid",
                    format!("uuid {uuid} already used at line {first_line}"),
                )
                .at(Location::Line {
                    path: path.to_string(),
                    line: entry.line,
                }),
            );
        }
    }
}

/// The upstream API rejects assistant messages whose thinking blocks trail
/// any non-thinking content.
fn thinking_block_order(session: &ClaudeSession, path: &str, issues: &mut Vec<Issue>) {
    for entry in &session.entries {
        if entry.entry_type() != Some("assistant") {
            continue;
        }
        let Some(blocks) = entry.content_blocks() else {
            continue;
        };
        let mut saw_non_thinking = false;
        for block in blocks {
            if is_thinking_block(block) {
                if saw_non_thinking {
                    issues.push(
                        Issue::new(
                            Severity::Error,
                            "claude.thinking_block_misordered",
                            "thinking block appears after non-thinking content".to_string(),
                        )
                        .at(entry_location(path, entry))
                        .suggest("reorder thinking blocks to the head of the message"),
                    );
                    break;
                }
            } else {
                saw_non_thinking = true;
            }
        }
    }
}

/// Pairing runs over mainline entries only; sidechains are excluded from
/// both id collection and orphan checks.
fn tool_pairing(session: &ClaudeSession, path: &str, issues: &mut Vec<Issue>) {
    let mut use_ids: HashSet<&str> = HashSet::new();
    let mut result_ids: HashSet<&str> = HashSet::new();

    for entry in session.entries.iter().filter(|e| !e.is_sidechain()) {
        let Some(blocks) = entry.content_blocks() else {
            continue;
        };
        for block in blocks {
            match block_type(block) {
                Some("tool_use") => {
                    if let Some(id) = block["id"].as_str() {
                        use_ids.insert(id);
                    }
                }
                Some("tool_result") => {
                    if let Some(id) = block["tool_use_id"].as_str() {
                        result_ids.insert(id);
                    }
                }
                _ => {}
            }
        }
    }

    for entry in session.entries.iter().filter(|e| !e.is_sidechain()) {
        let Some(blocks) = entry.content_blocks() else {
            continue;
        };
        for block in blocks {
            match block_type(block) {
                Some("tool_result") => {
                    let Some(id) = block["tool_use_id"].as_str() else {
                        continue;
                    };
                    if !use_ids.contains(id) {
                        issues.push(
                            Issue::new(
                                Severity::Warning,
                                "claude.orphan_tool_result",
                                format!("tool_result {id} has no matching tool_use"),
                            )
                            .at(Location::Pair {
                                path: path.to_string(),
                                call_id: id.to_string(),
                            })
                            .suggest("drop the orphan tool_result block"),
                        );
                    }
                }
                Some("tool_use") => {
                    let Some(id) = block["id"].as_str() else { continue };
                    if !result_ids.contains(id) {
                        // Info only: a mid-conversation call may still be
                        // in flight. Fixers must not remove by default.
                        issues.push(
                            Issue::new(
                                Severity::Info,
                                "claude.orphan_tool_use",
                                format!("tool_use {id} has no matching tool_result"),
                            )
                            .at(Location::Pair {
                                path: path.to_string(),
                                call_id: id.to_string(),
                            }),
                        );
                    }
                }
                _ => {}
            }
        }
    }
}

pub(crate) fn is_api_error_entry(entry: &ClaudeEntry) -> bool {
    if entry.entry_type() != Some("assistant") {
        return false;
    }
    if entry.is_api_error_message() {
        return true;
    }
    match entry.content() {
        Some(content) if content.is_string() => {
            api_error_re().is_match(content.as_str().unwrap_or(""))
        }
        Some(content) => content
            .as_array()
            .map(|blocks| {
                blocks.len() == 1
                    && block_type(&blocks[0]) == Some("text")
                    && api_error_re().is_match(blocks[0]["text"].as_str().unwrap_or(""))
            })
            .unwrap_or(false),
        None => false,
    }
}

fn api_error_messages(session: &ClaudeSession, path: &str, issues: &mut Vec<Issue>) {
    for entry in &session.entries {
        if is_api_error_entry(entry) {
            issues.push(
                Issue::new(
                    Severity::Info,
                    "claude.api_error_message",
                    "assistant message is an API error payload".to_string(),
                )
                .at(entry_location(path, entry))
                .suggest("remove the entry and relink its children"),
            );
        }
    }
}

// ── Codex checks ─────────────────────────────────────────────────────────────

pub fn validate_codex(session: &CodexSession) -> Vec<Issue> {
    let mut issues = Vec::new();
    let path = session.path.display().to_string();

    invalid_line_issues(&session.invalid_lines, &path, &mut issues);

    if session.meta.is_none() {
        issues.push(
            Issue::new(
                Severity::Error,
                "codex.missing_session_meta",
                "no session_meta record present".to_string(),
            )
            .at(Location::File {
                path: path.clone(),
            }),
        );
    }

    let mut output_ids: HashSet<&str> = HashSet::new();
    for entry in &session.entries {
        if entry.is_response_item() && entry.payload_type() == Some("function_call_output") {
            if let Some(id) = entry.call_id() {
                output_ids.insert(id);
            }
        }
    }

    for entry in &session.entries {
        if !entry.is_response_item() || entry.payload_type() != Some("function_call") {
            continue;
        }
        let Some(id) = entry.call_id() else { continue };
        if !output_ids.contains(id) {
            issues.push(
                Issue::new(
                    Severity::Warning,
                    "codex.function_call_unmatched",
                    format!("function_call {id} has no function_call_output"),
                )
                .at(Location::Pair {
                    path: path.clone(),
                    call_id: id.to_string(),
                }),
            );
        }
    }

    issues
}

fn invalid_line_issues(invalid: &[(u32, String)], path: &str, issues: &mut Vec<Issue>) {
    for (line, error) in invalid {
        issues.push(
            Issue::new(
                Severity::Warning,
                "core.invalid_json_line",
                format!("line {line}: {error}"),
            )
            .at(Location::Line {
                path: path.to_string(),
                line: *line,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_claude, parse_codex};
    use serde_json::json;
    use std::fs;

    fn parse_lines(lines: &[serde_json::Value]) -> ClaudeSession {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        fs::write(&path, crate::jsonl::stringify_jsonl(lines)).unwrap();
        parse_claude(&path).unwrap().session
    }

    fn codes(issues: &[Issue]) -> Vec<&'static str> {
        issues.iter().map(|i| i.code).collect()
    }

    #[test]
    fn broken_parent_and_duplicate_uuid() {
        let session = parse_lines(&[
            json!({"type": "user", "uuid": "u1", "parentUuid": "ghost"}),
            json!({"type": "assistant", "uuid": "u1", "parentUuid": "u1"}),
        ]);
        let issues = validate_claude(&session);
        assert!(codes(&issues).contains(&"claude.broken_parent"));
        assert!(codes(&issues).contains(&"claude.duplicate_uuid"));
    }

    #[test]
    fn thinking_after_text_is_an_error() {
        let session = parse_lines(&[json!({
            "type": "assistant",
            "uuid": "a1",
            "parentUuid": null,
            "message": {"role": "assistant", "content": [
                {"type": "text", "text": "a"},
                {"type": "thinking", "thinking": "t"},
            ]},
        })]);
        let issues = validate_claude(&session);
        assert_eq!(codes(&issues), vec!["claude.thinking_block_misordered"]);
    }

    #[test]
    fn thinking_at_head_is_fine() {
        let session = parse_lines(&[json!({
            "type": "assistant",
            "uuid": "a1",
            "parentUuid": null,
            "message": {"role": "assistant", "content": [
                {"type": "thinking", "thinking": "t1"},
                {"type": "thinking", "thinking": "t2"},
                {"type": "text", "text": "a"},
            ]},
        })]);
        assert!(validate_claude(&session).is_empty());
    }

    #[test]
    fn orphan_tool_result_warns_orphan_tool_use_informs() {
        let session = parse_lines(&[
            json!({
                "type": "assistant",
                "uuid": "a1",
                "parentUuid": null,
                "message": {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "T1", "name": "Bash", "input": {}},
                ]},
            }),
            json!({
                "type": "user",
                "uuid": "u1",
                "parentUuid": "a1",
                "message": {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "T9", "content": "?"},
                ]},
            }),
        ]);
        let issues = validate_claude(&session);
        let orphan_result = issues
            .iter()
            .find(|i| i.code == "claude.orphan_tool_result")
            .unwrap();
        assert_eq!(orphan_result.severity, Severity::Warning);
        let orphan_use = issues
            .iter()
            .find(|i| i.code == "claude.orphan_tool_use")
            .unwrap();
        assert_eq!(orphan_use.severity, Severity::Info);
    }

    #[test]
    fn sidechain_excluded_from_pairing() {
        let session = parse_lines(&[
            json!({"type": "user", "uuid": "u1", "parentUuid": null,
                   "message": {"role": "user", "content": "main"}}),
            json!({
                "type": "user",
                "uuid": "s1",
                "parentUuid": null,
                "isSidechain": true,
                "message": {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "T77", "content": "x"},
                ]},
            }),
        ]);
        assert!(validate_claude(&session).is_empty());
    }

    #[test]
    fn api_error_message_detected() {
        let session = parse_lines(&[json!({
            "type": "assistant",
            "uuid": "a1",
            "parentUuid": null,
            "message": {"role": "assistant", "content": [
                {"type": "text", "text": "API Error: 529 overloaded"},
            ]},
        })]);
        let issues = validate_claude(&session);
        assert_eq!(codes(&issues), vec!["claude.api_error_message"]);
        assert_eq!(issues[0].severity, Severity::Info);
    }

    #[test]
    fn codex_missing_meta_and_unmatched_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout.jsonl");
        fs::write(
            &path,
            crate::jsonl::stringify_jsonl(&[
                json!({"timestamp": "t", "type": "response_item",
                       "payload": {"type": "function_call", "call_id": "c1", "name": "shell"}}),
                json!({"timestamp": "t", "type": "response_item",
                       "payload": {"type": "function_call", "call_id": "c2", "name": "shell"}}),
                json!({"timestamp": "t", "type": "response_item",
                       "payload": {"type": "function_call_output", "call_id": "c2", "output": "ok"}}),
            ]),
        )
        .unwrap();

        let session = parse_codex(&path).unwrap().session;
        let issues = validate_codex(&session);
        assert!(codes(&issues).contains(&"codex.missing_session_meta"));
        let unmatched: Vec<_> = issues
            .iter()
            .filter(|i| i.code == "codex.function_call_unmatched")
            .collect();
        assert_eq!(unmatched.len(), 1);
        assert!(unmatched[0].message.contains("c1"));
    }
}
