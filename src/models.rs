use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// Returns the user's home directory as a `PathBuf`.
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Returns `~/.evs`.
pub fn evs_dir() -> PathBuf {
    home_dir().join(".evs")
}

/// Returns `~/.evs/<subpath>`.
pub fn evs_path(subpath: &str) -> PathBuf {
    evs_dir().join(subpath)
}

// ── Issues ───────────────────────────────────────────────────────────────────

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    File { path: String },
    Line { path: String, line: u32 },
    Entry { path: String, entry_id: String },
    Pair { path: String, call_id: String },
}

#[derive(Serialize, Debug, Clone)]
pub struct Issue {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggested_fixes: Vec<String>,
}

impl Issue {
    pub fn new(severity: Severity, code: &'static str, message: impl Into<String>) -> Self {
        Issue {
            severity,
            code,
            message: message.into(),
            location: None,
            details: None,
            suggested_fixes: Vec::new(),
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn suggest(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fixes.push(fix.into());
        self
    }
}

#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IssueCounts {
    pub error: usize,
    pub warning: usize,
    pub info: usize,
}

pub fn count_by_severity(issues: &[Issue]) -> IssueCounts {
    let mut counts = IssueCounts::default();
    for issue in issues {
        match issue.severity {
            Severity::Error => counts.error += 1,
            Severity::Warning => counts.warning += 1,
            Severity::Info => counts.info += 1,
        }
    }
    counts
}

// ── Changes ──────────────────────────────────────────────────────────────────

/// A line-level edit against the original file. Line numbers are 1-based
/// indices into the file as it was parsed, never into intermediate states.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    DeleteLine { line: u32, reason: String },
    UpdateLine { line: u32, reason: String },
    InsertAfter { after_line: u32, reason: String },
}

impl Change {
    pub fn target_line(&self) -> u32 {
        match self {
            Change::DeleteLine { line, .. } | Change::UpdateLine { line, .. } => *line,
            Change::InsertAfter { after_line, .. } => *after_line,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Change::DeleteLine { .. } => 0,
            Change::UpdateLine { .. } => 1,
            Change::InsertAfter { .. } => 2,
        }
    }
}

/// An ordered edit plan plus the replacement values the plan refers to.
/// `changes` is descriptive; `updates`/`inserts` carry the actual content
/// keyed by original line number.
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    pub changes: Vec<Change>,
    pub updates: HashMap<u32, Value>,
    pub inserts: HashMap<u32, Vec<Value>>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn delete(&mut self, line: u32, reason: impl Into<String>) {
        self.changes.push(Change::DeleteLine {
            line,
            reason: reason.into(),
        });
    }

    /// At most one UpdateLine per line: a second update to the same line
    /// replaces the stored value but keeps a single change record.
    pub fn update(&mut self, line: u32, value: Value, reason: impl Into<String>) {
        if self.updates.insert(line, value).is_none() {
            self.changes.push(Change::UpdateLine {
                line,
                reason: reason.into(),
            });
        }
    }

    pub fn insert_after(&mut self, after_line: u32, values: Vec<Value>, reason: impl Into<String>) {
        self.inserts.entry(after_line).or_default().extend(values);
        self.changes.push(Change::InsertAfter {
            after_line,
            reason: reason.into(),
        });
    }

    pub fn deleted_lines(&self) -> Vec<u32> {
        self.changes
            .iter()
            .filter_map(|c| match c {
                Change::DeleteLine { line, .. } => Some(*line),
                _ => None,
            })
            .collect()
    }

    /// Canonical order: by target line, ties broken Delete < Update < Insert.
    pub fn sort(&mut self) {
        self.changes.sort_by_key(|c| (c.target_line(), c.rank()));
    }
}

// ── Claude dialect ───────────────────────────────────────────────────────────

/// One parsed transcript line. The raw `Value` is the source of truth:
/// typed access goes through the view methods, edits mutate the object in
/// place so unknown attributes survive serialization.
#[derive(Debug, Clone)]
pub struct ClaudeEntry {
    pub line: u32,
    pub value: Value,
}

impl ClaudeEntry {
    pub fn entry_type(&self) -> Option<&str> {
        self.value["type"].as_str()
    }

    pub fn uuid(&self) -> Option<&str> {
        self.value["uuid"].as_str()
    }

    /// The parent link as a string; `null` and absent both read as `None`.
    pub fn parent_uuid(&self) -> Option<&str> {
        self.value["parentUuid"].as_str()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.value["sessionId"].as_str()
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.value["timestamp"].as_str()
    }

    pub fn is_sidechain(&self) -> bool {
        self.value["isSidechain"].as_bool().unwrap_or(false)
    }

    pub fn message(&self) -> Option<&Value> {
        self.value.get("message").filter(|m| m.is_object())
    }

    pub fn role(&self) -> Option<&str> {
        self.message()?.get("role")?.as_str()
    }

    /// Message content: either a plain string or an array of blocks.
    pub fn content(&self) -> Option<&Value> {
        self.message()?.get("content")
    }

    pub fn content_blocks(&self) -> Option<&Vec<Value>> {
        self.content()?.as_array()
    }

    pub fn is_api_error_message(&self) -> bool {
        self.value["isApiErrorMessage"].as_bool().unwrap_or(false)
    }
}

/// Type of a content block: text | thinking | tool_use | tool_result | …
pub fn block_type(block: &Value) -> Option<&str> {
    block["type"].as_str()
}

pub fn is_thinking_block(block: &Value) -> bool {
    block_type(block) == Some("thinking")
}

/// A Claude session as an entry arena: `by_uuid` maps uuid → entry index,
/// `children` maps entry index → child indices, `leaf_chain` is the unique
/// reverse-parent walk from the newest mainline entry, stored root-first.
#[derive(Debug, Clone)]
pub struct ClaudeSession {
    pub path: PathBuf,
    pub entries: Vec<ClaudeEntry>,
    pub by_uuid: HashMap<String, usize>,
    pub children: HashMap<usize, Vec<usize>>,
    pub leaf_chain: Vec<usize>,
    /// (line, parse error) for every malformed line the reader saw.
    pub invalid_lines: Vec<(u32, String)>,
    /// Entries whose `parentUuid` referenced a uuid never seen in the file.
    pub broken_parents: Vec<(usize, String)>,
}

impl ClaudeSession {
    /// Leaf-chain entries, oldest first.
    pub fn chain_entries(&self) -> impl Iterator<Item = &ClaudeEntry> {
        self.leaf_chain.iter().map(|&i| &self.entries[i])
    }
}

// ── Codex dialect ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CodexEntry {
    pub line: u32,
    pub value: Value,
}

impl CodexEntry {
    pub fn record_type(&self) -> Option<&str> {
        self.value["type"].as_str()
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.value["timestamp"].as_str()
    }

    pub fn payload(&self) -> Option<&Value> {
        self.value.get("payload")
    }

    pub fn payload_type(&self) -> Option<&str> {
        self.payload()?.get("type")?.as_str()
    }

    pub fn is_response_item(&self) -> bool {
        self.record_type() == Some("response_item")
    }

    /// `call_id` of a function_call / function_call_output payload.
    pub fn call_id(&self) -> Option<&str> {
        self.payload()?.get("call_id")?.as_str()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMeta {
    pub id: String,
    pub cwd: String,
    pub timestamp: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CodexSession {
    pub path: PathBuf,
    pub entries: Vec<CodexEntry>,
    pub meta: Option<SessionMeta>,
    pub invalid_lines: Vec<(u32, String)>,
}

// ── Dialect dispatch ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Agent {
    Claude,
    Codex,
    Unknown,
}

impl std::fmt::Display for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Agent::Claude => write!(f, "claude"),
            Agent::Codex => write!(f, "codex"),
            Agent::Unknown => write!(f, "unknown"),
        }
    }
}

impl Agent {
    pub fn parse(s: &str) -> Option<Agent> {
        match s {
            "claude" => Some(Agent::Claude),
            "codex" => Some(Agent::Codex),
            "auto" => Some(Agent::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Session {
    Claude(ClaudeSession),
    Codex(CodexSession),
}

impl Session {
    pub fn path(&self) -> &std::path::Path {
        match self {
            Session::Claude(s) => &s.path,
            Session::Codex(s) => &s.path,
        }
    }

    pub fn agent(&self) -> Agent {
        match self {
            Session::Claude(_) => Agent::Claude,
            Session::Codex(_) => Agent::Codex,
        }
    }

    pub fn entry_count(&self) -> usize {
        match self {
            Session::Claude(s) => s.entries.len(),
            Session::Codex(s) => s.entries.len(),
        }
    }

    pub fn invalid_lines(&self) -> &[(u32, String)] {
        match self {
            Session::Claude(s) => &s.invalid_lines,
            Session::Codex(s) => &s.invalid_lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn count_by_severity_buckets() {
        let issues = vec![
            Issue::new(Severity::Error, "claude.broken_parent", "x"),
            Issue::new(Severity::Warning, "claude.orphan_tool_result", "y"),
            Issue::new(Severity::Warning, "core.invalid_json_line", "z"),
            Issue::new(Severity::Info, "claude.orphan_tool_use", "w"),
        ];
        let counts = count_by_severity(&issues);
        assert_eq!(counts.error, 1);
        assert_eq!(counts.warning, 2);
        assert_eq!(counts.info, 1);
    }

    #[test]
    fn changeset_orders_with_tie_break() {
        let mut cs = ChangeSet::new();
        cs.insert_after(3, vec![json!({})], "ins");
        cs.update(3, json!({}), "upd");
        cs.delete(3, "del");
        cs.delete(1, "del");
        cs.sort();

        let kinds: Vec<(u32, u8)> = cs
            .changes
            .iter()
            .map(|c| (c.target_line(), c.rank()))
            .collect();
        assert_eq!(kinds, vec![(1, 0), (3, 0), (3, 1), (3, 2)]);
    }

    #[test]
    fn changeset_single_update_per_line() {
        let mut cs = ChangeSet::new();
        cs.update(5, json!({"v": 1}), "first");
        cs.update(5, json!({"v": 2}), "second");
        assert_eq!(cs.len(), 1);
        assert_eq!(cs.updates[&5]["v"], 2);
    }

    #[test]
    fn claude_entry_views() {
        let entry = ClaudeEntry {
            line: 3,
            value: json!({
                "type": "assistant",
                "uuid": "a1",
                "parentUuid": null,
                "isSidechain": true,
                "message": {"role": "assistant", "content": [{"type": "text", "text": "hi"}]},
                "customVendorKey": {"kept": true},
            }),
        };
        assert_eq!(entry.entry_type(), Some("assistant"));
        assert_eq!(entry.uuid(), Some("a1"));
        assert_eq!(entry.parent_uuid(), None);
        assert!(entry.is_sidechain());
        assert_eq!(entry.role(), Some("assistant"));
        assert_eq!(entry.content_blocks().unwrap().len(), 1);
        // Unknown keys stay on the raw value.
        assert_eq!(entry.value["customVendorKey"]["kept"], true);
    }

    #[test]
    fn codex_entry_views() {
        let entry = CodexEntry {
            line: 1,
            value: json!({
                "timestamp": "2025-11-01T10:00:00Z",
                "type": "response_item",
                "payload": {"type": "function_call", "call_id": "c1", "name": "shell"},
            }),
        };
        assert!(entry.is_response_item());
        assert_eq!(entry.payload_type(), Some("function_call"));
        assert_eq!(entry.call_id(), Some("c1"));
    }
}
