use crate::jsonl::{self, JsonlLine};
use crate::models::{CodexEntry, CodexSession, Issue, Location, SessionMeta, Severity};
use crate::parser::{no_entries, unreadable, ParseResult, Parsed};
use std::path::Path;

/// Parse a Codex rollout: wrapped `{timestamp, type, payload}` records.
/// Records with an absent or unknown `payload.type` are kept as opaque
/// entries: stored, never validated or transformed.
pub fn parse_codex(path: &Path) -> ParseResult<CodexSession> {
    let reader = match jsonl::read_jsonl(path) {
        Ok(r) => r,
        Err(e) => return Err(unreadable(path, &e)),
    };

    let mut entries: Vec<CodexEntry> = Vec::new();
    let mut invalid_lines: Vec<(u32, String)> = Vec::new();

    for line in reader {
        match line {
            JsonlLine::Json { line, value, .. } if value.is_object() => {
                entries.push(CodexEntry { line, value });
            }
            JsonlLine::Json { line, .. } => {
                invalid_lines.push((line, "not a JSON object".to_string()));
            }
            JsonlLine::Invalid { line, error, .. } => {
                invalid_lines.push((line, error));
            }
        }
    }

    if entries.is_empty() {
        return Err(no_entries(path));
    }

    let meta = entries
        .iter()
        .find(|e| e.record_type() == Some("session_meta"))
        .and_then(extract_meta);

    let issues = invalid_lines
        .iter()
        .map(|(line, error)| {
            Issue::new(
                Severity::Warning,
                "core.invalid_json_line",
                format!("line {line}: {error}"),
            )
            .at(Location::Line {
                path: path.display().to_string(),
                line: *line,
            })
        })
        .collect();

    Ok(Parsed {
        session: CodexSession {
            path: path.to_path_buf(),
            entries,
            meta,
            invalid_lines,
        },
        issues,
    })
}

fn extract_meta(entry: &CodexEntry) -> Option<SessionMeta> {
    let payload = entry.payload()?;
    Some(SessionMeta {
        id: payload["id"].as_str().unwrap_or_default().to_string(),
        cwd: payload["cwd"].as_str().unwrap_or_default().to_string(),
        timestamp: entry
            .timestamp()
            .or_else(|| payload["timestamp"].as_str())
            .unwrap_or_default()
            .to_string(),
        model: payload["model"].as_str().map(|s| s.to_string()),
    })
}
