use crate::models::{block_type, Session};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Markdown,
    Json,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<ExportFormat> {
        match s {
            "markdown" | "md" => Some(ExportFormat::Markdown),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }
}

/// Render a session as a human-readable transcript or a JSON document.
/// Read-only: nothing here touches the source file.
pub fn export(session: &Session, format: ExportFormat) -> String {
    match format {
        ExportFormat::Markdown => markdown(session),
        ExportFormat::Json => json(session),
    }
}

fn json(session: &Session) -> String {
    let entries: Vec<&Value> = match session {
        Session::Claude(s) => s.entries.iter().map(|e| &e.value).collect(),
        Session::Codex(s) => s.entries.iter().map(|e| &e.value).collect(),
    };
    serde_json::to_string_pretty(&serde_json::json!({
        "agent": session.agent(),
        "path": session.path().display().to_string(),
        "entries": entries,
    }))
    .unwrap_or_default()
}

fn markdown(session: &Session) -> String {
    let mut out = format!("# Transcript — {}\n", session.path().display());

    match session {
        Session::Claude(s) => {
            if let Some(id) = s.entries.iter().find_map(|e| e.session_id()) {
                out.push_str(&format!("\nSession {id}\n"));
            }
            for entry in s.chain_entries() {
                let role = entry.role().or(entry.entry_type()).unwrap_or("unknown");
                match entry.timestamp() {
                    Some(ts) => out.push_str(&format!("\n## {role} — {ts}\n")),
                    None => out.push_str(&format!("\n## {role}\n")),
                }
                match entry.content() {
                    Some(Value::String(text)) => {
                        out.push_str(&format!("\n{text}\n"));
                    }
                    Some(Value::Array(blocks)) => {
                        for block in blocks {
                            render_claude_block(&mut out, block);
                        }
                    }
                    _ => {}
                }
            }
        }
        Session::Codex(s) => {
            if let Some(meta) = &s.meta {
                out.push_str(&format!("\nSession {} in {}\n", meta.id, meta.cwd));
            }
            for entry in s.entries.iter().filter(|e| e.is_response_item()) {
                let Some(payload) = entry.payload() else { continue };
                match payload["type"].as_str() {
                    Some("message") => {
                        let role = payload["role"].as_str().unwrap_or("unknown");
                        out.push_str(&format!("\n## {role}\n"));
                        if let Some(blocks) = payload["content"].as_array() {
                            for block in blocks {
                                if let Some(text) = block["text"].as_str() {
                                    out.push_str(&format!("\n{text}\n"));
                                }
                            }
                        }
                    }
                    Some("function_call") => {
                        out.push_str(&format!(
                            "\n> call {} {}\n",
                            payload["name"].as_str().unwrap_or("?"),
                            payload["arguments"].as_str().unwrap_or("")
                        ));
                    }
                    Some("function_call_output") => {
                        out.push_str("\n> output\n");
                    }
                    _ => {}
                }
            }
        }
    }
    out
}

fn render_claude_block(out: &mut String, block: &Value) {
    match block_type(block) {
        Some("text") => {
            if let Some(text) = block["text"].as_str() {
                out.push_str(&format!("\n{text}\n"));
            }
        }
        Some("thinking") => {
            if let Some(text) = block["thinking"].as_str() {
                out.push_str(&format!("\n> (thinking) {text}\n"));
            }
        }
        Some("tool_use") => {
            out.push_str(&format!(
                "\n> tool {} ({})\n",
                block["name"].as_str().unwrap_or("?"),
                block["id"].as_str().unwrap_or("?")
            ));
        }
        Some("tool_result") => {
            out.push_str(&format!(
                "\n> result for {}\n",
                block["tool_use_id"].as_str().unwrap_or("?")
            ));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_claude;
    use serde_json::json;
    use std::fs;

    fn session() -> Session {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        fs::write(
            &path,
            crate::jsonl::stringify_jsonl(&[
                json!({"type": "user", "uuid": "u1", "parentUuid": null,
                       "message": {"role": "user", "content": "hello"}}),
                json!({"type": "assistant", "uuid": "a1", "parentUuid": "u1",
                       "message": {"role": "assistant", "content": [
                           {"type": "thinking", "thinking": "hmm"},
                           {"type": "text", "text": "hi there"},
                           {"type": "tool_use", "id": "T1", "name": "Bash", "input": {}},
                       ]}}),
            ]),
        )
        .unwrap();
        Session::Claude(parse_claude(&path).unwrap().session)
    }

    #[test]
    fn markdown_renders_chain_in_order() {
        let md = export(&session(), ExportFormat::Markdown);
        let user_pos = md.find("## user").unwrap();
        let assistant_pos = md.find("## assistant").unwrap();
        assert!(user_pos < assistant_pos);
        assert!(md.contains("hello"));
        assert!(md.contains("hi there"));
        assert!(md.contains("> tool Bash"));
    }

    #[test]
    fn json_export_round_trips() {
        let text = export(&session(), ExportFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["agent"], "claude");
        assert_eq!(parsed["entries"].as_array().unwrap().len(), 2);
    }
}
