use crate::jsonl::{self, JsonlLine};
use crate::models::Agent;
use serde::Serialize;
use std::path::Path;

/// How many non-empty lines to sample before committing to a dialect.
const SAMPLE_LINES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Jsonl,
    Wrapped,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Serialize)]
pub struct Detection {
    pub agent: Agent,
    pub format: Format,
    pub confidence: Confidence,
    pub notes: Vec<String>,
}

/// Identify the dialect from the first few lines of a transcript.
///
/// Rules (in priority order):
///   1. `type=session_meta`, or an object with both `type` and `payload`
///      → codex / wrapped.
///   2. `type ∈ {user, assistant, summary}` together with a `uuid`
///      → claude / jsonl.
/// Invalid JSON inside the sample lowers confidence but never aborts.
pub fn detect_dialect(path: &Path) -> Detection {
    let reader = match jsonl::read_jsonl(path) {
        Ok(r) => r,
        Err(e) => {
            return Detection {
                agent: Agent::Unknown,
                format: Format::Unknown,
                confidence: Confidence::Low,
                notes: vec![format!("unreadable: {e}")],
            }
        }
    };

    let mut notes = Vec::new();
    let mut saw_invalid = false;
    let mut sampled = 0usize;

    for line in reader {
        if sampled >= SAMPLE_LINES {
            break;
        }
        sampled += 1;

        let value = match line {
            JsonlLine::Json { value, .. } => value,
            JsonlLine::Invalid { line, .. } => {
                saw_invalid = true;
                notes.push(format!("invalid JSON at line {line}"));
                continue;
            }
        };
        if !value.is_object() {
            continue;
        }

        let record_type = value["type"].as_str();
        if record_type == Some("session_meta")
            || (record_type.is_some() && value.get("payload").is_some())
        {
            return Detection {
                agent: Agent::Codex,
                format: Format::Wrapped,
                confidence: if saw_invalid {
                    Confidence::Medium
                } else {
                    Confidence::High
                },
                notes,
            };
        }

        if matches!(record_type, Some("user" | "assistant" | "summary"))
            && value.get("uuid").is_some()
        {
            return Detection {
                agent: Agent::Claude,
                format: Format::Jsonl,
                confidence: if saw_invalid {
                    Confidence::Medium
                } else {
                    Confidence::High
                },
                notes,
            };
        }
    }

    if sampled == 0 {
        notes.push("empty file".to_string());
    } else {
        notes.push("no recognizable records in sample".to_string());
    }
    Detection {
        agent: Agent::Unknown,
        format: Format::Unknown,
        confidence: Confidence::Low,
        notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn detect_str(content: &str) -> Detection {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        fs::write(&path, content).unwrap();
        detect_dialect(&path)
    }

    #[test]
    fn detects_claude_jsonl() {
        let d = detect_str(
            r#"{"type":"user","uuid":"u1","message":{"role":"user","content":"hi"}}
{"type":"assistant","uuid":"a1","parentUuid":"u1"}
"#,
        );
        assert_eq!(d.agent, Agent::Claude);
        assert_eq!(d.format, Format::Jsonl);
        assert_eq!(d.confidence, Confidence::High);
    }

    #[test]
    fn detects_codex_wrapped() {
        let d = detect_str(
            r#"{"timestamp":"2025-11-01T10:00:00Z","type":"session_meta","payload":{"id":"s1","cwd":"/w"}}
{"timestamp":"2025-11-01T10:00:01Z","type":"response_item","payload":{"type":"message"}}
"#,
        );
        assert_eq!(d.agent, Agent::Codex);
        assert_eq!(d.format, Format::Wrapped);
        assert_eq!(d.confidence, Confidence::High);
    }

    #[test]
    fn invalid_json_in_sample_lowers_confidence() {
        let d = detect_str(
            "garbage{{\n{\"type\":\"user\",\"uuid\":\"u1\"}\n",
        );
        assert_eq!(d.agent, Agent::Claude);
        assert_eq!(d.confidence, Confidence::Medium);
        assert!(!d.notes.is_empty());
    }

    #[test]
    fn empty_file_is_unknown_low() {
        let d = detect_str("");
        assert_eq!(d.agent, Agent::Unknown);
        assert_eq!(d.confidence, Confidence::Low);
    }
}
