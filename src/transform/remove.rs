use crate::error::EvsError;
use crate::models::{ChangeSet, Session};
use crate::transform::{relink_children, TransformOutcome};
use serde_json::Value;
use std::collections::HashSet;

/// Parse a line spec: comma-separated integers ≥ 1 and `a-b` ranges
/// (a ≤ b), whitespace tolerated. Returns a sorted unique line set.
pub fn parse_line_spec(spec: &str) -> Result<Vec<u32>, EvsError> {
    let mut lines: Vec<u32> = Vec::new();

    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('-') {
            Some((a, b)) => {
                let a = parse_line_number(a.trim())?;
                let b = parse_line_number(b.trim())?;
                if a > b {
                    return Err(EvsError::transform(format!(
                        "invalid range {a}-{b}: start exceeds end"
                    )));
                }
                lines.extend(a..=b);
            }
            None => lines.push(parse_line_number(part)?),
        }
    }

    if lines.is_empty() {
        return Err(EvsError::transform("empty line spec"));
    }
    lines.sort_unstable();
    lines.dedup();
    Ok(lines)
}

fn parse_line_number(s: &str) -> Result<u32, EvsError> {
    let n: u32 = s
        .parse()
        .map_err(|_| EvsError::transform(format!("not a line number: '{s}'")))?;
    if n == 0 {
        return Err(EvsError::transform("line numbers are 1-based"));
    }
    Ok(n)
}

/// Delete the selected lines. Every target must be a session entry (not
/// metadata, not a blank or invalid line); Claude children of removed
/// entries are relinked.
pub fn remove_lines(session: &Session, spec: &str) -> Result<TransformOutcome, EvsError> {
    let targets = parse_line_spec(spec)?;

    match session {
        Session::Claude(s) => {
            let mut deleted: HashSet<usize> = HashSet::new();
            for &line in &targets {
                let idx = s
                    .entries
                    .iter()
                    .position(|e| e.line == line)
                    .ok_or_else(|| {
                        EvsError::transform(format!("line {line} is not a session entry"))
                    })?;
                deleted.insert(idx);
            }

            let mut work: Vec<Value> = s.entries.iter().map(|e| e.value.clone()).collect();
            let mut changes = ChangeSet::new();
            for &idx in &deleted {
                changes.delete(s.entries[idx].line, "remove selected line");
            }
            for idx in relink_children(s, &deleted, &mut work) {
                changes.update(
                    s.entries[idx].line,
                    work[idx].clone(),
                    "relink to surviving ancestor",
                );
            }
            changes.sort();

            let next_values = s
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
        Session::Codex(s) => {
            let mut changes = ChangeSet::new();
            let mut delete_lines: HashSet<u32> = HashSet::new();
            for &line in &targets {
                if !s.entries.iter().any(|e| e.line == line) {
                    return Err(EvsError::transform(format!(
                        "line {line} is not a session entry"
                    )));
                }
                delete_lines.insert(line);
                changes.delete(line, "remove selected line");
            }
            changes.sort();

            let next_values = s
                .entries
                .iter()
                .filter(|e| !delete_lines.contains(&e.line))
                .map(|e| e.value.clone())
                .collect();
            Ok(TransformOutcome {
                next_values,
                changes,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_claude;
    use serde_json::json;
    use std::fs;

    #[test]
    fn line_spec_accepts_lists_ranges_and_whitespace() {
        assert_eq!(parse_line_spec("3").unwrap(), vec![3]);
        assert_eq!(parse_line_spec("1, 4-6 ,2").unwrap(), vec![1, 2, 4, 5, 6]);
        assert_eq!(parse_line_spec(" 5-5 ").unwrap(), vec![5]);
        assert_eq!(parse_line_spec("2,2,1-3").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn line_spec_rejects_garbage() {
        assert!(parse_line_spec("").is_err());
        assert!(parse_line_spec("0").is_err());
        assert!(parse_line_spec("abc").is_err());
        assert!(parse_line_spec("6-4").is_err());
        assert!(parse_line_spec("1,x").is_err());
    }

    #[test]
    fn remove_deletes_and_relinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        fs::write(
            &path,
            crate::jsonl::stringify_jsonl(&[
                json!({"type": "user", "uuid": "u1", "parentUuid": null,
                       "message": {"role": "user", "content": "a"}}),
                json!({"type": "assistant", "uuid": "a1", "parentUuid": "u1",
                       "message": {"role": "assistant", "content": [{"type": "text", "text": "b"}]}}),
                json!({"type": "user", "uuid": "u2", "parentUuid": "a1",
                       "message": {"role": "user", "content": "c"}}),
            ]),
        )
        .unwrap();
        let session = Session::Claude(parse_claude(&path).unwrap().session);

        let out = remove_lines(&session, "2").unwrap();
        assert_eq!(out.next_values.len(), 2);
        assert_eq!(out.next_values[1]["uuid"], "u2");
        assert_eq!(out.next_values[1]["parentUuid"], "u1");
    }

    #[test]
    fn remove_rejects_non_entry_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        fs::write(
            &path,
            "{\"type\":\"user\",\"uuid\":\"u1\",\"parentUuid\":null}\n",
        )
        .unwrap();
        let session = Session::Claude(parse_claude(&path).unwrap().session);

        assert!(remove_lines(&session, "7").is_err());
    }
}
