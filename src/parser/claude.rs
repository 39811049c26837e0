use crate::jsonl::{self, JsonlLine};
use crate::models::{ClaudeEntry, ClaudeSession, Issue, Location, Severity};
use crate::parser::{no_entries, unreadable, ParseResult, Parsed};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Parse a Claude transcript: flat JSONL entries linked by `parentUuid`.
///
/// Builds the uuid arena (`by_uuid`, `children`) and the leaf chain, the
/// reverse-parent walk from the newest mainline entry. A parent that was
/// never seen terminates the walk and is recorded for the validator.
pub fn parse_claude(path: &Path) -> ParseResult<ClaudeSession> {
    let reader = match jsonl::read_jsonl(path) {
        Ok(r) => r,
        Err(e) => return Err(unreadable(path, &e)),
    };

    let mut entries: Vec<ClaudeEntry> = Vec::new();
    let mut invalid_lines: Vec<(u32, String)> = Vec::new();

    for line in reader {
        match line {
            JsonlLine::Json { line, value, .. } if value.is_object() => {
                entries.push(ClaudeEntry { line, value });
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

    // First occurrence wins on duplicate uuids; the validator flags the rest.
    let mut by_uuid: HashMap<String, usize> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        if let Some(uuid) = entry.uuid() {
            by_uuid.entry(uuid.to_string()).or_insert(i);
        }
    }

    let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut broken_parents: Vec<(usize, String)> = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        if let Some(parent) = entry.parent_uuid() {
            match by_uuid.get(parent) {
                Some(&pi) => children.entry(pi).or_default().push(i),
                None => broken_parents.push((i, parent.to_string())),
            }
        }
    }

    let leaf_chain = compute_leaf_chain(&entries, &by_uuid);

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
        session: ClaudeSession {
            path: path.to_path_buf(),
            entries,
            by_uuid,
            children,
            leaf_chain,
            invalid_lines,
            broken_parents,
        },
        issues,
    })
}

/// Walk `parentUuid` backwards from the last mainline entry that owns a
/// uuid, stopping at `null`, a missing parent, or a repeated index (a cycle
/// in a corrupt file must not hang the parser). Returned root-first.
fn compute_leaf_chain(entries: &[ClaudeEntry], by_uuid: &HashMap<String, usize>) -> Vec<usize> {
    let leaf = entries
        .iter()
        .enumerate()
        .rev()
        .find(|(_, e)| e.uuid().is_some() && !e.is_sidechain())
        .map(|(i, _)| i);
    let Some(leaf) = leaf else {
        return Vec::new();
    };

    let mut chain = vec![leaf];
    let mut seen: HashSet<usize> = HashSet::from([leaf]);
    let mut cur = leaf;

    while let Some(parent) = entries[cur].parent_uuid() {
        match by_uuid.get(parent) {
            Some(&pi) if seen.insert(pi) => {
                chain.push(pi);
                cur = pi;
            }
            _ => break,
        }
    }

    chain.reverse();
    chain
}
