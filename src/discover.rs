use crate::models::Agent;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

const TAIL_LINES: usize = 50;
const MAX_ALTERNATIVES: usize = 4;
const SIX_HOURS_MS: u64 = 6 * 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    pub cwd: PathBuf,
    pub agent: Agent,
    pub match_text: Option<String>,
    pub session_id: Option<String>,
    pub claude_home: PathBuf,
    pub codex_home: PathBuf,
    pub pins_path: PathBuf,
    pub lookback_days: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Candidate {
    pub path: PathBuf,
    pub score: i64,
    pub age_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionDiscoveryReport {
    pub agent: Agent,
    pub session: Option<Candidate>,
    pub alternatives: Vec<Candidate>,
    pub notes: Vec<String>,
}

impl SessionDiscoveryReport {
    fn unknown(notes: Vec<String>) -> Self {
        SessionDiscoveryReport {
            agent: Agent::Unknown,
            session: None,
            alternatives: Vec::new(),
            notes,
        }
    }
}

/// Locate the active transcript for a working directory.
///
/// Resolution order: explicit `--session-id`, then a pinned id for this
/// cwd, then scored scanning. `auto` tries the Claude project directory
/// first and falls through to Codex.
pub fn discover(opts: &DiscoverOptions) -> SessionDiscoveryReport {
    if let Some(id) = &opts.session_id {
        return resolve_by_id(opts, id, Vec::new());
    }
    if let Some(pin) = pinned_session(&opts.pins_path, &opts.cwd) {
        return resolve_by_id(opts, &pin, vec![format!("pinned session {pin}")]);
    }

    match opts.agent {
        Agent::Claude => discover_claude(opts),
        Agent::Codex => discover_codex(opts),
        Agent::Unknown => {
            let claude = discover_claude(opts);
            if claude.session.is_some() {
                return claude;
            }
            let mut codex = discover_codex(opts);
            codex
                .notes
                .insert(0, "no claude session for this project".to_string());
            codex
        }
    }
}

// ── Claude: project-scoped scan ──────────────────────────────────────────────

/// The host agent names project directories by mangling the cwd: every
/// character outside [A-Za-z0-9] becomes '-'.
pub fn mangle_project_dir(cwd: &Path) -> String {
    cwd.to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

fn discover_claude(opts: &DiscoverOptions) -> SessionDiscoveryReport {
    let project_dir = opts
        .claude_home
        .join("projects")
        .join(mangle_project_dir(&opts.cwd));
    if !project_dir.is_dir() {
        return SessionDiscoveryReport::unknown(vec![format!(
            "no project directory {}",
            project_dir.display()
        )]);
    }

    let mut candidates: Vec<Candidate> = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&project_dir) {
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "jsonl")
                && !file_name_contains(&path, ".backup-")
                && tail_matches(&path, opts.match_text.as_deref())
            {
                if let Some(c) = score_file(&path, 0) {
                    candidates.push(c);
                }
            }
        }
    }
    order_candidates(&mut candidates);

    let mut report = SessionDiscoveryReport {
        agent: Agent::Claude,
        session: None,
        alternatives: Vec::new(),
        notes: Vec::new(),
    };
    let mut iter = candidates.into_iter();
    report.session = iter.next();
    report.alternatives = iter.take(MAX_ALTERNATIVES).collect();
    if report.session.is_none() {
        report.notes.push("no matching session files".to_string());
    }
    report
}

// ── Codex: date-partitioned scan with strict fallback ────────────────────────

fn discover_codex(opts: &DiscoverOptions) -> SessionDiscoveryReport {
    let sessions_dir = opts.codex_home.join("sessions");
    if !sessions_dir.is_dir() {
        return SessionDiscoveryReport::unknown(vec![format!(
            "no sessions directory {}",
            sessions_dir.display()
        )]);
    }

    let cutoff_ms = (opts.lookback_days.max(0) as u64) * 24 * 60 * 60 * 1000;
    let requested_cwd = opts.cwd.to_string_lossy().to_string();
    let mut candidates: Vec<(Candidate, Option<String>)> = Vec::new();

    for entry in WalkDir::new(&sessions_dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.extension().is_some_and(|e| e == "jsonl")
            || !path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with("rollout-"))
        {
            continue;
        }
        if !tail_matches(path, opts.match_text.as_deref()) {
            continue;
        }

        let recorded_cwd = peek_codex_cwd(path);
        let cwd_bonus = if recorded_cwd.as_deref() == Some(requested_cwd.as_str()) {
            15
        } else {
            0
        };
        if let Some(c) = score_file(path, cwd_bonus) {
            if c.age_ms <= cutoff_ms {
                candidates.push((c, recorded_cwd));
            }
        }
    }
    candidates.sort_by(|a, b| {
        b.0.score
            .cmp(&a.0.score)
            .then_with(|| a.0.age_ms.cmp(&b.0.age_ms))
            .then_with(|| a.0.path.cmp(&b.0.path))
    });

    let mut notes = Vec::new();
    let selected = select_codex(&candidates, &requested_cwd, &mut notes);

    let alternatives = candidates
        .iter()
        .map(|(c, _)| c.clone())
        .filter(|c| Some(c) != selected.as_ref())
        .take(MAX_ALTERNATIVES)
        .collect();

    if selected.is_none() {
        notes.push("no codex session within lookback".to_string());
    }
    SessionDiscoveryReport {
        agent: Agent::Codex,
        session: selected,
        alternatives,
        notes,
    }
}

fn select_codex(
    candidates: &[(Candidate, Option<String>)],
    requested_cwd: &str,
    notes: &mut Vec<String>,
) -> Option<Candidate> {
    let (top, top_cwd) = candidates.first()?;

    if top_cwd.as_deref() == Some(requested_cwd) {
        return Some(top.clone());
    }

    // Top candidate belongs to a different (or unknown) cwd: global
    // fallback, only under the age/score gap rule.
    let runner_up = candidates.get(1).map(|(c, _)| c);
    if is_strict_fallback_allowed(top, runner_up) {
        notes.push(format!(
            "strict fallback to {} (recorded cwd {})",
            top.path.display(),
            top_cwd.as_deref().unwrap_or("unknown")
        ));
        return Some(top.clone());
    }

    match candidates
        .iter()
        .find(|(_, cwd)| cwd.as_deref() == Some(requested_cwd))
    {
        Some((c, _)) => {
            notes.push("fallback rejected; using cwd-matching candidate".to_string());
            Some(c.clone())
        }
        None => {
            notes.push("fallback rejected; no cwd-matching candidate".to_string());
            None
        }
    }
}

/// Fallback to a foreign-cwd candidate is safe only when the decision is
/// unambiguous: the runner-up is at least six hours older, or scores at
/// least 30 below the top.
pub fn is_strict_fallback_allowed(top: &Candidate, runner_up: Option<&Candidate>) -> bool {
    match runner_up {
        None => true,
        Some(r) => r.age_ms >= top.age_ms + SIX_HOURS_MS || r.score <= top.score - 30,
    }
}

fn peek_codex_cwd(path: &Path) -> Option<String> {
    let reader = crate::jsonl::read_jsonl(path).ok()?;
    for line in reader.take(5) {
        if let crate::jsonl::JsonlLine::Json { value, .. } = line {
            if value["type"].as_str() == Some("session_meta") {
                return value["payload"]["cwd"].as_str().map(|s| s.to_string());
            }
        }
    }
    None
}

// ── Direct resolution ────────────────────────────────────────────────────────

fn resolve_by_id(
    opts: &DiscoverOptions,
    id: &str,
    mut notes: Vec<String>,
) -> SessionDiscoveryReport {
    let roots: Vec<(Agent, PathBuf)> = match opts.agent {
        Agent::Claude => vec![(Agent::Claude, opts.claude_home.join("projects"))],
        Agent::Codex => vec![(Agent::Codex, opts.codex_home.join("sessions"))],
        Agent::Unknown => vec![
            (Agent::Claude, opts.claude_home.join("projects")),
            (Agent::Codex, opts.codex_home.join("sessions")),
        ],
    };

    for (agent, root) in roots {
        if !root.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "jsonl")
                && file_name_contains(path, id)
                && !file_name_contains(path, ".backup-")
            {
                notes.push(format!("resolved session id {id}"));
                return SessionDiscoveryReport {
                    agent,
                    session: score_file(path, 0),
                    alternatives: Vec::new(),
                    notes,
                };
            }
        }
    }

    notes.push(format!("session id {id} not found"));
    SessionDiscoveryReport::unknown(notes)
}

fn pinned_session(pins_path: &Path, cwd: &Path) -> Option<String> {
    let content = std::fs::read_to_string(pins_path).ok()?;
    let pins: serde_json::Value = serde_json::from_str(&content).ok()?;
    pins[cwd.to_string_lossy().as_ref()]
        .as_str()
        .map(|s| s.to_string())
}

// ── Scoring ──────────────────────────────────────────────────────────────────

/// Recency dominates: 70 points decaying linearly to zero over 72 hours.
/// Size adds 1 point per 4 KiB up to 20. Deterministic for an unchanged
/// filesystem.
fn score_file(path: &Path, bonus: i64) -> Option<Candidate> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    let age_ms = SystemTime::now()
        .duration_since(modified)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let age_hours = (age_ms / 3_600_000) as i64;
    let recency = if age_hours >= 72 {
        0
    } else {
        70 - age_hours * 70 / 72
    };
    let size = ((meta.len() / 4096) as i64).min(20);

    Some(Candidate {
        path: path.to_path_buf(),
        score: recency + size + bonus,
        age_ms,
    })
}

fn order_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.age_ms.cmp(&b.age_ms))
            .then_with(|| a.path.cmp(&b.path))
    });
}

fn file_name_contains(path: &Path, needle: &str) -> bool {
    path.file_name()
        .is_some_and(|n| n.to_string_lossy().contains(needle))
}

/// `--match` filter: substring search over the last TAIL_LINES lines.
fn tail_matches(path: &Path, needle: Option<&str>) -> bool {
    let Some(needle) = needle else { return true };
    let Ok(content) = std::fs::read_to_string(path) else {
        return false;
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(TAIL_LINES);
    lines[start..].iter().any(|l| l.contains(needle))
}
