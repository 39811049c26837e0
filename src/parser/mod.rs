mod claude;
mod codex;

pub use claude::parse_claude;
pub use codex::parse_codex;

use crate::detect;
use crate::models::{Agent, Issue, Session, Severity};
use std::path::Path;

/// A parsed session plus the non-fatal issues collected on the way
/// (malformed lines, unrecognized records).
pub struct Parsed<S> {
    pub session: S,
    pub issues: Vec<Issue>,
}

/// `Err` carries issues only when the file could not be read at all or no
/// entry was recognizable; everything else is attached to `Ok`.
pub type ParseResult<S> = Result<Parsed<S>, Vec<Issue>>;

pub(crate) fn unreadable(path: &Path, e: &std::io::Error) -> Vec<Issue> {
    vec![Issue::new(
        Severity::Error,
        "core.unreadable_file",
        format!("cannot read {}: {e}", path.display()),
    )]
}

pub(crate) fn no_entries(path: &Path) -> Vec<Issue> {
    vec![Issue::new(
        Severity::Error,
        "core.no_entries",
        format!("no recognizable entries in {}", path.display()),
    )]
}

/// Parse with an explicit dialect, or auto-detect when `agent` is `Unknown`.
pub fn parse_session(path: &Path, agent: Agent) -> ParseResult<Session> {
    let agent = match agent {
        Agent::Unknown => detect::detect_dialect(path).agent,
        known => known,
    };
    match agent {
        Agent::Claude => parse_claude(path).map(|p| Parsed {
            session: Session::Claude(p.session),
            issues: p.issues,
        }),
        Agent::Codex => parse_codex(path).map(|p| Parsed {
            session: Session::Codex(p.session),
            issues: p.issues,
        }),
        Agent::Unknown => Err(vec![Issue::new(
            Severity::Error,
            "core.unknown_dialect",
            format!("cannot determine dialect of {}", path.display()),
        )]),
    }
}
