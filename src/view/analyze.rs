use crate::models::{count_by_severity, Issue, IssueCounts, Session};
use crate::tokens;
use crate::view::fmt::{fmt_tokens, paint, severity_badge, trunc, Style};
use std::collections::BTreeMap;

/// Everything `analyze` prints, computed separately so it can be tested.
#[derive(Debug, PartialEq, Eq)]
pub struct AnalyzeSummary {
    pub entry_count: usize,
    pub entries_by_type: BTreeMap<String, usize>,
    pub chain_len: usize,
    pub chain_tokens: u64,
    pub invalid_lines: usize,
    pub issue_counts: IssueCounts,
}

pub fn summarize(session: &Session, issues: &[Issue]) -> AnalyzeSummary {
    let mut entries_by_type: BTreeMap<String, usize> = BTreeMap::new();
    let (chain_len, chain_tokens) = match session {
        Session::Claude(s) => {
            for entry in &s.entries {
                let key = entry.entry_type().unwrap_or("unknown").to_string();
                *entries_by_type.entry(key).or_default() += 1;
            }
            (s.leaf_chain.len(), tokens::count_claude_messages_tokens(s))
        }
        Session::Codex(s) => {
            for entry in &s.entries {
                let key = entry.record_type().unwrap_or("unknown").to_string();
                *entries_by_type.entry(key).or_default() += 1;
            }
            let items = tokens::codex_item_tokens(s);
            (items.len(), items.iter().sum())
        }
    };

    AnalyzeSummary {
        entry_count: session.entry_count(),
        entries_by_type,
        chain_len,
        chain_tokens,
        invalid_lines: session.invalid_lines().len(),
        issue_counts: count_by_severity(issues),
    }
}

pub fn print_report(session: &Session, issues: &[Issue]) {
    let summary = summarize(session, issues);

    println!();
    println!(
        "{}  {}",
        paint(Style::Bold, session.path().display().to_string()),
        paint(Style::Dim, format!("({})", session.agent()))
    );
    println!();
    println!("  entries        {}", summary.entry_count);
    for (kind, count) in &summary.entries_by_type {
        println!("    {} {count}", paint(Style::Dim, format!("{kind:<24}")));
    }
    println!("  chain length   {}", summary.chain_len);
    println!("  chain tokens   ~{}", fmt_tokens(summary.chain_tokens));
    if summary.invalid_lines > 0 {
        println!("  invalid lines  {}", summary.invalid_lines);
    }
    println!();

    if issues.is_empty() {
        println!("  no issues");
    } else {
        let c = summary.issue_counts;
        println!(
            "  {} issue(s): {} error, {} warning, {} info",
            issues.len(),
            c.error,
            c.warning,
            c.info
        );
        for issue in issues {
            println!(
                "  {}  {}  {}",
                severity_badge(issue.severity),
                paint(Style::Dim, issue.code),
                trunc(&issue.message, 80)
            );
        }
    }
    println!();
}
