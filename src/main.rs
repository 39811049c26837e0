mod cli;
mod config;
mod detect;
mod discover;
mod error;
mod jsonl;
mod lockfile;
mod models;
mod parser;
mod session_log;
mod supervisor;
mod tokens;
mod transform;
mod validate;
mod view;

use anyhow::{anyhow, Result};
use cli::{get_flag, has_flag, parse_agent, positional, positionals};
use config::Config;
use models::{count_by_severity, Agent, Session};
use std::path::{Path, PathBuf};
use view::fmt::{paint, Style};

const VALUE_FLAGS: &[&str] = &[
    "--agent",
    "--count",
    "--tokens",
    "--percent",
    "--keep-last",
    "--lines",
    "--format",
    "--output",
    "--cwd",
    "--match",
    "--session-id",
    "--reason",
    "--reload-mode",
];

#[tokio::main]
async fn main() {
    let raw_args: Vec<String> = std::env::args().skip(1).collect();

    if raw_args.iter().any(|a| a == "--no-color") {
        view::fmt::disable_color();
    }
    let args: Vec<String> = raw_args.into_iter().filter(|a| a != "--no-color").collect();

    if args.iter().any(|a| a == "--help" || a == "-h")
        || args.first().map(|s| s.as_str()) == Some("help")
    {
        cli::print_help();
        std::process::exit(0);
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("evs {}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }
    if args.is_empty() {
        cli::print_help();
        std::process::exit(0);
    }

    let cfg = Config::load();
    match dispatch_subcommand(&args, &cfg).await {
        Some(Ok(code)) => std::process::exit(code),
        Some(Err(e)) => {
            eprintln!("evs: {e:#}");
            std::process::exit(2);
        }
        None => {
            eprintln!("evs: unknown command '{}'\n", args[0]);
            eprintln!("Run 'evs help' for usage.");
            std::process::exit(2);
        }
    }
}

async fn dispatch_subcommand(args: &[String], cfg: &Config) -> Option<Result<i32>> {
    match args.first().map(|s| s.as_str()) {
        Some("validate") => Some(cmd_validate(&args[1..])),
        Some("fix") => Some(cmd_fix(&args[1..], cfg)),
        Some("strip") => Some(cmd_strip(&args[1..], cfg)),
        Some("trim") => Some(cmd_trim(&args[1..], cfg)),
        Some("compact") => Some(cmd_compact(&args[1..], cfg)),
        Some("remove") => Some(cmd_remove(&args[1..], cfg)),
        Some("export") => Some(cmd_export(&args[1..])),
        Some("diff") => Some(cmd_diff(&args[1..])),
        Some("analyze") => Some(cmd_analyze(&args[1..])),
        Some("discover") => Some(cmd_discover(&args[1..], cfg)),
        Some("run") => Some(cmd_run(&args[1..], cfg).await),
        Some("reload") => Some(cmd_reload(&args[1..], cfg)),
        _ => None,
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

fn existing_target(args: &[String]) -> Result<PathBuf, i32> {
    let Some(file) = positional(args, VALUE_FLAGS) else {
        eprintln!("evs: missing transcript path");
        return Err(2);
    };
    let path = PathBuf::from(file);
    if !path.exists() {
        eprintln!("evs: no such file {}", path.display());
        return Err(2);
    }
    Ok(path)
}

fn parse_session_or_err(path: &Path, agent: Agent) -> Result<parser::Parsed<Session>> {
    parser::parse_session(path, agent).map_err(|issues| {
        for issue in &issues {
            eprintln!("evs: {}: {}", issue.code, issue.message);
        }
        anyhow!("cannot parse {}", path.display())
    })
}

fn print_dry_run(outcome: &transform::TransformOutcome) -> Result<i32> {
    for change in &outcome.changes.changes {
        println!("{}", serde_json::to_string(change)?);
    }
    println!(
        "{}",
        paint(
            Style::Dim,
            format!("planned {} change(s), nothing written", outcome.changes.len())
        )
    );
    Ok(0)
}

/// The lock wraps parse → transform → write, so the transcript cannot move
/// underneath the plan. Exit code 1 when error-severity issues remain after
/// the rewrite.
fn run_transform<F>(path: &Path, cfg: &Config, dry_run: bool, agent: Agent, build: F) -> Result<i32>
where
    F: FnOnce() -> Result<transform::TransformOutcome>,
{
    run_transform_counted(path, cfg, dry_run, agent, build).map(|(code, _)| code)
}

fn run_transform_counted<F>(
    path: &Path,
    cfg: &Config,
    dry_run: bool,
    agent: Agent,
    build: F,
) -> Result<(i32, usize)>
where
    F: FnOnce() -> Result<transform::TransformOutcome>,
{
    if dry_run {
        let outcome = build()?;
        return print_dry_run(&outcome).map(|code| (code, 0));
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "session".to_string());
    let lock_path = session_log::session_lock_path(dir, &stem);
    let Some(lock) = lockfile::acquire_lock(&lock_path, cfg.lock_timeout_ms) else {
        return Err(error::EvsError::Lock(lock_path).into());
    };

    let result: Result<(usize, Option<PathBuf>)> = (|| {
        let outcome = build()?;
        if outcome.changes.is_empty() {
            return Ok((0, None));
        }
        let backup = transform::write_with_backup(path, &outcome.changes, cfg.backup_keep)?;
        Ok((outcome.changes.len(), backup))
    })();
    lock.release();

    let (applied, backup) = result?;
    if applied == 0 {
        println!("{}", paint(Style::Dim, "no changes"));
        return Ok((0, 0));
    }
    if let Some(backup) = backup {
        println!("{}", paint(Style::Dim, format!("backup: {}", backup.display())));
    }
    println!("applied {applied} change(s)");

    let remaining_errors = parser::parse_session(path, agent)
        .map(|p| count_by_severity(&validate::validate(&p.session)).error)
        .unwrap_or(0);
    Ok((if remaining_errors > 0 { 1 } else { 0 }, applied))
}

fn trim_amount(args: &[String]) -> Option<transform::trim::TrimAmount> {
    if let Some(n) = get_flag(args, "--count").and_then(|s| s.parse().ok()) {
        return Some(transform::trim::TrimAmount::Count(n));
    }
    if let Some(p) = get_flag(args, "--percent").and_then(|s| s.parse().ok()) {
        return Some(transform::trim::TrimAmount::Percent(p));
    }
    None
}

fn keep_last(args: &[String]) -> usize {
    get_flag(args, "--keep-last")
        .and_then(|s| s.parse().ok())
        .unwrap_or(transform::trim::DEFAULT_KEEP_LAST)
}

// ── Commands ─────────────────────────────────────────────────────────────────

fn cmd_validate(args: &[String]) -> Result<i32> {
    let path = match existing_target(args) {
        Ok(p) => p,
        Err(code) => return Ok(code),
    };
    let parsed = parse_session_or_err(&path, parse_agent(args))?;
    let issues = validate::validate(&parsed.session);
    view::print_report(&parsed.session, &issues);
    Ok(if count_by_severity(&issues).error > 0 { 1 } else { 0 })
}

fn cmd_fix(args: &[String], cfg: &Config) -> Result<i32> {
    let path = match existing_target(args) {
        Ok(p) => p,
        Err(code) => return Ok(code),
    };
    let opts = transform::fix::FixOptions {
        repair_broken_parent_uuids: !has_flag(args, "--no-repair-parents"),
        fix_thinking_block_order: !has_flag(args, "--no-thinking-order"),
        remove_orphan_tool_results: !has_flag(args, "--keep-orphan-tool-results"),
        remove_api_error_messages: !has_flag(args, "--keep-api-errors"),
        remove_orphan_tool_uses: has_flag(args, "--remove-orphan-tool-uses"),
    };

    run_transform(&path, cfg, has_flag(args, "--dry-run"), Agent::Claude, || {
        match parse_session_or_err(&path, Agent::Unknown)?.session {
            Session::Claude(s) => Ok(transform::fix::fix(&s, &opts)),
            Session::Codex(_) => Err(anyhow!("fix supports Claude transcripts only")),
        }
    })
}

fn cmd_strip(args: &[String], cfg: &Config) -> Result<i32> {
    let path = match existing_target(args) {
        Ok(p) => p,
        Err(code) => return Ok(code),
    };
    let agent = parse_agent(args);
    run_transform(&path, cfg, has_flag(args, "--dry-run"), agent, || {
        let parsed = parse_session_or_err(&path, agent)?;
        Ok(transform::strip::strip(&parsed.session))
    })
}

fn cmd_trim(args: &[String], cfg: &Config) -> Result<i32> {
    let path = match existing_target(args) {
        Ok(p) => p,
        Err(code) => return Ok(code),
    };
    let Some(amount) = trim_amount(args) else {
        eprintln!("evs: trim needs --count <n> or --percent <p>");
        return Ok(2);
    };
    let params = transform::trim::TrimParams {
        amount,
        keep_last_messages: keep_last(args),
    };
    let agent = parse_agent(args);
    run_transform(&path, cfg, has_flag(args, "--dry-run"), agent, || {
        let parsed = parse_session_or_err(&path, agent)?;
        Ok(transform::trim::trim(&parsed.session, params)?)
    })
}

fn cmd_compact(args: &[String], cfg: &Config) -> Result<i32> {
    let path = match existing_target(args) {
        Ok(p) => p,
        Err(code) => return Ok(code),
    };
    let budget = if let Some(n) = get_flag(args, "--tokens").and_then(|s| s.parse().ok()) {
        transform::compact::Budget::Tokens(n)
    } else if let Some(p) = get_flag(args, "--percent").and_then(|s| s.parse().ok()) {
        transform::compact::Budget::Percent(p)
    } else {
        eprintln!("evs: compact needs --tokens <n> or --percent <p>");
        return Ok(2);
    };
    let keep = keep_last(args);
    let agent = parse_agent(args);

    let (code, applied) =
        run_transform_counted(&path, cfg, has_flag(args, "--dry-run"), agent, || {
            let parsed = parse_session_or_err(&path, agent)?;
            let (outcome, plan) = transform::compact::compact(&parsed.session, budget, keep)?;
            println!(
                "{}",
                paint(
                    Style::Dim,
                    format!(
                        "compact: total ~{}, target {}, removing {} of {} removable (~{} tokens)",
                        plan.total_tokens,
                        plan.target_remove_tokens,
                        plan.remove_count,
                        plan.max_removable_count,
                        plan.selected_remove_tokens
                    )
                )
            );
            if !plan.budget_met {
                println!(
                    "{}",
                    paint(Style::Dim, "budget could not be met within keep-last bound")
                );
            }
            Ok(outcome)
        })?;

    // A successful compact is the automated reload path: record it in the
    // per-session log and arm the supervisor's next tick.
    if applied > 0 {
        note_auto_compact(&path, cfg);
    }
    Ok(code)
}

fn note_auto_compact(path: &Path, cfg: &Config) {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "session".to_string());
    let record = session_log::event(
        "auto_compact",
        serde_json::json!({"path": path.display().to_string()}),
    );
    if let Err(e) = session_log::append_event(&session_log::session_log_path(dir, &stem), &record) {
        eprintln!("[evs] session log append failed: {e}");
    }

    let pending = serde_json::json!({
        "ts": chrono::Utc::now().to_rfc3339(),
        "reason": "auto_compact",
    });
    if let Err(e) = jsonl::write_atomic(
        &supervisor::pending_reload_path(&cfg.control_dir),
        pending.to_string().as_bytes(),
    ) {
        eprintln!("[evs] pending-reload write failed: {e}");
    }
}

fn cmd_remove(args: &[String], cfg: &Config) -> Result<i32> {
    let path = match existing_target(args) {
        Ok(p) => p,
        Err(code) => return Ok(code),
    };
    let Some(spec) = get_flag(args, "--lines") else {
        eprintln!("evs: remove needs --lines <spec> (e.g. 3,7-9)");
        return Ok(2);
    };
    let agent = parse_agent(args);
    run_transform(&path, cfg, has_flag(args, "--dry-run"), agent, || {
        let parsed = parse_session_or_err(&path, agent)?;
        Ok(transform::remove::remove_lines(&parsed.session, &spec)?)
    })
}

fn cmd_export(args: &[String]) -> Result<i32> {
    let path = match existing_target(args) {
        Ok(p) => p,
        Err(code) => return Ok(code),
    };
    let format = get_flag(args, "--format")
        .as_deref()
        .map(|s| view::ExportFormat::parse(s).ok_or_else(|| anyhow!("unknown format '{s}'")))
        .transpose()?
        .unwrap_or(view::ExportFormat::Markdown);

    let parsed = parse_session_or_err(&path, parse_agent(args))?;
    let rendered = view::export(&parsed.session, format);
    match get_flag(args, "--output") {
        Some(out) => std::fs::write(&out, rendered)?,
        None => print!("{rendered}"),
    }
    Ok(0)
}

fn cmd_diff(args: &[String]) -> Result<i32> {
    let files = positionals(args, VALUE_FLAGS);
    let [a, b] = files.as_slice() else {
        eprintln!("evs: diff needs two transcript paths");
        return Ok(2);
    };
    let differs = view::diff_files(Path::new(a), Path::new(b))?;
    Ok(if differs { 1 } else { 0 })
}

fn cmd_analyze(args: &[String]) -> Result<i32> {
    let path = match existing_target(args) {
        Ok(p) => p,
        Err(code) => return Ok(code),
    };
    let parsed = parse_session_or_err(&path, parse_agent(args))?;
    let issues = validate::validate(&parsed.session);
    view::print_report(&parsed.session, &issues);
    Ok(0)
}

fn cmd_discover(args: &[String], cfg: &Config) -> Result<i32> {
    let cwd = get_flag(args, "--cwd")
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let report = discover::discover(&discover::DiscoverOptions {
        cwd,
        agent: parse_agent(args),
        match_text: get_flag(args, "--match"),
        session_id: get_flag(args, "--session-id"),
        claude_home: cfg.claude_home.clone(),
        codex_home: cfg.codex_home.clone(),
        pins_path: cfg.pins_path.clone(),
        lookback_days: cfg.lookback_days,
    });

    if has_flag(args, "--json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(if report.session.is_some() { 0 } else { 2 });
    }

    for note in &report.notes {
        println!("{}", paint(Style::Dim, note));
    }
    match &report.session {
        Some(c) => {
            println!(
                "{} {}",
                c.path.display(),
                paint(
                    Style::Dim,
                    format!("(score {}, {} old)", c.score, view::fmt::fmt_age(c.age_ms))
                )
            );
            for alt in &report.alternatives {
                println!(
                    "{}",
                    paint(
                        Style::Dim,
                        format!(
                            "  alt: {} (score {}, {} old)",
                            alt.path.display(),
                            alt.score,
                            view::fmt::fmt_age(alt.age_ms)
                        )
                    )
                );
            }
            Ok(0)
        }
        None => {
            eprintln!("evs: no session found for {}", report.agent);
            Ok(2)
        }
    }
}

async fn cmd_run(args: &[String], cfg: &Config) -> Result<i32> {
    let agent = match parse_agent(args) {
        Agent::Unknown => Agent::Claude,
        a => a,
    };
    let binary = match agent {
        Agent::Codex => cfg.codex_bin.clone(),
        _ => cfg.claude_bin.clone(),
    };

    // Everything after `--` goes to the agent untouched.
    let initial_args = args
        .iter()
        .skip_while(|a| *a != "--")
        .skip(1)
        .cloned()
        .collect();

    let mut config = cfg.clone();
    if let Some(mode) = get_flag(args, "--reload-mode") {
        config.reload_mode = config::ReloadMode::parse(&mode)
            .ok_or_else(|| anyhow!("unknown reload mode '{mode}'"))?;
    }

    eprintln!("[evs] run_id={}", config.run_id);
    eprintln!("[evs] control_dir={}", config.control_dir.display());

    supervisor::run(&supervisor::SupervisorOptions {
        agent,
        binary,
        initial_args,
        config,
    })
    .await
}

fn cmd_reload(args: &[String], cfg: &Config) -> Result<i32> {
    let reason = get_flag(args, "--reason").unwrap_or_else(|| "manual reload".to_string());
    supervisor::request_reload(&cfg.control_dir, &reason)?;
    println!(
        "reload requested {}",
        paint(Style::Dim, format!("({})", cfg.control_dir.display()))
    );
    Ok(0)
}
