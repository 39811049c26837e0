use crate::models::Agent;

pub fn print_help() {
    println!("evs {}", env!("CARGO_PKG_VERSION"));
    println!("Inspect, repair, and reload coding-agent transcripts.\n");
    print_usage();
    print_options();
}

fn print_usage() {
    println!("USAGE:");
    println!("  evs validate <file> [OPTIONS]       Check a transcript, print issues");
    println!("  evs fix <file> [OPTIONS]            Repair a Claude transcript in place");
    println!("  evs strip <file> [OPTIONS]          Remove noise entries");
    println!("  evs trim <file> [OPTIONS]           Drop the oldest messages");
    println!("  evs compact <file> [OPTIONS]        Trim to a token budget");
    println!("  evs remove <file> --lines <spec>    Delete specific lines");
    println!("  evs export <file> [OPTIONS]         Render as markdown or JSON");
    println!("  evs diff <a> <b>                    Compare two transcripts");
    println!("  evs analyze <file>                  Entry counts, tokens, issues");
    println!("  evs discover [OPTIONS]              Locate the active session for a cwd");
    println!("  evs run [OPTIONS] [-- ARGS...]      Supervise the host agent");
    println!("  evs reload [--reason <text>]        Ask a running supervisor to reload");
    println!("  evs help | --help | -h              Show this message");
    println!("  evs --version | -V                  Show version\n");
}

fn print_options() {
    println!("COMMON OPTIONS:");
    println!("  --agent <a>       claude | codex | auto (default: auto)");
    println!("  --dry-run         Print the planned changes without writing");
    println!("  --no-color        Disable colored output (also respects NO_COLOR env)\n");
    println!("FIX OPTIONS:");
    println!("  --remove-orphan-tool-uses    Also drop unanswered tool calls (off by default)");
    println!("  --keep-orphan-tool-results   Leave orphan tool results in place");
    println!("  --keep-api-errors            Leave API error messages in place");
    println!("  --no-repair-parents          Skip broken parentUuid repair");
    println!("  --no-thinking-order          Skip thinking-block reordering\n");
    println!("TRIM / COMPACT OPTIONS:");
    println!("  --count <n>       Messages to remove from the front (trim)");
    println!("  --tokens <n>      Token budget to free (compact)");
    println!("  --percent <p>     Amount as a percentage");
    println!("  --keep-last <n>   Never remove the newest N messages (default: 2)\n");
    println!("EXPORT OPTIONS:");
    println!("  --format <fmt>    markdown (default) | json");
    println!("  --output <path>   Write to file instead of stdout\n");
    println!("DISCOVER OPTIONS:");
    println!("  --cwd <path>      Working directory to resolve (default: current)");
    println!("  --match <text>    Only sessions whose tail mentions <text>");
    println!("  --session-id <id> Resolve directly, bypassing scoring\n");
    println!("RUN OPTIONS:");
    println!("  --reload-mode <m> manual | auto | off (default: manual)\n");
    println!("ENVIRONMENT:");
    println!("  EVS_CONTROL_DIR       Control channel directory");
    println!("  EVS_RUN_ID            Supervisor run id");
    println!("  EVS_RELOAD_MODE       manual | auto | off");
    println!("  EVS_CLAUDE_HOME       Override ~/.claude");
    println!("  EVS_CODEX_HOME        Override ~/.codex");
    println!("  EVS_CLAUDE_BIN        Claude binary (default: claude)");
    println!("  EVS_CODEX_BIN         Codex binary (default: codex)");
    println!("  EVS_PINS              Pins file (default: ~/.evs/pins.json)");
}

pub fn get_flag(args: &[String], flag: &str) -> Option<String> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].clone())
}

pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

/// First argument that is neither a flag nor a flag value.
pub fn positional(args: &[String], value_flags: &[&str]) -> Option<String> {
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if value_flags.contains(&arg.as_str()) {
            skip_next = true;
            continue;
        }
        if arg.starts_with("--") {
            continue;
        }
        return Some(arg.clone());
    }
    None
}

/// All positionals, same skipping rules.
pub fn positionals(args: &[String], value_flags: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if value_flags.contains(&arg.as_str()) {
            skip_next = true;
            continue;
        }
        if arg.starts_with("--") {
            continue;
        }
        out.push(arg.clone());
    }
    out
}

pub fn parse_agent(args: &[String]) -> Agent {
    get_flag(args, "--agent")
        .and_then(|s| Agent::parse(&s))
        .unwrap_or(Agent::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn get_flag_finds_values() {
        let a = args(&["fix", "file.jsonl", "--keep-last", "5"]);
        assert_eq!(get_flag(&a, "--keep-last"), Some("5".to_string()));
        assert_eq!(get_flag(&a, "--tokens"), None);
    }

    #[test]
    fn positional_skips_flags_and_their_values() {
        let a = args(&["--agent", "claude", "session.jsonl", "--dry-run"]);
        assert_eq!(
            positional(&a, &["--agent"]),
            Some("session.jsonl".to_string())
        );
    }

    #[test]
    fn positionals_returns_all() {
        let a = args(&["a.jsonl", "b.jsonl", "--agent", "codex"]);
        assert_eq!(positionals(&a, &["--agent"]), vec!["a.jsonl", "b.jsonl"]);
    }

    #[test]
    fn parse_agent_defaults_to_auto() {
        assert_eq!(parse_agent(&args(&["validate", "f"])), Agent::Unknown);
        assert_eq!(
            parse_agent(&args(&["--agent", "codex"])),
            Agent::Codex
        );
    }
}
