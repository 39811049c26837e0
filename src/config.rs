use crate::models;
use std::collections::HashMap;
use std::path::PathBuf;

/// All environment is read once, here, into an immutable record. Nothing
/// else in the engine consults ambient state. `~/.evs/config` KEY=VALUE
/// lines fill in anything the environment leaves unset.
#[derive(Debug, Clone)]
pub struct Config {
    pub control_dir: PathBuf,
    pub run_id: String,
    pub reload_mode: ReloadMode,
    pub claude_home: PathBuf,
    pub codex_home: PathBuf,
    pub claude_bin: String,
    pub codex_bin: String,
    pub pins_path: PathBuf,
    pub poll_interval_ms: u64,
    pub restart_timeout_ms: u64,
    pub lock_timeout_ms: u64,
    pub stable_window_ms: u64,
    pub stable_timeout_ms: u64,
    pub backup_keep: usize,
    pub lookback_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadMode {
    Manual,
    Auto,
    Off,
}

impl ReloadMode {
    pub fn parse(s: &str) -> Option<ReloadMode> {
        match s {
            "manual" => Some(ReloadMode::Manual),
            "auto" => Some(ReloadMode::Auto),
            "off" => Some(ReloadMode::Off),
            _ => None,
        }
    }
}

pub fn load_config_file() -> HashMap<String, String> {
    let path = models::evs_path("config");
    let Ok(content) = std::fs::read_to_string(&path) else {
        return HashMap::new();
    };
    content
        .lines()
        .filter(|l| !l.trim_start().starts_with('#') && !l.trim().is_empty())
        .filter_map(|l| {
            let (k, v) = l.split_once('=')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

impl Config {
    pub fn load() -> Config {
        let file = load_config_file();
        let get = |env_key: &str, file_key: &str| -> Option<String> {
            std::env::var(env_key)
                .ok()
                .or_else(|| file.get(file_key).cloned())
        };

        let run_id = get("EVS_RUN_ID", "RUN_ID")
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let control_dir = get("EVS_CONTROL_DIR", "CONTROL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| models::evs_path("control").join(&run_id));

        Config {
            control_dir,
            run_id,
            reload_mode: get("EVS_RELOAD_MODE", "RELOAD_MODE")
                .and_then(|s| ReloadMode::parse(&s))
                .unwrap_or(ReloadMode::Manual),
            claude_home: get("EVS_CLAUDE_HOME", "CLAUDE_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| models::home_dir().join(".claude")),
            codex_home: get("EVS_CODEX_HOME", "CODEX_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| models::home_dir().join(".codex")),
            claude_bin: get("EVS_CLAUDE_BIN", "CLAUDE_BIN").unwrap_or_else(|| "claude".into()),
            codex_bin: get("EVS_CODEX_BIN", "CODEX_BIN").unwrap_or_else(|| "codex".into()),
            pins_path: get("EVS_PINS", "PINS")
                .map(PathBuf::from)
                .unwrap_or_else(|| models::evs_path("pins.json")),
            poll_interval_ms: parse_or(get("EVS_POLL_MS", "POLL_MS"), 150),
            restart_timeout_ms: parse_or(get("EVS_RESTART_TIMEOUT_MS", "RESTART_TIMEOUT_MS"), 5_000),
            lock_timeout_ms: parse_or(get("EVS_LOCK_TIMEOUT_MS", "LOCK_TIMEOUT_MS"), 3_000),
            stable_window_ms: 750,
            stable_timeout_ms: 10_000,
            backup_keep: parse_or(get("EVS_BACKUP_KEEP", "BACKUP_KEEP"), 10) as usize,
            lookback_days: parse_or(get("EVS_LOOKBACK_DAYS", "LOOKBACK_DAYS"), 14) as i64,
        }
    }
}

fn parse_or(value: Option<String>, default: u64) -> u64 {
    value.and_then(|s| s.parse().ok()).unwrap_or(default)
}
