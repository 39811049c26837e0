use crate::models::Severity;
use std::sync::atomic::{AtomicU8, Ordering};

// 0 = undecided, 1 = on, 2 = off. Decided once, on the first paint;
// `--no-color` and NO_COLOR force it off before anything prints.
static COLOR_STATE: AtomicU8 = AtomicU8::new(0);

pub(crate) fn disable_color() {
    COLOR_STATE.store(2, Ordering::Relaxed);
}

fn color_enabled() -> bool {
    match COLOR_STATE.load(Ordering::Relaxed) {
        1 => true,
        2 => false,
        _ => {
            let on = std::env::var_os("NO_COLOR").is_none() && atty::is(atty::Stream::Stdout);
            COLOR_STATE.store(if on { 1 } else { 2 }, Ordering::Relaxed);
            on
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) enum Style {
    Bold,
    Dim,
    Cyan,
    Green,
    Red,
    Yellow,
}

/// Wrap `text` in an ANSI style, or pass it through untouched when color
/// is off. Escape codes never reach the output when the gate is closed,
/// so there is nothing to scrub afterwards.
pub(crate) fn paint(style: Style, text: impl AsRef<str>) -> String {
    let text = text.as_ref();
    if !color_enabled() {
        return text.to_string();
    }
    let code = match style {
        Style::Bold => "1",
        Style::Dim => "2",
        Style::Cyan => "36",
        Style::Green => "32",
        Style::Red => "31",
        Style::Yellow => "33",
    };
    format!("\x1b[{code}m{text}\x1b[0m")
}

pub(crate) fn severity_badge(severity: Severity) -> String {
    match severity {
        Severity::Error => paint(Style::Red, "✗ error  "),
        Severity::Warning => paint(Style::Yellow, "! warning"),
        Severity::Info => paint(Style::Cyan, "i info   "),
    }
}

pub(crate) fn trunc(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{keep}…")
}

pub(crate) fn fmt_tokens(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{}K", n / 1_000)
    } else {
        n.to_string()
    }
}

pub(crate) fn fmt_age(age_ms: u64) -> String {
    let secs = age_ms / 1000;
    match secs {
        s if s >= 86_400 => format!("{}d", s / 86_400),
        s if s >= 3_600 => format!("{}h", s / 3_600),
        s if s >= 60 => format!("{}m", s / 60),
        s => format!("{s}s"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paint_passes_text_through_when_color_is_off() {
        // The state is process-global, so only the off path is
        // deterministic under the test harness.
        disable_color();
        assert_eq!(paint(Style::Red, "plain"), "plain");
        assert_eq!(severity_badge(Severity::Error), "✗ error  ");
    }

    #[test]
    fn trunc_respects_char_boundaries() {
        assert_eq!(trunc("short", 10), "short");
        assert_eq!(trunc("abcdefgh", 4), "abc…");
    }

    #[test]
    fn fmt_tokens_buckets() {
        assert_eq!(fmt_tokens(950), "950");
        assert_eq!(fmt_tokens(12_500), "12K");
        assert_eq!(fmt_tokens(2_400_000), "2.4M");
    }

    #[test]
    fn fmt_age_buckets() {
        assert_eq!(fmt_age(30_000), "30s");
        assert_eq!(fmt_age(5 * 60_000), "5m");
        assert_eq!(fmt_age(3 * 3_600_000), "3h");
        assert_eq!(fmt_age(2 * 86_400_000), "2d");
    }
}
