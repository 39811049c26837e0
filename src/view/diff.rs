use crate::view::fmt::{paint, Style};
use anyhow::{Context, Result};
use similar::{ChangeTag, TextDiff};
use std::path::Path;

/// Line-level unified diff of two transcripts. Returns whether the files
/// differ; the CLI maps that to exit code 1.
pub fn diff_files(a: &Path, b: &Path) -> Result<bool> {
    let left = std::fs::read_to_string(a).with_context(|| format!("reading {}", a.display()))?;
    let right = std::fs::read_to_string(b).with_context(|| format!("reading {}", b.display()))?;

    if left == right {
        println!("{}", paint(Style::Dim, "transcripts are identical"));
        return Ok(false);
    }

    let diff = TextDiff::from_lines(&left, &right);
    println!("--- {}", a.display());
    println!("+++ {}", b.display());
    for change in diff.iter_all_changes() {
        let line = change.to_string_lossy();
        let line = line.trim_end_matches('\n');
        match change.tag() {
            ChangeTag::Delete => println!("{}", paint(Style::Red, format!("-{line}"))),
            ChangeTag::Insert => println!("{}", paint(Style::Green, format!("+{line}"))),
            ChangeTag::Equal => {}
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn identical_files_report_no_differences() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jsonl");
        let b = dir.path().join("b.jsonl");
        fs::write(&a, "{\"n\":1}\n").unwrap();
        fs::write(&b, "{\"n\":1}\n").unwrap();
        assert!(!diff_files(&a, &b).unwrap());
    }

    #[test]
    fn different_files_report_differences() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jsonl");
        let b = dir.path().join("b.jsonl");
        fs::write(&a, "{\"n\":1}\n{\"n\":2}\n").unwrap();
        fs::write(&b, "{\"n\":1}\n").unwrap();
        assert!(diff_files(&a, &b).unwrap());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jsonl");
        fs::write(&a, "{}\n").unwrap();
        assert!(diff_files(&a, &dir.path().join("absent.jsonl")).is_err());
    }
}
