use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// One physical line of a JSONL transcript. Line numbers are 1-based and
/// count every physical line, including the blank ones the reader skips.
#[derive(Debug, Clone)]
pub enum JsonlLine {
    Json {
        line: u32,
        raw: String,
        value: Value,
    },
    Invalid {
        line: u32,
        raw: String,
        error: String,
    },
}

impl JsonlLine {
    pub fn line(&self) -> u32 {
        match self {
            JsonlLine::Json { line, .. } | JsonlLine::Invalid { line, .. } => *line,
        }
    }
}

/// Streaming reader over a JSONL file. Malformed lines become
/// `JsonlLine::Invalid` and iteration continues; blank lines are skipped.
pub struct JsonlReader {
    lines: std::io::Lines<BufReader<File>>,
    line_no: u32,
}

impl Iterator for JsonlReader {
    type Item = JsonlLine;

    fn next(&mut self) -> Option<JsonlLine> {
        loop {
            let raw = match self.lines.next()? {
                Ok(l) => l,
                // A read error mid-file means the rest is unreadable.
                Err(_) => return None,
            };
            self.line_no += 1;
            if raw.trim().is_empty() {
                continue;
            }
            let line = self.line_no;
            return Some(match serde_json::from_str::<Value>(&raw) {
                Ok(value) => JsonlLine::Json { line, raw, value },
                Err(e) => JsonlLine::Invalid {
                    line,
                    raw,
                    error: e.to_string(),
                },
            });
        }
    }
}

pub fn read_jsonl(path: &Path) -> std::io::Result<JsonlReader> {
    let file = File::open(path)?;
    Ok(JsonlReader {
        lines: BufReader::new(file).lines(),
        line_no: 0,
    })
}

/// Compact JSON per line, LF separators, trailing newline. Every transcript
/// this tool writes goes through here.
pub fn stringify_jsonl(values: &[Value]) -> String {
    let mut out = String::new();
    for v in values {
        out.push_str(&v.to_string());
        out.push('\n');
    }
    out
}

/// Write via a sibling temp file + rename so readers never observe a partial
/// transcript. The temp name carries a timestamp and a random suffix to
/// survive concurrent writers in the same directory.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.exists() {
        fs::create_dir_all(parent)?;
    }

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("transcript");
    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
    let suffix: u16 = rand::random();
    let tmp = parent.join(format!(".{name}.tmp-{stamp}-{suffix:04x}"));

    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.flush()?;
    drop(file);

    match fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}
