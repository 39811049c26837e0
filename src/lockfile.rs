use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const INITIAL_DELAY_MS: u64 = 25;
const MAX_DELAY_MS: u64 = 250;

/// Held while a transcript is being rewritten. Unlinks the lock file on
/// release; dropping without `release` unlinks too.
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    pub fn release(mut self) {
        self.unlink();
        self.released = true;
    }

    fn unlink(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            self.unlink();
        }
    }
}

/// Exclusive-create lock: succeeds only if the lock file did not exist.
/// Contention is polled with 1.5x backoff; timeout returns `None`, never an
/// error; callers surface that as "another operation is in progress".
pub fn acquire_lock(lock_path: &Path, timeout_ms: u64) -> Option<LockGuard> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let mut delay = INITIAL_DELAY_MS;

    loop {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(mut file) => {
                let body = serde_json::json!({
                    "pid": std::process::id(),
                    "started_at": chrono::Utc::now().to_rfc3339(),
                });
                let _ = file.write_all(body.to_string().as_bytes());
                return Some(LockGuard {
                    path: lock_path.to_path_buf(),
                    released: false,
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if Instant::now() >= deadline {
                    return None;
                }
                std::thread::sleep(Duration::from_millis(delay));
                delay = (delay * 3 / 2).min(MAX_DELAY_MS);
            }
            // Unwritable directory etc. counts as a contention failure.
            Err(_) => return None,
        }
    }
}

fn mtime_and_size(path: &Path) -> Option<(std::time::SystemTime, u64)> {
    let meta = fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// True once `(mtime, size)` has been unchanged for a continuous `window_ms`.
/// A missing file is "not stable yet", not an error. False on timeout.
pub async fn wait_stable(path: &Path, timeout_ms: u64, window_ms: u64, poll_ms: u64) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let mut last: Option<(std::time::SystemTime, u64)> = None;
    let mut unchanged_since: Option<Instant> = None;

    loop {
        let now = Instant::now();
        let current = mtime_and_size(path);

        match (&current, &last) {
            (Some(cur), Some(prev)) if cur == prev => {
                if let Some(since) = unchanged_since {
                    if now.duration_since(since) >= Duration::from_millis(window_ms) {
                        return true;
                    }
                }
            }
            (Some(_), _) => {
                unchanged_since = Some(now);
            }
            (None, _) => {
                unchanged_since = None;
            }
        }
        last = current;

        if now >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(poll_ms)).await;
    }
}
