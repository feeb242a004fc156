//! Plain-text per-user logs: the short-term raw log that collects evicted
//! exchanges, and the dated long-term buffer of consolidated summaries.

use chrono::{DateTime, Local};
use kouri_core::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

/// One lock per raw log path, shared by every handle onto that file.
static LOG_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = LazyLock::new(|| Mutex::new(HashMap::new()));

fn lock_for(path: &Path) -> Arc<Mutex<()>> {
    LOG_LOCKS
        .lock()
        .entry(path.to_path_buf())
        .or_default()
        .clone()
}

fn flatten(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

fn append_line(path: &Path, lines: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    Ok(())
}

fn read_or_empty(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

// ── Short-term raw log ─────────────────────────────────────────

/// `用户: …` / `AI: …` lines, two per exchange.
pub struct ShortTermLog {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl ShortTermLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock = lock_for(&path);
        Self { path, lock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_exchange(&self, user_text: &str, assistant_text: &str) -> Result<()> {
        let _guard = self.lock.lock();
        append_line(
            &self.path,
            &[
                format!("用户: {}", flatten(user_text)),
                format!("AI: {}", flatten(assistant_text)),
            ],
        )
    }

    pub fn read(&self) -> Result<String> {
        read_or_empty(&self.path)
    }

    pub fn line_count(&self) -> Result<usize> {
        Ok(self.read()?.lines().filter(|l| !l.trim().is_empty()).count())
    }

    /// Drop `consumed` from the front of the log, keeping anything appended
    /// after it was read. Leaves the file alone if it no longer starts with
    /// `consumed`.
    pub fn consume(&self, consumed: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let current = read_or_empty(&self.path)?;
        let Some(rest) = current.strip_prefix(consumed) else {
            warn!(path = %self.path.display(), "raw log changed underneath consolidation, left as is");
            return Ok(());
        };
        std::fs::write(&self.path, rest)?;
        debug!(
            path = %self.path.display(),
            remaining = rest.lines().filter(|l| !l.trim().is_empty()).count(),
            "consumed raw log prefix"
        );
        Ok(())
    }

    /// Empty the log, keeping the file.
    pub fn truncate(&self) -> Result<()> {
        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, "")?;
        debug!(path = %self.path.display(), "raw log truncated");
        Ok(())
    }
}

// ── Long-term buffer ───────────────────────────────────────────

/// `[YYYY-MM-DD HH:MM:SS] [用户ID:<id>] <summary>` entries, one per line.
pub struct LongTermBuffer {
    path: PathBuf,
}

impl LongTermBuffer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format_entry(at: DateTime<Local>, user_id: &str, summary: &str) -> String {
        format!(
            "[{}] [用户ID:{}] {}",
            at.format("%Y-%m-%d %H:%M:%S"),
            user_id,
            flatten(summary.trim())
        )
    }

    pub fn append(&self, user_id: &str, summary: &str) -> Result<()> {
        append_line(&self.path, &[Self::format_entry(Local::now(), user_id, summary)])
    }

    pub fn entries(&self) -> Result<Vec<String>> {
        Ok(read_or_empty(&self.path)?
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(String::from)
            .collect())
    }

    /// When the file exceeds `cap_bytes`, keep only the newest `keep` entries.
    /// Returns true if the buffer was rewritten.
    pub fn enforce_cap(&self, cap_bytes: u64, keep: usize) -> Result<bool> {
        let size = match std::fs::metadata(&self.path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if size <= cap_bytes {
            return Ok(false);
        }

        let entries = self.entries()?;
        let start = entries.len().saturating_sub(keep);
        let mut kept = entries[start..].join("\n");
        if !kept.is_empty() {
            kept.push('\n');
        }
        std::fs::write(&self.path, kept)?;
        info!(
            path = %self.path.display(),
            size,
            kept = entries.len() - start,
            dropped = start,
            "long-term buffer capped"
        );
        Ok(true)
    }
}
