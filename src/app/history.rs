use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::app::error::AppError;

/// Keyword strings shared by every log source, most recent first. Stored as
/// plain text, one entry per line.
#[derive(Debug, Clone)]
pub struct KeywordHistory {
    path: PathBuf,
    limit: usize,
    entries: Vec<String>,
}

impl KeywordHistory {
    pub fn empty(path: impl Into<PathBuf>, limit: usize) -> Self {
        Self {
            path: path.into(),
            limit: limit.max(1),
            entries: Vec::new(),
        }
    }

    /// Missing or unreadable files yield an empty history.
    pub fn load(path: impl Into<PathBuf>, limit: usize) -> Self {
        let mut history = Self::empty(path, limit);
        match fs::read(&history.path) {
            Ok(bytes) => {
                history.entries = String::from_utf8_lossy(&bytes)
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .take(history.limit)
                    .collect();
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %history.path.display(), error = %err, "failed to read keyword history");
            }
        }
        history
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Puts a novel, non-empty keyword string in front. Known entries keep their
    /// position. Returns whether the history changed.
    pub fn remember(&mut self, keyword: &str) -> bool {
        let keyword = keyword.trim();
        if keyword.is_empty() || self.entries.iter().any(|entry| entry == keyword) {
            return false;
        }
        self.entries.insert(0, keyword.to_string());
        self.entries.truncate(self.limit);
        true
    }

    pub fn save(&self, trace_id: &str) -> Result<(), AppError> {
        write_creating_parent(&self.path, self.entries.join("\n") + "\n").map_err(|err| {
            AppError::system(format!("Failed to save keyword history: {err}"), trace_id)
        })
    }
}

/// Recently used host paths (flash images, push targets): move-to-front, capped,
/// stored as a JSON array.
#[derive(Debug, Clone)]
pub struct PathHistory {
    path: PathBuf,
    limit: usize,
    entries: Vec<String>,
}

impl PathHistory {
    pub fn load(path: impl Into<PathBuf>, limit: usize) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<Vec<String>>(&raw).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "ignoring malformed path history");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        let limit = limit.max(1);
        Self {
            path,
            limit,
            entries: entries.into_iter().take(limit).collect(),
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn most_recent(&self) -> Option<&str> {
        self.entries.first().map(String::as_str)
    }

    pub fn touch(&mut self, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() {
            return false;
        }
        self.entries.retain(|entry| entry != value);
        self.entries.insert(0, value.to_string());
        self.entries.truncate(self.limit);
        true
    }

    pub fn save(&self, trace_id: &str) -> Result<(), AppError> {
        let payload = serde_json::to_string(&self.entries).map_err(|err| {
            AppError::system(format!("Failed to serialize path history: {err}"), trace_id)
        })?;
        write_creating_parent(&self.path, payload).map_err(|err| {
            AppError::system(format!("Failed to save path history: {err}"), trace_id)
        })
    }
}

fn write_creating_parent(path: &Path, payload: String) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_history_keeps_novel_entries_in_front() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut history = KeywordHistory::empty(dir.path().join("keywords.txt"), 20);

        assert!(history.remember("ERROR"));
        assert!(history.remember(" ANR,crash "));
        assert!(!history.remember("ERROR"));
        assert!(!history.remember("   "));
        assert_eq!(history.entries(), ["ANR,crash", "ERROR"]);
    }

    #[test]
    fn keyword_history_is_capped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut history = KeywordHistory::empty(dir.path().join("keywords.txt"), 20);
        for i in 0..25 {
            history.remember(&format!("kw{i}"));
        }
        assert_eq!(history.entries().len(), 20);
        assert_eq!(history.entries()[0], "kw24");
        assert_eq!(history.entries()[19], "kw5");
    }

    #[test]
    fn keyword_history_survives_a_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state").join("keywords.txt");
        let mut history = KeywordHistory::load(&path, 20);
        assert!(history.entries().is_empty());
        history.remember("wifi");
        history.remember("bt");
        history.save("trace-h").expect("save");

        let raw = std::fs::read_to_string(&path).expect("read");
        assert_eq!(raw, "bt\nwifi\n");
        let reloaded = KeywordHistory::load(&path, 20);
        assert_eq!(reloaded.entries(), ["bt", "wifi"]);
    }

    #[test]
    fn path_history_moves_reused_entries_to_front() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("file_history.json");
        let mut history = PathHistory::load(&path, 3);
        history.touch("/a.img");
        history.touch("/b.img");
        history.touch("/c.img");
        history.touch("/a.img");
        history.touch("/d.img");
        assert_eq!(history.entries(), ["/d.img", "/a.img", "/c.img"]);
        history.save("trace-p").expect("save");

        let reloaded = PathHistory::load(&path, 3);
        assert_eq!(reloaded.most_recent(), Some("/d.img"));
        assert_eq!(reloaded.entries().len(), 3);
    }

    #[test]
    fn malformed_path_history_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("target_history.json");
        std::fs::write(&path, "{not json").expect("write");
        assert!(PathHistory::load(&path, 10).entries().is_empty());
    }
}
