//! Bounded submission history with optional JSON persistence.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Fixed storage identifier the persisted history file is keyed by.
pub const STORAGE_KEY: &str = "script-console-history";

/// Ordered list of prior submission texts, newest last, oldest trimmed when
/// the cap is exceeded.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<String>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Append an entry, trimming the oldest on overflow.
    pub fn push(&mut self, entry: impl Into<String>) {
        self.entries.push_back(entry.into());
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Path of the persisted file under `dir`, derived from [`STORAGE_KEY`].
    pub fn storage_path(dir: &Path) -> PathBuf {
        dir.join(format!("{}.json", STORAGE_KEY))
    }

    /// Load from a JSON file. A missing file yields an empty history; the
    /// cap still applies to whatever was stored.
    pub fn load(path: &Path, capacity: usize) -> Result<Self> {
        let mut history = Self::new(capacity);
        if !path.exists() {
            return Ok(history);
        }
        let text = std::fs::read_to_string(path)?;
        let stored: Vec<String> = serde_json::from_str(&text)
            .map_err(|e| crate::error::ConsoleError::Storage(e.to_string()))?;
        for entry in stored {
            history.push(entry);
        }
        Ok(history)
    }

    /// Persist to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let stored: Vec<&str> = self.entries().collect();
        let text = serde_json::to_string(&stored)
            .map_err(|e| crate::error::ConsoleError::Storage(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_trims_oldest() {
        let mut history = History::new(3);
        for i in 0..5 {
            history.push(format!("entry {}", i));
        }
        assert_eq!(history.len(), 3);
        let entries: Vec<&str> = history.entries().collect();
        assert_eq!(entries, vec!["entry 2", "entry 3", "entry 4"]);
    }

    #[test]
    fn test_roundtrip_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = History::storage_path(dir.path());
        assert!(path.ends_with("script-console-history.json"));

        let mut history = History::new(10);
        history.push("1 + 1");
        history.push("let x = 2");
        history.save(&path).unwrap();

        let loaded = History::load(&path, 10).unwrap();
        let entries: Vec<&str> = loaded.entries().collect();
        assert_eq!(entries, vec!["1 + 1", "let x = 2"]);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = History::load(&History::storage_path(dir.path()), 5).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_applies_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = History::storage_path(dir.path());
        let mut history = History::new(10);
        for i in 0..10 {
            history.push(format!("{}", i));
        }
        history.save(&path).unwrap();

        let loaded = History::load(&path, 4).unwrap();
        let entries: Vec<&str> = loaded.entries().collect();
        assert_eq!(entries, vec!["6", "7", "8", "9"]);
    }
}
