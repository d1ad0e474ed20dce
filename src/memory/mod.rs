//! Memory module - persistent storage for archived conversation ranges
//!
//! When the live history outgrows the context window, the oldest messages
//! are moved here and replaced by a placeholder carrying the locator.

use crate::Result;
use crate::error::Error;
use crate::agent::Message;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Archive store trait - external storage for archived message ranges
pub trait ArchiveStore: Send + Sync {
    /// Persist a range of messages, returning its locator
    fn store(&self, session_id: &str, messages: &[Message]) -> Result<String>;

    /// Load a previously archived range
    fn retrieve(&self, locator: &str) -> Result<Vec<Message>>;
}

/// File-based archive store: one JSON file per archived range
pub struct FileArchiveStore {
    root: PathBuf,
    counter: AtomicUsize,
}

impl FileArchiveStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            counter: AtomicUsize::new(0),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(safe)
    }
}

impl ArchiveStore for FileArchiveStore {
    fn store(&self, session_id: &str, messages: &[Message]) -> Result<String> {
        let dir = self.session_dir(session_id);

        // Create directory if needed
        std::fs::create_dir_all(&dir)?;

        let seq = self.counter.fetch_add(1, Ordering::SeqCst);
        let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
        let path = dir.join(format!("{timestamp}-{seq:04}.json"));

        let content = serde_json::to_string_pretty(messages)?;
        std::fs::write(&path, content)?;

        Ok(path.to_string_lossy().to_string())
    }

    fn retrieve(&self, locator: &str) -> Result<Vec<Message>> {
        let path = PathBuf::from(locator);
        if !path.starts_with(&self.root) {
            return Err(Error::Archive(format!("Locator outside archive root: {locator}")));
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Archive(format!("Failed to read {locator}: {e}")))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// In-memory archive store for testing and ephemeral sessions
pub struct InMemoryArchiveStore {
    ranges: std::sync::Mutex<HashMap<String, Vec<Message>>>,
}

impl InMemoryArchiveStore {
    pub fn new() -> Self {
        Self {
            ranges: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Number of archived ranges held
    pub fn len(&self) -> usize {
        self.ranges.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryArchiveStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveStore for InMemoryArchiveStore {
    fn store(&self, session_id: &str, messages: &[Message]) -> Result<String> {
        let mut ranges = self
            .ranges
            .lock()
            .map_err(|_| Error::Archive("archive lock poisoned".to_string()))?;
        let locator = format!("memory://{}/{}", session_id, ranges.len() + 1);
        ranges.insert(locator.clone(), messages.to_vec());
        Ok(locator)
    }

    fn retrieve(&self, locator: &str) -> Result<Vec<Message>> {
        let ranges = self
            .ranges
            .lock()
            .map_err(|_| Error::Archive("archive lock poisoned".to_string()))?;
        ranges
            .get(locator)
            .cloned()
            .ok_or_else(|| Error::Archive(format!("Unknown locator: {locator}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_range() -> Vec<Message> {
        vec![
            Message::user("What is the capital of France?"),
            Message::assistant("Paris."),
            Message::tool_result("tc_0", "ok", serde_json::json!({"kind": "search"})),
        ]
    }

    #[test]
    fn test_in_memory_store_roundtrip() {
        let store = InMemoryArchiveStore::new();
        let range = sample_range();

        let locator = store.store("s1", &range).unwrap();
        assert_eq!(store.retrieve(&locator).unwrap(), range);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_file_store_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = FileArchiveStore::new(tmp.path());
        let range = sample_range();

        let first = store.store("conn/1", &range).unwrap();
        let second = store.store("conn/1", &range[..1]).unwrap();
        assert_ne!(first, second);

        assert_eq!(store.retrieve(&first).unwrap(), range);
        assert_eq!(store.retrieve(&second).unwrap(), range[..1].to_vec());
    }

    #[test]
    fn test_file_store_rejects_foreign_locator() {
        let tmp = TempDir::new().unwrap();
        let store = FileArchiveStore::new(tmp.path());
        assert!(store.retrieve("/etc/passwd").is_err());
    }

    #[test]
    fn test_unknown_locator() {
        let store = InMemoryArchiveStore::new();
        assert!(store.retrieve("memory://nope/1").is_err());
    }
}
