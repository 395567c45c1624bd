use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing::warn;

use super::KeyValueStore;

/// Key-value store backed by a single JSON file.
///
/// Every write rewrites the whole map through a temporary file and a rename,
/// so readers never see a partial file. The mutex only serializes writers
/// inside this process; other processes race last-write-wins.
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents =
            std::fs::read_to_string(&self.path).context("Failed to read session store")?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).context("Failed to parse session store")
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if entries.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).context("Failed to remove session store")?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).context("Failed to write session store")?;
        std::fs::rename(&tmp, &self.path).context("Failed to replace session store")?;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("Session store lock poisoned"))?;
        // A corrupt file is replaced rather than blocking every later write
        let mut entries = self.load().unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Resetting unreadable session store");
            BTreeMap::new()
        });
        apply(&mut entries);
        self.save(&entries)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let store = FileStore::new(path.clone());
        store.set("auth_user", "{\"id\":\"1\"}").unwrap();
        store.set("oauth_state", "abc").unwrap();

        let reopened = FileStore::new(path.clone());
        assert_eq!(
            reopened.get("auth_user").unwrap().as_deref(),
            Some("{\"id\":\"1\"}")
        );
        assert_eq!(reopened.get("oauth_state").unwrap().as_deref(), Some("abc"));
        assert_eq!(reopened.get("missing").unwrap(), None);
    }

    #[test]
    fn test_file_store_removes_file_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = FileStore::new(path.clone());
        store.set("k", "v").unwrap();
        assert!(path.exists());

        store.remove("k").unwrap();
        assert!(!path.exists());
        // Removing from an absent file is fine
        store.remove("k").unwrap();
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();

        let store = FileStore::new(path);
        assert!(store.get("k").is_err());
    }

    #[test]
    fn test_file_store_recovers_from_corrupt_file_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{truncated").unwrap();

        let store = FileStore::new(path.clone());
        store.set("auth_user", "u").unwrap();

        let reopened = FileStore::new(path.clone());
        assert_eq!(reopened.get("auth_user").unwrap().as_deref(), Some("u"));

        // Removing the last key clears the file again
        reopened.remove("auth_user").unwrap();
        assert!(!path.exists());
        assert!(!dir.path().join("session.json.tmp").exists());
    }
}
