use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

/// Key-value storage that outlives the process.
///
/// Callers replace whole records (read-modify-write). This is safe inside a
/// single process but not across several processes sharing one directory.
pub trait DurableStore: Send + Sync {
    fn read_key(&self, key: &str) -> Result<Option<String>>;
    fn write_key(&self, key: &str, value: &str) -> Result<()>;
    fn remove_key(&self, key: &str) -> Result<()>;
}

pub type SharedStore = Arc<dyn DurableStore>;

/// Read and decode a JSON record, `None` when the key is absent.
pub fn load_json<T: DeserializeOwned>(store: &dyn DurableStore, key: &str) -> Result<Option<T>> {
    match store.read_key(key)? {
        Some(contents) => {
            let value = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse stored record: {}", key))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Encode and write a JSON record.
pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn DurableStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let contents = serde_json::to_string(value)
        .with_context(|| format!("Failed to encode record: {}", key))?;
    store.write_key(key, &contents)
}

fn sanitize_key(key: &str) -> Result<String> {
    let cleaned: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        return Err(anyhow!("Empty storage key"));
    }
    Ok(cleaned)
}

/// One JSON file per key inside a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create store directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.dir.join(format!("{}.json", sanitize_key(key)?)))
    }
}

impl DurableStore for FileStore {
    fn read_key(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read store file: {}", key))?;
        Ok(Some(contents))
    }

    fn write_key(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key)?;
        // Write-then-rename so readers never observe a partial record
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)
            .with_context(|| format!("Failed to write store file: {}", key))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace store file: {}", key))?;
        debug!(key, bytes = value.len(), "Store record written");
        Ok(())
    }

    fn remove_key(&self, key: &str) -> Result<()> {
        let path = self.key_path(key)?;
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove store file: {}", key))?;
        }
        Ok(())
    }
}

/// In-process store, used by tests and by hosts that opt out of persistence.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.records
            .lock()
            .map_err(|_| anyhow!("Memory store lock poisoned"))
    }
}

impl DurableStore for MemoryStore {
    fn read_key(&self, key: &str) -> Result<Option<String>> {
        Ok(self.records()?.get(key).cloned())
    }

    fn write_key(&self, key: &str, value: &str) -> Result<()> {
        self.records()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_key(&self, key: &str) -> Result<()> {
        self.records()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("profile_u1").unwrap(), "profile_u1");
        assert_eq!(sanitize_key("../etc/passwd").unwrap(), "___etc_passwd");
        assert!(sanitize_key("").is_err());
    }

    #[test]
    fn test_memory_store_read_write_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.read_key("a").unwrap(), None);

        store.write_key("a", "1").unwrap();
        assert_eq!(store.read_key("a").unwrap().as_deref(), Some("1"));

        store.remove_key("a").unwrap();
        assert_eq!(store.read_key("a").unwrap(), None);
        // Removing a missing key is not an error
        store.remove_key("a").unwrap();
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let record = Record { name: "Ana".to_string(), count: 2 };

        {
            let store = FileStore::new(dir.path().to_path_buf()).unwrap();
            save_json(&store, "profile_u1", &record).unwrap();
        }

        let reopened = FileStore::new(dir.path().to_path_buf()).unwrap();
        let loaded: Option<Record> = load_json(&reopened, "profile_u1").unwrap();
        assert_eq!(loaded, Some(record));
        assert!(!dir.path().join("profile_u1.json.tmp").exists());
    }

    #[test]
    fn test_load_json_reports_corrupt_record() {
        let store = MemoryStore::new();
        store.write_key("broken", "{not json").unwrap();
        let result: Result<Option<Record>> = load_json(&store, "broken");
        assert!(result.is_err());
    }
}
