//! File-backed key-value store.
//!
//! The whole store is one JSON object in `local_storage.json` inside the data
//! directory. Every write rewrites the file.

use hub_sync::store::{KeyValueStore, Result, StoreError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

pub const STORE_FILE: &str = "local_storage.json";

pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store in `data_dir`, creating the directory if needed.
    pub fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).map_err(io_error)?;
        let path = data_dir.join(STORE_FILE);

        let entries = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(io_error)?;
            serde_json::from_str(&contents)
                .map_err(|e| StoreError::Io(format!("{}: {}", path.display(), e)))?
        } else {
            BTreeMap::new()
        };
        debug!("Opened {} ({} keys)", path.display(), entries.len());

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        apply(&mut entries);
        let contents =
            serde_json::to_string_pretty(&*entries).map_err(|e| StoreError::Io(e.to_string()))?;
        fs::write(&self.path, contents).map_err(io_error)
    }
}

fn io_error(e: std::io::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        if self.get(key)?.is_none() {
            return Ok(());
        }
        self.update(|entries| {
            entries.remove(key);
        })
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect())
    }
}
