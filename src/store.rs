//! Save and restore a selected set between sessions

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::StoreError;
use crate::selected_set::SelectedSet;

/// Key-value persistence for selected sets, keyed by e.g. page origin
pub trait SelectionStore {
    fn load(&self, key: &str) -> Result<Option<SelectedSet>, StoreError>;
    fn save(&mut self, key: &str, set: &SelectedSet) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    sets: HashMap<String, SelectedSet>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<SelectedSet>, StoreError> {
        Ok(self.sets.get(key).cloned())
    }

    fn save(&mut self, key: &str, set: &SelectedSet) -> Result<(), StoreError> {
        self.sets.insert(key.to_string(), set.clone());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.sets.remove(key);
        Ok(())
    }
}

/// One pretty-printed JSON file per key inside `dir`
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// The directory is created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for `key`; anything outside `[A-Za-z0-9._-]` becomes `_`
    pub fn path_for(&self, key: &str) -> PathBuf {
        let mut name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if name.is_empty() || name.chars().all(|c| c == '.') {
            name = format!("_{}", name);
        }
        self.dir.join(format!("{}.json", name))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl SelectionStore for JsonFileStore {
    fn load(&self, key: &str) -> Result<Option<SelectedSet>, StoreError> {
        let path = self.path_for(key);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn save(&mut self, key: &str, set: &SelectedSet) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        let path = self.path_for(key);
        let json = serde_json::to_string_pretty(set)?;
        std::fs::write(&path, json).map_err(|e| io_error(&path, e))?;
        debug!("Saved {} selectors to {}", set.len(), path.display());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}
