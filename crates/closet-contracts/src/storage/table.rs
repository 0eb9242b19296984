use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::{StoreError, StoreResult};

/// A keyed JSON document on disk (`{"<key>": <row>, ...}`).
///
/// Reads always refresh from disk so several handles on the same file see
/// each other's writes. Writes only touch the keys this handle changed and
/// are merged into the current on-disk document before it is rewritten.
#[derive(Debug, Clone)]
pub struct JsonTable {
    path: PathBuf,
    payload: Option<Map<String, Value>>,
    dirty_keys: Vec<String>,
    removed_keys: Vec<String>,
}

impl JsonTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            payload: None,
            dirty_keys: Vec::new(),
            removed_keys: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&mut self, key: &str) -> StoreResult<Option<Value>> {
        let payload = self.ensure_loaded()?;
        Ok(payload.get(key).cloned())
    }

    pub fn get_as<T: DeserializeOwned>(&mut self, key: &str) -> StoreResult<Option<T>> {
        let Some(value) = self.get(key)? else {
            return Ok(None);
        };
        let row = serde_json::from_value(value).map_err(|source| self.serde_error(source))?;
        Ok(Some(row))
    }

    pub fn rows_as<T: DeserializeOwned>(&mut self) -> StoreResult<Vec<T>> {
        let rows = self.ensure_loaded()?.values().cloned().collect::<Vec<Value>>();
        rows.into_iter()
            .map(|value| serde_json::from_value(value).map_err(|source| self.serde_error(source)))
            .collect()
    }

    pub fn set<T: Serialize>(&mut self, key: &str, row: &T) -> StoreResult<()> {
        let snapshot = serde_json::to_value(row).map_err(|source| self.serde_error(source))?;
        let payload = self.ensure_loaded()?;
        if payload.get(key) == Some(&snapshot) {
            return Ok(());
        }
        payload.insert(key.to_string(), snapshot);
        self.removed_keys.retain(|existing| existing != key);
        if !self.dirty_keys.iter().any(|existing| existing == key) {
            self.dirty_keys.push(key.to_string());
        }
        self.flush()
    }

    pub fn remove(&mut self, key: &str) -> StoreResult<Option<Value>> {
        let payload = self.ensure_loaded()?;
        let Some(previous) = payload.remove(key) else {
            return Ok(None);
        };
        self.dirty_keys.retain(|existing| existing != key);
        if !self.removed_keys.iter().any(|existing| existing == key) {
            self.removed_keys.push(key.to_string());
        }
        self.flush()?;
        Ok(Some(previous))
    }

    pub fn flush(&mut self) -> StoreResult<()> {
        if self.payload.is_none() || (self.dirty_keys.is_empty() && self.removed_keys.is_empty())
        {
            return Ok(());
        }

        let mut on_disk = read_json_object(&self.path)?.unwrap_or_default();
        if let Some(payload) = &self.payload {
            for key in &self.dirty_keys {
                if let Some(value) = payload.get(key) {
                    on_disk.insert(key.clone(), value.clone());
                }
            }
        }
        for key in &self.removed_keys {
            on_disk.remove(key);
        }
        write_json_object(&self.path, &on_disk)?;
        self.payload = Some(on_disk);
        self.dirty_keys.clear();
        self.removed_keys.clear();
        Ok(())
    }

    fn ensure_loaded(&mut self) -> StoreResult<&mut Map<String, Value>> {
        let fresh = read_json_object(&self.path)?.unwrap_or_default();
        Ok(self.payload.insert(fresh))
    }

    fn serde_error(&self, source: serde_json::Error) -> StoreError {
        StoreError::Serde {
            path: self.path.display().to_string(),
            source,
        }
    }
}

fn read_json_object(path: &Path) -> StoreResult<Option<Map<String, Value>>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let parsed: Value = serde_json::from_str(&raw).map_err(|source| StoreError::Serde {
        path: path.display().to_string(),
        source,
    })?;
    Ok(parsed.as_object().cloned())
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> StoreResult<()> {
    let io_error = |source: std::io::Error| StoreError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    let body = serde_json::to_string_pretty(&Value::Object(payload.clone())).map_err(|source| {
        StoreError::Serde {
            path: path.display().to_string(),
            source,
        }
    })?;
    std::fs::write(path, body).map_err(io_error)
}
