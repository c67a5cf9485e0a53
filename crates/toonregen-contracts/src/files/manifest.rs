use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::CommittedFile;

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestDocument {
    #[serde(default)]
    schema_version: u32,
    #[serde(default)]
    files: BTreeMap<String, CommittedFile>,
}

/// JSON index of committed files keyed by storage path.
///
/// Reads always refresh from disk and flushes only write the keys this
/// instance touched, so two sessions sharing one manifest do not drop each
/// other's records. A manifest that exists but cannot be parsed is an error,
/// never an empty index. Writes replace the file atomically.
#[derive(Debug, Clone)]
pub struct FileManifest {
    path: PathBuf,
    entries: Option<BTreeMap<String, CommittedFile>>,
    dirty_keys: Vec<String>,
    removed_keys: Vec<String>,
}

impl FileManifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: None,
            dirty_keys: Vec::new(),
            removed_keys: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&mut self, storage_path: &str) -> Result<Option<CommittedFile>> {
        Ok(self.ensure_loaded()?.get(storage_path).cloned())
    }

    pub fn insert(&mut self, file: CommittedFile) -> Result<()> {
        let key = file.storage_path.clone();
        let entries = self.ensure_loaded()?;
        if entries.get(&key) == Some(&file) {
            return Ok(());
        }
        entries.insert(key.clone(), file);
        self.removed_keys.retain(|existing| existing != &key);
        if !self.dirty_keys.contains(&key) {
            self.dirty_keys.push(key);
        }
        self.flush()
    }

    pub fn remove(&mut self, storage_path: &str) -> Result<Option<CommittedFile>> {
        let removed = self.ensure_loaded()?.remove(storage_path);
        if removed.is_some() {
            self.dirty_keys.retain(|existing| existing != storage_path);
            if !self.removed_keys.iter().any(|existing| existing == storage_path) {
                self.removed_keys.push(storage_path.to_string());
            }
            self.flush()?;
        }
        Ok(removed)
    }

    pub fn by_owner(&mut self, owner_id: &str) -> Result<Vec<CommittedFile>> {
        let mut files: Vec<CommittedFile> = self
            .ensure_loaded()?
            .values()
            .filter(|file| file.owner_id == owner_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.storage_path.cmp(&b.storage_path))
        });
        Ok(files)
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.entries.is_none() || (self.dirty_keys.is_empty() && self.removed_keys.is_empty())
        {
            return Ok(());
        }

        let mut on_disk = read_entries(&self.path)?;
        if let Some(entries) = &self.entries {
            for key in &self.dirty_keys {
                if let Some(file) = entries.get(key) {
                    on_disk.insert(key.clone(), file.clone());
                }
            }
        }
        for key in &self.removed_keys {
            on_disk.remove(key);
        }
        write_entries(&self.path, &on_disk)?;
        self.entries = Some(on_disk);
        self.dirty_keys.clear();
        self.removed_keys.clear();
        Ok(())
    }

    fn ensure_loaded(&mut self) -> Result<&mut BTreeMap<String, CommittedFile>> {
        let mut fresh = read_entries(&self.path)?;
        if let Some(entries) = &self.entries {
            for key in &self.dirty_keys {
                if let Some(file) = entries.get(key) {
                    fresh.insert(key.clone(), file.clone());
                }
            }
        }
        for key in &self.removed_keys {
            fresh.remove(key);
        }
        Ok(self.entries.insert(fresh))
    }
}

/// A missing manifest is empty; an unreadable one is an error.
fn read_entries(path: &Path) -> Result<BTreeMap<String, CommittedFile>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed reading {}", path.display()))
        }
    };
    let document: ManifestDocument = serde_json::from_str(&raw)
        .with_context(|| format!("manifest {} is corrupt", path.display()))?;
    Ok(document.files)
}

fn write_entries(path: &Path, entries: &BTreeMap<String, CommittedFile>) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let payload = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "files": entries,
    });
    let mut staged = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed staging manifest in {}", dir.display()))?;
    staged.write_all(serde_json::to_string_pretty(&payload)?.as_bytes())?;
    staged.as_file().sync_all()?;
    staged
        .persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed replacing {}", path.display()))?;
    Ok(())
}
