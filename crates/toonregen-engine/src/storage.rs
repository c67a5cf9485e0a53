use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use toonregen_contracts::files::{CommittedFile, FileManifest, LineageEntry, LineageLog};
use tracing::debug;
use uuid::Uuid;

use crate::now_utc_iso;

const MANIFEST_FILE: &str = "manifest.json";
const LINEAGE_FILE: &str = "lineage.jsonl";

/// Arguments of one upload.
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    pub owner_id: &'a str,
    pub stage_id: &'a str,
    pub file_name: &'a str,
    pub bytes: &'a [u8],
    pub mime_type: &'a str,
    pub description: Option<&'a str>,
    pub source_file_id: Option<&'a str>,
}

/// Where committed images are persisted.
pub trait FileStore {
    fn upload(&mut self, request: &UploadRequest<'_>) -> Result<CommittedFile>;
    fn list_by_owner(&mut self, owner_id: &str) -> Result<Vec<CommittedFile>>;
    fn remove(&mut self, storage_path: &str) -> Result<Option<CommittedFile>>;
}

/// Records which committed file was derived from which source file.
pub trait LineageRecorder {
    fn record(&mut self, derived: &CommittedFile, source_file_id: &str) -> Result<()>;
    fn derived_from(&self, source_file_id: &str) -> Result<Vec<LineageEntry>>;
}

impl LineageRecorder for LineageLog {
    fn record(&mut self, derived: &CommittedFile, source_file_id: &str) -> Result<()> {
        LineageLog::record(self, derived, source_file_id).map(|_| ())
    }

    fn derived_from(&self, source_file_id: &str) -> Result<Vec<LineageEntry>> {
        LineageLog::derived_from(self, source_file_id)
    }
}

/// Directory-backed file store: `<root>/<owner>/<stage>/<file>` plus a
/// `manifest.json` of records. Files are created, never overwritten.
pub struct LocalFileStore {
    root: PathBuf,
    manifest: FileManifest,
}

impl LocalFileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed creating store root {}", root.display()))?;
        let manifest = FileManifest::new(root.join(MANIFEST_FILE));
        Ok(Self { root, manifest })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lineage log kept next to the manifest.
    pub fn lineage_log(&self) -> LineageLog {
        LineageLog::new(self.root.join(LINEAGE_FILE))
    }

    fn resolve_storage_path(&self, storage_path: &str) -> Result<PathBuf> {
        let relative = Path::new(storage_path);
        let safe = !storage_path.trim().is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            bail!("storage path '{storage_path}' must be relative to the store root");
        }
        Ok(self.root.join(relative))
    }
}

fn path_segment<'a>(kind: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\'])
    {
        bail!("invalid {kind} '{value}'");
    }
    Ok(trimmed)
}

impl FileStore for LocalFileStore {
    fn upload(&mut self, request: &UploadRequest<'_>) -> Result<CommittedFile> {
        let owner_id = path_segment("owner id", request.owner_id)?;
        let stage_id = path_segment("stage id", request.stage_id)?;
        let file_name = path_segment("file name", request.file_name)?;
        let storage_path = format!("{owner_id}/{stage_id}/{file_name}");
        let target = self.root.join(owner_id).join(stage_id).join(file_name);

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                bail!("file '{storage_path}' already exists")
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed creating {}", target.display()))
            }
        };
        let written = file
            .write_all(request.bytes)
            .and_then(|_| file.sync_all());
        if let Err(err) = written {
            drop(file);
            let _ = std::fs::remove_file(&target);
            return Err(err).with_context(|| format!("failed writing {}", target.display()));
        }

        let committed = CommittedFile {
            id: format!("file-{}", Uuid::new_v4().simple()),
            owner_id: owner_id.to_string(),
            stage_id: stage_id.to_string(),
            file_name: file_name.to_string(),
            storage_path: storage_path.clone(),
            mime_type: request.mime_type.to_string(),
            size_bytes: request.bytes.len() as u64,
            source_file_id: request.source_file_id.map(str::to_string),
            description: request.description.map(str::to_string),
            created_at: now_utc_iso(),
        };
        if let Err(err) = self.manifest.insert(committed.clone()) {
            let _ = std::fs::remove_file(&target);
            return Err(err.context(format!("failed recording {storage_path} in manifest")));
        }
        debug!(path = %storage_path, bytes = committed.size_bytes, "file stored");
        Ok(committed)
    }

    fn list_by_owner(&mut self, owner_id: &str) -> Result<Vec<CommittedFile>> {
        self.manifest.by_owner(owner_id.trim())
    }

    fn remove(&mut self, storage_path: &str) -> Result<Option<CommittedFile>> {
        let storage_path = storage_path.trim();
        let target = self.resolve_storage_path(storage_path)?;
        self.manifest
            .get(storage_path)
            .with_context(|| format!("cannot remove {storage_path}"))?;
        match std::fs::remove_file(&target) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("failed removing {}", target.display()))
            }
        }
        self.manifest.remove(storage_path)
    }
}
