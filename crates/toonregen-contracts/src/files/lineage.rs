use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::CommittedFile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEntry {
    pub ts: String,
    pub source_file_id: String,
    pub derived_file_id: String,
    pub storage_path: String,
    pub stage_id: String,
}

/// Append-only `lineage.jsonl`: which committed file came from which source.
#[derive(Debug, Clone)]
pub struct LineageLog {
    path: PathBuf,
}

impl LineageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(
        &self,
        derived: &CommittedFile,
        source_file_id: &str,
    ) -> anyhow::Result<LineageEntry> {
        let entry = LineageEntry {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            source_file_id: source_file_id.to_string(),
            derived_file_id: derived.id.clone(),
            storage_path: derived.storage_path.clone(),
            stage_id: derived.stage_id.clone(),
        };
        append_jsonl(&self.path, &entry)?;
        Ok(entry)
    }

    pub fn derived_from(&self, source_file_id: &str) -> anyhow::Result<Vec<LineageEntry>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let Ok(entry) = serde_json::from_str::<LineageEntry>(&line) else {
                continue;
            };
            if entry.source_file_id == source_file_id {
                out.push(entry);
            }
        }
        Ok(out)
    }
}

fn append_jsonl(path: &Path, entry: &LineageEntry) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(serde_json::to_string(entry)?.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::LineageLog;
    use crate::files::CommittedFile;

    fn committed(id: &str) -> CommittedFile {
        CommittedFile {
            id: id.to_string(),
            owner_id: "cut-1".to_string(),
            stage_id: "shading".to_string(),
            file_name: format!("{id}.png"),
            storage_path: format!("cut-1/shading/{id}.png"),
            mime_type: "image/png".to_string(),
            size_bytes: 4,
            source_file_id: None,
            description: None,
            created_at: "2026-10-19T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn records_and_looks_up_derived_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log = LineageLog::new(temp.path().join("lineage.jsonl"));
        assert!(log.derived_from("src-1")?.is_empty());

        log.record(&committed("a"), "src-1")?;
        log.record(&committed("b"), "src-2")?;
        log.record(&committed("c"), "src-1")?;

        let derived: Vec<String> = log
            .derived_from("src-1")?
            .into_iter()
            .map(|entry| entry.derived_file_id)
            .collect();
        assert_eq!(derived, vec!["a", "c"]);
        Ok(())
    }

    #[test]
    fn malformed_lines_are_skipped() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("lineage.jsonl");
        std::fs::write(&path, "not json\n")?;
        let log = LineageLog::new(&path);
        log.record(&committed("a"), "src-1")?;
        assert_eq!(log.derived_from("src-1")?.len(), 1);
        Ok(())
    }
}
