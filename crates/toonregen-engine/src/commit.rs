use std::path::Path;

use chrono::Utc;
use toonregen_contracts::files::CommittedFile;
use toonregen_contracts::rounds::{CandidateId, ResultCandidate, ResultStore};
use toonregen_contracts::RegenError;
use tracing::{info, warn};

use crate::error_chain_text;
use crate::storage::{FileStore, LineageRecorder, UploadRequest};

/// Where and under which names a commit files its images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitTarget {
    pub owner_id: String,
    pub stage_id: String,
    /// File name of the source panel; its stem prefixes every new name.
    pub source_file_name: String,
    pub source_file_id: Option<String>,
    /// Explicit description for every file of this commit.
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedCandidate {
    pub candidate_id: CandidateId,
    pub file: CommittedFile,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub committed: Vec<CommittedCandidate>,
    /// One `RegenError::Upload` per candidate that could not be stored.
    pub failures: Vec<RegenError>,
    pub warnings: Vec<String>,
}

impl CommitReport {
    pub fn success_count(&self) -> usize {
        self.committed.len()
    }

    pub fn attempted(&self) -> usize {
        self.committed.len() + self.failures.len()
    }
}

/// Uploads every selected `Ready` candidate, one at a time.
///
/// A failed upload is reported and the rest continue. Committed candidates
/// are deselected but stay in the store. With nothing selected the file
/// store is never called. `describe` supplies the default description when
/// the target carries none.
pub fn commit_selected(
    store: &mut ResultStore,
    target: &CommitTarget,
    files: &mut dyn FileStore,
    mut lineage: Option<&mut dyn LineageRecorder>,
    describe: &dyn Fn(&ResultCandidate) -> String,
) -> CommitReport {
    let mut report = CommitReport::default();
    let selected: Vec<ResultCandidate> = store.selected().into_iter().cloned().collect();
    if selected.is_empty() {
        return report;
    }

    let stem = file_stem(&target.source_file_name);
    let mut cleared = Vec::new();
    for candidate in &selected {
        let Some(payload) = candidate.payload() else {
            report.failures.push(RegenError::Upload {
                candidate: candidate.id().clone(),
                message: "candidate has no image payload".to_string(),
            });
            continue;
        };
        let (extension, mime_type) = output_format(&payload.bytes, &payload.mime_type);
        let file_name = collision_resistant_name(&stem, extension);
        let description = target
            .description
            .clone()
            .unwrap_or_else(|| describe(candidate));

        let uploaded = files.upload(&UploadRequest {
            owner_id: &target.owner_id,
            stage_id: &target.stage_id,
            file_name: &file_name,
            bytes: &payload.bytes,
            mime_type: &mime_type,
            description: Some(description.as_str()).filter(|value| !value.trim().is_empty()),
            source_file_id: target.source_file_id.as_deref(),
        });
        let file = match uploaded {
            Ok(file) => file,
            Err(err) => {
                let message = error_chain_text(&err, 400);
                warn!(candidate = %candidate.id(), "upload failed: {message}");
                report.failures.push(RegenError::Upload {
                    candidate: candidate.id().clone(),
                    message,
                });
                continue;
            }
        };

        if let (Some(recorder), Some(source_id)) =
            (lineage.as_deref_mut(), target.source_file_id.as_deref())
        {
            if let Err(err) = recorder.record(&file, source_id) {
                let message = format!(
                    "lineage not recorded for {}: {}",
                    file.storage_path,
                    error_chain_text(&err, 300)
                );
                warn!("{message}");
                report.warnings.push(message);
            }
        }
        cleared.push(candidate.id().clone());
        report.committed.push(CommittedCandidate {
            candidate_id: candidate.id().clone(),
            file,
        });
    }

    store.clear_selection(&cleared);
    info!(
        committed = report.success_count(),
        failed = report.failures.len(),
        stage = %target.stage_id,
        "commit finished"
    );
    report
}

fn file_stem(source_file_name: &str) -> String {
    let stem = Path::new(source_file_name)
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('-');
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `<stem>_<UTC yyyymmddHHMMSS>_<6 hex>.<ext>`
fn collision_resistant_name(stem: &str, extension: &str) -> String {
    let suffix: [u8; 3] = rand::random();
    format!(
        "{stem}_{}_{}.{extension}",
        Utc::now().format("%Y%m%d%H%M%S"),
        hex::encode(suffix)
    )
}

/// Extension and mime type from the payload's actual bytes, falling back to
/// the declared mime type.
fn output_format(bytes: &[u8], declared_mime: &str) -> (&'static str, String) {
    if let Ok(format) = image::guess_format(bytes) {
        if let Some(extension) = format.extensions_str().first() {
            return (*extension, format.to_mime_type().to_string());
        }
    }
    let extension = match declared_mime.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    };
    let mime_type = if declared_mime.trim().is_empty() {
        "image/png".to_string()
    } else {
        declared_mime.trim().to_string()
    };
    (extension, mime_type)
}
