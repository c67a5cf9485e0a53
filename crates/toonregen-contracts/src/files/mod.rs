mod lineage;
mod manifest;
mod stages;

pub use lineage::{LineageEntry, LineageLog};
pub use manifest::FileManifest;
pub use stages::{Stage, StageLadder};

use serde::{Deserialize, Serialize};

/// A regenerated image persisted by the commit stage. Never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedFile {
    pub id: String,
    pub owner_id: String,
    pub stage_id: String,
    pub file_name: String,
    pub storage_path: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub source_file_id: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
}
