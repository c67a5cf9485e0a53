use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::providers::ProviderPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(String);

impl RoundId {
    pub fn new() -> Self {
        Self(format!("round-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoundId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An image handed to a provider: the source panel, a reference, or a
/// character sheet. `label` names the character for sheets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: String,
    pub path: PathBuf,
    pub label: Option<String>,
}

impl ImageRef {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            id: path.to_string_lossy().to_string(),
            path,
            label: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        self.label = Some(label).filter(|value| !value.trim().is_empty());
        self
    }

    /// Parses `name=path` (character sheet syntax) or a bare path.
    pub fn parse_labeled(raw: &str) -> Self {
        match raw.split_once('=') {
            Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
                Self::from_path(path.trim()).with_label(name.trim())
            }
            _ => Self::from_path(raw.trim()),
        }
    }

    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|value| value.to_str())
        .filter(|value| !value.is_empty())
        .unwrap_or("image")
        .to_string()
}

/// Template for one round, produced by style resolution. Prompt variation
/// is applied per output by the orchestrator, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub style_key: String,
    pub prompt: String,
    pub provider: ProviderPolicy,
    pub varies_prompt: bool,
    pub source_image: ImageRef,
    pub reference_images: Vec<ImageRef>,
    pub character_sheets: Vec<ImageRef>,
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{ImageRef, RoundId};

    #[test]
    fn labeled_refs_parse_character_sheets() {
        let sheet = ImageRef::parse_labeled("Mina=/sheets/mina front.png");
        assert_eq!(sheet.label.as_deref(), Some("Mina"));
        assert_eq!(sheet.path, PathBuf::from("/sheets/mina front.png"));

        let bare = ImageRef::parse_labeled("refs/tone.png");
        assert_eq!(bare.label, None);
        assert_eq!(bare.id, "refs/tone.png");
        assert_eq!(bare.file_name(), "tone.png");
    }

    #[test]
    fn blank_labels_are_dropped() {
        assert_eq!(ImageRef::from_path("a.png").with_label("  ").label, None);
    }

    #[test]
    fn round_ids_are_unique() {
        assert_ne!(RoundId::new(), RoundId::new());
        assert!(RoundId::new().as_str().starts_with("round-"));
    }
}
