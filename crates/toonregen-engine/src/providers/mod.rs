//! Image generation backends and the inputs handed to them.

mod dryrun;
mod gemini;
mod http;
mod seedream;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use toonregen_contracts::providers::{ProviderKind, ProviderTable};
use toonregen_contracts::rounds::{CandidateId, GenerationRequest, ImageRef};

use crate::config::{CallPolicy, RegenConfig};

pub use dryrun::{render_placeholder_png, DryrunProvider};
pub use gemini::GeminiProvider;
pub use seedream::SeedreamProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRole {
    Source,
    Reference,
    CharacterSheet,
}

/// One image read from disk for a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    pub role: InputRole,
    pub label: Option<String>,
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// The images of one round in send order: source, references, character
/// sheets. Loaded once and shared by every call of the round and its
/// re-rolls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderInputs {
    pub images: Vec<LoadedImage>,
}

impl ProviderInputs {
    pub fn load(request: &GenerationRequest) -> Result<Self> {
        let mut images = vec![load_image(&request.source_image, InputRole::Source)?];
        for reference in &request.reference_images {
            images.push(load_image(reference, InputRole::Reference)?);
        }
        for sheet in &request.character_sheets {
            images.push(load_image(sheet, InputRole::CharacterSheet)?);
        }
        Ok(Self { images })
    }

    /// Text placed ahead of the prompt naming each attached image by its
    /// 1-based position.
    pub fn preamble(&self) -> String {
        let mut lines = Vec::new();
        for (offset, image) in self.images.iter().enumerate() {
            let position = offset + 1;
            let line = match image.role {
                InputRole::Source => format!("Image {position} is the panel to transform."),
                InputRole::Reference => {
                    format!("Image {position} is a style and content reference.")
                }
                InputRole::CharacterSheet => match image.label.as_deref() {
                    Some(name) => format!("Image {position} is the character sheet for {name}."),
                    None => format!("Image {position} is a character sheet."),
                },
            };
            lines.push(line);
        }
        lines.join("\n")
    }
}

fn load_image(image: &ImageRef, role: InputRole) -> Result<LoadedImage> {
    let bytes = std::fs::read(&image.path)
        .with_context(|| format!("failed reading {}", image.path.display()))?;
    let mime_type = sniff_mime(&bytes)
        .or_else(|| mime_for_path(&image.path))
        .unwrap_or("image/png")
        .to_string();
    Ok(LoadedImage {
        role,
        label: image.label.clone(),
        file_name: image.file_name(),
        bytes,
        mime_type,
    })
}

pub(crate) fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

/// Everything one provider call needs. The prompt is the final variant for
/// this candidate and is sent unchanged.
#[derive(Debug, Clone)]
pub struct ProviderCall {
    pub candidate_id: CandidateId,
    pub index: usize,
    pub prompt: String,
    pub inputs: Arc<ProviderInputs>,
    pub policy: CallPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Request/response facts kept for the commit receipt.
    pub metadata: Map<String, Value>,
}

pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, call: &ProviderCall) -> Result<GeneratedImage>;
}

pub type SharedProvider = Arc<dyn ImageProvider>;

pub fn default_provider_table(config: &RegenConfig) -> ProviderTable<SharedProvider> {
    let mut table = ProviderTable::new();
    if config.dryrun {
        for kind in ProviderKind::ALL {
            table.register(kind, Arc::new(DryrunProvider::new(kind)) as SharedProvider);
        }
        return table;
    }
    table.register(
        ProviderKind::Gemini,
        Arc::new(GeminiProvider::new(config.gemini.clone())) as SharedProvider,
    );
    table.register(
        ProviderKind::Seedream,
        Arc::new(SeedreamProvider::new(config.seedream.clone())) as SharedProvider,
    );
    table
}
