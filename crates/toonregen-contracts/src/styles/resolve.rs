use super::{ReferenceRequirement, StyleRegistry};
use crate::error::RegenError;
use crate::providers::ProviderPolicy;
use crate::rounds::{GenerationRequest, ImageRef};

pub const DEFAULT_MAX_OUTPUTS: usize = 8;

/// User-side choices for one round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundInputs {
    pub style_key: Option<String>,
    pub reference_images: Vec<ImageRef>,
    pub character_sheets: Vec<ImageRef>,
    pub custom_prompt: Option<String>,
    pub requested_count: usize,
    pub provider_override: Option<ProviderPolicy>,
}

impl RoundInputs {
    pub fn for_style(style_key: impl Into<String>, requested_count: usize) -> Self {
        Self {
            style_key: Some(style_key.into()),
            requested_count,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct StyleResolver {
    pub registry: StyleRegistry,
    max_outputs: usize,
}

impl StyleResolver {
    pub fn new(registry: Option<StyleRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
            max_outputs: DEFAULT_MAX_OUTPUTS,
        }
    }

    pub fn with_max_outputs(mut self, max_outputs: usize) -> Self {
        self.max_outputs = max_outputs.max(1);
        self
    }

    pub fn max_outputs(&self) -> usize {
        self.max_outputs
    }

    /// Merges style defaults with user overrides into a round template.
    ///
    /// Fails before anything is dispatched when the style is missing or
    /// unknown, the count is out of range, or a required reference is absent.
    pub fn resolve(
        &self,
        inputs: &RoundInputs,
        source_image: &ImageRef,
    ) -> Result<GenerationRequest, RegenError> {
        let style_key = inputs
            .style_key
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| RegenError::validation("no style selected"))?;
        let style = self.registry.get(style_key).ok_or_else(|| {
            RegenError::validation(format!(
                "unknown style '{style_key}' (available: {})",
                self.registry.keys().join(", ")
            ))
        })?;

        if inputs.requested_count == 0 {
            return Err(RegenError::validation("output count must be at least 1"));
        }
        let count = style.effective_count(inputs.requested_count);
        if count > self.max_outputs {
            return Err(RegenError::validation(format!(
                "output count {count} exceeds the limit of {}",
                self.max_outputs
            )));
        }

        let reference_images = dedupe_images(&inputs.reference_images, source_image);
        if style.requires_reference == ReferenceRequirement::Required
            && reference_images.is_empty()
        {
            return Err(RegenError::MissingReference {
                style: style.key.clone(),
            });
        }

        let prompt = inputs
            .custom_prompt
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(style.base_prompt.as_str())
            .to_string();

        Ok(GenerationRequest {
            style_key: style.key.clone(),
            prompt,
            provider: inputs.provider_override.unwrap_or(style.preferred_provider),
            varies_prompt: style.varies_prompt,
            source_image: source_image.clone(),
            reference_images,
            character_sheets: dedupe_images(&inputs.character_sheets, source_image),
            count,
        })
    }
}

fn dedupe_images(images: &[ImageRef], source_image: &ImageRef) -> Vec<ImageRef> {
    let mut out: Vec<ImageRef> = Vec::new();
    for image in images {
        if image.id == source_image.id || out.iter().any(|existing| existing.id == image.id) {
            continue;
        }
        out.push(image.clone());
    }
    out
}
