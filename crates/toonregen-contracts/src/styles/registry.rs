use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::providers::ProviderPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceRequirement {
    None,
    Optional,
    Required,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleDefinition {
    pub key: String,
    pub label: String,
    pub base_prompt: String,
    pub allows_multiple_outputs: bool,
    pub default_count: usize,
    pub requires_reference: ReferenceRequirement,
    pub preferred_provider: ProviderPolicy,
    /// Eligible for per-output keyword variation.
    pub varies_prompt: bool,
}

impl StyleDefinition {
    pub fn effective_count(&self, requested: usize) -> usize {
        if self.allows_multiple_outputs {
            requested
        } else {
            self.default_count
        }
    }
}

#[derive(Debug, Clone)]
pub struct StyleRegistry {
    styles: IndexMap<String, StyleDefinition>,
}

impl Default for StyleRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl StyleRegistry {
    pub fn new(styles: Option<IndexMap<String, StyleDefinition>>) -> Self {
        Self {
            styles: styles.unwrap_or_else(default_styles),
        }
    }

    pub fn get(&self, key: &str) -> Option<&StyleDefinition> {
        self.styles.get(key.trim())
    }

    pub fn list(&self) -> impl Iterator<Item = &StyleDefinition> {
        self.styles.values()
    }

    pub fn keys(&self) -> Vec<String> {
        self.styles.keys().cloned().collect()
    }

    pub fn insert(&mut self, style: StyleDefinition) {
        self.styles.insert(style.key.clone(), style);
    }
}

fn default_styles() -> IndexMap<String, StyleDefinition> {
    let mut map = IndexMap::new();

    let mut insert = |key: &str,
                      label: &str,
                      base_prompt: &str,
                      allows_multiple_outputs: bool,
                      default_count: usize,
                      requires_reference: ReferenceRequirement,
                      preferred_provider: ProviderPolicy,
                      varies_prompt: bool| {
        map.insert(
            key.to_string(),
            StyleDefinition {
                key: key.to_string(),
                label: label.to_string(),
                base_prompt: base_prompt.to_string(),
                allows_multiple_outputs,
                default_count,
                requires_reference,
                preferred_provider,
                varies_prompt,
            },
        );
    };

    insert(
        "background-remove",
        "Background removal",
        "Remove the background of this webtoon panel. Keep every character and foreground prop exactly as drawn, \
         preserve line weight and colors, and place them on a plain white background.",
        false,
        1,
        ReferenceRequirement::None,
        ProviderPolicy::Gemini,
        false,
    );
    insert(
        "detail-enhance",
        "Detail enhancement",
        "Enhance the detail of this webtoon illustration without changing the composition, poses, \
         character designs or color palette",
        true,
        2,
        ReferenceRequirement::None,
        ProviderPolicy::Auto,
        true,
    );
    insert(
        "tone-reference",
        "Tone matching",
        "Repaint this panel so that its color tone, palette and lighting mood match the reference image. \
         Do not change the drawing, the characters or the framing.",
        true,
        2,
        ReferenceRequirement::Required,
        ProviderPolicy::Seedream,
        false,
    );
    insert(
        "line-art",
        "Sketch to line art",
        "Convert this rough sketch into clean webtoon line art with confident, even strokes. \
         Remove construction lines and keep the pose and proportions.",
        true,
        2,
        ReferenceRequirement::None,
        ProviderPolicy::Gemini,
        false,
    );
    insert(
        "flat-color",
        "Flat coloring",
        "Apply flat base colors to this line art with no shading or gradients. \
         If a reference image is attached, follow its palette.",
        true,
        2,
        ReferenceRequirement::Optional,
        ProviderPolicy::Auto,
        false,
    );
    insert(
        "character-insert",
        "Character insertion",
        "Redraw this scene with the character from the attached character sheet, matching their face, \
         hairstyle and outfit while keeping the scene's pose, camera angle and lighting.",
        true,
        2,
        ReferenceRequirement::Optional,
        ProviderPolicy::Gemini,
        false,
    );

    map
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::{ReferenceRequirement, StyleDefinition, StyleRegistry};
    use crate::providers::ProviderPolicy;

    #[test]
    fn builtin_styles_keep_declared_order() {
        let registry = StyleRegistry::default();
        assert_eq!(
            registry.keys(),
            vec![
                "background-remove",
                "detail-enhance",
                "tone-reference",
                "line-art",
                "flat-color",
                "character-insert",
            ]
        );
    }

    #[test]
    fn builtin_policies_match_their_purpose() {
        let registry = StyleRegistry::default();
        let bg = registry.get("background-remove").cloned().expect("builtin style");
        assert!(!bg.allows_multiple_outputs);
        assert_eq!(bg.default_count, 1);
        assert_eq!(bg.requires_reference, ReferenceRequirement::None);

        let detail = registry.get(" detail-enhance ").cloned().expect("builtin style");
        assert!(detail.varies_prompt);
        assert_eq!(detail.preferred_provider, ProviderPolicy::Auto);

        let tone = registry.get("tone-reference").cloned().expect("builtin style");
        assert_eq!(tone.requires_reference, ReferenceRequirement::Required);
    }

    #[test]
    fn effective_count_ignores_request_for_single_output_styles() {
        let registry = StyleRegistry::default();
        let bg = registry.get("background-remove").cloned().expect("builtin style");
        assert_eq!(bg.effective_count(5), 1);
        let detail = registry.get("detail-enhance").cloned().expect("builtin style");
        assert_eq!(detail.effective_count(5), 5);
    }

    #[test]
    fn custom_registry_replaces_builtins() {
        let mut styles = IndexMap::new();
        styles.insert(
            "ink".to_string(),
            StyleDefinition {
                key: "ink".to_string(),
                label: "Ink".to_string(),
                base_prompt: "ink it".to_string(),
                allows_multiple_outputs: true,
                default_count: 3,
                requires_reference: ReferenceRequirement::None,
                preferred_provider: ProviderPolicy::Seedream,
                varies_prompt: false,
            },
        );
        let registry = StyleRegistry::new(Some(styles));
        assert_eq!(registry.keys(), vec!["ink"]);
        assert!(registry.get("detail-enhance").is_none());
    }
}
