mod registry;
mod resolve;
mod variation;

pub use registry::{ReferenceRequirement, StyleDefinition, StyleRegistry};
pub use resolve::{RoundInputs, StyleResolver, DEFAULT_MAX_OUTPUTS};
pub use variation::{seeded_rng, vary_prompt, VariationCategory, VARIATION_CATEGORIES};
