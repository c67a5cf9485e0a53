use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariationCategory {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
}

pub const VARIATION_CATEGORIES: &[VariationCategory] = &[
    VariationCategory {
        name: "lighting",
        keywords: &[
            "dramatic rim lighting",
            "soft diffused light",
            "strong backlight",
            "warm ambient light",
            "cool moonlight",
        ],
    },
    VariationCategory {
        name: "fine-detail",
        keywords: &[
            "intricate fabric folds",
            "detailed hair strands",
            "fine texture detail",
            "sharp facial details",
            "detailed background props",
        ],
    },
    VariationCategory {
        name: "hatching",
        keywords: &[
            "delicate cross-hatching",
            "parallel hatching shadows",
            "stippled shading",
            "screentone-style hatching",
        ],
    },
    VariationCategory {
        name: "linework",
        keywords: &[
            "crisp clean linework",
            "varied line weight",
            "tapered ink strokes",
            "bold outer contours",
        ],
    },
    VariationCategory {
        name: "tone",
        keywords: &[
            "high contrast tones",
            "muted pastel tones",
            "cinematic color grading",
            "soft gradient shading",
            "rich saturated tones",
        ],
    },
];

const MIN_KEYWORDS: usize = 2;
const MAX_KEYWORDS: usize = 3;

pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Builds the prompt for one output of a round.
///
/// Without `varies` the base prompt comes back unchanged. Otherwise 2-3
/// keywords are drawn, at most one per category, and appended comma-joined.
pub fn vary_prompt<R: Rng + ?Sized>(base_prompt: &str, varies: bool, rng: &mut R) -> String {
    if !varies {
        return base_prompt.to_string();
    }
    append_variation_keywords(base_prompt, rng)
}

fn append_variation_keywords<R: Rng + ?Sized>(base_prompt: &str, rng: &mut R) -> String {
    let take = rng.gen_range(MIN_KEYWORDS..=MAX_KEYWORDS);
    let keywords: Vec<&str> = VARIATION_CATEGORIES
        .choose_multiple(rng, take)
        .filter_map(|category| category.keywords.choose(rng).copied())
        .collect();

    let base = base_prompt.trim_end().trim_end_matches(',');
    if base.is_empty() {
        return keywords.join(", ");
    }
    format!("{}, {}", base, keywords.join(", "))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{seeded_rng, vary_prompt, VARIATION_CATEGORIES};
    use crate::styles::StyleRegistry;

    fn appended_keywords<'a>(base: &str, prompt: &'a str) -> Vec<&'a str> {
        prompt
            .strip_prefix(base)
            .unwrap_or_default()
            .trim_start_matches(", ")
            .split(", ")
            .filter(|part| !part.is_empty())
            .collect()
    }

    fn category_of(keyword: &str) -> &'static str {
        VARIATION_CATEGORIES
            .iter()
            .find(|category| category.keywords.contains(&keyword))
            .map(|category| category.name)
            .unwrap_or("unknown")
    }

    #[test]
    fn non_varying_style_returns_base_prompt() {
        let registry = StyleRegistry::default();
        let style = registry.get("background-remove").expect("builtin style");
        let mut rng = seeded_rng(Some(7));
        assert_eq!(vary_prompt("keep it", style.varies_prompt, &mut rng), "keep it");
    }

    #[test]
    fn varying_style_appends_two_or_three_keywords_from_distinct_categories() {
        let registry = StyleRegistry::default();
        let style = registry.get("detail-enhance").expect("builtin style");
        let mut rng = seeded_rng(Some(42));
        for _ in 0..200 {
            let prompt = vary_prompt("enhance", style.varies_prompt, &mut rng);
            assert!(prompt.starts_with("enhance, "));
            let keywords = appended_keywords("enhance", &prompt);
            assert!((2..=3).contains(&keywords.len()), "{prompt}");
            let categories: HashSet<&str> = keywords.iter().map(|kw| category_of(kw)).collect();
            assert_eq!(categories.len(), keywords.len(), "{prompt}");
            assert!(!categories.contains("unknown"));
        }
    }

    #[test]
    fn fixed_seed_is_deterministic() {
        let registry = StyleRegistry::default();
        let varies = registry.get("detail-enhance").expect("builtin style").varies_prompt;
        let mut first = seeded_rng(Some(9));
        let mut second = seeded_rng(Some(9));
        let a: Vec<String> = (0..4).map(|_| vary_prompt("base", varies, &mut first)).collect();
        let b: Vec<String> = (0..4).map(|_| vary_prompt("base", varies, &mut second)).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn outputs_in_one_round_are_drawn_independently() {
        let registry = StyleRegistry::default();
        let varies = registry.get("detail-enhance").expect("builtin style").varies_prompt;
        let mut rng = seeded_rng(Some(3));
        let prompts: HashSet<String> = (0..16).map(|_| vary_prompt("base", varies, &mut rng)).collect();
        assert!(prompts.len() > 1);
    }

    #[test]
    fn trailing_comma_in_base_is_not_doubled() {
        let registry = StyleRegistry::default();
        let style = registry.get("detail-enhance").expect("builtin style");
        let mut rng = seeded_rng(Some(1));
        let prompt = vary_prompt("base, ", style.varies_prompt, &mut rng);
        assert!(prompt.starts_with("base, "));
        assert!(!prompt.contains(",,"));
        let bare = vary_prompt("", style.varies_prompt, &mut rng);
        assert!(!bare.starts_with(','));
    }
}
