use std::env;
use std::time::Duration;

const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-image";
const DEFAULT_SEEDREAM_API_BASE: &str = "https://ark.ap-southeast.bytepluses.com/api/v3";
const DEFAULT_SEEDREAM_MODEL: &str = "seedream-4-0-250828";

/// Slack added on top of the worst-case call duration before a placeholder
/// is declared timed out.
const DEADLINE_GRACE: Duration = Duration::from_secs(5);

/// Timeout and retry budget handed to every provider call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallPolicy {
    pub timeout_s: f64,
    pub retries: usize,
    pub retry_backoff_s: f64,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout_s: 120.0,
            retries: 2,
            retry_backoff_s: 1.2,
        }
    }
}

impl CallPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_s)
    }

    /// Sleep before retry `attempt` (zero-based): linear backoff.
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        Duration::from_secs_f64(self.retry_backoff_s * (attempt as f64 + 1.0))
    }

    /// Session-side deadline for one call: every attempt timing out, every
    /// backoff slept, one extra timeout for a result download, plus grace.
    pub fn deadline(&self) -> Duration {
        let attempts = self.retries as u32 + 2;
        let backoff: Duration = (0..self.retries).map(|attempt| self.backoff_for(attempt)).sum();
        self.timeout() * attempts + backoff + DEADLINE_GRACE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedreamSettings {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegenConfig {
    pub call: CallPolicy,
    pub max_in_flight: usize,
    pub max_outputs: usize,
    pub dryrun: bool,
    pub gemini: GeminiSettings,
    pub seedream: SeedreamSettings,
}

impl Default for RegenConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl RegenConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; numeric values are clamped and
    /// unparsable ones fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let number = |key: &str, default: f64, min: f64, max: f64| {
            text(key)
                .and_then(|value| value.parse::<f64>().ok())
                .filter(|value| value.is_finite())
                .unwrap_or(default)
                .clamp(min, max)
        };
        let api_base = |key: &str, default: &str| {
            text(key)
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            call: CallPolicy {
                timeout_s: number("TOONREGEN_CALL_TIMEOUT_S", 120.0, 5.0, 600.0),
                retries: number("TOONREGEN_CALL_RETRIES", 2.0, 0.0, 5.0).round() as usize,
                retry_backoff_s: number("TOONREGEN_RETRY_BACKOFF_S", 1.2, 0.0, 30.0),
            },
            max_in_flight: number("TOONREGEN_MAX_IN_FLIGHT", 4.0, 1.0, 16.0).round() as usize,
            max_outputs: number("TOONREGEN_MAX_OUTPUTS", 8.0, 1.0, 16.0).round() as usize,
            dryrun: text("TOONREGEN_DRYRUN")
                .map(|value| parse_flag(&value))
                .unwrap_or(false),
            gemini: GeminiSettings {
                api_key: text("GEMINI_API_KEY").or_else(|| text("GOOGLE_API_KEY")),
                api_base: api_base("GEMINI_API_BASE", DEFAULT_GEMINI_API_BASE),
                model: text("GEMINI_IMAGE_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            },
            seedream: SeedreamSettings {
                api_key: text("ARK_API_KEY").or_else(|| text("SEEDREAM_API_KEY")),
                api_base: api_base("SEEDREAM_API_BASE", DEFAULT_SEEDREAM_API_BASE),
                model: text("SEEDREAM_MODEL").unwrap_or_else(|| DEFAULT_SEEDREAM_MODEL.to_string()),
            },
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
