use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Concrete generation backend a single call is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Seedream,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Gemini, ProviderKind::Seedream];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Seedream => "seedream",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider choice carried by a style or a resolved request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPolicy {
    Gemini,
    Seedream,
    /// Alternate by output index: even indices go to Gemini, odd to Seedream.
    Auto,
}

impl ProviderPolicy {
    pub fn resolve(self, index: usize) -> ProviderKind {
        match self {
            Self::Gemini => ProviderKind::Gemini,
            Self::Seedream => ProviderKind::Seedream,
            Self::Auto => {
                if index % 2 == 0 {
                    ProviderKind::Gemini
                } else {
                    ProviderKind::Seedream
                }
            }
        }
    }

    /// Kinds a round of `count` outputs will touch under this policy.
    pub fn kinds_for(self, count: usize) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = (0..count).map(|idx| self.resolve(idx)).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Seedream => "seedream",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for ProviderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ProviderKind> for ProviderPolicy {
    fn from(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Gemini => Self::Gemini,
            ProviderKind::Seedream => Self::Seedream,
        }
    }
}

impl FromStr for ProviderPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini" | "nano-banana" => Ok(Self::Gemini),
            "seedream" | "ark" => Ok(Self::Seedream),
            "auto" | "" => Ok(Self::Auto),
            other => Err(format!(
                "unknown provider '{other}' (expected gemini, seedream or auto)"
            )),
        }
    }
}

/// Dispatch table from a provider tag to its implementation.
#[derive(Debug, Clone)]
pub struct ProviderTable<T> {
    providers: BTreeMap<ProviderKind, T>,
}

impl<T> Default for ProviderTable<T> {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
        }
    }
}

impl<T> ProviderTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ProviderKind, provider: T) {
        self.providers.insert(kind, provider);
    }

    pub fn with(mut self, kind: ProviderKind, provider: T) -> Self {
        self.register(kind, provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&T> {
        self.providers.get(&kind)
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.keys().copied().collect()
    }

    /// First kind the policy needs for `count` outputs that has no entry.
    pub fn missing_for(&self, policy: ProviderPolicy, count: usize) -> Option<ProviderKind> {
        policy
            .kinds_for(count)
            .into_iter()
            .find(|kind| !self.contains(*kind))
    }
}
