use thiserror::Error;

use crate::rounds::CandidateId;

/// Failure taxonomy of the regeneration pipeline.
///
/// `MissingReference` and `Validation` are round-level: they are raised before
/// any placeholder exists or any provider is called. `Provider` and `Upload`
/// are scoped to one candidate and never abort its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegenError {
    #[error("style '{style}' requires a reference image")]
    MissingReference { style: String },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("generation failed for candidate {candidate}: {message}")]
    Provider {
        candidate: CandidateId,
        message: String,
    },

    #[error("upload failed for candidate {candidate}: {message}")]
    Upload {
        candidate: CandidateId,
        message: String,
    },
}

impl RegenError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True for errors that block a whole round before dispatch.
    pub fn is_round_level(&self) -> bool {
        matches!(self, Self::MissingReference { .. } | Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::RegenError;
    use crate::rounds::CandidateId;

    #[test]
    fn round_level_classification() {
        assert!(RegenError::MissingReference {
            style: "tone-reference".to_string()
        }
        .is_round_level());
        assert!(RegenError::validation("count must be at least 1").is_round_level());
        assert!(!RegenError::Upload {
            candidate: CandidateId::from("c-1"),
            message: "disk full".to_string(),
        }
        .is_round_level());
    }

    #[test]
    fn messages_are_user_facing() {
        let err = RegenError::MissingReference {
            style: "tone-reference".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "style 'tone-reference' requires a reference image"
        );
        let err = RegenError::Provider {
            candidate: CandidateId::from("c-7"),
            message: "Gemini request failed (429)".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "generation failed for candidate c-7: Gemini request failed (429)"
        );
    }
}
