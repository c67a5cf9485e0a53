use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RoundId;
use crate::providers::ProviderKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(String);

impl CandidateId {
    pub fn new() -> Self {
        Self(format!("cand-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CandidateId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for CandidateId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    Placeholder,
    Ready,
    Failed,
}

impl CandidateStatus {
    pub fn is_settled(self) -> bool {
        !matches!(self, Self::Placeholder)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Placeholder => "placeholder",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Outcome of one provider call, applied to its placeholder exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Ready(ImagePayload),
    Failed(String),
}

/// One generated, pending or failed output of a round.
///
/// Status moves only through the store, so fields are read through accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultCandidate {
    id: CandidateId,
    round_id: RoundId,
    index: usize,
    status: CandidateStatus,
    payload: Option<ImagePayload>,
    error: Option<String>,
    prompt_used: String,
    provider_used: ProviderKind,
    selected: bool,
    rerolled_from: Option<CandidateId>,
    created_at: String,
}

impl ResultCandidate {
    pub fn placeholder(
        round_id: RoundId,
        index: usize,
        prompt_used: impl Into<String>,
        provider_used: ProviderKind,
    ) -> Self {
        Self {
            id: CandidateId::new(),
            round_id,
            index,
            status: CandidateStatus::Placeholder,
            payload: None,
            error: None,
            prompt_used: prompt_used.into(),
            provider_used,
            selected: false,
            rerolled_from: None,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Fresh placeholder reusing this candidate's round, prompt and provider.
    pub fn reroll(&self) -> Self {
        let mut next = Self::placeholder(
            self.round_id.clone(),
            self.index,
            self.prompt_used.clone(),
            self.provider_used,
        );
        next.rerolled_from = Some(self.id.clone());
        next
    }

    pub fn id(&self) -> &CandidateId {
        &self.id
    }

    pub fn round_id(&self) -> &RoundId {
        &self.round_id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn status(&self) -> CandidateStatus {
        self.status
    }

    pub fn payload(&self) -> Option<&ImagePayload> {
        self.payload.as_ref()
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.payload.as_ref().map(|payload| payload.mime_type.as_str())
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn prompt_used(&self) -> &str {
        &self.prompt_used
    }

    pub fn provider_used(&self) -> ProviderKind {
        self.provider_used
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn rerolled_from(&self) -> Option<&CandidateId> {
        self.rerolled_from.as_ref()
    }

    pub fn created_at(&self) -> &str {
        &self.created_at
    }

    pub(crate) fn settle(&mut self, resolution: Resolution) -> bool {
        if self.status.is_settled() {
            return false;
        }
        match resolution {
            Resolution::Ready(payload) => {
                self.status = CandidateStatus::Ready;
                self.payload = Some(payload);
            }
            Resolution::Failed(message) => {
                self.status = CandidateStatus::Failed;
                self.error = Some(message);
            }
        }
        true
    }

    pub(crate) fn set_selected(&mut self, selected: bool) -> bool {
        if selected && self.status != CandidateStatus::Ready {
            return false;
        }
        let changed = self.selected != selected;
        self.selected = selected;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::{CandidateStatus, ImagePayload, Resolution, ResultCandidate};
    use crate::providers::ProviderKind;
    use crate::rounds::RoundId;

    fn payload() -> ImagePayload {
        ImagePayload {
            bytes: vec![1, 2, 3],
            mime_type: "image/png".to_string(),
        }
    }

    #[test]
    fn settles_exactly_once() {
        let mut candidate =
            ResultCandidate::placeholder(RoundId::new(), 0, "p", ProviderKind::Gemini);
        assert!(candidate.settle(Resolution::Failed("timeout".to_string())));
        assert!(!candidate.settle(Resolution::Ready(payload())));
        assert_eq!(candidate.status(), CandidateStatus::Failed);
        assert_eq!(candidate.error(), Some("timeout"));
        assert!(candidate.payload().is_none());
    }

    #[test]
    fn only_ready_candidates_can_be_selected() {
        let mut candidate =
            ResultCandidate::placeholder(RoundId::new(), 0, "p", ProviderKind::Gemini);
        assert!(!candidate.set_selected(true));
        assert!(!candidate.is_selected());
        candidate.settle(Resolution::Ready(payload()));
        assert!(candidate.set_selected(true));
        assert!(candidate.is_selected());
        assert_eq!(candidate.mime_type(), Some("image/png"));
    }

    #[test]
    fn reroll_keeps_prompt_and_provider_under_new_id() {
        let mut origin =
            ResultCandidate::placeholder(RoundId::new(), 2, "prompt v2", ProviderKind::Seedream);
        origin.settle(Resolution::Failed("boom".to_string()));
        let next = origin.reroll();
        assert_ne!(next.id(), origin.id());
        assert_eq!(next.prompt_used(), "prompt v2");
        assert_eq!(next.provider_used(), ProviderKind::Seedream);
        assert_eq!(next.round_id(), origin.round_id());
        assert_eq!(next.status(), CandidateStatus::Placeholder);
        assert_eq!(next.rerolled_from(), Some(origin.id()));
    }
}
