use indexmap::IndexMap;

use super::{CandidateId, CandidateStatus, Resolution, ResultCandidate, RoundId};
use crate::providers::ProviderKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundTally {
    pub placeholder: usize,
    pub ready: usize,
    pub failed: usize,
}

impl RoundTally {
    pub fn settled(&self) -> usize {
        self.ready + self.failed
    }

    pub fn total(&self) -> usize {
        self.placeholder + self.settled()
    }
}

/// Insertion-ordered candidates of one editing session.
///
/// Each transition is keyed by its own candidate id, so completions arriving
/// in any order never touch another candidate's entry.
#[derive(Debug, Default)]
pub struct ResultStore {
    candidates: IndexMap<CandidateId, ResultCandidate>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_placeholder(
        &mut self,
        round_id: &RoundId,
        index: usize,
        prompt: impl Into<String>,
        provider: ProviderKind,
    ) -> CandidateId {
        let candidate = ResultCandidate::placeholder(round_id.clone(), index, prompt, provider);
        let id = candidate.id().clone();
        self.candidates.insert(id.clone(), candidate);
        id
    }

    /// Appends a candidate built elsewhere (a re-roll). Existing ids are
    /// never replaced.
    pub fn add_candidate(&mut self, candidate: ResultCandidate) -> bool {
        if self.candidates.contains_key(candidate.id()) {
            return false;
        }
        self.candidates.insert(candidate.id().clone(), candidate);
        true
    }

    /// Applies a provider outcome. Returns `None` for unknown ids (responses
    /// from a cleared session) and for candidates that already settled.
    pub fn resolve(
        &mut self,
        id: &CandidateId,
        resolution: Resolution,
    ) -> Option<&ResultCandidate> {
        let candidate = self.candidates.get_mut(id)?;
        if !candidate.settle(resolution) {
            return None;
        }
        Some(candidate)
    }

    /// Returns true when the call changed the flag. Selecting anything but a
    /// `Ready` candidate is a no-op.
    pub fn toggle_select(&mut self, id: &CandidateId, selected: bool) -> bool {
        self.candidates
            .get_mut(id)
            .map(|candidate| candidate.set_selected(selected))
            .unwrap_or(false)
    }

    pub fn select_all(&mut self) -> usize {
        self.candidates
            .values_mut()
            .filter(|candidate| candidate.status() == CandidateStatus::Ready)
            .map(|candidate| candidate.set_selected(true))
            .filter(|changed| *changed)
            .count()
    }

    pub fn deselect_all(&mut self) -> usize {
        self.candidates
            .values_mut()
            .map(|candidate| candidate.set_selected(false))
            .filter(|changed| *changed)
            .count()
    }

    pub fn clear_selection(&mut self, ids: &[CandidateId]) {
        for id in ids {
            if let Some(candidate) = self.candidates.get_mut(id) {
                candidate.set_selected(false);
            }
        }
    }

    pub fn selected(&self) -> Vec<&ResultCandidate> {
        self.candidates
            .values()
            .filter(|candidate| candidate.is_selected())
            .collect()
    }

    pub fn get(&self, id: &CandidateId) -> Option<&ResultCandidate> {
        self.candidates.get(id)
    }

    /// Zero-based position in rendering order.
    pub fn at(&self, position: usize) -> Option<&ResultCandidate> {
        self.candidates.get_index(position).map(|(_, candidate)| candidate)
    }

    pub fn position_of(&self, id: &CandidateId) -> Option<usize> {
        self.candidates.get_index_of(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResultCandidate> {
        self.candidates.values()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.iter()
            .filter(|candidate| candidate.status() == CandidateStatus::Placeholder)
            .count()
    }

    pub fn tally(&self) -> RoundTally {
        tally_of(self.iter())
    }

    pub fn round_tally(&self, round_id: &RoundId) -> RoundTally {
        tally_of(self.iter().filter(|candidate| candidate.round_id() == round_id))
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
    }
}

fn tally_of<'a>(candidates: impl Iterator<Item = &'a ResultCandidate>) -> RoundTally {
    let mut tally = RoundTally::default();
    for candidate in candidates {
        match candidate.status() {
            CandidateStatus::Placeholder => tally.placeholder += 1,
            CandidateStatus::Ready => tally.ready += 1,
            CandidateStatus::Failed => tally.failed += 1,
        }
    }
    tally
}
