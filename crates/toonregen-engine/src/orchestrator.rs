use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use rand::rngs::StdRng;
use serde_json::{Map, Value};
use toonregen_contracts::providers::{ProviderKind, ProviderTable};
use toonregen_contracts::rounds::{
    CandidateId, CandidateStatus, GenerationRequest, ImagePayload, Resolution, ResultCandidate,
    ResultStore, RoundId,
};
use toonregen_contracts::styles::{seeded_rng, vary_prompt};
use toonregen_contracts::RegenError;
use tracing::{debug, info, warn};

use crate::config::CallPolicy;
use crate::dispatch::{Completion, DispatchEvent, DispatchPool, Job};
use crate::error_chain_text;
use crate::providers::{ProviderCall, ProviderInputs, SharedProvider};

const TIMED_OUT: &str = "provider call timed out";
const SETTLE_TICK: Duration = Duration::from_millis(250);
/// Rounds whose inputs stay loaded for re-rolls.
const DEFAULT_RETAINED_ROUNDS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedRound {
    pub round_id: RoundId,
    /// Placeholder ids in index order.
    pub candidate_ids: Vec<CandidateId>,
}

struct InFlight {
    cancelled: Arc<AtomicBool>,
    /// Unset while the job waits for a worker.
    deadline: Option<Instant>,
}

/// Fans a resolved request out to providers and applies their results to
/// the session's store.
///
/// Placeholders are created while dispatching; results are applied only
/// inside [`Orchestrator::poll`] and [`Orchestrator::settle`], so a caller
/// always observes the full set of placeholders before any outcome.
///
/// A candidate's deadline starts when a worker picks up its call, not when
/// it is queued. Only the most recent rounds keep their inputs; candidates of
/// older rounds can no longer be re-rolled.
pub struct Orchestrator {
    providers: ProviderTable<SharedProvider>,
    pool: DispatchPool,
    policy: CallPolicy,
    deadline: Duration,
    rng: StdRng,
    in_flight: HashMap<CandidateId, InFlight>,
    round_inputs: HashMap<RoundId, Arc<ProviderInputs>>,
    round_order: VecDeque<RoundId>,
    retained_rounds: usize,
    metadata: HashMap<CandidateId, (RoundId, Map<String, Value>)>,
}

impl Orchestrator {
    pub fn new(
        providers: ProviderTable<SharedProvider>,
        policy: CallPolicy,
        max_in_flight: usize,
        seed: Option<u64>,
    ) -> Result<Self> {
        Ok(Self {
            providers,
            pool: DispatchPool::new(max_in_flight)?,
            policy,
            deadline: policy.deadline(),
            rng: seeded_rng(seed),
            in_flight: HashMap::new(),
            round_inputs: HashMap::new(),
            round_order: VecDeque::new(),
            retained_rounds: DEFAULT_RETAINED_ROUNDS,
            metadata: HashMap::new(),
        })
    }

    /// How many rounds keep their inputs and provider metadata (at least 1).
    pub fn with_retained_rounds(mut self, rounds: usize) -> Self {
        self.retained_rounds = rounds.max(1);
        self
    }

    /// Replaces the per-candidate deadline derived from the call policy.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.pool.workers()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Provider request/response facts recorded for a `Ready` candidate.
    pub fn provider_metadata(&self, id: &CandidateId) -> Option<&Map<String, Value>> {
        self.metadata.get(id).map(|(_, metadata)| metadata)
    }

    /// Dispatches `request.count` calls in index order.
    ///
    /// Provider registration and input images are checked first; on failure
    /// nothing is added to the store and nothing is sent.
    pub fn dispatch_round(
        &mut self,
        store: &mut ResultStore,
        request: &GenerationRequest,
    ) -> Result<DispatchedRound, RegenError> {
        if request.count == 0 {
            return Err(RegenError::validation("count must be at least 1"));
        }
        if let Some(missing) = self.providers.missing_for(request.provider, request.count) {
            return Err(RegenError::validation(format!(
                "no provider registered for {missing}"
            )));
        }
        let inputs = ProviderInputs::load(request)
            .map(Arc::new)
            .map_err(|err| RegenError::validation(error_chain_text(&err, 400)))?;

        let round_id = RoundId::new();
        self.retain_round(&round_id, Arc::clone(&inputs));
        info!(
            round = %round_id,
            style = %request.style_key,
            count = request.count,
            provider = %request.provider,
            "dispatching round"
        );

        let mut candidate_ids = Vec::with_capacity(request.count);
        for index in 0..request.count {
            let prompt = vary_prompt(&request.prompt, request.varies_prompt, &mut self.rng);
            let kind = request.provider.resolve(index);
            let id = store.add_placeholder(&round_id, index, prompt.clone(), kind);
            self.submit(store, &id, index, prompt, kind, Arc::clone(&inputs));
            candidate_ids.push(id);
        }

        Ok(DispatchedRound {
            round_id,
            candidate_ids,
        })
    }

    /// Appends a new placeholder reusing `id`'s exact prompt, provider and
    /// round inputs, and dispatches it alone.
    pub fn reroll(
        &mut self,
        store: &mut ResultStore,
        id: &CandidateId,
    ) -> Result<CandidateId, RegenError> {
        let origin = store
            .get(id)
            .ok_or_else(|| RegenError::validation(format!("unknown candidate '{id}'")))?;
        if origin.status() == CandidateStatus::Placeholder {
            return Err(RegenError::validation(format!(
                "candidate '{id}' is still generating"
            )));
        }
        let kind = origin.provider_used();
        if !self.providers.contains(kind) {
            return Err(RegenError::validation(format!(
                "no provider registered for {kind}"
            )));
        }
        let inputs = self
            .round_inputs
            .get(origin.round_id())
            .cloned()
            .ok_or_else(|| {
                RegenError::validation(format!(
                    "inputs of round '{}' are no longer available",
                    origin.round_id()
                ))
            })?;

        let fresh = origin.reroll();
        let fresh_id = fresh.id().clone();
        let index = fresh.index();
        let prompt = fresh.prompt_used().to_string();
        store.add_candidate(fresh);
        debug!(origin = %id, candidate = %fresh_id, "re-rolling candidate");
        self.submit(store, &fresh_id, index, prompt, kind, inputs);
        Ok(fresh_id)
    }

    fn submit(
        &mut self,
        store: &mut ResultStore,
        id: &CandidateId,
        index: usize,
        prompt: String,
        kind: ProviderKind,
        inputs: Arc<ProviderInputs>,
    ) {
        let Some(provider) = self.providers.get(kind).cloned() else {
            store.resolve(id, Resolution::Failed(format!("no provider registered for {kind}")));
            return;
        };
        let cancelled = Arc::new(AtomicBool::new(false));
        let job = Job {
            provider,
            call: ProviderCall {
                candidate_id: id.clone(),
                index,
                prompt,
                inputs,
                policy: self.policy,
            },
            cancelled: Arc::clone(&cancelled),
        };
        match self.pool.submit(job) {
            Ok(()) => {
                self.in_flight.insert(
                    id.clone(),
                    InFlight {
                        cancelled,
                        deadline: None,
                    },
                );
                debug!(candidate = %id, index, provider = %kind, "candidate queued");
            }
            Err(err) => {
                warn!(candidate = %id, "dispatch failed: {err:#}");
                store.resolve(id, Resolution::Failed(error_chain_text(&err, 400)));
            }
        }
    }

    /// Applies every completion already received and expires overdue
    /// placeholders, without blocking. Returns the ids settled by this call.
    pub fn poll(&mut self, store: &mut ResultStore) -> Vec<CandidateId> {
        let mut settled = Vec::new();
        while let Some(event) = self.pool.try_next() {
            if let Some(candidate) = self.handle(store, event) {
                settled.push(candidate.id().clone());
            }
        }
        settled.extend(self.expire(store, Instant::now(), &mut |_| {}));
        settled
    }

    /// Blocks until nothing is in flight. `progress` sees each candidate as
    /// it settles.
    pub fn settle(
        &mut self,
        store: &mut ResultStore,
        mut progress: Option<&mut dyn FnMut(&ResultCandidate)>,
    ) -> Vec<CandidateId> {
        let mut settled = Vec::new();
        let mut notify = |candidate: &ResultCandidate| {
            if let Some(progress) = progress.as_deref_mut() {
                progress(candidate);
            }
        };

        while !self.in_flight.is_empty() {
            let now = Instant::now();
            let wait = self
                .in_flight
                .values()
                .filter_map(|entry| entry.deadline)
                .map(|deadline| deadline.saturating_duration_since(now))
                .min()
                .unwrap_or(SETTLE_TICK)
                .min(SETTLE_TICK);
            if let Some(event) = self.pool.next_within(wait) {
                if let Some(candidate) = self.handle(store, event) {
                    notify(candidate);
                    settled.push(candidate.id().clone());
                }
            }
            settled.extend(self.expire(store, Instant::now(), &mut notify));
        }
        settled
    }

    /// Forgets every in-flight candidate. Queued calls are never sent;
    /// responses of running ones are dropped on arrival.
    pub fn forget(&mut self) {
        if !self.in_flight.is_empty() {
            debug!(abandoned = self.in_flight.len(), "forgetting in-flight candidates");
        }
        for entry in self.in_flight.values() {
            entry.cancelled.store(true, Ordering::SeqCst);
        }
        self.in_flight.clear();
        self.round_inputs.clear();
        self.round_order.clear();
        self.metadata.clear();
    }

    fn retain_round(&mut self, round_id: &RoundId, inputs: Arc<ProviderInputs>) {
        self.round_inputs.insert(round_id.clone(), inputs);
        self.round_order.push_back(round_id.clone());
        while self.round_order.len() > self.retained_rounds {
            let Some(evicted) = self.round_order.pop_front() else {
                break;
            };
            self.round_inputs.remove(&evicted);
            self.metadata.retain(|_, (round, _)| round != &evicted);
            debug!(round = %evicted, "round inputs released");
        }
    }

    fn handle<'s>(
        &mut self,
        store: &'s mut ResultStore,
        event: DispatchEvent,
    ) -> Option<&'s ResultCandidate> {
        match event {
            DispatchEvent::Started { candidate_id, at } => {
                if let Some(entry) = self.in_flight.get_mut(&candidate_id) {
                    entry.deadline = Some(at + self.deadline);
                    debug!(candidate = %candidate_id, "provider call running");
                }
                None
            }
            DispatchEvent::Finished(completion) => self.apply(store, completion),
        }
    }

    fn apply<'s>(
        &mut self,
        store: &'s mut ResultStore,
        completion: Completion,
    ) -> Option<&'s ResultCandidate> {
        let Completion {
            candidate_id,
            outcome,
            elapsed,
        } = completion;
        if self.in_flight.remove(&candidate_id).is_none() {
            debug!(candidate = %candidate_id, "dropping response for abandoned candidate");
            return None;
        }

        let resolution = match outcome {
            Ok(image) => {
                debug!(
                    candidate = %candidate_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    bytes = image.bytes.len(),
                    "candidate ready"
                );
                if let Some(round_id) = store.get(&candidate_id).map(|c| c.round_id().clone()) {
                    self.metadata
                        .insert(candidate_id.clone(), (round_id, image.metadata));
                }
                Resolution::Ready(ImagePayload {
                    bytes: image.bytes,
                    mime_type: image.mime_type,
                })
            }
            Err(message) => {
                warn!(
                    candidate = %candidate_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "provider call failed: {message}"
                );
                Resolution::Failed(message)
            }
        };
        store.resolve(&candidate_id, resolution)
    }

    fn expire(
        &mut self,
        store: &mut ResultStore,
        now: Instant,
        notify: &mut dyn FnMut(&ResultCandidate),
    ) -> Vec<CandidateId> {
        let overdue: Vec<CandidateId> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| matches!(entry.deadline, Some(deadline) if deadline <= now))
            .map(|(id, _)| id.clone())
            .collect();
        let mut settled = Vec::new();
        for id in overdue {
            if let Some(entry) = self.in_flight.remove(&id) {
                entry.cancelled.store(true, Ordering::SeqCst);
            }
            warn!(candidate = %id, "{TIMED_OUT}");
            if let Some(candidate) = store.resolve(&id, Resolution::Failed(TIMED_OUT.to_string())) {
                notify(candidate);
                settled.push(id);
            }
        }
        settled
    }
}
