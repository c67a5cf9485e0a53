use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::{json, Map, Value};
use toonregen_contracts::events::{candidate_payload, EventPayload, EventWriter};
use toonregen_contracts::files::StageLadder;
use toonregen_contracts::providers::ProviderTable;
use toonregen_contracts::rounds::{
    build_commit_receipt, write_receipt, write_summary, CandidateId, CandidateStatus, ImageRef,
    ResultCandidate, ResultStore, RoundId, SessionSummary,
};
use toonregen_contracts::styles::{RoundInputs, StyleRegistry, StyleResolver};
use toonregen_contracts::RegenError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::commit::{commit_selected, CommitReport, CommitTarget};
use crate::config::RegenConfig;
use crate::orchestrator::{DispatchedRound, Orchestrator};
use crate::providers::SharedProvider;
use crate::storage::{FileStore, LineageRecorder};
use crate::{error_chain_text, now_utc_iso};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub source: ImageRef,
    pub source_stage: String,
    pub owner_id: String,
    /// Directory for `events.jsonl`, `summary.json` and receipts. Without
    /// one the session keeps no records on disk.
    pub session_dir: Option<PathBuf>,
    pub seed: Option<u64>,
    pub styles: Option<StyleRegistry>,
    pub stages: Option<StageLadder>,
}

impl SessionOptions {
    pub fn new(
        source: ImageRef,
        source_stage: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            source,
            source_stage: source_stage.into(),
            owner_id: owner_id.into(),
            session_dir: None,
            seed: None,
            styles: None,
            stages: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitRequest {
    /// Overrides the stage after the source's stage.
    pub stage: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct SessionStats {
    rounds: u64,
    candidates: u64,
    ready: u64,
    failed: u64,
}

/// One editing session over one source panel.
///
/// Owns the result store and the orchestrator; nothing here is shared with
/// other sessions. Switching the source or closing the session discards
/// every candidate and drops responses still on their way.
pub struct RegenSession {
    session_id: String,
    source: ImageRef,
    source_stage: String,
    owner_id: String,
    session_dir: Option<PathBuf>,
    started_at: String,
    store: ResultStore,
    orchestrator: Orchestrator,
    resolver: StyleResolver,
    ladder: StageLadder,
    events: EventWriter,
    round_styles: HashMap<RoundId, String>,
    committed: Vec<Map<String, Value>>,
    stats: SessionStats,
}

impl RegenSession {
    pub fn open(
        config: &RegenConfig,
        providers: ProviderTable<SharedProvider>,
        options: SessionOptions,
    ) -> Result<Self> {
        let orchestrator =
            Orchestrator::new(providers, config.call, config.max_in_flight, options.seed)?;
        Self::from_parts(orchestrator, config.max_outputs, options)
    }

    /// Opens a session around an orchestrator built by the caller.
    pub fn from_parts(
        orchestrator: Orchestrator,
        max_outputs: usize,
        options: SessionOptions,
    ) -> Result<Self> {
        let session_id = format!("session-{}", Uuid::new_v4().simple());
        if let Some(dir) = options.session_dir.as_deref() {
            std::fs::create_dir_all(dir)?;
        }
        let events = match options.session_dir.as_deref() {
            Some(dir) => EventWriter::new(dir.join("events.jsonl"), session_id.clone()),
            None => EventWriter::disabled(session_id.clone()),
        };

        let session = Self {
            session_id,
            source: options.source,
            source_stage: options.source_stage.trim().to_string(),
            owner_id: options.owner_id.trim().to_string(),
            session_dir: options.session_dir,
            started_at: now_utc_iso(),
            store: ResultStore::new(),
            orchestrator,
            resolver: StyleResolver::new(options.styles).with_max_outputs(max_outputs),
            ladder: options.stages.unwrap_or_default(),
            events,
            round_styles: HashMap::new(),
            committed: Vec::new(),
            stats: SessionStats::default(),
        };
        info!(
            session = %session.session_id,
            source = %session.source.id,
            stage = %session.source_stage,
            "session opened"
        );
        session.emit(
            "session_opened",
            object(json!({
                "source_file_id": session.source.id,
                "source_path": session.source.path.to_string_lossy(),
                "source_stage": session.source_stage,
                "owner_id": session.owner_id,
                "max_in_flight": session.orchestrator.max_in_flight(),
                "max_outputs": session.resolver.max_outputs(),
            })),
        );
        Ok(session)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn source(&self) -> &ImageRef {
        &self.source
    }

    pub fn source_stage(&self) -> &str {
        &self.source_stage
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn session_dir(&self) -> Option<&Path> {
        self.session_dir.as_deref()
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn styles(&self) -> &StyleRegistry {
        &self.resolver.registry
    }

    pub fn ladder(&self) -> &StageLadder {
        &self.ladder
    }

    pub fn in_flight(&self) -> usize {
        self.orchestrator.in_flight()
    }

    /// Id of the candidate at a zero-based rendering position.
    pub fn candidate_id_at(&self, position: usize) -> Option<CandidateId> {
        self.store.at(position).map(|candidate| candidate.id().clone())
    }

    pub fn style_of(&self, round_id: &RoundId) -> Option<&str> {
        self.round_styles.get(round_id).map(String::as_str)
    }

    /// Points the session at another panel. Every candidate is discarded and
    /// in-flight calls are abandoned.
    pub fn switch_source(
        &mut self,
        source: ImageRef,
        source_stage: Option<&str>,
    ) {
        let discarded = self.store.len();
        self.orchestrator.forget();
        self.store.clear();
        self.round_styles.clear();
        self.source = source;
        if let Some(stage) = source_stage.map(str::trim).filter(|value| !value.is_empty()) {
            self.source_stage = stage.to_string();
        }
        info!(source = %self.source.id, discarded, "source switched");
        self.emit(
            "source_switched",
            object(json!({
                "source_file_id": self.source.id,
                "source_path": self.source.path.to_string_lossy(),
                "source_stage": self.source_stage,
                "discarded": discarded,
            })),
        );
    }

    /// Resolves `inputs` against the current source and dispatches the
    /// round. Validation failures leave the store untouched.
    pub fn dispatch_round(&mut self, inputs: &RoundInputs) -> Result<DispatchedRound, RegenError> {
        let request = self.resolver.resolve(inputs, &self.source)?;
        let round = self.orchestrator.dispatch_round(&mut self.store, &request)?;

        self.stats.rounds += 1;
        self.stats.candidates += round.candidate_ids.len() as u64;
        self.round_styles
            .insert(round.round_id.clone(), request.style_key.clone());
        self.emit(
            "round_dispatched",
            object(json!({
                "round_id": round.round_id,
                "style": request.style_key,
                "provider": request.provider.as_str(),
                "count": request.count,
                "references": request.reference_images.len(),
                "character_sheets": request.character_sheets.len(),
            })),
        );
        for id in &round.candidate_ids {
            self.emit_candidate("candidate_placeholder", id);
        }
        Ok(round)
    }

    pub fn reroll(&mut self, id: &CandidateId) -> Result<CandidateId, RegenError> {
        let fresh = self.orchestrator.reroll(&mut self.store, id)?;
        self.stats.candidates += 1;
        self.emit_candidate("candidate_rerolled", &fresh);
        self.emit_candidate("candidate_placeholder", &fresh);
        Ok(fresh)
    }

    /// Applies results that already arrived, without blocking.
    pub fn poll(&mut self) -> Vec<CandidateId> {
        let settled = self.orchestrator.poll(&mut self.store);
        self.record_settled(&settled);
        settled
    }

    /// Blocks until every in-flight candidate is `Ready` or `Failed`.
    pub fn settle(
        &mut self,
        progress: Option<&mut dyn FnMut(&ResultCandidate)>,
    ) -> Vec<CandidateId> {
        let settled = self.orchestrator.settle(&mut self.store, progress);
        self.record_settled(&settled);
        settled
    }

    fn record_settled(&mut self, ids: &[CandidateId]) {
        for id in ids {
            let Some(status) = self.store.get(id).map(|candidate| candidate.status()) else {
                continue;
            };
            match status {
                CandidateStatus::Ready => {
                    self.stats.ready += 1;
                    self.emit_candidate("candidate_ready", id);
                }
                CandidateStatus::Failed => {
                    self.stats.failed += 1;
                    self.emit_candidate("candidate_failed", id);
                }
                CandidateStatus::Placeholder => {}
            }
        }
    }

    pub fn toggle_select(&mut self, id: &CandidateId, selected: bool) -> bool {
        let changed = self.store.toggle_select(id, selected);
        if changed {
            self.emit_selection(Some(id), 1);
        }
        changed
    }

    pub fn select_all(&mut self) -> usize {
        let changed = self.store.select_all();
        self.emit_selection(None, changed);
        changed
    }

    pub fn deselect_all(&mut self) -> usize {
        let changed = self.store.deselect_all();
        self.emit_selection(None, changed);
        changed
    }

    /// Commits the selected candidates under the requested stage, or the
    /// stage after the source's.
    ///
    /// An empty selection is a no-op whatever the stage. Otherwise the stage
    /// is validated before anything is uploaded. Upload failures are
    /// reported per candidate in the returned report.
    pub fn commit(
        &mut self,
        files: &mut dyn FileStore,
        lineage: Option<&mut dyn LineageRecorder>,
        request: &CommitRequest,
    ) -> Result<CommitReport, RegenError> {
        let selected = self.store.selected().len();
        if selected == 0 {
            return Ok(CommitReport::default());
        }
        let stage_id = self
            .ladder
            .commit_target(&self.source_stage, request.stage.as_deref())?
            .id
            .clone();
        self.emit(
            "commit_started",
            object(json!({ "stage": stage_id, "selected": selected })),
        );

        let target = CommitTarget {
            owner_id: self.owner_id.clone(),
            stage_id: stage_id.clone(),
            source_file_name: self.source.file_name(),
            source_file_id: Some(self.source.id.clone()),
            description: request
                .description
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
        };
        let round_styles = &self.round_styles;
        let describe = |candidate: &ResultCandidate| {
            format!(
                "Regenerated with {} via {}",
                round_styles
                    .get(candidate.round_id())
                    .map(String::as_str)
                    .unwrap_or("unknown style"),
                candidate.provider_used()
            )
        };
        let mut report = commit_selected(&mut self.store, &target, files, lineage, &describe);

        for committed in &report.committed {
            let mut payload = EventPayload::new();
            payload.insert(
                "candidate_id".to_string(),
                Value::String(committed.candidate_id.to_string()),
            );
            payload.insert(
                "file".to_string(),
                serde_json::to_value(&committed.file).unwrap_or(Value::Null),
            );
            self.emit("file_committed", payload);
            self.committed.push(object(json!({
                "candidate_id": committed.candidate_id,
                "file_id": committed.file.id,
                "storage_path": committed.file.storage_path,
                "stage_id": committed.file.stage_id,
            })));
        }
        for failure in &report.failures {
            if let RegenError::Upload { candidate, message } = failure {
                self.emit(
                    "commit_failed",
                    object(json!({ "candidate_id": candidate, "error": message })),
                );
            }
        }
        let receipt_warnings = self.write_receipts(&report);
        report.warnings.extend(receipt_warnings);

        self.emit(
            "commit_finished",
            object(json!({
                "stage": stage_id,
                "committed": report.success_count(),
                "failed": report.failures.len(),
                "warnings": report.warnings,
            })),
        );
        Ok(report)
    }

    fn write_receipts(&self, report: &CommitReport) -> Vec<String> {
        let Some(dir) = self.session_dir.as_deref() else {
            return Vec::new();
        };
        let empty = Map::new();
        let mut warnings = Vec::new();
        for committed in &report.committed {
            let Some(candidate) = self.store.get(&committed.candidate_id) else {
                continue;
            };
            let receipt = build_commit_receipt(
                candidate,
                &committed.file,
                self.style_of(candidate.round_id()),
                self.orchestrator
                    .provider_metadata(&committed.candidate_id)
                    .unwrap_or(&empty),
            );
            let path = dir
                .join("receipts")
                .join(format!("receipt-{}.json", committed.candidate_id));
            if let Err(err) = write_receipt(&path, &receipt) {
                let message = format!(
                    "receipt not written for {}: {}",
                    committed.candidate_id,
                    error_chain_text(&err, 300)
                );
                warn!("{message}");
                warnings.push(message);
            }
        }
        warnings
    }

    /// Ends the session: abandons in-flight calls, writes `summary.json`
    /// when the session has a directory, and returns the summary.
    pub fn close(mut self) -> Result<SessionSummary> {
        let abandoned = self.orchestrator.in_flight();
        self.orchestrator.forget();

        let summary = SessionSummary {
            session_id: self.session_id.clone(),
            source_file_id: self.source.id.clone(),
            started_at: self.started_at.clone(),
            finished_at: now_utc_iso(),
            total_rounds: self.stats.rounds,
            total_candidates: self.stats.candidates,
            ready: self.stats.ready,
            failed: self.stats.failed,
            committed: std::mem::take(&mut self.committed),
        };
        self.emit(
            "session_closed",
            object(json!({
                "rounds": summary.total_rounds,
                "candidates": summary.total_candidates,
                "committed": summary.committed.len(),
                "abandoned": abandoned,
            })),
        );
        if let Some(dir) = self.session_dir.as_deref() {
            write_summary(&dir.join("summary.json"), &summary, None)?;
        }
        self.store.clear();
        info!(
            session = %self.session_id,
            rounds = summary.total_rounds,
            committed = summary.committed.len(),
            "session closed"
        );
        Ok(summary)
    }

    fn emit(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.events.emit(event_type, payload) {
            warn!("failed writing {event_type} event: {err:#}");
        }
    }

    fn emit_candidate(&self, event_type: &str, id: &CandidateId) {
        if let Some(candidate) = self.store.get(id) {
            self.emit(event_type, candidate_payload(candidate));
        }
    }

    fn emit_selection(&self, id: Option<&CandidateId>, changed: usize) {
        let mut payload = EventPayload::new();
        if let Some(id) = id {
            payload.insert("candidate_id".to_string(), Value::String(id.to_string()));
        }
        payload.insert("changed".to_string(), json!(changed));
        payload.insert("selected".to_string(), json!(self.store.selected().len()));
        self.emit("selection_changed", payload);
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use anyhow::Result;
    use serde_json::{Map, Value};
    use toonregen_contracts::providers::{ProviderKind, ProviderTable};
    use toonregen_contracts::rounds::{CandidateStatus, ImageRef};
    use toonregen_contracts::styles::RoundInputs;
    use toonregen_contracts::RegenError;

    use super::{CommitRequest, RegenSession, SessionOptions};
    use crate::config::{CallPolicy, RegenConfig};
    use crate::orchestrator::Orchestrator;
    use crate::providers::{
        default_provider_table, render_placeholder_png, GeneratedImage, ImageProvider,
        ProviderCall, SharedProvider,
    };
    use crate::storage::{FileStore, LocalFileStore};

    struct SlowAt {
        hang: HashSet<usize>,
        gate: Option<Arc<AtomicBool>>,
    }

    impl ImageProvider for SlowAt {
        fn name(&self) -> &str {
            "slow-at"
        }

        fn generate(&self, call: &ProviderCall) -> Result<GeneratedImage> {
            if let Some(gate) = &self.gate {
                while !gate.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
            }
            if self.hang.contains(&call.index) {
                thread::sleep(Duration::from_secs(3));
            }
            Ok(GeneratedImage {
                bytes: render_placeholder_png(&call.prompt, 6, 6)?,
                mime_type: "image/png".to_string(),
                metadata: Map::new(),
            })
        }
    }

    fn source(dir: &std::path::Path) -> Result<ImageRef> {
        let path = dir.join("ep12_cut03.png");
        std::fs::write(&path, render_placeholder_png("source", 32, 48)?)?;
        Ok(ImageRef::from_path(path).with_id("file-ep12-cut03"))
    }

    fn options(dir: &std::path::Path, with_records: bool) -> Result<SessionOptions> {
        let mut options = SessionOptions::new(source(dir)?, "line-art", "cut-03");
        options.seed = Some(11);
        if with_records {
            options.session_dir = Some(dir.join("session"));
        }
        Ok(options)
    }

    fn dryrun_session(dir: &std::path::Path, with_records: bool) -> Result<RegenSession> {
        let config = RegenConfig {
            dryrun: true,
            ..RegenConfig::default()
        };
        RegenSession::open(&config, default_provider_table(&config), options(dir, with_records)?)
    }

    fn slow_session(
        dir: &std::path::Path,
        provider: SlowAt,
        deadline: Duration,
    ) -> Result<RegenSession> {
        let provider = Arc::new(provider);
        let table = ProviderTable::new()
            .with(ProviderKind::Gemini, Arc::clone(&provider) as SharedProvider)
            .with(ProviderKind::Seedream, provider as SharedProvider);
        let orchestrator =
            Orchestrator::new(table, CallPolicy::default(), 4, Some(3))?.with_deadline(deadline);
        RegenSession::from_parts(orchestrator, 8, options(dir, false)?)
    }

    fn event_types(dir: &std::path::Path) -> Result<Vec<String>> {
        let raw = std::fs::read_to_string(dir.join("session").join("events.jsonl"))?;
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect())
    }

    #[test]
    fn dryrun_round_commits_to_next_stage() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut files = LocalFileStore::open(temp.path().join("store"))?;
        let mut lineage = files.lineage_log();
        let mut session = dryrun_session(temp.path(), true)?;

        let round = session.dispatch_round(&RoundInputs::for_style("flat-color", 2))?;
        assert_eq!(session.store().pending_count(), 2);
        session.settle(None);
        assert_eq!(session.store().round_tally(&round.round_id).ready, 2);
        assert_eq!(session.select_all(), 2);

        let report = session.commit(&mut files, Some(&mut lineage), &CommitRequest::default())?;
        assert_eq!(report.success_count(), 2);
        assert!(report.warnings.is_empty());
        let stored = files.list_by_owner("cut-03")?;
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|file| file.stage_id == "flat-color"));
        assert!(stored[0].file_name.starts_with("ep12_cut03_"));
        assert!(stored
            .iter()
            .any(|file| file.description.as_deref() == Some("Regenerated with flat-color via gemini")));
        assert_eq!(lineage.derived_from("file-ep12-cut03")?.len(), 2);
        assert!(session.store().selected().is_empty());
        assert_eq!(session.store().len(), 2);

        let receipt_path = temp
            .path()
            .join("session")
            .join("receipts")
            .join(format!("receipt-{}.json", report.committed[0].candidate_id));
        let receipt: Value = serde_json::from_str(&std::fs::read_to_string(receipt_path)?)?;
        assert_eq!(receipt["generation"]["style"], "flat-color");
        assert_eq!(receipt["provider"]["endpoint"], "dryrun-native");

        let summary = session.close()?;
        assert_eq!(summary.total_rounds, 1);
        assert_eq!((summary.ready, summary.failed), (2, 0));
        assert_eq!(summary.committed.len(), 2);
        assert!(temp.path().join("session").join("summary.json").exists());

        let types = event_types(temp.path())?;
        assert_eq!(types.first().map(String::as_str), Some("session_opened"));
        assert_eq!(types.last().map(String::as_str), Some("session_closed"));
        for expected in [
            "round_dispatched",
            "candidate_placeholder",
            "candidate_ready",
            "selection_changed",
            "commit_started",
            "file_committed",
            "commit_finished",
        ] {
            assert!(types.iter().any(|t| t == expected), "missing {expected}");
        }
        Ok(())
    }

    #[test]
    fn required_reference_blocks_the_round() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = dryrun_session(temp.path(), true)?;

        let err = session
            .dispatch_round(&RoundInputs::for_style("tone-reference", 2))
            .expect_err("reference required");
        assert_eq!(
            err,
            RegenError::MissingReference {
                style: "tone-reference".to_string()
            }
        );
        assert!(session.store().is_empty());
        assert_eq!(session.in_flight(), 0);
        assert!(!event_types(temp.path())?.iter().any(|t| t == "round_dispatched"));
        Ok(())
    }

    #[test]
    fn timed_out_candidate_is_never_uploaded() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut files = LocalFileStore::open(temp.path().join("store"))?;
        let mut session = slow_session(
            temp.path(),
            SlowAt {
                hang: HashSet::from([1]),
                gate: None,
            },
            Duration::from_millis(300),
        )?;

        session.dispatch_round(&RoundInputs::for_style("line-art", 3))?;
        session.settle(None);
        let statuses: Vec<CandidateStatus> =
            session.store().iter().map(|c| c.status()).collect();
        assert_eq!(
            statuses,
            vec![
                CandidateStatus::Ready,
                CandidateStatus::Failed,
                CandidateStatus::Ready
            ]
        );

        for position in [0, 2] {
            let id = session.candidate_id_at(position).expect("candidate");
            assert!(session.toggle_select(&id, true));
        }
        let failed = session.candidate_id_at(1).expect("candidate");
        assert!(!session.toggle_select(&failed, true));

        let report = session.commit(&mut files, None, &CommitRequest::default())?;
        assert_eq!(report.success_count(), 2);
        assert_eq!(report.attempted(), 2);
        assert_eq!(files.list_by_owner("cut-03")?.len(), 2);
        Ok(())
    }

    #[test]
    fn empty_selection_and_bad_stage_upload_nothing() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut files = LocalFileStore::open(temp.path().join("store"))?;
        let mut session = dryrun_session(temp.path(), false)?;
        session.dispatch_round(&RoundInputs::for_style("line-art", 1))?;
        session.settle(None);

        let report = session.commit(&mut files, None, &CommitRequest::default())?;
        assert_eq!(report.success_count(), 0);

        session.select_all();
        let err = session
            .commit(
                &mut files,
                None,
                &CommitRequest {
                    stage: Some("inking".to_string()),
                    description: None,
                },
            )
            .expect_err("unknown stage");
        assert!(matches!(err, RegenError::Validation(_)));
        assert!(files.list_by_owner("cut-03")?.is_empty());
        assert_eq!(session.store().selected().len(), 1);
        Ok(())
    }

    #[test]
    fn empty_selection_skips_stage_validation() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut files = LocalFileStore::open(temp.path().join("store"))?;
        let mut session = dryrun_session(temp.path(), true)?;
        session.dispatch_round(&RoundInputs::for_style("line-art", 2))?;
        session.settle(None);

        let report = session.commit(
            &mut files,
            None,
            &CommitRequest {
                stage: Some("inking".to_string()),
                description: None,
            },
        )?;

        assert_eq!(report.success_count(), 0);
        assert!(report.failures.is_empty());
        assert!(files.list_by_owner("cut-03")?.is_empty());
        assert!(!event_types(temp.path())?.contains(&"commit_started".to_string()));
        Ok(())
    }

    #[test]
    fn switching_source_discards_pending_results() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let gate = Arc::new(AtomicBool::new(false));
        let mut session = slow_session(
            temp.path(),
            SlowAt {
                hang: HashSet::new(),
                gate: Some(Arc::clone(&gate)),
            },
            Duration::from_secs(5),
        )?;
        session.dispatch_round(&RoundInputs::for_style("line-art", 2))?;
        assert_eq!(session.in_flight(), 2);

        let next = temp.path().join("next.png");
        std::fs::write(&next, b"next")?;
        session.switch_source(ImageRef::from_path(&next), Some("flat-color"));
        assert!(session.store().is_empty());
        assert_eq!(session.in_flight(), 0);
        assert_eq!(session.source_stage(), "flat-color");

        gate.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert!(session.poll().is_empty());
        assert!(session.store().is_empty());
        Ok(())
    }

    #[test]
    fn reroll_appends_and_keeps_history() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = dryrun_session(temp.path(), false)?;
        session.dispatch_round(&RoundInputs::for_style("detail-enhance", 2))?;
        session.settle(None);

        let origin = session.candidate_id_at(0).expect("candidate");
        let fresh = session.reroll(&origin)?;
        assert_eq!(session.candidate_id_at(2), Some(fresh.clone()));
        session.settle(None);
        let origin_prompt = session.store().get(&origin).map(|c| c.prompt_used().to_string());
        let fresh_prompt = session.store().get(&fresh).map(|c| c.prompt_used().to_string());
        assert_eq!(origin_prompt, fresh_prompt);
        assert_eq!(
            session.store().get(&fresh).map(|c| c.status()),
            Some(CandidateStatus::Ready)
        );

        let summary = session.close()?;
        assert_eq!(summary.total_candidates, 3);
        Ok(())
    }
}
