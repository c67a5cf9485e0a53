use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::rounds::ResultCandidate;

pub type EventPayload = Map<String, Value>;

/// Append-only session event log (`events.jsonl`).
///
/// Each line carries `type`, `session_id` and `ts`; the caller's payload is
/// merged last. A writer created with [`EventWriter::disabled`] drops every
/// event, for sessions that keep no directory.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: Option<PathBuf>,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self::build(Some(path.into()), session_id.into())
    }

    pub fn disabled(session_id: impl Into<String>) -> Self {
        Self::build(None, session_id.into())
    }

    fn build(path: Option<PathBuf>, session_id: String) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path,
                session_id,
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        let Some(path) = self.inner.path.as_deref() else {
            return Ok(Value::Object(event));
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

/// Candidate snapshot for an event; payload bytes are never logged.
pub fn candidate_payload(candidate: &ResultCandidate) -> EventPayload {
    let mut payload = EventPayload::new();
    payload.insert(
        "candidate_id".to_string(),
        Value::String(candidate.id().to_string()),
    );
    payload.insert(
        "round_id".to_string(),
        Value::String(candidate.round_id().to_string()),
    );
    payload.insert("index".to_string(), Value::Number(candidate.index().into()));
    payload.insert(
        "status".to_string(),
        Value::String(candidate.status().as_str().to_string()),
    );
    payload.insert(
        "provider".to_string(),
        Value::String(candidate.provider_used().to_string()),
    );
    payload.insert(
        "prompt".to_string(),
        Value::String(candidate.prompt_used().to_string()),
    );
    if let Some(mime) = candidate.mime_type() {
        payload.insert("mime_type".to_string(), Value::String(mime.to_string()));
    }
    if let Some(error) = candidate.error() {
        payload.insert("error".to_string(), Value::String(error.to_string()));
    }
    if let Some(origin) = candidate.rerolled_from() {
        payload.insert(
            "rerolled_from".to_string(),
            Value::String(origin.to_string()),
        );
    }
    payload
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
