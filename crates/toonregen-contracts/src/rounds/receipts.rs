use std::path::Path;

use serde_json::{Map, Value};

use super::ResultCandidate;
use crate::files::CommittedFile;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// Record of how one committed file was produced.
pub fn build_commit_receipt(
    candidate: &ResultCandidate,
    committed: &CommittedFile,
    style_key: Option<&str>,
    provider_metadata: &Map<String, Value>,
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );

    let mut generation = Map::new();
    generation.insert(
        "candidate_id".to_string(),
        Value::String(candidate.id().to_string()),
    );
    generation.insert(
        "round_id".to_string(),
        Value::String(candidate.round_id().to_string()),
    );
    generation.insert("index".to_string(), Value::Number(candidate.index().into()));
    generation.insert(
        "prompt".to_string(),
        Value::String(candidate.prompt_used().to_string()),
    );
    generation.insert(
        "provider".to_string(),
        Value::String(candidate.provider_used().to_string()),
    );
    generation.insert(
        "style".to_string(),
        style_key
            .map(|value| Value::String(value.to_string()))
            .unwrap_or(Value::Null),
    );
    generation.insert(
        "rerolled_from".to_string(),
        candidate
            .rerolled_from()
            .map(|value| Value::String(value.to_string()))
            .unwrap_or(Value::Null),
    );
    root.insert("generation".to_string(), Value::Object(generation));
    root.insert(
        "committed".to_string(),
        sanitize_payload(&serde_json::to_value(committed).unwrap_or(Value::Null)),
    );
    root.insert(
        "provider".to_string(),
        sanitize_payload(&Value::Object(provider_metadata.clone())),
    );
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "b64_json" | "image" | "image_bytes" | "data" | "inlinedata" | "payload"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}
