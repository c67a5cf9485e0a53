//! Side-effecting half of the regeneration pipeline: provider clients, the
//! dispatcher, the editing session and the commit stage.

mod commit;
mod config;
mod dispatch;
mod orchestrator;
pub mod providers;
mod session;
mod storage;

pub use commit::{commit_selected, CommitReport, CommitTarget, CommittedCandidate};
pub use config::{CallPolicy, GeminiSettings, RegenConfig, SeedreamSettings};
pub use orchestrator::{DispatchedRound, Orchestrator};
pub use session::{CommitRequest, RegenSession, SessionOptions};
pub use storage::{FileStore, LineageRecorder, LocalFileStore, UploadRequest};

/// Flattens an error and its causes into one line, as stored on failed
/// candidates and upload reports.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn now_utc_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::{error_chain_text, truncate_text};

    #[test]
    fn error_chain_text_joins_distinct_causes() {
        let err = anyhow!("connection reset")
            .context("Seedream request failed")
            .context("Seedream request failed");
        assert_eq!(
            error_chain_text(&err, 200),
            "Seedream request failed | caused by: connection reset"
        );
    }

    #[test]
    fn truncate_text_marks_cut() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
