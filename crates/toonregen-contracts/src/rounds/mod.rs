mod candidate;
mod receipts;
mod request;
mod store;
mod summary;

pub use candidate::{CandidateId, CandidateStatus, ImagePayload, Resolution, ResultCandidate};
pub use receipts::{build_commit_receipt, write_receipt, RECEIPT_SCHEMA_VERSION};
pub use request::{GenerationRequest, ImageRef, RoundId};
pub use store::{ResultStore, RoundTally};
pub use summary::{write_summary, SessionSummary};
