//! Data and policy shared by the regeneration engine and its front ends.
//!
//! Nothing in this crate performs network I/O. Filesystem access is limited
//! to the append-only logs and manifests under `events`, `files` and `rounds`.

pub mod chat;
pub mod error;
pub mod events;
pub mod files;
pub mod providers;
pub mod rounds;
pub mod styles;

pub use error::RegenError;
