//! Upload Module
//!
//! Resumable (session + ordered chunks) and single-shot uploads, both ending
//! in the same finalize step:
//!
//! 1. **Initiate**: allocate a session and an empty temp file
//! 2. **Chunks**: accept index 0, 1, 2, ... in order, hashing each
//! 3. **Commit**: check size and full-file hash, then dedup or publish
//!
//! Single-shot uploads hash while streaming to disk and go straight to
//! finalize.

pub mod finalize;
pub mod hasher;
pub mod ingest;
mod locks;
pub mod naming;
pub mod session;
pub mod sweeper;
pub mod types;

pub use finalize::{FinalizeOutcome, Finalizer};
pub use ingest::{IngestMeta, StagedUpload};
pub use session::UploadService;
pub use sweeper::spawn_sweeper;
pub use types::*;
