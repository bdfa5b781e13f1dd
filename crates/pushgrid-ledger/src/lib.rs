//! pushgrid release ledger.
//!
//! Owns every deployment's release history and the rules for changing it:
//! sequential labels, at most one live partial rollout, duplicate
//! detection, rollback and promotion with provenance. Mutations invalidate
//! cached update-check responses for the deployment, and committed zip
//! releases are queued for background diffing.
//!
//! # Components
//!
//! - **`ledger`**: the [`Ledger`] and its history operations
//! - **`upload`**: release of a freshly uploaded artifact
//! - **`diff_worker`**: consumes diff jobs and merges results back

pub mod diff_worker;
pub mod error;
pub mod ledger;
pub mod upload;

pub use diff_worker::{DiffJob, DiffWorker};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{Ledger, PromoteOverrides, ReleasePatch, last_package_hash_with_same_app_version};
pub use upload::{ReleaseDescriptor, ReleaseUpload};
