//! pushgrid update decision engine.
//!
//! Answers a client's "is there an update for me?" poll from its
//! deployment's release history. Resolution is split in two so it can be
//! cached per deployment: [`resolve`] produces an [`UpdateResolution`]
//! holding the decision for everyone plus, while the head release is a
//! partial rollout, the decision for clients inside the rollout;
//! [`UpdateResolution::choose`] then picks one per client id.

pub mod decision;
pub mod engine;
pub mod error;
pub mod request;
pub mod resolve;

pub use decision::{RolloutCandidate, UpdateCheckResponse, UpdateDecision, UpdatePackage, UpdateResolution};
pub use engine::UpdateEngine;
pub use error::{UpdateError, UpdateResult};
pub use request::{UpdateCheckRequest, ValidatedRequest};
pub use resolve::resolve;
