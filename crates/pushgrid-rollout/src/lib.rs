//! pushgrid rollouts: deterministic client bucketing and rollout percentages.
//!
//! A release with a rollout below 100 is served only to the share of
//! clients the selector puts in its bucket; everyone else keeps getting the
//! release before it.
//!
//! # Components
//!
//! - **`selector`**: stable per-client bucketing hash
//! - **`percent`**: validated rollout percentages and how they may change

pub mod percent;
pub mod selector;

pub use percent::{RolloutError, RolloutPercent};
pub use selector::{hash_code, is_selected, is_unfinished_rollout};
