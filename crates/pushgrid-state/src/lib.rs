//! pushgrid-state: embedded state store for pushgrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for deployments and their release histories, and the
//! [`BlobStore`] seam that artifacts, manifests and diff archives are
//! written through.
//!
//! # Architecture
//!
//! Domain types are JSON-serialized into redb's `&[u8]` value columns. A
//! deployment's whole release history lives under one key so that every
//! ledger mutation is a single read-modify-write transaction.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod blob;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use blob::{BlobError, BlobResult, BlobStore, FsBlobStore, MemoryBlobStore};
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
