//! pushgrid-metrics: install metrics and response caching for pushgrid.
//!
//! Clients report deployments and downloads; the counters live in an
//! external atomic key-value store behind the [`CounterStore`] trait. The
//! same store caches update-check responses per deployment key.
//!
//! # Architecture
//!
//! ```text
//! MetricsManager
//!   ├── record_deploy_report() ← POST /reportStatus/deploy
//!   ├── record_download()      ← POST /reportStatus/download
//!   ├── deployment_metrics()   → per-label {active, downloaded, failed, installed}
//!   ├── cached_response() / cache_generation() / cache_response()
//!   ├── invalidate_cache()     ← every ledger mutation
//!   └── clear_deployment()     ← history cleared
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```
//!
//! The store is optional. Without one, or when it fails, every operation
//! degrades to a no-op and update decisions are unaffected.

pub mod manager;
pub mod prometheus;
pub mod report;
pub mod store;

pub use manager::{LabelMetrics, MetricsManager};
pub use prometheus::{DeploymentMetricsSnapshot, render_prometheus};
pub use report::{DeployReport, DeploymentStatus, DownloadReport};
pub use store::{CounterError, CounterIncrement, CounterStore, MemoryCounterStore};
