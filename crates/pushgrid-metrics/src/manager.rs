//! MetricsManager: best-effort counters and response caching.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::report::{DeployReport, DeploymentStatus};
use crate::store::{CounterIncrement, CounterStore};

const ACTIVE: &str = "Active";

/// Counters for one label (or binary version) of a deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMetrics {
    pub active: i64,
    pub downloaded: i64,
    pub failed: i64,
    pub installed: i64,
}

/// Wraps an optional [`CounterStore`]. Every method swallows store
/// failures after logging them.
#[derive(Clone)]
pub struct MetricsManager {
    store: Option<Arc<dyn CounterStore>>,
    cache_ttl: Duration,
}

/// Hash holding cached update-check responses for a deployment key.
pub fn cache_key(deployment_key: &str) -> String {
    format!("deploymentKey:{deployment_key}")
}

/// Hash holding per-label counters for a deployment key.
pub fn labels_key(deployment_key: &str) -> String {
    format!("deploymentKeyLabels:{deployment_key}")
}

fn field(label: &str, suffix: &str) -> String {
    format!("{label}:{suffix}")
}

impl MetricsManager {
    pub fn new(store: Arc<dyn CounterStore>, cache_ttl: Duration) -> Self {
        Self {
            store: Some(store),
            cache_ttl,
        }
    }

    pub fn disabled() -> Self {
        Self {
            store: None,
            cache_ttl: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Whether the backing store answers. A disabled manager is healthy.
    pub async fn health(&self) -> Result<(), String> {
        match &self.store {
            Some(store) => store.ping().await.map_err(|e| e.to_string()),
            None => Ok(()),
        }
    }

    // ── Status reports ─────────────────────────────────────────────

    /// Record a deploy status report.
    ///
    /// A failed labelled install only bumps the failure counter. Anything
    /// else counts as the client now running `label` (or its binary
    /// version): one more active and installed on the current key, one less
    /// active for what it ran before, applied as one batch.
    pub async fn record_deploy_report(&self, report: &DeployReport, status: Option<DeploymentStatus>) {
        let Some(store) = &self.store else { return };

        let increments = match (report.label(), status) {
            (Some(label), Some(DeploymentStatus::Failed)) => vec![CounterIncrement::new(
                labels_key(&report.deployment_key),
                field(label, DeploymentStatus::Failed.field_name()),
                1,
            )],
            (label, _) => {
                let current = label.unwrap_or(&report.app_version);
                let current_key = labels_key(&report.deployment_key);
                let mut batch = vec![
                    CounterIncrement::new(current_key.clone(), field(current, ACTIVE), 1),
                    CounterIncrement::new(
                        current_key,
                        field(current, DeploymentStatus::Succeeded.field_name()),
                        1,
                    ),
                ];
                if let Some(previous) = report
                    .previous_label_or_app_version
                    .as_deref()
                    .filter(|p| !p.is_empty())
                {
                    let previous_key = report
                        .previous_deployment_key
                        .as_deref()
                        .filter(|k| !k.is_empty())
                        .unwrap_or(&report.deployment_key);
                    batch.push(CounterIncrement::new(
                        labels_key(previous_key),
                        field(previous, ACTIVE),
                        -1,
                    ));
                }
                batch
            }
        };

        if let Err(e) = store.increment_batch(&increments).await {
            warn!(error = %e, "failed to record deploy status");
        }
    }

    pub async fn record_download(&self, deployment_key: &str, label: &str) {
        let Some(store) = &self.store else { return };
        let increment = CounterIncrement::new(
            labels_key(deployment_key),
            field(label, DeploymentStatus::Downloaded.field_name()),
            1,
        );
        if let Err(e) = store.increment_batch(&[increment]).await {
            warn!(error = %e, "failed to record download");
        }
    }

    /// Per-label counters for a deployment key.
    pub async fn deployment_metrics(&self, deployment_key: &str) -> BTreeMap<String, LabelMetrics> {
        let Some(store) = &self.store else {
            return BTreeMap::new();
        };
        let counters = match store.get_all(&labels_key(deployment_key)).await {
            Ok(counters) => counters,
            Err(e) => {
                warn!(error = %e, "failed to read deployment metrics");
                return BTreeMap::new();
            }
        };

        let mut metrics: BTreeMap<String, LabelMetrics> = BTreeMap::new();
        for (name, value) in counters {
            let Some((label, kind)) = name.rsplit_once(':') else {
                continue;
            };
            let entry = metrics.entry(label.to_string()).or_default();
            match kind {
                ACTIVE => entry.active = value,
                "DeploymentSucceeded" => entry.installed = value,
                "DeploymentFailed" => entry.failed = value,
                "Downloaded" => entry.downloaded = value,
                _ => {}
            }
        }
        metrics
    }

    /// Drop all counters and cached responses for a deployment key.
    pub async fn clear_deployment(&self, deployment_key: &str) {
        let Some(store) = &self.store else { return };
        let keys = [labels_key(deployment_key), cache_key(deployment_key)];
        match store.delete(&keys).await {
            Ok(()) => debug!("deployment metrics cleared"),
            Err(e) => warn!(error = %e, "failed to clear deployment metrics"),
        }
    }

    // ── Response cache ─────────────────────────────────────────────

    pub async fn cached_response(&self, deployment_key: &str, url: &str) -> Option<String> {
        let store = self.store.as_ref()?;
        match store.get_cached(&cache_key(deployment_key), url).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "response cache read failed");
                None
            }
        }
    }

    /// Cache generation for a deployment key. Read it before resolving a
    /// response and hand it to [`cache_response`](Self::cache_response).
    pub async fn cache_generation(&self, deployment_key: &str) -> Option<u64> {
        let store = self.store.as_ref()?;
        match store.cache_generation(&cache_key(deployment_key)).await {
            Ok(generation) => Some(generation),
            Err(e) => {
                warn!(error = %e, "response cache generation read failed");
                None
            }
        }
    }

    /// Cache `body` unless the deployment was invalidated after
    /// `generation` was read.
    pub async fn cache_response(&self, deployment_key: &str, url: &str, body: String, generation: u64) {
        let Some(store) = &self.store else { return };
        match store
            .set_cached(&cache_key(deployment_key), url, body, self.cache_ttl, generation)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(%url, "response resolved before invalidation, not cached"),
            Err(e) => warn!(error = %e, "response cache write failed"),
        }
    }

    pub async fn invalidate_cache(&self, deployment_key: &str) {
        let Some(store) = &self.store else { return };
        if let Err(e) = store.invalidate(&cache_key(deployment_key)).await {
            warn!(error = %e, "response cache invalidation failed");
        }
    }
}
