//! Domain types for the pushgrid state store.
//!
//! A deployment is a named release channel identified externally by an
//! opaque key; its release history is an append-only list whose last entry
//! is the current head. All types are serializable to/from JSON for storage
//! in redb tables and for the management API.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use pushgrid_core::AppVersionSpec;
use serde::{Deserialize, Serialize};

/// Unique identifier for a deployment.
pub type DeploymentId = String;

/// Content hash of a package (artifact hash, or manifest hash for zips).
pub type PackageHash = String;

// ── Deployment ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: DeploymentId,
    /// Bearer string clients poll with. Unique across the whole system.
    pub key: String,
    pub name: String,
    /// Unix timestamp (milliseconds).
    pub created_at: u64,
}

// ── Release ────────────────────────────────────────────────────────

/// Reference to a stored blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobRef {
    pub url: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReleaseMethod {
    Upload,
    Promote,
    Rollback,
}

/// One committed package in a deployment's history.
///
/// Content fields are fixed at commit; only the metadata fields
/// (`is_disabled`, `is_mandatory`, `rollout`, `description`, `app_version`)
/// change afterwards, and `diffs` fills in as diff jobs complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    /// `v<N>`, assigned at commit.
    pub label: String,
    pub package_hash: PackageHash,
    pub app_version: AppVersionSpec,
    pub blob_ref: BlobRef,
    /// Only present for zip artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_blob_ref: Option<BlobRef>,
    /// Diff archives keyed by the baseline package hash they apply to.
    #[serde(default)]
    pub diffs: BTreeMap<PackageHash, BlobRef>,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub is_mandatory: bool,
    /// Percentage of clients receiving this release. `None` means everyone.
    #[serde(default)]
    pub rollout: Option<u8>,
    #[serde(default)]
    pub description: Option<String>,
    pub release_method: ReleaseMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_deployment: Option<String>,
    /// Unix timestamp (milliseconds).
    pub uploaded_at: u64,
}

impl Release {
    /// Enabled and only partially rolled out.
    pub fn has_active_rollout(&self) -> bool {
        !self.is_disabled && pushgrid_rollout::is_unfinished_rollout(self.rollout)
    }

    /// Tag mixed into the rollout hash: the label, or the package hash for
    /// releases that predate labels.
    pub fn release_tag(&self) -> &str {
        if self.label.is_empty() {
            &self.package_hash
        } else {
            &self.label
        }
    }
}

/// Label for the `n`th release (1-based) since the last history clear.
pub fn label_for_position(n: usize) -> String {
    format!("v{n}")
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) fn test_release(label: &str, app_version: &str, hash: &str) -> Release {
    Release {
        label: label.to_string(),
        package_hash: hash.to_string(),
        app_version: AppVersionSpec::parse(app_version).unwrap(),
        blob_ref: BlobRef {
            url: format!("memory://{hash}"),
            size: 10,
        },
        manifest_blob_ref: None,
        diffs: BTreeMap::new(),
        is_disabled: false,
        is_mandatory: false,
        rollout: None,
        description: None,
        release_method: ReleaseMethod::Upload,
        original_label: None,
        original_deployment: None,
        uploaded_at: 1000,
    }
}
