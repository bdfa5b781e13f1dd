//! Update decisions and the wire response built from them.

use pushgrid_rollout::is_selected;
use serde::{Deserialize, Serialize};

/// The package a client should download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePackage {
    pub download_url: String,
    pub package_size: u64,
    pub package_hash: String,
    pub label: String,
    pub is_mandatory: bool,
    pub description: Option<String>,
    /// The client's own binary version, echoed back.
    pub app_version: String,
}

/// Outcome of an update check for one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UpdateDecision {
    Available(UpdatePackage),
    /// The client already runs the package it should.
    UpToDate { app_version: String },
    /// A release targets a newer binary than the client has.
    NeedsBinaryUpgrade { app_version: String },
    /// The client's binary is newer than anything released; it should run
    /// the package bundled with the binary.
    RunBinaryVersion { app_version: String },
}

/// The decision for clients inside a partial rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutCandidate {
    pub percent: u8,
    pub release_tag: String,
    pub decision: UpdateDecision,
}

/// Everything needed to answer any client of a deployment with the same
/// binary version and package. Cacheable; client ids only enter in
/// [`UpdateResolution::choose`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResolution {
    pub original: UpdateDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout: Option<RolloutCandidate>,
}

/// Flat response body sent under `updateInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckResponse {
    pub is_available: bool,
    pub is_mandatory: bool,
    pub app_version: String,
    #[serde(rename = "downloadURL", default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub update_app_version: bool,
    pub should_run_binary_version: bool,
}

impl UpdateDecision {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn app_version(&self) -> &str {
        match self {
            Self::Available(package) => &package.app_version,
            Self::UpToDate { app_version }
            | Self::NeedsBinaryUpgrade { app_version }
            | Self::RunBinaryVersion { app_version } => app_version,
        }
    }

    pub(crate) fn app_version_mut(&mut self) -> &mut String {
        match self {
            Self::Available(package) => &mut package.app_version,
            Self::UpToDate { app_version }
            | Self::NeedsBinaryUpgrade { app_version }
            | Self::RunBinaryVersion { app_version } => app_version,
        }
    }

    pub fn to_response(&self) -> UpdateCheckResponse {
        let unavailable = |app_version: &str| UpdateCheckResponse {
            is_available: false,
            is_mandatory: false,
            app_version: app_version.to_string(),
            download_url: None,
            package_size: None,
            package_hash: None,
            label: None,
            description: None,
            update_app_version: false,
            should_run_binary_version: false,
        };
        match self {
            Self::Available(package) => UpdateCheckResponse {
                is_available: true,
                is_mandatory: package.is_mandatory,
                app_version: package.app_version.clone(),
                download_url: Some(package.download_url.clone()),
                package_size: Some(package.package_size),
                package_hash: Some(package.package_hash.clone()),
                label: Some(package.label.clone()),
                description: package.description.clone(),
                update_app_version: false,
                should_run_binary_version: false,
            },
            Self::UpToDate { app_version } => unavailable(app_version),
            Self::NeedsBinaryUpgrade { app_version } => UpdateCheckResponse {
                update_app_version: true,
                ..unavailable(app_version)
            },
            Self::RunBinaryVersion { app_version } => UpdateCheckResponse {
                should_run_binary_version: true,
                ..unavailable(app_version)
            },
        }
    }
}

impl UpdateResolution {
    /// A resolution with no rollout in play.
    pub fn fixed(decision: UpdateDecision) -> Self {
        Self {
            original: decision,
            rollout: None,
        }
    }

    /// The decision for one client. Clients without an id never enter a
    /// rollout.
    pub fn choose(&self, client_unique_id: Option<&str>) -> &UpdateDecision {
        match (&self.rollout, client_unique_id) {
            (Some(rollout), Some(client_id))
                if is_selected(client_id, rollout.percent, &rollout.release_tag) =>
            {
                &rollout.decision
            }
            _ => &self.original,
        }
    }
}
