//! Client status reports.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStatus {
    Succeeded,
    Failed,
    Downloaded,
}

impl DeploymentStatus {
    /// Accepts the full field names clients send as well as the short forms.
    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "DeploymentSucceeded" | "Succeeded" => Some(Self::Succeeded),
            "DeploymentFailed" | "Failed" => Some(Self::Failed),
            "Downloaded" => Some(Self::Downloaded),
            _ => None,
        }
    }

    /// Counter field suffix.
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Succeeded => "DeploymentSucceeded",
            Self::Failed => "DeploymentFailed",
            Self::Downloaded => "Downloaded",
        }
    }
}

/// Body of `POST /reportStatus/deploy`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployReport {
    #[serde(default)]
    pub deployment_key: String,
    #[serde(default)]
    pub app_version: String,
    pub label: Option<String>,
    pub status: Option<String>,
    pub client_unique_id: Option<String>,
    pub previous_deployment_key: Option<String>,
    pub previous_label_or_app_version: Option<String>,
}

impl DeployReport {
    /// Check required fields and return the parsed status, if any.
    pub fn validate(&self) -> Result<Option<DeploymentStatus>, String> {
        if self.deployment_key.is_empty() || self.app_version.is_empty() {
            return Err(
                "a deploy status report must contain a valid appVersion and deploymentKey".into(),
            );
        }
        let status = match self.status.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                DeploymentStatus::parse(raw).ok_or_else(|| format!("invalid status: {raw}"))?,
            ),
            None => None,
        };
        if self.label().is_some() && status.is_none() {
            return Err(
                "a deploy status report for a labelled package must contain a valid status".into(),
            );
        }
        Ok(status)
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref().filter(|l| !l.is_empty())
    }
}

/// Body of `POST /reportStatus/download`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadReport {
    #[serde(default)]
    pub deployment_key: String,
    #[serde(default)]
    pub label: String,
    pub client_unique_id: Option<String>,
}

impl DownloadReport {
    pub fn validate(&self) -> Result<(), String> {
        if self.deployment_key.is_empty() || self.label.is_empty() {
            return Err(
                "a download status report must contain a valid deploymentKey and package label"
                    .into(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(json: serde_json::Value) -> DeployReport {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn status_aliases() {
        assert_eq!(
            DeploymentStatus::parse("DeploymentSucceeded"),
            Some(DeploymentStatus::Succeeded)
        );
        assert_eq!(DeploymentStatus::parse("Failed"), Some(DeploymentStatus::Failed));
        assert_eq!(DeploymentStatus::parse("Exploded"), None);
    }

    #[test]
    fn deploy_report_validation() {
        let ok = report(serde_json::json!({
            "deploymentKey": "k", "appVersion": "1.0.0", "label": "v1", "status": "DeploymentSucceeded"
        }));
        assert_eq!(ok.validate(), Ok(Some(DeploymentStatus::Succeeded)));

        let binary_only = report(serde_json::json!({ "deploymentKey": "k", "appVersion": "1.0.0" }));
        assert_eq!(binary_only.validate(), Ok(None));

        let missing_key = report(serde_json::json!({ "appVersion": "1.0.0" }));
        assert!(missing_key.validate().is_err());

        let label_without_status =
            report(serde_json::json!({ "deploymentKey": "k", "appVersion": "1.0.0", "label": "v1" }));
        assert!(label_without_status.validate().is_err());

        let bad_status = report(serde_json::json!({
            "deploymentKey": "k", "appVersion": "1.0.0", "label": "v1", "status": "Nope"
        }));
        assert_eq!(bad_status.validate(), Err("invalid status: Nope".to_string()));
    }

    #[test]
    fn download_report_validation() {
        let ok: DownloadReport =
            serde_json::from_value(serde_json::json!({ "deploymentKey": "k", "label": "v2" })).unwrap();
        assert!(ok.validate().is_ok());
        assert!(DownloadReport::default().validate().is_err());
    }
}
