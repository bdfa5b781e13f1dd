//! Update-check requests and their validation.

use pushgrid_core::{NormalizedVersion, parse_client_version};

use crate::error::{UpdateError, UpdateResult};

const MIN_KEY_LENGTH: usize = 10;
const MAX_KEY_LENGTH: usize = 100;

/// An update check as the client sent it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateCheckRequest {
    pub deployment_key: String,
    pub app_version: String,
    pub package_hash: Option<String>,
    pub label: Option<String>,
    pub is_companion: bool,
    pub client_unique_id: Option<String>,
}

/// A request whose key and binary version have been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub deployment_key: String,
    pub client: NormalizedVersion,
    /// Hash of the package the client runs; `None` when it runs the binary's
    /// bundled package.
    pub package_hash: Option<String>,
    pub label: Option<String>,
    pub is_companion: bool,
}

fn is_valid_key(key: &str) -> bool {
    (MIN_KEY_LENGTH..=MAX_KEY_LENGTH).contains(&key.len())
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

impl UpdateCheckRequest {
    pub fn validate(&self) -> UpdateResult<ValidatedRequest> {
        if !is_valid_key(&self.deployment_key) {
            return Err(UpdateError::MalformedRequest(
                "an update check must include a valid deployment key".to_string(),
            ));
        }
        let client = parse_client_version(&self.app_version).map_err(|_| {
            UpdateError::MalformedRequest(
                "an update check must include a binary version that conforms to the semver standard (e.g. '1.0.0')"
                    .to_string(),
            )
        })?;
        Ok(ValidatedRequest {
            deployment_key: self.deployment_key.clone(),
            client,
            package_hash: non_empty(&self.package_hash),
            label: non_empty(&self.label),
            is_companion: self.is_companion,
        })
    }

    pub fn client_unique_id(&self) -> Option<&str> {
        self.client_unique_id.as_deref().filter(|id| !id.is_empty())
    }
}
