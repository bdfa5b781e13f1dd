//! Update checks against the state store.

use pushgrid_state::StateStore;
use tracing::debug;

use crate::decision::UpdateResolution;
use crate::error::{UpdateError, UpdateResult};
use crate::request::ValidatedRequest;
use crate::resolve::resolve;

/// Resolves update checks from a read snapshot of the deployment's history.
#[derive(Clone)]
pub struct UpdateEngine {
    store: StateStore,
}

impl UpdateEngine {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn check(&self, request: &ValidatedRequest) -> UpdateResult<UpdateResolution> {
        let (deployment, history) = self
            .store
            .get_history_by_key(&request.deployment_key)?
            .ok_or_else(|| UpdateError::NotFound("deployment key not found".to_string()))?;
        debug!(
            deployment = %deployment.name,
            releases = history.len(),
            client_version = %request.client.version,
            "resolving update check"
        );
        Ok(resolve(&history, request))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pushgrid_core::AppVersionSpec;
    use pushgrid_state::{BlobRef, Deployment, Release, ReleaseMethod, StateError};

    use super::*;
    use crate::UpdateCheckRequest;
    use crate::decision::UpdateDecision;

    fn setup() -> UpdateEngine {
        let store = StateStore::open_in_memory().unwrap();
        store
            .create_deployment(&Deployment {
                id: "dep-1".to_string(),
                key: "staging-key-0123456789".to_string(),
                name: "Staging".to_string(),
                created_at: 0,
            })
            .unwrap();
        store
            .update_history("dep-1", |history| {
                history.push(Release {
                    label: "v1".to_string(),
                    package_hash: "h1".to_string(),
                    app_version: AppVersionSpec::parse("1.0.0").unwrap(),
                    blob_ref: BlobRef {
                        url: "http://blobs/h1".to_string(),
                        size: 3,
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
                    uploaded_at: 0,
                });
                Ok::<_, StateError>(())
            })
            .unwrap();
        UpdateEngine::new(store)
    }

    fn validated(key: &str) -> ValidatedRequest {
        UpdateCheckRequest {
            deployment_key: key.to_string(),
            app_version: "1.0.0".to_string(),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn check_reads_history_by_key() {
        let engine = setup();
        let resolution = engine.check(&validated("staging-key-0123456789")).unwrap();
        assert!(matches!(resolution.original, UpdateDecision::Available(_)));
    }

    #[test]
    fn unknown_key_is_not_found() {
        let engine = setup();
        assert!(matches!(
            engine.check(&validated("unknown-key-0123456789")),
            Err(UpdateError::NotFound(_))
        ));
    }
}
