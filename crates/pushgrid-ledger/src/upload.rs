//! Releasing freshly uploaded artifacts.

use bytes::Bytes;
use pushgrid_diff::digest_artifact;
use pushgrid_state::{BlobRef, Release, ReleaseMethod, unix_millis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{
    Ledger, last_package_hash_with_same_app_version, parse_app_version, parse_rollout,
    reject_unfinished_rollout,
};

const IDENTICAL_PACKAGE: &str = "the uploaded package was not released because it is identical to the contents of the specified deployment's current release";

/// Release metadata supplied alongside an upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseDescriptor {
    /// Exact version or npm-style range of binaries the release targets.
    pub app_version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_mandatory: bool,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub rollout: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct ReleaseUpload {
    pub descriptor: ReleaseDescriptor,
    pub artifact: Bytes,
}

impl Ledger {
    /// Store an uploaded artifact and commit it as the deployment's new head.
    ///
    /// Zip artifacts are hashed through their manifest, which is stored
    /// next to the artifact and makes the release eligible for diffing.
    pub async fn release(&self, deployment_id: &str, upload: ReleaseUpload) -> LedgerResult<Release> {
        let deployment = self.deployment(deployment_id)?;
        let ReleaseUpload {
            descriptor,
            artifact,
        } = upload;

        let app_version = parse_app_version(&descriptor.app_version)?;
        let rollout = parse_rollout(descriptor.rollout)?;
        if artifact.is_empty() {
            return Err(LedgerError::MalformedRequest(
                "a release requires a non-empty package".to_string(),
            ));
        }

        let history = self.history(deployment_id)?;
        reject_unfinished_rollout(
            &history,
            "please update the previous release to 100% rollout before releasing a new package",
        )?;

        let hashed = artifact.clone();
        let digest = tokio::task::spawn_blocking(move || digest_artifact(&hashed))
            .await
            .map_err(|e| LedgerError::Internal(format!("hashing task failed: {e}")))?;
        debug!(
            deployment = %deployment.name,
            package_hash = %digest.package_hash,
            zip = digest.manifest.is_some(),
            "artifact hashed"
        );

        if last_package_hash_with_same_app_version(&history, &app_version)
            == Some(digest.package_hash.as_str())
        {
            return Err(LedgerError::Conflict(IDENTICAL_PACKAGE.to_string()));
        }

        let blob_ref = self
            .blobs
            .put(&uuid::Uuid::new_v4().to_string(), artifact)
            .await?;
        let manifest_blob_ref = match &digest.manifest {
            Some(manifest) => {
                let stored = self
                    .blobs
                    .put(
                        &uuid::Uuid::new_v4().to_string(),
                        Bytes::from(manifest.serialize()),
                    )
                    .await;
                match stored {
                    Ok(blob) => Some(blob),
                    Err(e) => {
                        self.discard(&[blob_ref]).await;
                        return Err(e.into());
                    }
                }
            }
            None => None,
        };

        let release = Release {
            label: String::new(),
            package_hash: digest.package_hash,
            app_version,
            blob_ref: blob_ref.clone(),
            manifest_blob_ref: manifest_blob_ref.clone(),
            diffs: Default::default(),
            is_disabled: descriptor.is_disabled,
            is_mandatory: descriptor.is_mandatory,
            rollout: rollout.and_then(|r| r.stored()),
            description: descriptor.description.filter(|d| !d.is_empty()),
            release_method: ReleaseMethod::Upload,
            original_label: None,
            original_deployment: None,
            uploaded_at: unix_millis(),
        };

        match self
            .commit_new_package(&deployment, release, IDENTICAL_PACKAGE)
            .await
        {
            Ok(committed) => Ok(committed),
            Err(e) => {
                let mut orphans = vec![blob_ref];
                orphans.extend(manifest_blob_ref);
                self.discard(&orphans).await;
                Err(e)
            }
        }
    }

    async fn discard(&self, blobs: &[BlobRef]) {
        for blob in blobs {
            if let Err(e) = self.blobs.delete(blob).await {
                warn!(url = %blob.url, error = %e, "failed to delete orphaned blob");
            }
        }
    }
}
