//! The release ledger.
//!
//! Every history mutation runs as one read-modify-write transaction on the
//! state store, so concurrent writers to a deployment are serialized and
//! readers only ever see whole histories.

use std::collections::BTreeMap;
use std::sync::Arc;

use pushgrid_core::AppVersionSpec;
use pushgrid_metrics::MetricsManager;
use pushgrid_rollout::RolloutPercent;
use pushgrid_state::{
    BlobRef, BlobStore, Deployment, PackageHash, Release, ReleaseMethod, StateStore,
    label_for_position, unix_millis,
};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::diff_worker::DiffJob;
use crate::error::{LedgerError, LedgerResult};

const DEPLOYMENT_KEY_LENGTH: usize = 40;

/// Metadata changes to an existing release. `None` leaves a field alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleasePatch {
    /// Release to patch; the latest when absent.
    pub label: Option<String>,
    pub app_version: Option<String>,
    pub description: Option<String>,
    pub is_disabled: Option<bool>,
    pub is_mandatory: Option<bool>,
    pub rollout: Option<u8>,
}

/// What to promote and how the promoted copy differs from its source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteOverrides {
    /// Source release to promote; the latest when absent.
    pub label: Option<String>,
    pub app_version: Option<String>,
    pub description: Option<String>,
    pub is_disabled: Option<bool>,
    pub is_mandatory: Option<bool>,
    pub rollout: Option<u8>,
}

#[derive(Clone)]
pub struct Ledger {
    pub(crate) store: StateStore,
    pub(crate) blobs: Arc<dyn BlobStore>,
    metrics: MetricsManager,
    diff_queue: Option<mpsc::UnboundedSender<DiffJob>>,
}

pub(crate) fn parse_app_version(raw: &str) -> LedgerResult<AppVersionSpec> {
    AppVersionSpec::parse(raw).map_err(|e| LedgerError::MalformedRequest(e.to_string()))
}

pub(crate) fn parse_rollout(raw: Option<u8>) -> LedgerResult<Option<RolloutPercent>> {
    raw.map(RolloutPercent::new)
        .transpose()
        .map_err(|e| LedgerError::MalformedRequest(e.to_string()))
}

/// Hash of the release a new package targeting `app_version` would sit on
/// top of, for duplicate detection.
///
/// A range is compared with the head release when the head targets the
/// same range. An exact version is compared with the newest release it
/// satisfies.
pub fn last_package_hash_with_same_app_version<'a>(
    history: &'a [Release],
    app_version: &AppVersionSpec,
) -> Option<&'a str> {
    let head = history.last()?;
    match app_version {
        AppVersionSpec::Range(_) => {
            (head.app_version == *app_version).then_some(head.package_hash.as_str())
        }
        AppVersionSpec::Exact(version) => history
            .iter()
            .rev()
            .find(|release| release.app_version.matches(version))
            .map(|release| release.package_hash.as_str()),
    }
}

pub(crate) fn reject_unfinished_rollout(history: &[Release], message: &str) -> LedgerResult<()> {
    match history.last() {
        Some(head) if head.has_active_rollout() => Err(LedgerError::Conflict(message.to_string())),
        _ => Ok(()),
    }
}

/// Label `release`, clear the outgoing head's rollout and append.
fn append(history: &mut Vec<Release>, mut release: Release) -> LedgerResult<Release> {
    reject_unfinished_rollout(
        history,
        "please update the previous release to 100% rollout before releasing a new package",
    )?;
    if let Some(head) = history.last_mut() {
        head.rollout = None;
    }
    release.label = label_for_position(history.len() + 1);
    history.push(release.clone());
    Ok(release)
}

fn find_by_label<'a>(history: &'a [Release], label: &str) -> Option<&'a Release> {
    history.iter().rev().find(|release| release.label == label)
}

impl Ledger {
    pub fn new(store: StateStore, blobs: Arc<dyn BlobStore>, metrics: MetricsManager) -> Self {
        Self {
            store,
            blobs,
            metrics,
            diff_queue: None,
        }
    }

    /// Queue committed zip releases for diffing on `queue`.
    pub fn with_diff_queue(mut self, queue: mpsc::UnboundedSender<DiffJob>) -> Self {
        self.diff_queue = Some(queue);
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn metrics(&self) -> &MetricsManager {
        &self.metrics
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Create a deployment with a fresh id and client key.
    pub fn create_deployment(&self, name: &str) -> LedgerResult<Deployment> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::MalformedRequest(
                "deployment name must not be empty".to_string(),
            ));
        }
        let key: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(DEPLOYMENT_KEY_LENGTH)
            .map(char::from)
            .collect();
        let deployment = Deployment {
            id: uuid::Uuid::new_v4().to_string(),
            key,
            name: name.to_string(),
            created_at: unix_millis(),
        };
        self.store.create_deployment(&deployment)?;
        info!(deployment = %deployment.name, id = %deployment.id, "deployment created");
        Ok(deployment)
    }

    pub fn deployment(&self, id: &str) -> LedgerResult<Deployment> {
        self.store
            .get_deployment(id)?
            .ok_or_else(|| LedgerError::NotFound(format!("deployment {id} does not exist")))
    }

    pub fn deployment_by_name(&self, name: &str) -> LedgerResult<Deployment> {
        self.store
            .get_deployment_by_name(name)?
            .ok_or_else(|| LedgerError::NotFound(format!("deployment \"{name}\" does not exist")))
    }

    pub fn list_deployments(&self) -> LedgerResult<Vec<Deployment>> {
        Ok(self.store.list_deployments()?)
    }

    /// Release history, oldest first.
    pub fn history(&self, deployment_id: &str) -> LedgerResult<Vec<Release>> {
        self.store.get_history(deployment_id)?.ok_or_else(|| {
            LedgerError::NotFound(format!("deployment {deployment_id} does not exist"))
        })
    }

    // ── History operations ─────────────────────────────────────────

    /// Append `release` as the new head, assigning its label.
    pub async fn commit(&self, deployment_id: &str, release: Release) -> LedgerResult<Release> {
        let deployment = self.deployment(deployment_id)?;
        let committed = self
            .store
            .update_history(deployment_id, |history| append(history, release))?;
        info!(deployment = %deployment.name, label = %committed.label, "release committed");
        self.invalidate(&deployment).await;
        self.enqueue_diff(&deployment, &committed);
        Ok(committed)
    }

    /// Commit a freshly uploaded or promoted release, rejecting it when it
    /// duplicates the content clients on its app version already have.
    pub(crate) async fn commit_new_package(
        &self,
        deployment: &Deployment,
        release: Release,
        duplicate_message: &str,
    ) -> LedgerResult<Release> {
        let committed = self.store.update_history(&deployment.id, |history| {
            reject_unfinished_rollout(
                history,
                "please update the previous release to 100% rollout before releasing a new package",
            )?;
            if last_package_hash_with_same_app_version(history, &release.app_version)
                == Some(release.package_hash.as_str())
            {
                return Err(LedgerError::Conflict(duplicate_message.to_string()));
            }
            append(history, release)
        })?;
        info!(
            deployment = %deployment.name,
            label = %committed.label,
            method = ?committed.release_method,
            "release committed"
        );
        self.invalidate(deployment).await;
        self.enqueue_diff(deployment, &committed);
        Ok(committed)
    }

    /// Remove every release. The next commit is labelled `v1` again.
    pub async fn clear_history(&self, deployment_id: &str) -> LedgerResult<()> {
        let deployment = self.deployment(deployment_id)?;
        self.store.update_history(deployment_id, |history| {
            history.clear();
            Ok::<_, LedgerError>(())
        })?;
        info!(deployment = %deployment.name, "release history cleared");
        self.metrics.clear_deployment(&deployment.key).await;
        self.invalidate(&deployment).await;
        Ok(())
    }

    /// Change metadata of a release in place.
    ///
    /// Returns `None` when the patch matches what is already stored.
    pub async fn patch_release(
        &self,
        deployment_id: &str,
        patch: ReleasePatch,
    ) -> LedgerResult<Option<Release>> {
        let deployment = self.deployment(deployment_id)?;
        let rollout = parse_rollout(patch.rollout)?;
        let app_version = patch
            .app_version
            .as_deref()
            .map(parse_app_version)
            .transpose()?;

        let updated = self.store.update_history(deployment_id, |history| {
            if history.is_empty() {
                return Err(LedgerError::NotFound("deployment has no releases".to_string()));
            }
            let target = match &patch.label {
                Some(label) => history
                    .iter_mut()
                    .rev()
                    .find(|release| &release.label == label),
                None => history.last_mut(),
            }
            .ok_or_else(|| LedgerError::NotFound("release not found for given label".to_string()))?;

            let mut changed = false;
            if let Some(is_disabled) = patch.is_disabled.filter(|v| *v != target.is_disabled) {
                target.is_disabled = is_disabled;
                changed = true;
            }
            if let Some(is_mandatory) = patch.is_mandatory.filter(|v| *v != target.is_mandatory) {
                target.is_mandatory = is_mandatory;
                changed = true;
            }
            if let Some(description) = patch
                .description
                .as_ref()
                .filter(|d| !d.is_empty() && target.description.as_ref() != Some(*d))
            {
                target.description = Some(description.clone());
                changed = true;
            }
            if let Some(rollout) = rollout {
                target.rollout = rollout
                    .apply_to(target.rollout)
                    .map_err(|e| LedgerError::Conflict(e.to_string()))?;
                changed = true;
            }
            if let Some(app_version) = app_version.filter(|v| *v != target.app_version) {
                target.app_version = app_version;
                changed = true;
            }
            Ok(changed.then(|| target.clone()))
        })?;

        match &updated {
            Some(release) => {
                info!(deployment = %deployment.name, label = %release.label, "release patched");
                self.invalidate(&deployment).await;
            }
            None => debug!(deployment = %deployment.name, "release patch changed nothing"),
        }
        Ok(updated)
    }

    /// Re-release an earlier package as the new head.
    ///
    /// Without a target label the release before the head is used. The
    /// target must target the same app version as the head.
    pub async fn rollback(
        &self,
        deployment_id: &str,
        target_label: Option<&str>,
    ) -> LedgerResult<Release> {
        let deployment = self.deployment(deployment_id)?;
        let committed = self.store.update_history(deployment_id, |history| {
            let head = history.last().ok_or_else(|| {
                LedgerError::NotFound(
                    "cannot perform rollback because there are no releases on this deployment"
                        .to_string(),
                )
            })?;
            let target = match target_label {
                None => history
                    .len()
                    .checked_sub(2)
                    .map(|i| &history[i])
                    .ok_or_else(|| {
                        LedgerError::NotFound(
                            "cannot perform rollback because there are no prior releases to rollback to"
                                .to_string(),
                        )
                    })?,
                Some(label) if label == head.label => {
                    return Err(LedgerError::Conflict(format!(
                        "cannot perform rollback because the target release ({label}) is already the latest release"
                    )));
                }
                Some(label) => find_by_label(history, label).ok_or_else(|| {
                    LedgerError::NotFound(format!(
                        "cannot perform rollback because the target release ({label}) could not be found in the deployment history"
                    ))
                })?,
            };
            if target.app_version != head.app_version {
                return Err(LedgerError::Conflict(
                    "cannot perform rollback to a different app version, please perform a new release with the desired replacement package"
                        .to_string(),
                ));
            }

            let release = Release {
                label: String::new(),
                package_hash: target.package_hash.clone(),
                app_version: target.app_version.clone(),
                blob_ref: target.blob_ref.clone(),
                manifest_blob_ref: target.manifest_blob_ref.clone(),
                diffs: target.diffs.clone(),
                is_disabled: target.is_disabled,
                is_mandatory: target.is_mandatory,
                rollout: None,
                description: target.description.clone(),
                release_method: ReleaseMethod::Rollback,
                original_label: Some(target.label.clone()),
                original_deployment: None,
                uploaded_at: unix_millis(),
            };
            append(history, release)
        })?;

        info!(
            deployment = %deployment.name,
            label = %committed.label,
            original = ?committed.original_label,
            "release rolled back"
        );
        self.invalidate(&deployment).await;
        self.enqueue_diff(&deployment, &committed);
        Ok(committed)
    }

    /// Copy a release from one deployment to another.
    pub async fn promote(
        &self,
        source_id: &str,
        destination_id: &str,
        overrides: PromoteOverrides,
    ) -> LedgerResult<Release> {
        let source_deployment = self.deployment(source_id)?;
        let destination = self.deployment(destination_id)?;
        let source_history = self.history(source_id)?;

        let source = match &overrides.label {
            Some(label) => find_by_label(&source_history, label),
            None => source_history.last(),
        }
        .ok_or_else(|| {
            LedgerError::NotFound("cannot promote from a deployment with no releases".to_string())
        })?;

        let rollout = parse_rollout(overrides.rollout)?;
        let app_version = match overrides.app_version.as_deref() {
            Some(raw) => parse_app_version(raw)?,
            None => source.app_version.clone(),
        };

        let destination_history = self.history(destination_id)?;
        reject_unfinished_rollout(
            &destination_history,
            "cannot promote to an unfinished rollout release unless it is already disabled",
        )?;

        let release = Release {
            label: String::new(),
            package_hash: source.package_hash.clone(),
            app_version,
            blob_ref: source.blob_ref.clone(),
            manifest_blob_ref: source.manifest_blob_ref.clone(),
            diffs: BTreeMap::new(),
            is_disabled: overrides.is_disabled.unwrap_or(source.is_disabled),
            is_mandatory: overrides.is_mandatory.unwrap_or(source.is_mandatory),
            rollout: rollout.and_then(RolloutPercent::stored),
            description: overrides
                .description
                .filter(|d| !d.is_empty())
                .or_else(|| source.description.clone()),
            release_method: ReleaseMethod::Promote,
            original_label: Some(source.label.clone()),
            original_deployment: Some(source_deployment.name.clone()),
            uploaded_at: unix_millis(),
        };

        self.commit_new_package(
            &destination,
            release,
            "the package was not promoted because it is identical to the contents of the targeted deployment's current release",
        )
        .await
    }

    /// Merge generated diffs into the release with `label` and
    /// `package_hash`. Returns false if that release is gone, e.g. because
    /// the history was cleared while the diffs were being built.
    pub async fn attach_diffs(
        &self,
        deployment_id: &str,
        label: &str,
        package_hash: &str,
        diffs: BTreeMap<PackageHash, BlobRef>,
    ) -> LedgerResult<bool> {
        let deployment = self.deployment(deployment_id)?;
        let attached = self.store.update_history(deployment_id, |history| {
            let Some(release) = history
                .iter_mut()
                .rev()
                .find(|r| r.label == label && r.package_hash == package_hash)
            else {
                return Ok::<_, LedgerError>(false);
            };
            let mut changed = false;
            for (baseline, blob) in diffs {
                if !release.diffs.contains_key(&baseline) {
                    release.diffs.insert(baseline, blob);
                    changed = true;
                }
            }
            Ok(changed)
        })?;

        if attached {
            info!(deployment = %deployment.name, %label, "diffs attached");
            self.invalidate(&deployment).await;
        } else {
            debug!(deployment = %deployment.name, %label, "no diffs attached");
        }
        Ok(attached)
    }

    // ── Helpers ────────────────────────────────────────────────────

    async fn invalidate(&self, deployment: &Deployment) {
        self.metrics.invalidate_cache(&deployment.key).await;
    }

    fn enqueue_diff(&self, deployment: &Deployment, release: &Release) {
        let Some(queue) = &self.diff_queue else { return };
        if release.manifest_blob_ref.is_none() {
            return;
        }
        let job = DiffJob {
            deployment_id: deployment.id.clone(),
            label: release.label.clone(),
            package_hash: release.package_hash.clone(),
        };
        if queue.send(job).is_err() {
            warn!(deployment = %deployment.name, label = %release.label, "diff worker is gone, skipping diff");
        }
    }
}
