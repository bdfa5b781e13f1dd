//! Background diff generation for a newly committed release.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use pushgrid_state::{BlobRef, BlobStore, PackageHash, Release};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::diff::ManifestDiff;
use crate::error::{DiffError, DiffResult};
use crate::archive::build_diff_archive;
use crate::manifest::PackageManifest;

/// Computes and uploads diff archives between a release and the releases
/// before it.
#[derive(Clone)]
pub struct PackageDiffer {
    blobs: Arc<dyn BlobStore>,
    max_packages: usize,
    work_dir: PathBuf,
}

impl PackageDiffer {
    pub fn new(blobs: Arc<dyn BlobStore>, max_packages: usize, work_dir: PathBuf) -> Self {
        Self {
            blobs,
            max_packages: max_packages.max(1),
            work_dir,
        }
    }

    /// Baselines worth diffing against, oldest first.
    ///
    /// Scans backwards from just before `new_release` and keeps up to
    /// `max_packages` releases targeting compatible binaries whose content
    /// differs from the new release.
    pub fn packages_to_diff<'a>(&self, history: &'a [Release], new_release: &Release) -> Vec<&'a Release> {
        let Some(position) = history
            .iter()
            .rposition(|release| release.label == new_release.label)
        else {
            return Vec::new();
        };

        let mut baselines: Vec<&Release> = history[..position]
            .iter()
            .rev()
            .filter(|release| {
                new_release.app_version.is_compatible_with(&release.app_version)
                    && release.package_hash != new_release.package_hash
            })
            .take(self.max_packages)
            .collect();
        baselines.reverse();
        baselines
    }

    /// Build and upload a diff archive for every eligible baseline.
    ///
    /// Returns the diffs keyed by baseline package hash. A baseline that
    /// fails is logged and left out; only problems with the new release
    /// itself are returned as errors.
    pub async fn generate_diff_map(
        &self,
        history: &[Release],
        new_release: &Release,
    ) -> DiffResult<BTreeMap<PackageHash, BlobRef>> {
        let Some(manifest_ref) = &new_release.manifest_blob_ref else {
            return Err(DiffError::InvalidArguments(format!(
                "release {} has no manifest",
                new_release.label
            )));
        };

        let baselines = self.packages_to_diff(history, new_release);
        if baselines.is_empty() {
            debug!(label = %new_release.label, "no baselines to diff against");
            return Ok(BTreeMap::new());
        }

        let new_manifest = Arc::new(self.fetch_manifest(manifest_ref).await?);
        let archive = self.blobs.get(&new_release.blob_ref).await?;
        let new_archive = Arc::new(self.spool(archive).await?);

        let jobs = baselines.into_iter().map(|baseline| {
            let new_manifest = Arc::clone(&new_manifest);
            let new_archive = Arc::clone(&new_archive);
            async move {
                let outcome = self
                    .diff_against(baseline, new_manifest, new_archive.path().to_path_buf())
                    .await;
                (baseline, outcome)
            }
        });

        let mut diffs = BTreeMap::new();
        for (baseline, outcome) in join_all(jobs).await {
            match outcome {
                Ok(Some(blob)) => {
                    diffs.insert(baseline.package_hash.clone(), blob);
                }
                Ok(None) => {}
                Err(e) => warn!(
                    baseline = %baseline.label,
                    label = %new_release.label,
                    error = %e,
                    "diff against baseline failed, clients on it get the full package"
                ),
            }
        }
        info!(label = %new_release.label, diffs = diffs.len(), "diff packages generated");
        Ok(diffs)
    }

    async fn diff_against(
        &self,
        baseline: &Release,
        new_manifest: Arc<PackageManifest>,
        new_archive: PathBuf,
    ) -> DiffResult<Option<BlobRef>> {
        let Some(manifest_ref) = &baseline.manifest_blob_ref else {
            debug!(baseline = %baseline.label, "baseline is a flat file, skipping");
            return Ok(None);
        };
        let baseline_manifest = self.fetch_manifest(manifest_ref).await?;

        let diff = ManifestDiff::between(&baseline_manifest, &new_manifest);
        if diff.is_empty() {
            return Ok(None);
        }

        let work_dir = self.work_dir.clone();
        let bytes = tokio::task::spawn_blocking(move || write_diff(&diff, &new_archive, &work_dir))
            .await??;

        let blob = self
            .blobs
            .put(&uuid::Uuid::new_v4().to_string(), bytes)
            .await?;
        debug!(baseline = %baseline.label, size = blob.size, "diff package uploaded");
        Ok(Some(blob))
    }

    async fn fetch_manifest(&self, blob: &BlobRef) -> DiffResult<PackageManifest> {
        let bytes = self.blobs.get(blob).await?;
        let json = std::str::from_utf8(&bytes).map_err(|e| DiffError::Manifest(e.to_string()))?;
        PackageManifest::deserialize(json)
    }

    /// Copy a downloaded archive into the work directory. The file is
    /// removed when the returned handle drops.
    async fn spool(&self, archive: Bytes) -> DiffResult<NamedTempFile> {
        let work_dir = self.work_dir.clone();
        let file = tokio::task::spawn_blocking(move || -> DiffResult<NamedTempFile> {
            let mut file = temp_archive(&work_dir, "temp_")?;
            file.write_all(&archive)?;
            file.flush()?;
            Ok(file)
        })
        .await??;
        Ok(file)
    }
}

fn temp_archive(work_dir: &Path, prefix: &str) -> DiffResult<NamedTempFile> {
    std::fs::create_dir_all(work_dir)?;
    Ok(tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".zip")
        .tempfile_in(work_dir)?)
}

fn write_diff(diff: &ManifestDiff, new_archive: &Path, work_dir: &Path) -> DiffResult<Bytes> {
    let source = File::open(new_archive)?;
    let mut out = build_diff_archive(diff, source, temp_archive(work_dir, "diff_")?)?;
    out.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    out.read_to_end(&mut bytes)?;
    Ok(Bytes::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{apply_diff_archive, read_archive_files};
    use crate::manifest::digest_artifact;
    use crate::manifest::tests::zip_of;
    use pushgrid_core::AppVersionSpec;
    use pushgrid_state::{MemoryBlobStore, ReleaseMethod};

    async fn upload(blobs: &MemoryBlobStore, label: &str, app_version: &str, zip: Vec<u8>) -> Release {
        let digest = digest_artifact(&zip);
        let manifest = digest.manifest.unwrap();
        let manifest_blob_ref = blobs
            .put(&format!("{label}-manifest"), Bytes::from(manifest.serialize()))
            .await
            .unwrap();
        let blob_ref = blobs.put(label, Bytes::from(zip)).await.unwrap();
        Release {
            label: label.to_string(),
            package_hash: digest.package_hash,
            app_version: AppVersionSpec::parse(app_version).unwrap(),
            blob_ref,
            manifest_blob_ref: Some(manifest_blob_ref),
            diffs: BTreeMap::new(),
            is_disabled: false,
            is_mandatory: false,
            rollout: None,
            description: None,
            release_method: ReleaseMethod::Upload,
            original_label: None,
            original_deployment: None,
            uploaded_at: 0,
        }
    }

    fn differ(blobs: &MemoryBlobStore, max: usize, dir: &Path) -> PackageDiffer {
        PackageDiffer::new(Arc::new(blobs.clone()), max, dir.to_path_buf())
    }

    #[tokio::test]
    async fn diffs_against_previous_release() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = MemoryBlobStore::new();
        let v1_zip = zip_of(&[("a", b"A"), ("b", b"B"), ("c", b"old")]);
        let v2_zip = zip_of(&[("b", b"B"), ("c", b"new"), ("d", b"D")]);
        let v1 = upload(&blobs, "v1", "1.0.0", v1_zip.clone()).await;
        let v2 = upload(&blobs, "v2", "1.0.0", v2_zip.clone()).await;
        let history = vec![v1.clone(), v2.clone()];

        let diffs = differ(&blobs, 1, dir.path())
            .generate_diff_map(&history, &v2)
            .await
            .unwrap();
        assert_eq!(diffs.len(), 1);
        let diff_blob = blobs.get(&diffs[&v1.package_hash]).await.unwrap();

        let rebuilt = apply_diff_archive(read_archive_files(&v1_zip).unwrap(), &diff_blob).unwrap();
        assert_eq!(rebuilt, read_archive_files(&v2_zip).unwrap());

        // Temporary archives are cleaned up.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn baseline_selection_respects_limit_and_compatibility() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = MemoryBlobStore::new();
        let v1 = upload(&blobs, "v1", "1.0.0", zip_of(&[("a", b"1")])).await;
        let v2 = upload(&blobs, "v2", "2.0.0", zip_of(&[("a", b"2")])).await;
        let v3 = upload(&blobs, "v3", "1.0.0", zip_of(&[("a", b"3")])).await;
        let v4 = upload(&blobs, "v4", "1.0.0", zip_of(&[("a", b"3")])).await;
        let v5 = upload(&blobs, "v5", "1.0.0", zip_of(&[("a", b"5")])).await;
        let history = vec![v1, v2, v3, v4, v5.clone()];

        let labels = |d: &PackageDiffer| -> Vec<String> {
            d.packages_to_diff(&history, &v5)
                .iter()
                .map(|r| r.label.clone())
                .collect()
        };
        assert_eq!(labels(&differ(&blobs, 1, dir.path())), ["v4"]);
        assert_eq!(labels(&differ(&blobs, 2, dir.path())), ["v3", "v4"]);
        assert_eq!(labels(&differ(&blobs, 5, dir.path())), ["v1", "v3", "v4"]);
    }

    #[tokio::test]
    async fn identical_content_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = MemoryBlobStore::new();
        let v1 = upload(&blobs, "v1", "1.0.0", zip_of(&[("a", b"1")])).await;
        let v2 = upload(&blobs, "v2", "1.0.0", zip_of(&[("a", b"1")])).await;
        let history = vec![v1, v2.clone()];

        let d = differ(&blobs, 3, dir.path());
        assert!(d.packages_to_diff(&history, &v2).is_empty());
        assert!(d.generate_diff_map(&history, &v2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_baseline_does_not_abort_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = MemoryBlobStore::new();
        let v1 = upload(&blobs, "v1", "1.0.0", zip_of(&[("a", b"1")])).await;
        let mut v2 = upload(&blobs, "v2", "1.0.0", zip_of(&[("a", b"2")])).await;
        let v3 = upload(&blobs, "v3", "1.0.0", zip_of(&[("a", b"3")])).await;
        // v2's manifest has gone missing from the blob store.
        v2.manifest_blob_ref = Some(BlobRef {
            url: "memory://gone".to_string(),
            size: 0,
        });
        let history = vec![v1.clone(), v2, v3.clone()];

        let diffs = differ(&blobs, 2, dir.path())
            .generate_diff_map(&history, &v3)
            .await
            .unwrap();
        assert_eq!(diffs.keys().collect::<Vec<_>>(), [&v1.package_hash]);
    }

    #[tokio::test]
    async fn release_without_manifest_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = MemoryBlobStore::new();
        let mut v1 = upload(&blobs, "v1", "1.0.0", zip_of(&[("a", b"1")])).await;
        v1.manifest_blob_ref = None;
        let result = differ(&blobs, 1, dir.path())
            .generate_diff_map(&[v1.clone()], &v1)
            .await;
        assert!(matches!(result, Err(DiffError::InvalidArguments(_))));
    }
}
