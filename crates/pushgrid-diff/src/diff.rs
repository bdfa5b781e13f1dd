//! Manifest comparison.

use std::collections::BTreeMap;

use crate::manifest::PackageManifest;

/// What changed between a baseline package and a newer one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    /// Baseline paths that no longer exist.
    pub deleted_files: Vec<String>,
    /// New paths, and paths whose content hash changed, with their new hash.
    pub new_or_updated: BTreeMap<String, String>,
}

impl ManifestDiff {
    pub fn between(baseline: &PackageManifest, new: &PackageManifest) -> Self {
        let new_or_updated = new
            .files()
            .iter()
            .filter(|(path, hash)| baseline.files().get(*path) != Some(*hash))
            .map(|(path, hash)| (path.clone(), hash.clone()))
            .collect();
        let deleted_files = baseline
            .files()
            .keys()
            .filter(|path| !new.files().contains_key(*path))
            .cloned()
            .collect();
        Self {
            deleted_files,
            new_or_updated,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deleted_files.is_empty() && self.new_or_updated.is_empty()
    }

    pub fn includes(&self, path: &str) -> bool {
        self.new_or_updated.contains_key(path)
    }
}
