//! pushgrid package diffing: zip manifests, package hashes and delta archives.
//!
//! A release uploaded as a zip archive gets a [`PackageManifest`] mapping
//! every entry path to its content hash. Once the release is committed, the
//! [`PackageDiffer`] compares its manifest with up to `K` earlier releases
//! targeting the same binaries and uploads one diff archive per baseline:
//! only the new or changed entries, plus a `hotcodepush.json` listing what
//! was deleted. Clients already running a baseline download the diff
//! instead of the full package.

pub mod archive;
pub mod diff;
pub mod differ;
pub mod error;
pub mod manifest;

pub use archive::{apply_diff_archive, build_diff_archive, read_archive_files};
pub use diff::ManifestDiff;
pub use differ::PackageDiffer;
pub use error::{DiffError, DiffResult};
pub use manifest::{ArtifactDigest, DIFF_MANIFEST_FILE_NAME, PackageManifest, digest_artifact};
