//! Package manifests and package hashes.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{DiffError, DiffResult};

/// Name of the JSON file at the root of every diff archive.
pub const DIFF_MANIFEST_FILE_NAME: &str = "hotcodepush.json";

/// Content hashes of every entry in a zip package, keyed by `/`-separated
/// path. Directory entries keep their trailing `/` and hash the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageManifest {
    files: BTreeMap<String, String>,
}

impl PackageManifest {
    pub fn new(files: BTreeMap<String, String>) -> Self {
        Self { files }
    }

    pub fn from_zip_bytes(bytes: &[u8]) -> DiffResult<Self> {
        Self::from_zip_reader(Cursor::new(bytes))
    }

    pub fn from_zip_reader<R: Read + Seek>(reader: R) -> DiffResult<Self> {
        let mut archive = zip::ZipArchive::new(reader)?;
        let mut files = BTreeMap::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let path = normalize_path(entry.name());
            if is_ignored(&path) {
                continue;
            }
            let mut hasher = Sha256::new();
            std::io::copy(&mut entry, &mut hasher)?;
            files.insert(path, hex::encode(hasher.finalize()));
        }
        debug!(entries = files.len(), "manifest generated");
        Ok(Self { files })
    }

    pub fn files(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// SHA-256 over the sorted `path:hash` list, serialized as a JSON array.
    pub fn package_hash(&self) -> String {
        let mut entries: Vec<String> = self
            .files
            .iter()
            .map(|(path, hash)| format!("{path}:{hash}"))
            .collect();
        entries.sort();
        let json = serde_json::to_string(&entries).unwrap_or_default();
        sha256_hex(json.as_bytes())
    }

    pub fn serialize(&self) -> String {
        serde_json::to_string(&self.files).unwrap_or_default()
    }

    pub fn deserialize(json: &str) -> DiffResult<Self> {
        let files = serde_json::from_str(json).map_err(|e| DiffError::Manifest(e.to_string()))?;
        Ok(Self { files })
    }
}

/// Result of hashing an uploaded artifact.
#[derive(Debug, Clone)]
pub struct ArtifactDigest {
    pub package_hash: String,
    /// Present when the artifact is a readable zip archive.
    pub manifest: Option<PackageManifest>,
}

/// Hash an uploaded artifact. Zip archives are hashed through their
/// manifest so that entry order and compression do not change the hash;
/// anything else is hashed whole.
pub fn digest_artifact(bytes: &[u8]) -> ArtifactDigest {
    if looks_like_zip(bytes) {
        match PackageManifest::from_zip_bytes(bytes) {
            Ok(manifest) => {
                return ArtifactDigest {
                    package_hash: manifest.package_hash(),
                    manifest: Some(manifest),
                };
            }
            Err(e) => debug!(error = %e, "artifact is not a readable zip, hashing as flat file"),
        }
    }
    ArtifactDigest {
        package_hash: sha256_hex(bytes),
        manifest: None,
    }
}

fn looks_like_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06")
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub(crate) fn normalize_path(name: &str) -> String {
    name.replace('\\', "/")
}

fn is_ignored(path: &str) -> bool {
    path.starts_with("__MACOSX/") || path == ".DS_Store" || path.ends_with("/.DS_Store")
}
