//! Diff archive construction and application.
//!
//! A diff archive is a zip holding [`DIFF_MANIFEST_FILE_NAME`]
//! (`{"deletedFiles": [...]}`) plus every new or changed entry copied from
//! the new package. Applying it to a baseline's files removes the deleted
//! paths and writes the included entries over the rest.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, Write};

use serde::{Deserialize, Serialize};
use zip::write::SimpleFileOptions;

use crate::diff::ManifestDiff;
use crate::error::{DiffError, DiffResult};
use crate::manifest::{DIFF_MANIFEST_FILE_NAME, normalize_path};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiffManifestFile {
    deleted_files: Vec<String>,
}

/// Write the diff archive for `diff` into `out`, streaming changed entries
/// from `new_archive`. Directory entries are recreated empty.
pub fn build_diff_archive<R, W>(diff: &ManifestDiff, new_archive: R, out: W) -> DiffResult<W>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let mut source = zip::ZipArchive::new(new_archive)?;
    let mut writer = zip::ZipWriter::new(out);
    let options = SimpleFileOptions::default();

    let manifest = DiffManifestFile {
        deleted_files: diff.deleted_files.clone(),
    };
    let manifest = serde_json::to_vec(&manifest).map_err(|e| DiffError::Manifest(e.to_string()))?;
    writer.start_file(DIFF_MANIFEST_FILE_NAME, options)?;
    writer.write_all(&manifest)?;

    for i in 0..source.len() {
        let mut entry = source.by_index(i)?;
        let path = normalize_path(entry.name());
        if !diff.includes(&path) {
            continue;
        }
        if path.ends_with('/') {
            writer.add_directory(path, options)?;
        } else {
            writer.start_file(path, options)?;
            std::io::copy(&mut entry, &mut writer)?;
        }
    }

    Ok(writer.finish()?)
}

/// Read every entry of a zip into memory, keyed by normalized path.
/// Directory entries map to empty contents.
pub fn read_archive_files(bytes: &[u8]) -> DiffResult<BTreeMap<String, Vec<u8>>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut files = BTreeMap::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let path = normalize_path(entry.name());
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        files.insert(path, contents);
    }
    Ok(files)
}

/// Reconstruct a package's files from a baseline's files and a diff archive.
pub fn apply_diff_archive(
    mut baseline: BTreeMap<String, Vec<u8>>,
    diff_archive: &[u8],
) -> DiffResult<BTreeMap<String, Vec<u8>>> {
    let mut entries = read_archive_files(diff_archive)?;
    let manifest = entries
        .remove(DIFF_MANIFEST_FILE_NAME)
        .ok_or_else(|| DiffError::Manifest(format!("{DIFF_MANIFEST_FILE_NAME} missing")))?;
    let manifest: DiffManifestFile =
        serde_json::from_slice(&manifest).map_err(|e| DiffError::Manifest(e.to_string()))?;

    for path in &manifest.deleted_files {
        baseline.remove(path);
    }
    baseline.extend(entries);
    Ok(baseline)
}
