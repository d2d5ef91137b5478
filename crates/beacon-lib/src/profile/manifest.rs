use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::profile::types::FileRecord;

/// Fast identity fingerprint for a file: lowercase hex SHA-256 over
/// `"{file_name}_{size}_{mtime_millis}"`.
///
/// This is NOT a content hash. It only sees the final path component, the
/// byte length and the modification time, so:
/// - moving a file between directories (name, size and mtime preserved)
///   keeps its hash even though the manifest path changes;
/// - an in-place edit that preserves size and mtime goes undetected;
/// - byte-identical files under different names hash differently.
///
/// The trade is scan speed over tamper resistance; treat the result as a
/// change detector, not an integrity check.
pub fn identity_hash(file_name: &str, size: u64, mtime_millis: u128) -> String {
    let fingerprint = format!("{}_{}_{}", file_name, size, mtime_millis);
    let digest = Sha256::digest(fingerprint.as_bytes());
    format!("{:x}", digest)
}

/// Enumerate every file under `client_path` into manifest records, sorted
/// lexicographically by relative path.
///
/// Relative paths use `/` separators on every platform. A client directory
/// that does not exist yet yields an empty manifest (the profile simply has
/// no installed files).
pub fn build_manifest(client_path: &Path) -> Result<Vec<FileRecord>> {
    if !client_path.exists() {
        log::debug!("Client directory {:?} does not exist, empty manifest", client_path);
        return Ok(Vec::new());
    }

    let mut records = Vec::new();

    for entry in WalkDir::new(client_path) {
        let entry = entry.with_context(|| format!("Walk client directory {:?}", client_path))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = entry
            .metadata()
            .with_context(|| format!("Read metadata for {:?}", entry.path()))?;

        let mtime_millis = metadata
            .modified()
            .with_context(|| format!("Read mtime for {:?}", entry.path()))?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);

        let file_name = entry.file_name().to_string_lossy();

        records.push(FileRecord {
            relative_path: relative_slash_path(entry.path(), client_path),
            size: metadata.len(),
            hash: identity_hash(&file_name, metadata.len(), mtime_millis),
        });
    }

    records.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    log::debug!(
        "Built manifest of {} files under {:?}",
        records.len(),
        client_path
    );

    Ok(records)
}

fn relative_slash_path(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
