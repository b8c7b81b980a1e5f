//! Archive manager: manifest-tracked, content-deduplicated archive of removed files.
//!
//! Files leave the tree into `<archive_dir>/<run_stamp>/<original path>`. The
//! manifest is an append-only JSONL file at `<archive_dir>/manifest.jsonl`
//! holding one entry per unique content hash.

use crate::core::error::ReshelfError;
use crate::core::inventory::hash_bytes;
use crate::core::paths;
use crate::core::store::Store;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

pub const MANIFEST_FILE: &str = "manifest.jsonl";
/// Suffixes tried before a destination is reported as a collision.
pub const MAX_COLLISION_SUFFIX: usize = 999;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub timestamp: String,
    pub original_path: String,
    pub archive_path: String,
    pub content_hash: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveManifest {
    pub entries: Vec<ManifestEntry>,
    by_hash: FxHashMap<String, usize>,
}

pub fn manifest_path(store: &Store, archive_dir: &str) -> PathBuf {
    store.abs(archive_dir).join(MANIFEST_FILE)
}

/// `<archive_dir>/<run_stamp>/<original>` before collision handling.
pub fn archive_destination(archive_dir: &str, run_stamp: &str, original: &str) -> String {
    format!("{}/{}/{}", archive_dir, run_stamp, original)
}

/// First free spelling of `dst`: as is, then `name-1.ext`, `name-2.ext`, ...
pub fn resolve_collision(
    dst: &str,
    taken: &dyn Fn(&str) -> bool,
) -> Result<String, ReshelfError> {
    if !taken(dst) {
        return Ok(dst.to_string());
    }
    for n in 1..=MAX_COLLISION_SUFFIX {
        let candidate = paths::with_suffix(dst, n);
        if !taken(&candidate) {
            return Ok(candidate);
        }
    }
    Err(ReshelfError::ArchiveCollision(format!(
        "no free name for {} after {} suffixes",
        dst, MAX_COLLISION_SUFFIX
    )))
}

impl ArchiveManifest {
    pub fn load(store: &Store, archive_dir: &str) -> Result<Self, ReshelfError> {
        let path = manifest_path(store, archive_dir);
        let mut manifest = ArchiveManifest::default();
        if !path.exists() {
            return Ok(manifest);
        }
        let content = fs::read_to_string(&path)?;
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: ManifestEntry = serde_json::from_str(line).map_err(|e| {
                ReshelfError::ValidationError(format!(
                    "{} line {}: {}",
                    path.display(),
                    idx + 1,
                    e
                ))
            })?;
            manifest.insert(entry);
        }
        Ok(manifest)
    }

    fn insert(&mut self, entry: ManifestEntry) -> bool {
        if self.by_hash.contains_key(&entry.content_hash) {
            return false;
        }
        self.by_hash
            .insert(entry.content_hash.clone(), self.entries.len());
        self.entries.push(entry);
        true
    }

    pub fn find_by_hash(&self, content_hash: &str) -> Option<&ManifestEntry> {
        self.by_hash.get(content_hash).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append `entry` unless its content hash is already recorded.
    /// Returns whether a line was written.
    pub fn append(
        &mut self,
        store: &Store,
        archive_dir: &str,
        entry: ManifestEntry,
    ) -> Result<bool, ReshelfError> {
        if self.by_hash.contains_key(&entry.content_hash) {
            return Ok(false);
        }
        let path = manifest_path(store, archive_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{}", serde_json::to_string(&entry)?)?;
        Ok(self.insert(entry))
    }
}

pub fn list_archives(store: &Store, archive_dir: &str) -> Result<Vec<ManifestEntry>, ReshelfError> {
    Ok(ArchiveManifest::load(store, archive_dir)?.entries)
}

/// Integrity scan: every entry's archive file exists and hashes to the recorded hash.
pub fn verify_archives(store: &Store, archive_dir: &str) -> Result<Vec<String>, ReshelfError> {
    let mut failures = Vec::new();
    for entry in list_archives(store, archive_dir)? {
        let full_path = store.abs(&entry.archive_path);
        if !full_path.is_file() {
            failures.push(format!(
                "{}: file missing at {}",
                entry.original_path, entry.archive_path
            ));
            continue;
        }
        let bytes = fs::read(&full_path)?;
        if hash_bytes(&bytes) != entry.content_hash {
            failures.push(format!(
                "{}: content hash mismatch at {}",
                entry.original_path, entry.archive_path
            ));
        }
    }
    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(original: &str, archive: &str, content: &str) -> ManifestEntry {
        ManifestEntry {
            timestamp: "1700000000Z".into(),
            original_path: original.into(),
            archive_path: archive.into(),
            content_hash: hash_bytes(content.as_bytes()),
            reason: "archive".into(),
        }
    }

    #[test]
    fn append_dedups_by_content_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path());
        let dir = ".reshelf/archive";
        let mut manifest = ArchiveManifest::load(&store, dir).unwrap();
        assert!(manifest.is_empty());
        assert!(manifest.append(&store, dir, entry("a.md", "x/a.md", "same")).unwrap());
        assert!(!manifest.append(&store, dir, entry("b.md", "x/b.md", "same")).unwrap());
        assert!(manifest.append(&store, dir, entry("c.md", "x/c.md", "other")).unwrap());

        let reloaded = ArchiveManifest::load(&store, dir).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.find_by_hash(&hash_bytes(b"same")).map(|e| e.archive_path.as_str()),
            Some("x/a.md")
        );
    }

    #[test]
    fn collisions_are_suffixed() {
        let taken = |p: &str| p == "arch/1/notes.md" || p == "arch/1/notes-1.md";
        assert_eq!(
            resolve_collision("arch/1/notes.md", &taken).unwrap(),
            "arch/1/notes-2.md"
        );
        assert!(matches!(
            resolve_collision("a.md", &|_| true),
            Err(ReshelfError::ArchiveCollision(_))
        ));
    }

    #[test]
    fn verify_reports_missing_and_tampered_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path());
        let dir = ".reshelf/archive";
        let mut manifest = ArchiveManifest::default();
        fs::create_dir_all(store.abs(".reshelf/archive/1")).unwrap();
        fs::write(store.abs(".reshelf/archive/1/ok.md"), "ok").unwrap();
        fs::write(store.abs(".reshelf/archive/1/bad.md"), "changed").unwrap();
        manifest
            .append(&store, dir, entry("ok.md", ".reshelf/archive/1/ok.md", "ok"))
            .unwrap();
        manifest
            .append(&store, dir, entry("bad.md", ".reshelf/archive/1/bad.md", "orig"))
            .unwrap();
        manifest
            .append(&store, dir, entry("gone.md", ".reshelf/archive/1/gone.md", "gone"))
            .unwrap();

        let failures = verify_archives(&store, dir).unwrap();
        assert_eq!(failures.len(), 2);
        assert!(failures[0].contains("hash mismatch"));
        assert!(failures[1].contains("missing"));
    }

    #[test]
    fn destination_keeps_structure() {
        assert_eq!(
            archive_destination(".reshelf/archive", "1700000000", "docs/old.md"),
            ".reshelf/archive/1700000000/docs/old.md"
        );
    }
}
