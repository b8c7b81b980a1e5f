//! Inventory scanner.
//!
//! Lists every file under the repository root, hashes it, and tags it with a
//! coarse kind. The walk is sequential and the hashing is parallel; a single
//! unreadable path aborts the whole scan so no partial inventory ever reaches
//! the classifier.

use crate::core::config::Config;
use crate::core::error::ReshelfError;
use crate::core::paths;
use crate::core::store::STATE_DIR;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    RootDoc,
    NestedDoc,
    Source,
    Test,
    Config,
    Archive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub path: String,
    pub kind: FileKind,
    pub content_hash: String,
    pub size: u64,
    pub modified_at: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Inventory {
    /// Sorted by path.
    pub nodes: Vec<FileNode>,
}

impl Inventory {
    pub fn get(&self, path: &str) -> Option<&FileNode> {
        self.nodes
            .binary_search_by(|n| n.path.as_str().cmp(path))
            .ok()
            .map(|idx| &self.nodes[idx])
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Directory or file names skipped at any depth.
    pub exclude: BTreeSet<String>,
    /// Repo-relative archive root, skipped with everything below it.
    pub archive_dir: String,
}

impl ScanOptions {
    pub fn from_config(config: &Config) -> Self {
        ScanOptions {
            exclude: config.exclude.iter().cloned().collect(),
            archive_dir: config.archive_dir.clone(),
        }
    }

    fn skips(&self, rel: &str) -> bool {
        if rel.is_empty() {
            return false;
        }
        if self.exclude.contains(paths::file_name(rel)) || rel == STATE_DIR {
            return true;
        }
        rel == self.archive_dir || rel.starts_with(&format!("{}/", self.archive_dir))
    }
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

const DOC_EXTENSIONS: &[&str] = &["md", "markdown", "rst", "txt", "adoc"];
const DOC_NAMES: &[&str] = &["LICENSE", "COPYING", "NOTICE", "AUTHORS", "CODEOWNERS"];
const CONFIG_EXTENSIONS: &[&str] = &[
    "toml", "yaml", "yml", "json", "ini", "cfg", "conf", "lock", "env",
];
const CONFIG_NAMES: &[&str] = &["Makefile", "Dockerfile", "Justfile", "Procfile"];
const ARCHIVE_DIRS: &[&str] = &["archive", "archived", ".archive"];
const TEST_DIRS: &[&str] = &["test", "tests", "__tests__", "spec", "specs"];

/// Path/extension heuristics for the coarse kind.
pub fn detect_kind(path: &str) -> FileKind {
    let dir = paths::parent_dir(path);
    let name = paths::file_name(path);
    let dirs: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();

    if dirs.iter().any(|d| ARCHIVE_DIRS.contains(&d.to_ascii_lowercase().as_str())) {
        return FileKind::Archive;
    }
    let lower = name.to_ascii_lowercase();
    if dirs.iter().any(|d| TEST_DIRS.contains(d))
        || lower.starts_with("test_")
        || lower.contains("_test.")
        || lower.contains(".test.")
        || lower.contains(".spec.")
    {
        return FileKind::Test;
    }

    let ext = paths::extension(name).map(|e| e.to_ascii_lowercase());
    let stem = name.split('.').next().unwrap_or(name);
    let is_doc = match ext.as_deref() {
        Some(e) => DOC_EXTENSIONS.contains(&e),
        None => false,
    } || DOC_NAMES.contains(&stem);
    if is_doc {
        return if dirs.is_empty() {
            FileKind::RootDoc
        } else {
            FileKind::NestedDoc
        };
    }

    if CONFIG_NAMES.contains(&name)
        || name.starts_with('.')
        || ext.as_deref().is_some_and(|e| CONFIG_EXTENSIONS.contains(&e))
    {
        return FileKind::Config;
    }
    FileKind::Source
}

fn scan_error(path: &Path, cause: impl ToString) -> ReshelfError {
    ReshelfError::ScanError {
        path: path.display().to_string(),
        cause: cause.to_string(),
    }
}

fn read_node(rel: String, abs: &Path) -> Result<FileNode, ReshelfError> {
    let bytes = fs::read(abs).map_err(|e| scan_error(abs, e))?;
    let meta = fs::metadata(abs).map_err(|e| scan_error(abs, e))?;
    let modified_at = meta
        .modified()
        .ok()
        .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok(FileNode {
        kind: detect_kind(&rel),
        path: rel,
        content_hash: hash_bytes(&bytes),
        size: meta.len(),
        modified_at,
    })
}

/// Scan `root` into a sorted inventory.
pub fn scan(root: &Path, opts: &ScanOptions) -> Result<Inventory, ReshelfError> {
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match paths::to_rel_string(root, entry.path()) {
            Some(rel) => !opts.skips(&rel),
            None => true,
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let at = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            scan_error(&at, e)
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = paths::to_rel_string(root, entry.path())
            .ok_or_else(|| scan_error(entry.path(), "path is not under the repository root"))?;
        files.push((rel, entry.into_path()));
    }

    let mut nodes = files
        .into_par_iter()
        .map(|(rel, abs)| read_node(rel, &abs))
        .collect::<Result<Vec<_>, _>>()?;
    nodes.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(Inventory { nodes })
}
