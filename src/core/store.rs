//! Store abstraction for reshelf's persisted state.
//!
//! All engine state lives under `<repo>/.reshelf/`: configuration, the target
//! schema, the run lock, per-run journals, and the archive with its manifest.
//! Inventory, classifications and plans are never persisted.

use std::path::{Path, PathBuf};

/// Name of the state directory at the repository root.
pub const STATE_DIR: &str = ".reshelf";

/// Store handle for one repository.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute repository root.
    pub root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Store { root: root.into() }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join("config.toml")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join("run.lock")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.state_dir().join("runs")
    }

    pub fn run_journal_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{}.jsonl", run_id))
    }

    /// Absolute path for a repo-relative path.
    pub fn abs(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            return self.root.clone();
        }
        let mut p = self.root.clone();
        for seg in rel.split('/') {
            p.push(seg);
        }
        p
    }
}

/// Walk up from `start_dir` looking for a `.reshelf` directory.
pub fn find_project_root(start_dir: &Path) -> Option<PathBuf> {
    let mut current_dir = PathBuf::from(start_dir);
    loop {
        if current_dir.join(STATE_DIR).is_dir() {
            return Some(current_dir);
        }
        if !current_dir.pop() {
            return None;
        }
    }
}
