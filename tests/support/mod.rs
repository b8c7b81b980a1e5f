#![allow(dead_code)]

use reshelf::core::config::Config;
use reshelf::core::engine::ExecuteOptions;
use reshelf::core::error::ReshelfError;
use reshelf::core::inventory::{self, ScanOptions};
use reshelf::core::refgraph;
use reshelf::plugins::verify::{Verifier, VerifierOutcome};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use walkdir::WalkDir;

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

pub fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

pub fn write_schema(root: &Path, schema: &str) {
    write(root, ".reshelf/schema.toml", schema);
}

/// Every file outside `.reshelf/`, keyed by repo-relative path.
pub fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".reshelf")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

/// Plain file names directly inside `dir` (repo-relative, "" for the root).
pub fn files_in(root: &Path, dir: &str) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root.join(dir))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

pub fn options(stamp: &str) -> ExecuteOptions {
    ExecuteOptions {
        dry_run: false,
        run_stamp: Some(stamp.to_string()),
        use_git: false,
        cancel: Arc::new(AtomicBool::new(false)),
    }
}

pub fn dry_options(stamp: &str) -> ExecuteOptions {
    ExecuteOptions {
        dry_run: true,
        ..options(stamp)
    }
}

/// Passes only when the tree has no broken references.
pub struct IntegrityVerifier;

impl Verifier for IntegrityVerifier {
    fn describe(&self) -> String {
        "integrity".into()
    }

    fn verify(&self, root: &Path, _cancel: &AtomicBool) -> Result<VerifierOutcome, ReshelfError> {
        let config = Config::default();
        let inv = inventory::scan(root, &ScanOptions::from_config(&config))?;
        let graph = refgraph::build(root, &inv, &config.archive_dir)?;
        let broken: Vec<String> = graph
            .broken()
            .map(|r| format!("{}:{} {}", r.from, r.line, r.raw))
            .collect();
        Ok(if broken.is_empty() {
            VerifierOutcome::pass("no broken references")
        } else {
            VerifierOutcome::fail(1, broken.join("\n"))
        })
    }
}

/// Fails on the `fail_at`-th call (1-based), passes otherwise.
pub struct FailOnCall {
    pub fail_at: usize,
    calls: Cell<usize>,
}

impl FailOnCall {
    pub fn new(fail_at: usize) -> Self {
        FailOnCall {
            fail_at,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Verifier for FailOnCall {
    fn describe(&self) -> String {
        format!("fail-on-call-{}", self.fail_at)
    }

    fn verify(&self, _root: &Path, _cancel: &AtomicBool) -> Result<VerifierOutcome, ReshelfError> {
        let n = self.calls.get() + 1;
        self.calls.set(n);
        Ok(if n == self.fail_at {
            VerifierOutcome::fail(3, "2 tests failed")
        } else {
            VerifierOutcome::pass("ok")
        })
    }
}
