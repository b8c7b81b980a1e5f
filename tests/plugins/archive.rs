use reshelf::core::engine::{Engine, RunState};
use reshelf::core::store::Store;
use reshelf::plugins::archive::{self, MANIFEST_FILE};
use reshelf::plugins::verify::NoopVerifier;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn archived_repo() -> (tempfile::TempDir, Engine) {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write(
        root,
        ".reshelf/schema.toml",
        "version = 1\n\n[directories.\".\"]\nrequired = [\"README.md\"]\n",
    );
    write(
        root,
        ".reshelf/config.toml",
        "archive_dir = \"attic\"\n\n[dispositions]\n\"setup.py\" = \"delete\"\n",
    );
    write(root, "README.md", "# Repo\n");
    write(root, "TODO.md", "- ship it\n");
    write(root, "setup.py", "print('legacy')\n");
    let engine = Engine::open(root).unwrap();
    let report = engine
        .execute(
            &reshelf::core::engine::ExecuteOptions {
                dry_run: false,
                run_stamp: Some("1234".into()),
                use_git: false,
                cancel: Arc::new(AtomicBool::new(false)),
            },
            &NoopVerifier,
        )
        .unwrap();
    assert_eq!(report.state, RunState::Done);
    (tmp, engine)
}

#[test]
fn archive_lists_entries_in_configured_dir() {
    let (tmp, engine) = archived_repo();
    let root = tmp.path();
    assert!(root.join("attic").join(MANIFEST_FILE).is_file());
    assert!(!root.join(".reshelf/archive").exists());

    let entries = archive::list_archives(&engine.store, "attic").unwrap();
    let placed: Vec<(&str, &str, &str)> = entries
        .iter()
        .map(|e| (e.original_path.as_str(), e.archive_path.as_str(), e.reason.as_str()))
        .collect();
    assert_eq!(
        placed,
        vec![
            ("TODO.md", "attic/1234/TODO.md", "archive"),
            ("setup.py", "attic/1234/setup.py", "delete"),
        ]
    );
    assert!(archive::verify_archives(&engine.store, "attic").unwrap().is_empty());

    // The archive itself is never rescanned as part of the tree.
    let (inventory, _) = engine.scan().unwrap();
    assert_eq!(inventory.len(), 1);
}

#[test]
fn verify_reports_tampered_and_missing_copies() {
    let (tmp, _) = archived_repo();
    let root = tmp.path();
    fs::write(root.join("attic/1234/TODO.md"), "- edited\n").unwrap();
    fs::remove_file(root.join("attic/1234/setup.py")).unwrap();

    let store = Store::new(root);
    let failures = archive::verify_archives(&store, "attic").unwrap();
    assert_eq!(failures.len(), 2);
    assert!(failures[0].contains("content hash mismatch"));
    assert!(failures[1].contains("file missing"));
}
