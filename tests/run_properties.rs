mod support;

use reshelf::core::engine::{Engine, RunState};
use reshelf::core::error::ReshelfError;
use reshelf::core::executor::ActionStatus;
use reshelf::core::inventory::hash_bytes;
use reshelf::core::journal;
use reshelf::core::lock;
use reshelf::core::plan::MigrationAction;
use reshelf::core::refgraph::UnresolvedReason;
use reshelf::plugins::archive::ArchiveManifest;
use reshelf::plugins::verify::{NoopVerifier, Verifier, VerifierOutcome};
use std::cell::Cell;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use support::*;

const SCHEMA: &str = r#"
version = 1

[directories."."]
required = ["README.md"]
optional = ["LICENSE"]
aliases = { "README.old.md" = "README.md" }

[relocations]
"app.js" = "src/app.js"
"#;

/// Merge, move, archive: one action of each kind, cross-referenced.
fn mixed_repo(root: &Path) {
    write_schema(root, SCHEMA);
    write(
        root,
        "README.md",
        "# Tool\n\nSee [notes](NOTES.md), [history](README.old.md) and [entry](app.js).\n",
    );
    write(root, "README.old.md", "# Tool\n\n## Changes\n\nFirst cut.\n");
    write(root, "app.js", "export const run = () => 1;\n");
    write(root, "NOTES.md", "# Notes\n\nBack to the [readme](README.md).\n");
    write(root, "docs/guide.md", "Run [it](../app.js); old docs in [notes](../NOTES.md).\n");
}

#[test]
fn rerun_after_completion_plans_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    mixed_repo(root);
    let engine = Engine::open(root).unwrap();

    let first = engine.execute(&options("100"), &IntegrityVerifier).unwrap();
    assert_eq!(first.state, RunState::Done);
    assert_eq!(first.records.len(), 3);

    let (_, plan) = engine.plan("200").unwrap();
    assert!(plan.is_empty(), "second plan: {:?}", plan.actions);
    let second = engine.execute(&options("200"), &IntegrityVerifier).unwrap();
    assert_eq!(second.state, RunState::Done);
    assert!(second.records.is_empty());
    assert!(!root.join(".reshelf/archive/200").exists());
}

#[test]
fn classification_and_plan_are_deterministic() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    mixed_repo(root);
    let engine = Engine::open(root).unwrap();

    let (a, plan_a) = engine.plan("5").unwrap();
    let (b, plan_b) = engine.plan("5").unwrap();
    assert_eq!(a.classifications, b.classifications);
    assert_eq!(plan_a, plan_b);
    let ops: Vec<&str> = plan_a.actions.iter().map(|x| x.op()).collect();
    assert_eq!(ops, vec!["merge", "move", "archive"]);
}

#[test]
fn failure_at_second_action_keeps_first_and_reverts_second() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    mixed_repo(root);
    let engine = Engine::open(root).unwrap();
    let guide_before = read(root, "docs/guide.md");
    let notes_before = read(root, "NOTES.md");

    let verifier = FailOnCall::new(2);
    let report = engine.execute(&options("300"), &verifier).unwrap();
    assert_eq!(report.state, RunState::HaltedOnFailure);
    let statuses: Vec<ActionStatus> = report.records.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![ActionStatus::Verified, ActionStatus::RolledBack]);

    // Action 1 (merge) stays applied.
    assert!(!root.join("README.old.md").exists());
    let readme = read(root, "README.md");
    assert!(readme.contains("First cut."));
    assert!(readme.contains("[history](README.md)"));
    // Action 2 (move) is reverted byte for byte.
    assert_eq!(read(root, "app.js"), "export const run = () => 1;\n");
    assert!(!root.join("src").exists());
    assert!(readme.contains("[entry](app.js)"));
    assert_eq!(read(root, "docs/guide.md"), guide_before);
    // Action 3 never ran.
    assert_eq!(read(root, "NOTES.md"), notes_before);

    // Only the verified merge reached the manifest.
    let manifest = ArchiveManifest::load(&engine.store, &engine.config.archive_dir).unwrap();
    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest.entries[0].original_path, "README.old.md");
}

#[test]
fn no_content_is_lost() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    mixed_repo(root);
    let before = snapshot(root);
    let engine = Engine::open(root).unwrap();
    engine.execute(&options("400"), &NoopVerifier).unwrap();

    let manifest = ArchiveManifest::load(&engine.store, &engine.config.archive_dir).unwrap();
    for (path, bytes) in &before {
        if root.join(path).exists() || engine.schema.relocations.contains_key(path) {
            continue;
        }
        let entry = manifest
            .find_by_hash(&hash_bytes(bytes))
            .unwrap_or_else(|| panic!("{} vanished without an archive entry", path));
        assert_eq!(&fs::read(root.join(&entry.archive_path)).unwrap(), bytes);
    }
    assert!(read(root, "README.md").contains("#### Changes"));
    assert_eq!(read(root, "src/app.js"), "export const run = () => 1;\n");
}

#[test]
fn references_resolve_after_a_completed_run() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    mixed_repo(root);
    let engine = Engine::open(root).unwrap();
    let (_, graph) = engine.scan().unwrap();
    assert_eq!(graph.broken().count(), 0);

    engine.execute(&options("500"), &NoopVerifier).unwrap();

    let (inventory, graph) = engine.scan().unwrap();
    assert_eq!(graph.broken().count(), 0);
    for edge in &graph.edges {
        assert!(inventory.contains(&edge.to));
    }
    assert_eq!(
        read(root, "docs/guide.md"),
        "Run [it](../src/app.js); old docs in [notes](../.reshelf/archive/500/NOTES.md).\n"
    );
    let archived: Vec<_> = graph
        .unresolved
        .iter()
        .filter(|u| u.reason == UnresolvedReason::Archived)
        .map(|u| u.from.as_str())
        .collect();
    assert_eq!(archived, vec!["README.md", "docs/guide.md"]);
}

#[test]
fn concurrent_run_is_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    mixed_repo(root);
    let engine = Engine::open(root).unwrap();
    let before = snapshot(root);

    let held = lock::acquire(&engine.store, "other-run").unwrap();
    let err = engine.execute(&options("600"), &NoopVerifier).unwrap_err();
    assert!(matches!(err, ReshelfError::LockContention(_)));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(snapshot(root), before);

    // Dry runs never take the lock.
    let preview = engine.execute(&dry_options("600"), &NoopVerifier).unwrap();
    assert_eq!(preview.records.len(), 3);
    drop(held);

    assert_eq!(engine.execute(&options("600"), &NoopVerifier).unwrap().state, RunState::Done);
    assert!(!engine.store.lock_path().exists());
}

#[test]
fn dry_run_mutates_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    mixed_repo(root);
    let before = snapshot(root);
    let engine = Engine::open(root).unwrap();

    let report = engine.execute(&dry_options("700"), &NoopVerifier).unwrap();
    assert!(report.dry_run);
    assert_eq!(report.state, RunState::Done);
    assert!(report.records.iter().all(|r| r.status == ActionStatus::Pending));
    assert_eq!(snapshot(root), before);
    assert!(!root.join(".reshelf/archive").exists());
    assert!(journal::list_runs(&engine.store).unwrap().is_empty());
}

#[test]
fn identical_content_is_archived_once() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write_schema(root, "version = 1\n\n[directories.\".\"]\nrequired = [\"README.md\"]\n");
    write(root, "README.md", "# R\n");
    write(root, "NOTES.md", "same notes\n");
    let engine = Engine::open(root).unwrap();
    engine.execute(&options("800"), &NoopVerifier).unwrap();

    write(root, "NOTES.md", "same notes\n");
    let (_, plan) = engine.plan("900").unwrap();
    match &plan.actions[..] {
        [MigrationAction::Archive { slot, .. }] => {
            assert!(slot.reused);
            assert_eq!(slot.archive_dst, ".reshelf/archive/800/NOTES.md");
        }
        other => panic!("unexpected plan {:?}", other),
    }
    let report = engine.execute(&options("900"), &NoopVerifier).unwrap();
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.manifest_appended, 0);
    assert!(!root.join("NOTES.md").exists());
    assert!(!root.join(".reshelf/archive/900").exists());
    assert_eq!(
        ArchiveManifest::load(&engine.store, &engine.config.archive_dir)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn cancellation_rolls_back_the_in_flight_action() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    mixed_repo(root);
    let before = snapshot(root);
    let engine = Engine::open(root).unwrap();

    let opts = options("550");
    opts.cancel.store(true, Ordering::SeqCst);
    let report = engine.execute(&opts, &NoopVerifier).unwrap();

    assert_eq!(report.state, RunState::HaltedOnFailure);
    assert_eq!(report.plan.actions.len(), 3);
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].status, ActionStatus::RolledBack);
    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.kind, "verification_failed");
    assert!(failure.cause.contains("cancelled"), "{}", failure.cause);
    assert_eq!(snapshot(root), before);
    assert_eq!(report.manifest_appended, 0);
    assert!(!engine.store.lock_path().exists());
}

/// Passes, but replaces the runs directory with a plain file.
struct BreakJournal {
    calls: Cell<usize>,
}

impl Verifier for BreakJournal {
    fn describe(&self) -> String {
        "break-journal".into()
    }

    fn verify(&self, root: &Path, _cancel: &AtomicBool) -> Result<VerifierOutcome, ReshelfError> {
        self.calls.set(self.calls.get() + 1);
        let runs = root.join(".reshelf/runs");
        fs::remove_dir_all(&runs)?;
        fs::write(&runs, "")?;
        Ok(VerifierOutcome::pass("ok"))
    }
}

#[test]
fn journal_failure_mid_action_reverts_it() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    mixed_repo(root);
    let before = snapshot(root);
    let engine = Engine::open(root).unwrap();

    let verifier = BreakJournal { calls: Cell::new(0) };
    let err = engine.execute(&options("560"), &verifier).unwrap_err();
    assert!(matches!(err, ReshelfError::IoError(_)));
    assert_eq!(verifier.calls.get(), 1);
    assert_eq!(snapshot(root), before);
    assert!(!engine.store.lock_path().exists());
    assert!(
        ArchiveManifest::load(&engine.store, &engine.config.archive_dir)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn read_phase_conflict_halts_before_mutation() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write_schema(root, "version = 1\n\n[relocations]\n\"a.md\" = \"docs/b.md\"\n");
    write(root, "a.md", "a\n");
    write(root, "docs/b.md", "b\n");
    let before = snapshot(root);
    let engine = Engine::open(root).unwrap();

    let err = engine.execute(&options("1"), &NoopVerifier).unwrap_err();
    assert!(matches!(err, ReshelfError::PlanConflict(_)));
    assert_eq!(snapshot(root), before);
    assert!(!engine.store.lock_path().exists());

    let runs = journal::list_runs(&engine.store).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].outcome, "run.halted");
}

#[test]
fn invalid_schema_is_rejected_with_exit_code_two() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write_schema(
        root,
        "version = 1\n\n[directories.\".\"]\nrequired = [\"README.md\"]\noptional = [\"README.md\"]\n",
    );
    let err = Engine::open(root).err().unwrap();
    assert!(matches!(err, ReshelfError::SchemaError(_)));
    assert_eq!(err.exit_code(), 2);

    write(root, ".reshelf/config.toml", "obsolete_patterns = [\"(\"]\n");
    write_schema(root, "version = 1\n");
    let err = Engine::open(root).err().unwrap();
    assert!(matches!(err, ReshelfError::ConfigError(_)));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn journal_records_the_state_machine() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    mixed_repo(root);
    let engine = Engine::open(root).unwrap();
    let report = engine.execute(&options("1000"), &NoopVerifier).unwrap();

    let events = journal::read_run(&engine.store, &report.run_id).unwrap();
    let states: Vec<String> = events
        .iter()
        .filter(|e| e.event == "run.state")
        .map(|e| e.detail["to"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(
        states,
        vec!["scanning", "classifying", "planning", "executing", "archiving", "done"]
    );
    assert_eq!(events.first().map(|e| e.event.as_str()), Some("run.started"));
    assert_eq!(events.last().map(|e| e.event.as_str()), Some("run.done"));
    assert_eq!(
        events.iter().filter(|e| e.event == "action.verified").count(),
        3
    );
    assert!(events.iter().all(|e| e.run_id == report.run_id));
}
