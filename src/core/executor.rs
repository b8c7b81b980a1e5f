//! Safe executor.
//!
//! Applies a plan one action at a time on the calling thread. Each action's
//! filesystem mutation and reference rewrites are captured in an undo log,
//! then the verifier runs. A failed, timed-out or cancelled verification (or
//! any error once the mutation has started) reverts exactly that action
//! byte-for-byte and halts the run. Earlier verified actions are never revisited.

use crate::core::error::{FailureRecord, ReshelfError};
use crate::core::inventory::hash_bytes;
use crate::core::journal::RunJournal;
use crate::core::paths;
use crate::core::plan::{ArchiveSlot, MigrationAction, MigrationPlan};
use crate::core::refgraph::{self, RefEdit};
use crate::core::store::Store;
use crate::core::time;
use crate::core::vcs::{MoveMethod, Vcs};
use crate::plugins::archive::ManifestEntry;
use crate::plugins::merge::{self, MergeReport};
use crate::plugins::verify::Verifier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::sync::atomic::AtomicBool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Applied,
    Verified,
    Failed,
    RolledBack,
}

impl ActionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Applied => "applied",
            ActionStatus::Verified => "verified",
            ActionStatus::Failed => "failed",
            ActionStatus::RolledBack => "rolled_back",
        }
    }

    pub fn can_become(self, next: ActionStatus) -> bool {
        use ActionStatus::*;
        matches!(
            (self, next),
            (Pending, Applied)
                | (Pending, Failed)
                | (Applied, Verified)
                | (Applied, Failed)
                | (Failed, RolledBack)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRewrite {
    pub file: String,
    pub edits: Vec<RefEdit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub seq: usize,
    pub action: MigrationAction,
    pub status: ActionStatus,
    pub verifier_output: Option<String>,
    pub cause: Option<FailureRecord>,
    #[serde(default)]
    pub rewrites: Vec<FileRewrite>,
    #[serde(default)]
    pub merge_report: Option<MergeReport>,
    /// New archive placements, flushed to the manifest once verified.
    #[serde(default)]
    pub manifest_entries: Vec<ManifestEntry>,
}

impl ExecutionRecord {
    fn new(seq: usize, action: &MigrationAction) -> Self {
        ExecutionRecord {
            seq,
            action: action.clone(),
            status: ActionStatus::Pending,
            verifier_output: None,
            cause: None,
            rewrites: Vec::new(),
            merge_report: None,
            manifest_entries: Vec::new(),
        }
    }

    pub fn transition(&mut self, next: ActionStatus) -> Result<(), ReshelfError> {
        if !self.status.can_become(next) {
            return Err(ReshelfError::StateTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionOutcome {
    pub records: Vec<ExecutionRecord>,
    /// Set when the run halted.
    pub failure: Option<FailureRecord>,
}

impl ExecutionOutcome {
    pub fn halted(&self) -> bool {
        self.failure.is_some()
    }

    pub fn verified(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records
            .iter()
            .filter(|r| r.status == ActionStatus::Verified)
    }
}

/// Everything needed to put one action's files back exactly as they were.
#[derive(Debug, Default)]
struct UndoLog {
    /// First-seen content per path; `None` means the path did not exist.
    snapshots: Vec<(String, Option<Vec<u8>>)>,
    seen: BTreeSet<String>,
    created_dirs: Vec<String>,
    moves: Vec<(String, String, MoveMethod)>,
}

impl UndoLog {
    fn snapshot(&mut self, store: &Store, rel: &str) -> Result<(), ReshelfError> {
        if !self.seen.insert(rel.to_string()) {
            return Ok(());
        }
        let abs = store.abs(rel);
        let bytes = if abs.is_file() {
            Some(fs::read(&abs)?)
        } else {
            None
        };
        self.snapshots.push((rel.to_string(), bytes));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Applied {
    rewrites: Vec<FileRewrite>,
    merge_report: Option<MergeReport>,
    manifest_entries: Vec<ManifestEntry>,
}

impl Applied {
    fn add_edits(&mut self, file: &str, edits: Vec<RefEdit>) {
        match self.rewrites.iter_mut().find(|r| r.file == file) {
            Some(existing) => existing.edits.extend(edits),
            None => self.rewrites.push(FileRewrite {
                file: file.to_string(),
                edits,
            }),
        }
    }
}

pub struct Executor<'a> {
    pub store: &'a Store,
    pub vcs: &'a Vcs,
    pub verifier: &'a dyn Verifier,
    pub cancel: &'a AtomicBool,
    pub journal: &'a RunJournal,
    pub dry_run: bool,
}

impl<'a> Executor<'a> {
    pub fn run(&self, plan: &MigrationPlan) -> Result<ExecutionOutcome, ReshelfError> {
        let mut outcome = ExecutionOutcome::default();
        for (idx, action) in plan.actions.iter().enumerate() {
            let mut record = ExecutionRecord::new(idx + 1, action);
            self.log(&record)?;
            if self.dry_run {
                outcome.records.push(record);
                continue;
            }

            let mut undo = UndoLog::default();
            let label = action.to_string();
            let failure = match self.apply(action, &mut undo) {
                Ok(applied) => {
                    record.rewrites = applied.rewrites;
                    record.merge_report = applied.merge_report;
                    record.manifest_entries = applied.manifest_entries;
                    self.settle(&mut record, &label).err()
                }
                Err(e) => Some(e),
            };

            let Some(err) = failure else {
                outcome.records.push(record);
                continue;
            };
            // The undo log is replayed before anything else can fail.
            let rolled_back = self.rollback(undo);
            record.cause = Some(err.record(Some(&label)));
            record.manifest_entries.clear();
            record.transition(ActionStatus::Failed)?;
            self.log(&record)?;
            match rolled_back {
                Ok(()) => {
                    record.transition(ActionStatus::RolledBack)?;
                    self.log(&record)?;
                    outcome.failure = record.cause.clone();
                }
                Err(rollback_err) => {
                    let fatal = rollback_err.record(Some(&label));
                    self.journal.record(
                        "action.rollback_failed",
                        serde_json::json!({ "seq": record.seq, "failure": fatal }),
                    )?;
                    outcome.failure = Some(fatal);
                }
            }
            outcome.records.push(record);
            break;
        }
        Ok(outcome)
    }

    /// Journal the applied action, run the verifier and mark it verified.
    /// Any error leaves the record `Pending` or `Applied` so it can fail.
    fn settle(&self, record: &mut ExecutionRecord, label: &str) -> Result<(), ReshelfError> {
        record.transition(ActionStatus::Applied)?;
        self.log(record)?;
        let v = self.verifier.verify(&self.store.root, self.cancel)?;
        let passed = v.passed;
        let cause = v.cause();
        record.verifier_output = Some(v.output);
        if !passed {
            return Err(ReshelfError::VerificationFailed {
                action: label.to_string(),
                cause,
            });
        }
        self.log_as(record, ActionStatus::Verified)?;
        record.transition(ActionStatus::Verified)
    }

    fn log(&self, record: &ExecutionRecord) -> Result<(), ReshelfError> {
        self.log_as(record, record.status)
    }

    fn log_as(&self, record: &ExecutionRecord, status: ActionStatus) -> Result<(), ReshelfError> {
        self.journal.record(
            &format!("action.{}", status.as_str()),
            serde_json::json!({
                "seq": record.seq,
                "action": record.action.to_string(),
                "cause": record.cause,
            }),
        )
    }

    fn exists(&self) -> impl Fn(&str) -> bool + '_ {
        move |p: &str| self.store.abs(p).is_file()
    }

    /// Create missing parent directories of `rel`, remembering which ones.
    fn ensure_parent(&self, rel: &str, undo: &mut UndoLog) -> Result<(), ReshelfError> {
        let mut missing = Vec::new();
        let mut dir = paths::parent_dir(rel);
        while !dir.is_empty() && !self.store.abs(dir).exists() {
            missing.push(dir.to_string());
            dir = paths::parent_dir(dir);
        }
        for d in missing.iter().rev() {
            fs::create_dir(self.store.abs(d))?;
            undo.created_dirs.push(d.clone());
        }
        Ok(())
    }

    fn retarget_file(
        &self,
        file: &str,
        old_target: &str,
        new_target: &str,
        applied: &mut Applied,
    ) -> Result<(), ReshelfError> {
        let abs = self.store.abs(file);
        let bytes = fs::read(&abs).map_err(|e| {
            ReshelfError::NotFound(format!("referrer {} unreadable: {}", file, e))
        })?;
        let Ok(content) = String::from_utf8(bytes) else {
            return Ok(());
        };
        let exists = self.exists();
        if let Some((updated, edits)) =
            refgraph::retarget(&content, file, old_target, new_target, &exists)
        {
            fs::write(&abs, updated)?;
            applied.add_edits(file, edits);
        }
        Ok(())
    }

    fn archive_slot(
        &self,
        slot: &ArchiveSlot,
        reason: &str,
        undo: &mut UndoLog,
    ) -> Result<Option<ManifestEntry>, ReshelfError> {
        let src_abs = self.store.abs(&slot.src);
        let bytes = fs::read(&src_abs)?;
        let content_hash = hash_bytes(&bytes);
        undo.snapshot(self.store, &slot.src)?;

        if slot.reused {
            let kept = fs::read(self.store.abs(&slot.archive_dst))
                .ok()
                .map(|b| hash_bytes(&b));
            if content_hash != slot.content_hash || kept.as_deref() != Some(content_hash.as_str())
            {
                return Err(ReshelfError::ArchiveCollision(format!(
                    "{} no longer matches the archived copy at {}",
                    slot.src, slot.archive_dst
                )));
            }
            fs::remove_file(&src_abs)?;
            return Ok(None);
        }

        if self.store.abs(&slot.archive_dst).exists() {
            return Err(ReshelfError::ArchiveCollision(format!(
                "{} already exists",
                slot.archive_dst
            )));
        }
        undo.snapshot(self.store, &slot.archive_dst)?;
        self.ensure_parent(&slot.archive_dst, undo)?;
        fs::rename(&src_abs, self.store.abs(&slot.archive_dst))?;
        Ok(Some(ManifestEntry {
            timestamp: time::now_epoch_z(),
            original_path: slot.src.clone(),
            archive_path: slot.archive_dst.clone(),
            content_hash,
            reason: reason.to_string(),
        }))
    }

    fn apply(&self, action: &MigrationAction, undo: &mut UndoLog) -> Result<Applied, ReshelfError> {
        let mut applied = Applied::default();
        for file in &action.rewrites().files {
            undo.snapshot(self.store, file)?;
        }
        match action {
            MigrationAction::Move { src, dst, rewrites } => {
                if self.store.abs(dst).exists() {
                    return Err(ReshelfError::PlanConflict(format!("{} already exists", dst)));
                }
                undo.snapshot(self.store, src)?;
                undo.snapshot(self.store, dst)?;
                self.ensure_parent(dst, undo)?;
                let method = self.vcs.move_path(src, dst)?;
                undo.moves.push((src.clone(), dst.clone(), method));

                let dst_abs = self.store.abs(dst);
                if let Ok(content) = fs::read_to_string(&dst_abs) {
                    let exists = self.exists();
                    if let Some((updated, edits)) = refgraph::relink(&content, src, dst, &exists) {
                        fs::write(&dst_abs, updated)?;
                        applied.add_edits(dst, edits);
                    }
                }
                for file in &rewrites.files {
                    self.retarget_file(file, src, dst, &mut applied)?;
                }
            }
            MigrationAction::Merge {
                srcs,
                dst,
                archived,
                rewrites,
            } => {
                undo.snapshot(self.store, dst)?;
                let target = fs::read_to_string(self.store.abs(dst))?;
                let mut sources = Vec::with_capacity(srcs.len());
                for s in srcs {
                    let text = fs::read_to_string(self.store.abs(s)).map_err(|e| {
                        ReshelfError::ValidationError(format!("cannot merge {}: {}", s, e))
                    })?;
                    sources.push((s.clone(), text));
                }
                let (merged, report) = merge::merge_contents(dst, &target, &sources);
                if merged != target {
                    fs::write(self.store.abs(dst), merged)?;
                }
                applied.merge_report = Some(report);
                for file in &rewrites.files {
                    for s in srcs {
                        self.retarget_file(file, s, dst, &mut applied)?;
                    }
                }
                let reason = format!("merged into {}", dst);
                for slot in archived {
                    if let Some(entry) = self.archive_slot(slot, &reason, undo)? {
                        applied.manifest_entries.push(entry);
                    }
                }
            }
            MigrationAction::Archive { slot, rewrites }
            | MigrationAction::Delete { slot, rewrites } => {
                if let Some(entry) = self.archive_slot(slot, action.op(), undo)? {
                    applied.manifest_entries.push(entry);
                }
                for file in &rewrites.files {
                    self.retarget_file(file, &slot.src, &slot.archive_dst, &mut applied)?;
                }
            }
        }
        Ok(applied)
    }

    fn rollback(&self, undo: UndoLog) -> Result<(), ReshelfError> {
        let mut problems = Vec::new();
        for (src, dst, method) in undo.moves.iter().rev() {
            if let Err(e) = self.vcs.undo_move(src, dst, *method) {
                problems.push(format!("move {} back to {}: {}", dst, src, e));
            }
        }
        for (rel, bytes) in &undo.snapshots {
            let abs = self.store.abs(rel);
            let result = match bytes {
                Some(b) => abs
                    .parent()
                    .map(fs::create_dir_all)
                    .transpose()
                    .and_then(|_| fs::write(&abs, b)),
                None if abs.exists() => fs::remove_file(&abs),
                None => Ok(()),
            };
            if let Err(e) = result {
                problems.push(format!("restore {}: {}", rel, e));
            }
        }
        for dir in undo.created_dirs.iter().rev() {
            match fs::remove_dir(self.store.abs(dir)) {
                Ok(()) => {}
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::DirectoryNotEmpty
                    ) => {}
                Err(e) => problems.push(format!("remove {}: {}", dir, e)),
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ReshelfError::RollbackFailed {
                action: "rollback".to_string(),
                cause: problems.join("; "),
            })
        }
    }
}
