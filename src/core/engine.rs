//! Run engine: the state machine that ties scanning, classification,
//! planning, execution and archiving together.
//!
//! `Scanning -> Classifying -> Planning -> Executing -> Archiving -> Done`,
//! with `HaltedOnFailure` reachable from every non-terminal state. Read-phase
//! failures halt before any mutation. Manifest entries for verified actions
//! are flushed in `Archiving` whether or not execution halted.

use crate::core::classify::{self, Classification, RuleClassifier};
use crate::core::config::{self, Config};
use crate::core::error::{FailureRecord, ReshelfError};
use crate::core::executor::{ExecutionOutcome, ExecutionRecord, Executor};
use crate::core::inventory::{self, Inventory, ScanOptions};
use crate::core::journal::RunJournal;
use crate::core::lock;
use crate::core::plan::{self, MigrationPlan, PlanInput};
use crate::core::refgraph::{self, ReferenceGraph};
use crate::core::schema::{self, TargetSchema};
use crate::core::store::Store;
use crate::core::time;
use crate::core::vcs::Vcs;
use crate::plugins::archive::ArchiveManifest;
use crate::plugins::verify::Verifier;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Scanning,
    Classifying,
    Planning,
    Executing,
    Archiving,
    Done,
    HaltedOnFailure,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Scanning => "scanning",
            RunState::Classifying => "classifying",
            RunState::Planning => "planning",
            RunState::Executing => "executing",
            RunState::Archiving => "archiving",
            RunState::Done => "done",
            RunState::HaltedOnFailure => "halted_on_failure",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::HaltedOnFailure)
    }

    pub fn can_become(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Scanning, Classifying)
            | (Classifying, Planning)
            | (Planning, Executing)
            | (Executing, Archiving)
            | (Archiving, Done) => true,
            (from, HaltedOnFailure) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Tracks the run state and journals every transition.
pub struct RunMachine<'j> {
    state: RunState,
    journal: &'j RunJournal,
}

impl<'j> RunMachine<'j> {
    pub fn start(journal: &'j RunJournal) -> Result<Self, ReshelfError> {
        journal.record(
            "run.state",
            serde_json::json!({ "from": null, "to": RunState::Scanning.as_str() }),
        )?;
        Ok(RunMachine {
            state: RunState::Scanning,
            journal,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn advance(&mut self, next: RunState) -> Result<(), ReshelfError> {
        if !self.state.can_become(next) {
            return Err(ReshelfError::StateTransition {
                from: self.state.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.journal.record(
            "run.state",
            serde_json::json!({ "from": self.state.as_str(), "to": next.as_str() }),
        )?;
        self.state = next;
        Ok(())
    }
}

/// Fresh per-run view of the repository.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub inventory: Inventory,
    pub graph: ReferenceGraph,
    pub classifications: Vec<Classification>,
}

impl Analysis {
    pub fn ambiguities(&self) -> Vec<FailureRecord> {
        classify::ambiguities(&self.classifications)
    }
}

#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub dry_run: bool,
    /// Archive directory name for this run; defaults to the current epoch seconds.
    pub run_stamp: Option<String>,
    /// Use `git mv` for tracked files when the root is a git work tree.
    pub use_git: bool,
    pub cancel: Arc<AtomicBool>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        ExecuteOptions {
            dry_run: false,
            run_stamp: None,
            use_git: true,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub run_stamp: String,
    pub dry_run: bool,
    pub state: RunState,
    pub verifier: String,
    pub plan: MigrationPlan,
    pub records: Vec<ExecutionRecord>,
    pub ambiguities: Vec<FailureRecord>,
    pub failure: Option<FailureRecord>,
    pub manifest_appended: usize,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        if self.state == RunState::Done { 0 } else { 1 }
    }
}

pub struct Engine {
    pub store: Store,
    pub config: Config,
    pub schema: TargetSchema,
}

impl Engine {
    /// Load configuration and schema for the repository at `root`. Both are
    /// validated here, before anything else can touch the tree.
    pub fn open(root: &Path) -> Result<Self, ReshelfError> {
        let store = Store::new(root);
        let config = config::load_config(&store)?;
        let schema = schema::load_schema(&store, &config.schema)?;
        Ok(Engine {
            store,
            config,
            schema,
        })
    }

    pub fn scan(&self) -> Result<(Inventory, ReferenceGraph), ReshelfError> {
        let inventory = inventory::scan(&self.store.root, &ScanOptions::from_config(&self.config))?;
        let graph = refgraph::build(&self.store.root, &inventory, &self.config.archive_dir)?;
        Ok((inventory, graph))
    }

    pub fn classify(
        &self,
        inventory: &Inventory,
        graph: &ReferenceGraph,
    ) -> Result<Vec<Classification>, ReshelfError> {
        let strategy = RuleClassifier::from_config(&self.config)?;
        Ok(classify::classify_all(&strategy, inventory, &self.schema, graph))
    }

    pub fn analyze(&self) -> Result<Analysis, ReshelfError> {
        let (inventory, graph) = self.scan()?;
        let classifications = self.classify(&inventory, &graph)?;
        Ok(Analysis {
            inventory,
            graph,
            classifications,
        })
    }

    pub fn plan_for(&self, analysis: &Analysis, run_stamp: &str) -> Result<MigrationPlan, ReshelfError> {
        let manifest = ArchiveManifest::load(&self.store, &self.config.archive_dir)?;
        let occupied = |p: &str| self.store.abs(p).exists();
        plan::build_plan(&PlanInput {
            classifications: &analysis.classifications,
            graph: &analysis.graph,
            manifest: &manifest,
            archive_dir: &self.config.archive_dir,
            run_stamp,
            occupied: &occupied,
        })
    }

    /// Analyze and plan without mutating anything.
    pub fn plan(&self, run_stamp: &str) -> Result<(Analysis, MigrationPlan), ReshelfError> {
        let analysis = self.analyze()?;
        let plan = self.plan_for(&analysis, run_stamp)?;
        Ok((analysis, plan))
    }

    pub fn execute(
        &self,
        opts: &ExecuteOptions,
        verifier: &dyn Verifier,
    ) -> Result<RunReport, ReshelfError> {
        let run_id = time::new_run_id();
        let run_stamp = opts
            .run_stamp
            .clone()
            .unwrap_or_else(|| time::now_epoch_secs().to_string());
        let _lease = if opts.dry_run {
            None
        } else {
            Some(lock::acquire(&self.store, &run_id)?)
        };
        let journal = if opts.dry_run {
            RunJournal::discard(&run_id)
        } else {
            RunJournal::open(&self.store, &run_id)?
        };
        journal.record(
            "run.started",
            serde_json::json!({
                "run_stamp": run_stamp,
                "dry_run": opts.dry_run,
                "verifier": verifier.describe(),
            }),
        )?;

        let mut machine = RunMachine::start(&journal)?;
        let (analysis, plan) = match self.read_phase(&mut machine, &run_stamp) {
            Ok(v) => v,
            Err(e) => return Err(halt(&mut machine, &journal, e)),
        };
        let ambiguities = analysis.ambiguities();
        for a in &ambiguities {
            journal.record("classification.ambiguous", serde_json::to_value(a)?)?;
        }
        journal.record(
            "plan.built",
            serde_json::json!({
                "actions": plan.actions.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
            }),
        )?;

        machine.advance(RunState::Executing)?;
        let vcs = if opts.use_git && !opts.dry_run {
            Vcs::detect(&self.store.root)
        } else {
            Vcs::disabled(&self.store.root)
        };
        journal.record(
            "vcs.detected",
            serde_json::json!({ "moves": if vcs.is_git() { "git" } else { "rename" } }),
        )?;
        let executed = Executor {
            store: &self.store,
            vcs: &vcs,
            verifier,
            cancel: &opts.cancel,
            journal: &journal,
            dry_run: opts.dry_run,
        }
        .run(&plan);
        let outcome = match executed {
            Ok(outcome) => outcome,
            Err(e) => return Err(halt(&mut machine, &journal, e)),
        };

        machine.advance(RunState::Archiving)?;
        let manifest_appended = if opts.dry_run {
            0
        } else {
            self.flush_manifest(&outcome, &journal)?
        };

        let final_state = if outcome.halted() {
            RunState::HaltedOnFailure
        } else {
            RunState::Done
        };
        machine.advance(final_state)?;
        let ExecutionOutcome { records, failure } = outcome;
        journal.record(
            if failure.is_some() { "run.halted" } else { "run.done" },
            serde_json::json!({ "failure": failure, "manifest_appended": manifest_appended }),
        )?;

        Ok(RunReport {
            run_id,
            run_stamp,
            dry_run: opts.dry_run,
            state: machine.state(),
            verifier: verifier.describe(),
            plan,
            records,
            ambiguities,
            failure,
            manifest_appended,
        })
    }

    fn read_phase(
        &self,
        machine: &mut RunMachine<'_>,
        run_stamp: &str,
    ) -> Result<(Analysis, MigrationPlan), ReshelfError> {
        let (inventory, graph) = self.scan()?;
        machine.advance(RunState::Classifying)?;
        let classifications = self.classify(&inventory, &graph)?;
        machine.advance(RunState::Planning)?;
        let analysis = Analysis {
            inventory,
            graph,
            classifications,
        };
        let plan = self.plan_for(&analysis, run_stamp)?;
        Ok((analysis, plan))
    }

    fn flush_manifest(
        &self,
        outcome: &ExecutionOutcome,
        journal: &RunJournal,
    ) -> Result<usize, ReshelfError> {
        let mut manifest = ArchiveManifest::load(&self.store, &self.config.archive_dir)?;
        let mut appended = 0;
        for record in outcome.verified() {
            for entry in &record.manifest_entries {
                if manifest.append(&self.store, &self.config.archive_dir, entry.clone())? {
                    appended += 1;
                    journal.record("manifest.appended", serde_json::to_value(entry)?)?;
                }
            }
        }
        Ok(appended)
    }
}

/// Move to `HaltedOnFailure` and journal the failure. A journal error here
/// is dropped so the caller still sees the failure that caused the halt.
fn halt(machine: &mut RunMachine<'_>, journal: &RunJournal, err: ReshelfError) -> ReshelfError {
    if machine.advance(RunState::HaltedOnFailure).is_ok() {
        let _ = journal.record("run.halted", serde_json::json!({ "failure": err.record(None) }));
    }
    err
}
