//! Per-run JSONL event journal under `.reshelf/runs/<run_id>.jsonl`.
//!
//! Every state transition of a run and of each action is appended as one
//! event, so a halted run can be reconstructed after the fact.

use crate::core::error::ReshelfError;
use crate::core::store::Store;
use crate::core::time;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub ts: String,
    pub event_id: String,
    pub run_id: String,
    pub event: String,
    #[serde(default)]
    pub detail: JsonValue,
}

#[derive(Debug, Clone)]
pub struct RunJournal {
    run_id: String,
    /// `None` for dry runs: events are dropped.
    path: Option<PathBuf>,
}

impl RunJournal {
    pub fn open(store: &Store, run_id: &str) -> Result<Self, ReshelfError> {
        fs::create_dir_all(store.runs_dir())?;
        Ok(RunJournal {
            run_id: run_id.to_string(),
            path: Some(store.run_journal_path(run_id)),
        })
    }

    pub fn discard(run_id: &str) -> Self {
        RunJournal {
            run_id: run_id.to_string(),
            path: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record(&self, event: &str, detail: JsonValue) -> Result<(), ReshelfError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let entry = RunEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            run_id: self.run_id.clone(),
            event: event.to_string(),
            detail,
        };
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(f, "{}", serde_json::to_string(&entry)?)?;
        Ok(())
    }
}

pub fn read_run(store: &Store, run_id: &str) -> Result<Vec<RunEvent>, ReshelfError> {
    let path = store.run_journal_path(run_id);
    if !path.exists() {
        return Err(ReshelfError::NotFound(format!("run {}", run_id)));
    }
    let content = fs::read_to_string(&path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(ReshelfError::from))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    /// Last `run.*` event seen.
    pub outcome: String,
    pub events: usize,
}

/// Every journaled run, oldest first (run ids are ULIDs).
pub fn list_runs(store: &Store) -> Result<Vec<RunSummary>, ReshelfError> {
    let dir = store.runs_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut ids: Vec<String> = fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            name.strip_suffix(".jsonl").map(str::to_string)
        })
        .collect();
    ids.sort();

    let mut out = Vec::new();
    for id in ids {
        let events = read_run(store, &id)?;
        let started_at = events.first().map(|e| e.ts.clone()).unwrap_or_default();
        let outcome = events
            .iter()
            .rev()
            .find(|e| e.event.starts_with("run."))
            .map(|e| e.event.clone())
            .unwrap_or_else(|| "unknown".to_string());
        out.push(RunSummary {
            run_id: id,
            started_at,
            outcome,
            events: events.len(),
        });
    }
    Ok(out)
}
