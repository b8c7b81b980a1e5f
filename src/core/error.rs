use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReshelfError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Scan error at '{path}': {cause}")]
    ScanError { path: String, cause: String },
    #[error("Schema error: {0}")]
    SchemaError(String),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Classification ambiguous for '{path}': {reason}")]
    ClassificationAmbiguous { path: String, reason: String },
    #[error("Plan cycle: {0}")]
    PlanCycleError(String),
    #[error("Plan conflict: {0}")]
    PlanConflict(String),
    #[error("Verification failed for {action}: {cause}")]
    VerificationFailed { action: String, cause: String },
    #[error("Already running: {0}")]
    LockContention(String),
    #[error("Archive collision: {0}")]
    ArchiveCollision(String),
    #[error("Rollback failed for {action}: {cause}")]
    RollbackFailed { action: String, cause: String },
    #[error("Illegal state transition: {from} -> {to}")]
    StateTransition { from: String, to: String },
    #[error("VCS error: {0}")]
    VcsError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Structured failure carried into reports and run journals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: String,
    pub action: Option<String>,
    pub cause: String,
    pub remediation: String,
}

impl ReshelfError {
    pub fn kind(&self) -> &'static str {
        match self {
            ReshelfError::IoError(_) => "io_error",
            ReshelfError::JsonError(_) => "json_error",
            ReshelfError::ScanError { .. } => "scan_error",
            ReshelfError::SchemaError(_) => "schema_error",
            ReshelfError::ConfigError(_) => "config_error",
            ReshelfError::ClassificationAmbiguous { .. } => "classification_ambiguous",
            ReshelfError::PlanCycleError(_) => "plan_cycle_error",
            ReshelfError::PlanConflict(_) => "plan_conflict",
            ReshelfError::VerificationFailed { .. } => "verification_failed",
            ReshelfError::LockContention(_) => "lock_contention",
            ReshelfError::ArchiveCollision(_) => "archive_collision",
            ReshelfError::RollbackFailed { .. } => "rollback_failed",
            ReshelfError::StateTransition { .. } => "state_transition",
            ReshelfError::VcsError(_) => "vcs_error",
            ReshelfError::ValidationError(_) => "validation_error",
            ReshelfError::NotFound(_) => "not_found",
        }
    }

    pub fn remediation(&self) -> &'static str {
        match self {
            ReshelfError::ScanError { .. } => {
                "Fix permissions on the path or add it to `exclude` in .reshelf/config.toml, then rerun."
            }
            ReshelfError::SchemaError(_) => {
                "Correct .reshelf/schema.toml; run `reshelf schema check` until it passes."
            }
            ReshelfError::ConfigError(_) => "Correct .reshelf/config.toml and rerun.",
            ReshelfError::ClassificationAmbiguous { .. } => {
                "Confirm a disposition for the path under [dispositions] in .reshelf/config.toml."
            }
            ReshelfError::PlanCycleError(_) => {
                "Break the move cycle by relocating one file through an intermediate path in the schema."
            }
            ReshelfError::PlanConflict(_) => {
                "Choose a destination that is free, or archive the occupying file first."
            }
            ReshelfError::VerificationFailed { .. } => {
                "Inspect the verifier output, fix the cause, and rerun; verified actions are kept."
            }
            ReshelfError::LockContention(_) => {
                "Wait for the active run to finish; remove .reshelf/run.lock only if no run is active."
            }
            ReshelfError::ArchiveCollision(_) => {
                "Clean up the archive run directory or rerun to get a fresh run stamp."
            }
            ReshelfError::RollbackFailed { .. } => {
                "Restore the listed files from version control before rerunning."
            }
            _ => "Rerun with --format json for details.",
        }
    }

    pub fn record(&self, action: Option<&str>) -> FailureRecord {
        FailureRecord {
            kind: self.kind().to_string(),
            action: action.map(str::to_string),
            cause: self.to_string(),
            remediation: self.remediation().to_string(),
        }
    }

    /// Process exit code for the CLI surface.
    pub fn exit_code(&self) -> i32 {
        match self {
            ReshelfError::SchemaError(_) | ReshelfError::ConfigError(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_and_config_errors_exit_with_two() {
        assert_eq!(ReshelfError::SchemaError("x".into()).exit_code(), 2);
        assert_eq!(ReshelfError::ConfigError("x".into()).exit_code(), 2);
        assert_eq!(ReshelfError::LockContention("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_record_carries_kind_and_remediation() {
        let err = ReshelfError::VerificationFailed {
            action: "move a -> b".into(),
            cause: "exit code 3".into(),
        };
        let rec = err.record(Some("move a -> b"));
        assert_eq!(rec.kind, "verification_failed");
        assert_eq!(rec.action.as_deref(), Some("move a -> b"));
        assert!(rec.cause.contains("exit code 3"));
        assert!(!rec.remediation.is_empty());
    }
}
