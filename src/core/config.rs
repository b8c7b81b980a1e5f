//! Engine configuration from `.reshelf/config.toml`.
//!
//! A missing file means defaults. Everything the classifier and executor treat
//! as policy (exclusions, obsolete-name patterns, the verifier command, confirmed
//! dispositions) comes from here; nothing is hard-coded at the call sites.

use crate::core::error::ReshelfError;
use crate::core::paths;
use crate::core::store::Store;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

pub const DEFAULT_SCHEMA_PATH: &str = ".reshelf/schema.toml";
pub const DEFAULT_ARCHIVE_DIR: &str = ".reshelf/archive";
pub const DEFAULT_VERIFIER_TIMEOUT_SECS: u64 = 600;

/// Directory names skipped by the scanner at any depth.
pub fn default_exclude() -> Vec<String> {
    [
        ".git",
        ".hg",
        ".svn",
        "target",
        "node_modules",
        "__pycache__",
        ".cache",
        "dist",
        "build",
        ".reshelf",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Filename patterns marking temp/backup/old copies.
pub fn default_obsolete_patterns() -> Vec<String> {
    [
        r"(?i)(^|[._-])(old|bak|backup|tmp|temp|orig|copy|draft|deprecated)([._-]|$)",
        r"~$",
        r"(?i)\.swp$",
        r"^#.*#$",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Operator-confirmed verdict for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Keep,
    Archive,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_VERIFIER_TIMEOUT_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Repo-relative path of the target schema.
    pub schema: String,
    /// Repo-relative archive root; always skipped by the scanner.
    pub archive_dir: String,
    pub exclude: Vec<String>,
    pub obsolete_patterns: Vec<String>,
    pub verifier: Option<VerifierConfig>,
    pub dispositions: BTreeMap<String, Disposition>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            schema: DEFAULT_SCHEMA_PATH.to_string(),
            archive_dir: DEFAULT_ARCHIVE_DIR.to_string(),
            exclude: default_exclude(),
            obsolete_patterns: default_obsolete_patterns(),
            verifier: None,
            dispositions: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn parse(content: &str) -> Result<Self, ReshelfError> {
        let mut config: Config =
            toml::from_str(content).map_err(|e| ReshelfError::ConfigError(e.to_string()))?;
        config.normalize()?;
        config.validate()?;
        Ok(config)
    }

    fn normalize(&mut self) -> Result<(), ReshelfError> {
        self.archive_dir = paths::normalize(&self.archive_dir)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                ReshelfError::ConfigError(format!(
                    "archive_dir '{}' must name a directory inside the repository",
                    self.archive_dir
                ))
            })?;
        let mut dispositions = BTreeMap::new();
        for (path, disposition) in &self.dispositions {
            let key = paths::normalize(path)
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    ReshelfError::ConfigError(format!("disposition path '{}' is invalid", path))
                })?;
            dispositions.insert(key, *disposition);
        }
        self.dispositions = dispositions;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ReshelfError> {
        self.compiled_obsolete_patterns()?;
        if let Some(v) = &self.verifier {
            if v.command.trim().is_empty() {
                return Err(ReshelfError::ConfigError(
                    "[verifier] command must not be empty".to_string(),
                ));
            }
            if v.timeout_secs == 0 {
                return Err(ReshelfError::ConfigError(
                    "[verifier] timeout_secs must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn compiled_obsolete_patterns(&self) -> Result<Vec<Regex>, ReshelfError> {
        self.obsolete_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    ReshelfError::ConfigError(format!("invalid obsolete pattern '{}': {}", p, e))
                })
            })
            .collect()
    }
}

/// Load `.reshelf/config.toml`; absent file yields defaults.
pub fn load_config(store: &Store) -> Result<Config, ReshelfError> {
    let path = store.config_path();
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = fs::read_to_string(&path).map_err(|e| {
        ReshelfError::ConfigError(format!("cannot read {}: {}", path.display(), e))
    })?;
    Config::parse(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.exclude.contains(&".git".to_string()));
    }

    #[test]
    fn parses_verifier_and_dispositions() {
        let config = Config::parse(
            r#"
archive_dir = "./.reshelf/archive/"

[verifier]
command = "cargo"
args = ["test"]

[dispositions]
"./scripts/old.js" = "archive"
"notes.txt" = "keep"
"#,
        )
        .unwrap();
        let verifier = config.verifier.unwrap();
        assert_eq!(verifier.timeout_secs, DEFAULT_VERIFIER_TIMEOUT_SECS);
        assert_eq!(config.archive_dir, ".reshelf/archive");
        assert_eq!(
            config.dispositions.get("scripts/old.js"),
            Some(&Disposition::Archive)
        );
        assert_eq!(config.dispositions.get("notes.txt"), Some(&Disposition::Keep));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            Config::parse("obsolete_patterns = [\"(\"]"),
            Err(ReshelfError::ConfigError(_))
        ));
        assert!(matches!(
            Config::parse("[verifier]\ncommand = \"make\"\ntimeout_secs = 0"),
            Err(ReshelfError::ConfigError(_))
        ));
        assert!(matches!(
            Config::parse("[dispositions]\n\"a.md\" = \"shred\""),
            Err(ReshelfError::ConfigError(_))
        ));
        assert!(matches!(
            Config::parse("archive_dir = \"../elsewhere\""),
            Err(ReshelfError::ConfigError(_))
        ));
        assert!(matches!(
            Config::parse("unknown_key = 1"),
            Err(ReshelfError::ConfigError(_))
        ));
    }
}
