//! Target schema: the versioned description of the layout a repository must reach.
//!
//! ```toml
//! version = 1
//!
//! [directories."."]
//! required = ["README.md", "LICENSE"]
//! optional = ["CHANGELOG.md"]
//! aliases = { "OLD_README.md" = "README.md" }
//!
//! [relocations]
//! "app.js" = "src/app.js"
//! ```
//!
//! A directory listed under `directories` is governed: once a run completes it
//! holds only its required and optional files. Directories not listed are left
//! alone unless a relocation names one of their files.

use crate::core::error::ReshelfError;
use crate::core::paths;
use crate::core::store::Store;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;

pub const SUPPORTED_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSchema {
    version: u32,
    #[serde(default)]
    directories: BTreeMap<String, RawDirectory>,
    #[serde(default)]
    relocations: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDirectory {
    #[serde(default)]
    required: Vec<String>,
    #[serde(default)]
    optional: Vec<String>,
    #[serde(default)]
    aliases: BTreeMap<String, String>,
}

/// Allowed-set rule for one governed directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryRule {
    pub required: BTreeSet<String>,
    pub optional: BTreeSet<String>,
    /// Alias filename -> allowed filename it stands in for.
    pub aliases: BTreeMap<String, String>,
}

impl DirectoryRule {
    pub fn allows(&self, name: &str) -> bool {
        self.required.contains(name) || self.optional.contains(name)
    }

    pub fn alias_target(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetSchema {
    pub version: u32,
    /// Keyed by normalized repo-relative directory; the root is `""`.
    pub directories: BTreeMap<String, DirectoryRule>,
    /// Source path -> destination path.
    pub relocations: BTreeMap<String, String>,
}

impl TargetSchema {
    pub fn parse(content: &str) -> Result<Self, ReshelfError> {
        let raw: RawSchema =
            toml::from_str(content).map_err(|e| ReshelfError::SchemaError(e.to_string()))?;
        if raw.version != SUPPORTED_SCHEMA_VERSION {
            return Err(ReshelfError::SchemaError(format!(
                "unsupported schema version {} (expected {})",
                raw.version, SUPPORTED_SCHEMA_VERSION
            )));
        }

        let mut directories = BTreeMap::new();
        for (key, dir) in raw.directories {
            let norm = paths::normalize(&key).ok_or_else(|| {
                ReshelfError::SchemaError(format!("directory '{}' escapes the repository", key))
            })?;
            let rule = build_rule(&key, dir)?;
            if directories.insert(norm.clone(), rule).is_some() {
                return Err(ReshelfError::SchemaError(format!(
                    "directory '{}' is declared more than once",
                    paths::display_dir(&norm)
                )));
            }
        }

        let mut relocations = BTreeMap::new();
        let mut destinations = BTreeSet::new();
        for (from, to) in raw.relocations {
            let src = normalize_file_path(&from)?;
            let dst = normalize_file_path(&to)?;
            if src == dst {
                return Err(ReshelfError::SchemaError(format!(
                    "relocation '{}' points at itself",
                    from
                )));
            }
            if !destinations.insert(dst.clone()) {
                return Err(ReshelfError::SchemaError(format!(
                    "more than one relocation targets '{}'",
                    dst
                )));
            }
            if relocations.insert(src.clone(), dst).is_some() {
                return Err(ReshelfError::SchemaError(format!(
                    "relocation source '{}' is declared more than once",
                    src
                )));
            }
        }

        let schema = TargetSchema {
            version: raw.version,
            directories,
            relocations,
        };
        schema.check_relocations()?;
        Ok(schema)
    }

    pub fn rule_for(&self, dir: &str) -> Option<&DirectoryRule> {
        self.directories.get(dir)
    }

    /// Whether `path` may exist at its location under this schema.
    pub fn allows_path(&self, path: &str) -> bool {
        match self.rule_for(paths::parent_dir(path)) {
            Some(rule) => rule.allows(paths::file_name(path)),
            None => true,
        }
    }

    fn check_relocations(&self) -> Result<(), ReshelfError> {
        for (src, dst) in &self.relocations {
            if !self.allows_path(dst) {
                return Err(ReshelfError::SchemaError(format!(
                    "relocation '{}' -> '{}' targets a name not allowed in '{}'",
                    src,
                    dst,
                    paths::display_dir(paths::parent_dir(dst))
                )));
            }
            if let Some(rule) = self.rule_for(paths::parent_dir(src)) {
                if rule.allows(paths::file_name(src)) {
                    return Err(ReshelfError::SchemaError(format!(
                        "'{}' is both allowed in place and relocated to '{}'",
                        src, dst
                    )));
                }
            }
        }
        Ok(())
    }
}

fn normalize_file_path(path: &str) -> Result<String, ReshelfError> {
    paths::normalize(path)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ReshelfError::SchemaError(format!("'{}' is not a repository file path", path)))
}

fn check_name(dir: &str, name: &str) -> Result<(), ReshelfError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(ReshelfError::SchemaError(format!(
            "'{}' in directory '{}' must be a plain filename",
            name, dir
        )));
    }
    Ok(())
}

fn build_rule(dir: &str, raw: RawDirectory) -> Result<DirectoryRule, ReshelfError> {
    let mut required = BTreeSet::new();
    for name in raw.required {
        check_name(dir, &name)?;
        if !required.insert(name.clone()) {
            return Err(ReshelfError::SchemaError(format!(
                "'{}' is listed twice as required in '{}'",
                name, dir
            )));
        }
    }
    let mut optional = BTreeSet::new();
    for name in raw.optional {
        check_name(dir, &name)?;
        if required.contains(&name) {
            return Err(ReshelfError::SchemaError(format!(
                "'{}' is both required and optional in '{}'",
                name, dir
            )));
        }
        if !optional.insert(name.clone()) {
            return Err(ReshelfError::SchemaError(format!(
                "'{}' is listed twice as optional in '{}'",
                name, dir
            )));
        }
    }
    for (alias, target) in &raw.aliases {
        check_name(dir, alias)?;
        if required.contains(alias) || optional.contains(alias) {
            return Err(ReshelfError::SchemaError(format!(
                "alias '{}' in '{}' is itself an allowed file",
                alias, dir
            )));
        }
        if !required.contains(target) && !optional.contains(target) {
            return Err(ReshelfError::SchemaError(format!(
                "alias '{}' in '{}' points at '{}', which is not allowed there",
                alias, dir, target
            )));
        }
    }
    Ok(DirectoryRule {
        required,
        optional,
        aliases: raw.aliases,
    })
}

/// Load the schema named by the configuration.
pub fn load_schema(store: &Store, schema_path: &str) -> Result<TargetSchema, ReshelfError> {
    let path = store.abs(schema_path);
    let content = fs::read_to_string(&path).map_err(|e| {
        ReshelfError::SchemaError(format!("cannot read {}: {}", path.display(), e))
    })?;
    TargetSchema::parse(&content)
}
