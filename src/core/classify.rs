//! File classification against the target schema.
//!
//! Classification is a pure function of (FileNode, TargetSchema, ReferenceGraph)
//! behind the `ClassificationStrategy` trait, so the obsolescence heuristics can
//! be swapped or tested in isolation.

use crate::core::config::{Config, Disposition};
use crate::core::error::{FailureRecord, ReshelfError};
use crate::core::inventory::{FileKind, FileNode, Inventory};
use crate::core::paths;
use crate::core::refgraph::ReferenceGraph;
use crate::core::schema::TargetSchema;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "target", rename_all = "snake_case")]
pub enum Verdict {
    Conforming,
    MergeCandidate(String),
    RelocateCandidate(String),
    ArchiveCandidate,
    DeleteCandidate,
    Unclassified,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Conforming => write!(f, "conforming"),
            Verdict::MergeCandidate(target) => write!(f, "merge -> {}", target),
            Verdict::RelocateCandidate(target) => write!(f, "relocate -> {}", target),
            Verdict::ArchiveCandidate => write!(f, "archive"),
            Verdict::DeleteCandidate => write!(f, "delete"),
            Verdict::Unclassified => write!(f, "unclassified"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub file: String,
    pub verdict: Verdict,
    pub reason: String,
}

pub trait ClassificationStrategy {
    fn classify(&self, node: &FileNode, schema: &TargetSchema, graph: &ReferenceGraph)
    -> Classification;
}

/// Default rule set: dispositions, relocations, allowed names, aliases,
/// duplicates, obsolete-name patterns, then the conservative archive default.
pub struct RuleClassifier {
    obsolete: Vec<Regex>,
    dispositions: BTreeMap<String, Disposition>,
}

impl RuleClassifier {
    pub fn new(obsolete: Vec<Regex>, dispositions: BTreeMap<String, Disposition>) -> Self {
        RuleClassifier {
            obsolete,
            dispositions,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ReshelfError> {
        Ok(RuleClassifier::new(
            config.compiled_obsolete_patterns()?,
            config.dispositions.clone(),
        ))
    }

    fn looks_obsolete(&self, name: &str) -> bool {
        self.obsolete.iter().any(|re| re.is_match(name))
    }
}

fn verdict(node: &FileNode, verdict: Verdict, reason: impl Into<String>) -> Classification {
    Classification {
        file: node.path.clone(),
        verdict,
        reason: reason.into(),
    }
}

impl ClassificationStrategy for RuleClassifier {
    fn classify(
        &self,
        node: &FileNode,
        schema: &TargetSchema,
        graph: &ReferenceGraph,
    ) -> Classification {
        if let Some(d) = self.dispositions.get(&node.path) {
            return match d {
                Disposition::Keep => verdict(node, Verdict::Conforming, "kept by disposition"),
                Disposition::Archive => {
                    verdict(node, Verdict::ArchiveCandidate, "archive confirmed by disposition")
                }
                Disposition::Delete => {
                    verdict(node, Verdict::DeleteCandidate, "delete confirmed by disposition")
                }
            };
        }
        if let Some(dst) = schema.relocations.get(&node.path) {
            return verdict(
                node,
                Verdict::RelocateCandidate(dst.clone()),
                "relocation declared in schema",
            );
        }

        let dir = paths::parent_dir(&node.path);
        let name = paths::file_name(&node.path);
        let Some(rule) = schema.rule_for(dir) else {
            return verdict(node, Verdict::Conforming, "directory not governed");
        };
        if rule.allows(name) {
            return verdict(node, Verdict::Conforming, "allowed by schema");
        }

        if let Some(target_name) = rule.alias_target(name) {
            let target = paths::join(dir, target_name).unwrap_or_else(|| target_name.to_string());
            return if graph.contains_node(&target) {
                verdict(
                    node,
                    Verdict::MergeCandidate(target),
                    format!("alias of {}", target_name),
                )
            } else {
                verdict(
                    node,
                    Verdict::RelocateCandidate(target),
                    format!("alias of missing {}", target_name),
                )
            };
        }

        let duplicate_of = rule
            .required
            .iter()
            .chain(rule.optional.iter())
            .filter_map(|allowed| paths::join(dir, allowed))
            .filter(|p| graph.hash_of(p) == Some(node.content_hash.as_str()))
            .min();
        if let Some(target) = duplicate_of {
            return verdict(
                node,
                Verdict::MergeCandidate(target),
                "identical content to an allowed file",
            );
        }

        let referenced = graph.has_edges(&node.path);
        if self.looks_obsolete(name) {
            return if referenced {
                verdict(
                    node,
                    Verdict::Unclassified,
                    "obsolete-looking name but still referenced",
                )
            } else {
                verdict(
                    node,
                    Verdict::DeleteCandidate,
                    "unreferenced and matches an obsolete-name pattern",
                )
            };
        }
        if matches!(node.kind, FileKind::Source | FileKind::Test | FileKind::Config) {
            return verdict(
                node,
                Verdict::Unclassified,
                "code or config outside the allowed set",
            );
        }
        verdict(node, Verdict::ArchiveCandidate, "not in the allowed set")
    }
}

/// Classify every node of the inventory, in inventory (path) order.
pub fn classify_all(
    strategy: &dyn ClassificationStrategy,
    inventory: &Inventory,
    schema: &TargetSchema,
    graph: &ReferenceGraph,
) -> Vec<Classification> {
    inventory
        .nodes
        .iter()
        .map(|n| strategy.classify(n, schema, graph))
        .collect()
}

/// Failure records for every file left for manual disposition.
pub fn ambiguities(classifications: &[Classification]) -> Vec<FailureRecord> {
    classifications
        .iter()
        .filter(|c| c.verdict == Verdict::Unclassified)
        .map(|c| {
            ReshelfError::ClassificationAmbiguous {
                path: c.file.clone(),
                reason: c.reason.clone(),
            }
            .record(None)
        })
        .collect()
}
