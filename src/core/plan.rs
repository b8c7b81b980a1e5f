//! Migration planner.
//!
//! Turns classifications into an ordered list of atomic actions. Phases run
//! `Merge`, `Move`, `Archive`, `Delete`, lexical within a phase. Each action
//! carries every file that references what it removes at the moment it runs,
//! so a move and all of its reference rewrites land together and reference
//! cycles never block planning.

use crate::core::classify::{Classification, Verdict};
use crate::core::error::ReshelfError;
use crate::core::refgraph::ReferenceGraph;
use crate::plugins::archive::{self, ArchiveManifest};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Referrer files whose reference text must change with an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteSet {
    pub files: BTreeSet<String>,
}

impl RewriteSet {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Where one removed file's content ends up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSlot {
    pub src: String,
    pub archive_dst: String,
    pub content_hash: String,
    /// Identical content is already archived at `archive_dst`.
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MigrationAction {
    Move {
        src: String,
        dst: String,
        rewrites: RewriteSet,
    },
    Merge {
        srcs: Vec<String>,
        dst: String,
        archived: Vec<ArchiveSlot>,
        rewrites: RewriteSet,
    },
    Archive {
        slot: ArchiveSlot,
        rewrites: RewriteSet,
    },
    Delete {
        slot: ArchiveSlot,
        rewrites: RewriteSet,
    },
}

impl MigrationAction {
    pub fn op(&self) -> &'static str {
        match self {
            MigrationAction::Move { .. } => "move",
            MigrationAction::Merge { .. } => "merge",
            MigrationAction::Archive { .. } => "archive",
            MigrationAction::Delete { .. } => "delete",
        }
    }

    pub fn rewrites(&self) -> &RewriteSet {
        match self {
            MigrationAction::Move { rewrites, .. }
            | MigrationAction::Merge { rewrites, .. }
            | MigrationAction::Archive { rewrites, .. }
            | MigrationAction::Delete { rewrites, .. } => rewrites,
        }
    }

    /// Files this action takes out of the tree.
    pub fn sources(&self) -> Vec<&str> {
        match self {
            MigrationAction::Move { src, .. } => vec![src.as_str()],
            MigrationAction::Merge { srcs, .. } => srcs.iter().map(String::as_str).collect(),
            MigrationAction::Archive { slot, .. } | MigrationAction::Delete { slot, .. } => {
                vec![slot.src.as_str()]
            }
        }
    }
}

impl fmt::Display for MigrationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationAction::Move { src, dst, .. } => write!(f, "move {} -> {}", src, dst),
            MigrationAction::Merge { srcs, dst, .. } => {
                write!(f, "merge {} -> {}", srcs.join(", "), dst)
            }
            MigrationAction::Archive { slot, .. } => {
                write!(f, "archive {} -> {}", slot.src, slot.archive_dst)
            }
            MigrationAction::Delete { slot, .. } => {
                write!(f, "delete {} -> {}", slot.src, slot.archive_dst)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub run_stamp: String,
    pub archive_dir: String,
    pub actions: Vec<MigrationAction>,
    /// Left in place pending an explicit disposition.
    pub unclassified: Vec<Classification>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

pub struct PlanInput<'a> {
    pub classifications: &'a [Classification],
    pub graph: &'a ReferenceGraph,
    pub manifest: &'a ArchiveManifest,
    pub archive_dir: &'a str,
    pub run_stamp: &'a str,
    /// Whether a repo-relative path is occupied on disk (archive included).
    pub occupied: &'a dyn Fn(&str) -> bool,
}

/// Reference pairs as they will stand after the actions planned so far.
struct EdgeTable {
    edges: BTreeSet<(String, String)>,
}

impl EdgeTable {
    fn from_graph(graph: &ReferenceGraph) -> Self {
        EdgeTable {
            edges: graph
                .edges
                .iter()
                .map(|e| (e.from.clone(), e.to.clone()))
                .collect(),
        }
    }

    fn referrers(&self, targets: &[&str], leaving: &[&str]) -> RewriteSet {
        let files = self
            .edges
            .iter()
            .filter(|(from, to)| {
                targets.contains(&to.as_str()) && !leaving.contains(&from.as_str())
            })
            .map(|(from, _)| from.clone())
            .collect();
        RewriteSet { files }
    }

    /// `old` becomes `new` on both ends; `None` drops its edges.
    fn replace(&mut self, old: &str, new: Option<&str>, drop_outbound: bool) {
        let edges = std::mem::take(&mut self.edges);
        for (from, to) in edges {
            let from = if from == old {
                match new {
                    Some(n) if !drop_outbound => n.to_string(),
                    _ => continue,
                }
            } else {
                from
            };
            let to = if to == old {
                match new {
                    Some(n) => n.to_string(),
                    None => continue,
                }
            } else {
                to
            };
            if from != to {
                self.edges.insert((from, to));
            }
        }
    }
}

struct SlotAllocator<'a> {
    input: &'a PlanInput<'a>,
    planned: BTreeMap<String, String>,
    taken: BTreeSet<String>,
}

impl<'a> SlotAllocator<'a> {
    fn new(input: &'a PlanInput<'a>) -> Self {
        SlotAllocator {
            input,
            planned: BTreeMap::new(),
            taken: BTreeSet::new(),
        }
    }

    fn slot(&mut self, src: &str) -> Result<ArchiveSlot, ReshelfError> {
        let content_hash = self
            .input
            .graph
            .hash_of(src)
            .ok_or_else(|| ReshelfError::NotFound(format!("{} is not in the inventory", src)))?
            .to_string();

        if let Some(entry) = self.input.manifest.find_by_hash(&content_hash) {
            if (self.input.occupied)(&entry.archive_path) {
                return Ok(ArchiveSlot {
                    src: src.to_string(),
                    archive_dst: entry.archive_path.clone(),
                    content_hash,
                    reused: true,
                });
            }
        }
        if let Some(dst) = self.planned.get(&content_hash) {
            return Ok(ArchiveSlot {
                src: src.to_string(),
                archive_dst: dst.clone(),
                content_hash,
                reused: true,
            });
        }

        let base = archive::archive_destination(self.input.archive_dir, self.input.run_stamp, src);
        let taken = |p: &str| self.taken.contains(p) || (self.input.occupied)(p);
        let archive_dst = archive::resolve_collision(&base, &taken)?;
        self.taken.insert(archive_dst.clone());
        self.planned.insert(content_hash.clone(), archive_dst.clone());
        Ok(ArchiveSlot {
            src: src.to_string(),
            archive_dst,
            content_hash,
            reused: false,
        })
    }
}

/// Order moves so that a move whose destination is vacated by another move
/// runs after it. A destination chain that loops back is a cycle.
fn order_moves(moves: &BTreeMap<String, String>) -> Result<Vec<(String, String)>, ReshelfError> {
    let mut pending = moves.clone();
    let mut ordered = Vec::with_capacity(moves.len());
    while !pending.is_empty() {
        let ready = pending
            .iter()
            .find(|(_, dst)| !pending.contains_key(*dst))
            .map(|(src, dst)| (src.clone(), dst.clone()));
        match ready {
            Some((src, dst)) => {
                pending.remove(&src);
                ordered.push((src, dst));
            }
            None => {
                let start = pending.keys().next().cloned().unwrap_or_default();
                let mut cycle = vec![start.clone()];
                let mut cursor = start;
                while let Some(next) = pending.get(&cursor) {
                    let seen = cycle.contains(next);
                    cycle.push(next.clone());
                    if seen {
                        break;
                    }
                    cursor = next.clone();
                }
                return Err(ReshelfError::PlanCycleError(format!(
                    "move destinations form a cycle: {}",
                    cycle.join(" -> ")
                )));
            }
        }
    }
    Ok(ordered)
}

pub fn build_plan(input: &PlanInput<'_>) -> Result<MigrationPlan, ReshelfError> {
    let mut merges: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut moves: BTreeMap<String, String> = BTreeMap::new();
    let mut archives: Vec<String> = Vec::new();
    let mut deletes: Vec<String> = Vec::new();
    let mut unclassified = Vec::new();

    for c in input.classifications {
        match &c.verdict {
            Verdict::Conforming => {}
            Verdict::MergeCandidate(dst) => {
                merges.entry(dst.clone()).or_default().push(c.file.clone())
            }
            Verdict::RelocateCandidate(dst) => {
                moves.insert(c.file.clone(), dst.clone());
            }
            Verdict::ArchiveCandidate => archives.push(c.file.clone()),
            Verdict::DeleteCandidate => deletes.push(c.file.clone()),
            Verdict::Unclassified => unclassified.push(c.clone()),
        }
    }
    for srcs in merges.values_mut() {
        srcs.sort();
    }
    archives.sort();
    deletes.sort();

    let leaving: BTreeSet<&str> = merges
        .values()
        .flatten()
        .chain(moves.keys())
        .chain(archives.iter())
        .chain(deletes.iter())
        .map(String::as_str)
        .collect();
    let merge_sources: BTreeSet<&str> = merges.values().flatten().map(String::as_str).collect();

    for dst in merges.keys() {
        if !input.graph.contains_node(dst) {
            return Err(ReshelfError::PlanConflict(format!(
                "merge target {} does not exist",
                dst
            )));
        }
        if leaving.contains(dst.as_str()) {
            return Err(ReshelfError::PlanConflict(format!(
                "merge target {} is itself leaving the tree",
                dst
            )));
        }
    }
    let mut claimed: BTreeMap<&str, &str> = BTreeMap::new();
    for (src, dst) in &moves {
        if let Some(other) = claimed.insert(dst.as_str(), src.as_str()) {
            return Err(ReshelfError::PlanConflict(format!(
                "{} and {} both move to {}",
                other, src, dst
            )));
        }
        if merges.contains_key(dst) {
            return Err(ReshelfError::PlanConflict(format!(
                "{} moves onto merge target {}",
                src, dst
            )));
        }
        let occupant_stays = input.graph.contains_node(dst)
            && !moves.contains_key(dst)
            && !merge_sources.contains(dst.as_str());
        let untracked_occupant = !input.graph.contains_node(dst) && (input.occupied)(dst);
        if occupant_stays || untracked_occupant {
            return Err(ReshelfError::PlanConflict(format!(
                "{} cannot move to {}: destination is occupied",
                src, dst
            )));
        }
    }
    let ordered_moves = order_moves(&moves)?;

    let mut edges = EdgeTable::from_graph(input.graph);
    let mut slots = SlotAllocator::new(input);
    let mut actions = Vec::new();

    for (dst, srcs) in &merges {
        let src_refs: Vec<&str> = srcs.iter().map(String::as_str).collect();
        let rewrites = edges.referrers(&src_refs, &src_refs);
        let archived = srcs
            .iter()
            .map(|s| slots.slot(s))
            .collect::<Result<Vec<_>, _>>()?;
        for s in srcs {
            edges.replace(s, Some(dst), true);
        }
        actions.push(MigrationAction::Merge {
            srcs: srcs.clone(),
            dst: dst.clone(),
            archived,
            rewrites,
        });
    }

    for (src, dst) in ordered_moves {
        let rewrites = edges.referrers(&[src.as_str()], &[src.as_str()]);
        edges.replace(&src, Some(&dst), false);
        actions.push(MigrationAction::Move { src, dst, rewrites });
    }

    for src in &archives {
        let rewrites = edges.referrers(&[src.as_str()], &[src.as_str()]);
        let slot = slots.slot(src)?;
        edges.replace(src, None, true);
        actions.push(MigrationAction::Archive { slot, rewrites });
    }

    for src in &deletes {
        let rewrites = edges.referrers(&[src.as_str()], &[src.as_str()]);
        let slot = slots.slot(src)?;
        edges.replace(src, None, true);
        actions.push(MigrationAction::Delete { slot, rewrites });
    }

    Ok(MigrationPlan {
        run_stamp: input.run_stamp.to_string(),
        archive_dir: input.archive_dir.to_string(),
        actions,
        unclassified,
    })
}
