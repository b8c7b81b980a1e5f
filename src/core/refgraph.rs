//! Reference graph builder.
//!
//! Collects cross-file references (markdown links, relative script imports) in
//! one linear pass over file contents. No traversal ever happens over the
//! resulting graph, so mutual references are harmless.
//!
//! The same extraction powers the rewriting used by the executor: `retarget`
//! points every reference to a moved file at its new location, and `relink`
//! fixes a moved file's own relative references.

use crate::core::error::ReshelfError;
use crate::core::inventory::Inventory;
use crate::core::paths;
use rayon::prelude::*;
use regex::Regex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferenceEdge {
    pub from: String,
    pub to: String,
    pub raw: String,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    External,
    Broken,
    /// Points into the archive; content is preserved there.
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnresolvedReference {
    pub from: String,
    pub raw: String,
    pub line: usize,
    pub reason: UnresolvedReason,
}

/// One textual change made by a rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefEdit {
    pub line: usize,
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Markdown,
    Script,
}

impl Dialect {
    pub fn for_path(path: &str) -> Option<Dialect> {
        match paths::extension(path).map(|e| e.to_ascii_lowercase()).as_deref() {
            Some("md" | "markdown" | "mdx") => Some(Dialect::Markdown),
            Some(
                "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" | "css" | "scss" | "less" | "vue"
                | "svelte",
            ) => Some(Dialect::Script),
            _ => None,
        }
    }
}

const SCRIPT_EXTENSIONS: &[&str] = &["js", "ts", "jsx", "tsx", "mjs", "cjs", "json", "css"];

static MD_INLINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"!?\[[^\]]*\]\(\s*<?([^)\s>]+)>?(?:\s+"[^"]*")?\s*\)"#)
        .expect("valid markdown link regex")
});
static MD_DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s{0,3}\[[^\]]+\]:\s*<?([^\s>]+)>?").expect("valid markdown definition regex")
});
static SCRIPT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"\b(?:import|export)\s[^'"]*?\bfrom\s*['"]([^'"]+)['"]"#,
        r#"\bimport\s*['"]([^'"]+)['"]"#,
        r#"\bimport\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
        r#"\brequire\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
        r#"@import\s+(?:url\(\s*)?['"]([^'"]+)['"]"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid import regex"))
    .collect()
});

/// A reference token found in file content, with its byte span.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawRef {
    raw: String,
    line: usize,
    start: usize,
    end: usize,
}

fn extract_refs(content: &str, dialect: Dialect) -> Vec<RawRef> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    let mut in_fence = false;
    for (idx, line) in content.split_inclusive('\n').enumerate() {
        let line_no = idx + 1;
        let base = offset;
        offset += line.len();
        match dialect {
            Dialect::Markdown => {
                let trimmed = line.trim_start();
                if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                    in_fence = !in_fence;
                    continue;
                }
                if in_fence {
                    continue;
                }
                for re in [&*MD_INLINE, &*MD_DEFINITION] {
                    for cap in re.captures_iter(line) {
                        if let Some(m) = cap.get(1) {
                            out.push(RawRef {
                                raw: m.as_str().to_string(),
                                line: line_no,
                                start: base + m.start(),
                                end: base + m.end(),
                            });
                        }
                    }
                }
            }
            Dialect::Script => {
                for re in SCRIPT_PATTERNS.iter() {
                    for cap in re.captures_iter(line) {
                        if let Some(m) = cap.get(1) {
                            out.push(RawRef {
                                raw: m.as_str().to_string(),
                                line: line_no,
                                start: base + m.start(),
                                end: base + m.end(),
                            });
                        }
                    }
                }
            }
        }
    }
    out.sort_by_key(|r| r.start);
    out.dedup_by_key(|r| r.start);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Resolved(String),
    External,
    Broken,
    Ignored,
}

fn split_suffix(raw: &str) -> (&str, &str) {
    match raw.find(['#', '?']) {
        Some(idx) => (&raw[..idx], &raw[idx..]),
        None => (raw, ""),
    }
}

fn is_external(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    raw.contains("://")
        || raw.starts_with("//")
        || ["mailto:", "tel:", "data:", "javascript:"]
            .iter()
            .any(|p| lower.starts_with(p))
}

/// The literal repo path a reference spells out, before extension probing.
fn written_path(from: &str, path_part: &str, dialect: Dialect) -> Option<String> {
    if dialect == Dialect::Markdown && path_part.starts_with('/') {
        paths::normalize(path_part.trim_start_matches('/'))
    } else {
        paths::join(paths::parent_dir(from), path_part)
    }
}

fn resolve(from: &str, raw: &str, dialect: Dialect, exists: &dyn Fn(&str) -> bool) -> Resolution {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') || raw.starts_with('?') {
        return Resolution::Ignored;
    }
    if is_external(raw) {
        return Resolution::External;
    }
    let (path_part, _) = split_suffix(raw);
    if path_part.is_empty() || path_part.ends_with('/') {
        return Resolution::Ignored;
    }
    if dialect == Dialect::Script
        && !(path_part.starts_with("./")
            || path_part.starts_with("../")
            || path_part == "."
            || path_part == "..")
    {
        return Resolution::Ignored;
    }
    let Some(candidate) = written_path(from, path_part, dialect) else {
        return Resolution::Broken;
    };
    if candidate.is_empty() {
        return Resolution::Ignored;
    }
    if exists(&candidate) {
        return Resolution::Resolved(candidate);
    }
    if dialect == Dialect::Script {
        for ext in SCRIPT_EXTENSIONS {
            let with_ext = format!("{}.{}", candidate, ext);
            if exists(&with_ext) {
                return Resolution::Resolved(with_ext);
            }
        }
        for ext in SCRIPT_EXTENSIONS {
            let index = format!("{}/index.{}", candidate, ext);
            if exists(&index) {
                return Resolution::Resolved(index);
            }
        }
    }
    Resolution::Broken
}

/// Reference text that makes `emit_from` point at `new_target`, in the style of `raw`.
fn respell(
    raw: &str,
    dialect: Dialect,
    resolve_from: &str,
    old_target: &str,
    emit_from: &str,
    new_target: &str,
) -> String {
    let (path_part, suffix) = split_suffix(raw.trim());
    if dialect == Dialect::Markdown && path_part.starts_with('/') {
        return format!("/{}{}", new_target, suffix);
    }
    let mut rel = paths::relative(paths::parent_dir(emit_from), new_target);

    // Keep omitted extensions / index files omitted.
    if let Some(written) = written_path(resolve_from, path_part, dialect) {
        if written != old_target {
            if let Some(dropped) = old_target.strip_prefix(written.as_str()) {
                if !dropped.is_empty() && new_target.ends_with(dropped) {
                    if let Some(kept) = rel.strip_suffix(dropped) {
                        rel = kept.to_string();
                    }
                }
            }
        }
    }

    let wants_dot = match dialect {
        Dialect::Script => true,
        Dialect::Markdown => path_part.starts_with("./"),
    };
    if wants_dot && !rel.starts_with("../") {
        rel = format!("./{}", rel);
    }
    format!("{}{}", rel, suffix)
}

fn rewrite(
    content: &str,
    dialect: Dialect,
    resolve_from: &str,
    emit_from: &str,
    exists: &dyn Fn(&str) -> bool,
    map: &dyn Fn(&str) -> Option<String>,
) -> Option<(String, Vec<RefEdit>)> {
    let mut out = String::with_capacity(content.len());
    let mut edits = Vec::new();
    let mut cursor = 0usize;
    for r in extract_refs(content, dialect) {
        let Resolution::Resolved(target) = resolve(resolve_from, &r.raw, dialect, exists) else {
            continue;
        };
        let new_target = match map(&target) {
            Some(t) => t,
            None if resolve_from != emit_from => target.clone(),
            None => continue,
        };
        let spelled = respell(&r.raw, dialect, resolve_from, &target, emit_from, &new_target);
        if spelled == r.raw || r.start < cursor {
            continue;
        }
        out.push_str(&content[cursor..r.start]);
        out.push_str(&spelled);
        cursor = r.end;
        edits.push(RefEdit {
            line: r.line,
            old: r.raw,
            new: spelled,
        });
    }
    if edits.is_empty() {
        return None;
    }
    out.push_str(&content[cursor..]);
    Some((out, edits))
}

/// Rewrite every reference in `file` that resolves to `old_target` so it
/// resolves to `new_target`. Returns `None` when nothing changed.
pub fn retarget(
    content: &str,
    file: &str,
    old_target: &str,
    new_target: &str,
    exists: &dyn Fn(&str) -> bool,
) -> Option<(String, Vec<RefEdit>)> {
    let dialect = Dialect::for_path(file)?;
    let exists_or_old = |p: &str| p == old_target || exists(p);
    let map = |t: &str| {
        if t == old_target {
            Some(new_target.to_string())
        } else {
            None
        }
    };
    rewrite(content, dialect, file, file, &exists_or_old, &map)
}

/// Rewrite the relative references of a file moved from `old_path` to
/// `new_path` so they resolve to the same targets from the new directory.
pub fn relink(
    content: &str,
    old_path: &str,
    new_path: &str,
    exists: &dyn Fn(&str) -> bool,
) -> Option<(String, Vec<RefEdit>)> {
    let dialect = Dialect::for_path(old_path)?;
    let exists_or_self = |p: &str| p == old_path || exists(p);
    let map = |t: &str| {
        if t == old_path {
            Some(new_path.to_string())
        } else {
            None
        }
    };
    rewrite(content, dialect, old_path, new_path, &exists_or_self, &map)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReferenceGraph {
    /// Every scanned path with its content hash.
    pub nodes: BTreeMap<String, String>,
    /// Sorted; self references are dropped.
    pub edges: Vec<ReferenceEdge>,
    pub unresolved: Vec<UnresolvedReference>,
    #[serde(skip)]
    inbound: FxHashMap<String, Vec<usize>>,
    #[serde(skip)]
    outbound: FxHashMap<String, Vec<usize>>,
}

impl ReferenceGraph {
    /// Build from already-read contents. Files absent from `contents` are
    /// nodes without outgoing references.
    pub fn from_contents(nodes: BTreeMap<String, String>, contents: &[(String, String)]) -> Self {
        Self::from_contents_with(nodes, contents, &|_| false)
    }

    /// Like `from_contents`, with `archived` answering for paths that live in
    /// the archive rather than the inventory.
    pub fn from_contents_with(
        nodes: BTreeMap<String, String>,
        contents: &[(String, String)],
        archived: &dyn Fn(&str) -> bool,
    ) -> Self {
        let exists = |p: &str| nodes.contains_key(p) || archived(p);
        let mut edges = Vec::new();
        let mut unresolved = Vec::new();
        for (from, content) in contents {
            let Some(dialect) = Dialect::for_path(from) else {
                continue;
            };
            for r in extract_refs(content, dialect) {
                match resolve(from, &r.raw, dialect, &exists) {
                    Resolution::Resolved(to) if !nodes.contains_key(&to) => {
                        unresolved.push(UnresolvedReference {
                            from: from.clone(),
                            raw: r.raw,
                            line: r.line,
                            reason: UnresolvedReason::Archived,
                        })
                    }
                    Resolution::Resolved(to) => {
                        if &to != from {
                            edges.push(ReferenceEdge {
                                from: from.clone(),
                                to,
                                raw: r.raw,
                                line: r.line,
                            });
                        }
                    }
                    Resolution::External => unresolved.push(UnresolvedReference {
                        from: from.clone(),
                        raw: r.raw,
                        line: r.line,
                        reason: UnresolvedReason::External,
                    }),
                    Resolution::Broken => unresolved.push(UnresolvedReference {
                        from: from.clone(),
                        raw: r.raw,
                        line: r.line,
                        reason: UnresolvedReason::Broken,
                    }),
                    Resolution::Ignored => {}
                }
            }
        }
        edges.sort();
        edges.dedup();
        unresolved.sort();
        let mut graph = ReferenceGraph {
            nodes,
            edges,
            unresolved,
            inbound: FxHashMap::default(),
            outbound: FxHashMap::default(),
        };
        graph.index();
        graph
    }

    fn index(&mut self) {
        for (i, e) in self.edges.iter().enumerate() {
            self.inbound.entry(e.to.clone()).or_default().push(i);
            self.outbound.entry(e.from.clone()).or_default().push(i);
        }
    }

    pub fn contains_node(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn hash_of(&self, path: &str) -> Option<&str> {
        self.nodes.get(path).map(String::as_str)
    }

    pub fn inbound(&self, path: &str) -> impl Iterator<Item = &ReferenceEdge> {
        self.inbound
            .get(path)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
    }

    pub fn has_edges(&self, path: &str) -> bool {
        self.inbound.contains_key(path) || self.outbound.contains_key(path)
    }

    pub fn referrers(&self, path: &str) -> BTreeSet<String> {
        self.inbound(path).map(|e| e.from.clone()).collect()
    }

    pub fn broken(&self) -> impl Iterator<Item = &UnresolvedReference> {
        self.unresolved
            .iter()
            .filter(|u| u.reason == UnresolvedReason::Broken)
    }

    pub fn to_mermaid(&self) -> String {
        let node_id = |p: &str| p.replace(|c: char| !c.is_alphanumeric(), "_");
        let mut linked = BTreeSet::new();
        for e in &self.edges {
            linked.insert(e.from.as_str());
            linked.insert(e.to.as_str());
        }
        let mut mermaid = String::from("graph TD\n");
        for n in &linked {
            mermaid.push_str(&format!("  {}[\"{}\"]\n", node_id(n), n));
        }
        let mut pairs: Vec<(&str, &str)> = self
            .edges
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        pairs.dedup();
        for (a, b) in pairs {
            mermaid.push_str(&format!("  {} --> {}\n", node_id(a), node_id(b)));
        }
        mermaid
    }
}

/// Read every text file in the inventory and build the graph. References
/// into `archive_dir` that exist on disk are recorded as `Archived`.
pub fn build(
    root: &Path,
    inventory: &Inventory,
    archive_dir: &str,
) -> Result<ReferenceGraph, ReshelfError> {
    let nodes: BTreeMap<String, String> = inventory
        .nodes
        .iter()
        .map(|n| (n.path.clone(), n.content_hash.clone()))
        .collect();
    let contents = inventory
        .nodes
        .par_iter()
        .filter(|n| Dialect::for_path(&n.path).is_some())
        .map(|n| -> Result<Option<(String, String)>, ReshelfError> {
            let abs = root.join(&n.path);
            let bytes = fs::read(&abs).map_err(|e| ReshelfError::ScanError {
                path: abs.display().to_string(),
                cause: e.to_string(),
            })?;
            if bytes.contains(&0) {
                return Ok(None);
            }
            Ok(String::from_utf8(bytes).ok().map(|s| (n.path.clone(), s)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let contents: Vec<(String, String)> = contents.into_iter().flatten().collect();
    let archive_prefix = format!("{}/", archive_dir);
    let archived = |p: &str| p.starts_with(&archive_prefix) && root.join(p).is_file();
    Ok(ReferenceGraph::from_contents_with(nodes, &contents, &archived))
}
