//! Heading-section merge of alias and duplicate documents into their target.
//!
//! Target sections are never modified. Source sections whose content the
//! target already carries are dropped; the rest are appended once under a
//! single marker heading with an origin comment.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const MERGE_MARKER: &str = "## Archived/Merged content";
const PREAMBLE: &str = "(preamble)";

static ATX_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ {0,3}(#{1,6})(?:[ \t]+(.*?))?(?:[ \t]+#+)?[ \t]*$").expect("valid heading regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub target: String,
    pub sources: Vec<String>,
    /// `source: section title` for every appended section.
    pub appended: Vec<String>,
    /// `source: section title` for every section already present in the target.
    pub dropped_duplicates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    level: usize,
    /// `None` for text before the first heading.
    title: Option<String>,
    body: String,
}

impl Section {
    fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(PREAMBLE)
    }
}

fn heading(line: &str) -> Option<(usize, String)> {
    let caps = ATX_HEADING.captures(line.trim_end_matches(['\n', '\r']))?;
    let level = caps.get(1)?.as_str().len();
    let title = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
    Some((level, title.to_string()))
}

fn split_sections(content: &str) -> Vec<Section> {
    let mut sections = vec![Section {
        level: 0,
        title: None,
        body: String::new(),
    }];
    let mut in_fence = false;
    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }
        if !in_fence {
            if let Some((level, title)) = heading(line) {
                sections.push(Section {
                    level,
                    title: Some(title),
                    body: String::new(),
                });
                continue;
            }
        }
        if let Some(last) = sections.last_mut() {
            last.body.push_str(line);
        }
    }
    if sections[0].body.trim().is_empty() {
        sections.remove(0);
    }
    sections
}

fn normalize_text(text: &str) -> String {
    text.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn normalize_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn is_duplicate(section: &Section, target_sections: &[Section], target_norm: &str) -> bool {
    let title = section.title.as_deref().map(normalize_title);
    let body = normalize_text(&section.body);
    let same_section = target_sections.iter().any(|t| {
        t.title.as_deref().map(normalize_title) == title && normalize_text(&t.body) == body
    });
    if same_section {
        return true;
    }
    if body.is_empty() {
        return title.is_none()
            || target_sections
                .iter()
                .any(|t| t.title.as_deref().map(normalize_title) == title);
    }
    format!("\n{}\n", target_norm).contains(&format!("\n{}\n", body))
}

fn render_demoted(section: &Section) -> String {
    let mut out = String::new();
    if let Some(title) = &section.title {
        let level = (section.level + 2).clamp(3, 6);
        out.push_str(&"#".repeat(level));
        if !title.is_empty() {
            out.push(' ');
            out.push_str(title);
        }
        out.push('\n');
    }
    out.push_str(&section.body);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Merge `sources` (path, content) into `target_content`. Sources are applied
/// in order; later sources are compared against the already-merged text.
pub fn merge_contents(
    target: &str,
    target_content: &str,
    sources: &[(String, String)],
) -> (String, MergeReport) {
    let mut merged = target_content.to_string();
    let mut report = MergeReport {
        target: target.to_string(),
        sources: sources.iter().map(|(p, _)| p.clone()).collect(),
        appended: Vec::new(),
        dropped_duplicates: Vec::new(),
    };

    for (source, content) in sources {
        let target_sections = split_sections(&merged);
        let target_norm = normalize_text(&merged);
        let mut block = String::new();
        for section in split_sections(content) {
            let label = format!("{}: {}", source, section.label());
            if is_duplicate(&section, &target_sections, &target_norm) {
                report.dropped_duplicates.push(label);
                continue;
            }
            block.push('\n');
            block.push_str(&render_demoted(&section));
            report.appended.push(label);
        }
        if block.is_empty() {
            continue;
        }
        if !merged.lines().any(|l| l.trim_end() == MERGE_MARKER) {
            if !merged.is_empty() && !merged.ends_with('\n') {
                merged.push('\n');
            }
            merged.push('\n');
            merged.push_str(MERGE_MARKER);
            merged.push('\n');
        } else if !merged.ends_with('\n') {
            merged.push('\n');
        }
        merged.push_str(&format!("\n<!-- merged from {} -->\n", source));
        merged.push_str(&block);
    }
    (merged, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_atx_headings_outside_fences() {
        let sections = split_sections("intro\n# A\nbody\n```\n# not a heading\n```\n## B ##\n");
        let labels: Vec<&str> = sections.iter().map(|s| s.label()).collect();
        assert_eq!(labels, vec![PREAMBLE, "A", "B"]);
        assert!(sections[1].body.contains("# not a heading"));
        assert_eq!(sections[2].level, 2);
    }

    #[test]
    fn appends_new_sections_under_single_marker() {
        let target = "# Project\n\nIntro.\n\n## Install\n\nRun make.\n";
        let source = "# Project\n\nIntro.\n\n## Usage\n\nCall it.\n";
        let (out, report) = merge_contents(
            "README.md",
            target,
            &[("OLD_README.md".to_string(), source.to_string())],
        );
        assert!(out.starts_with(target));
        assert_eq!(out.matches(MERGE_MARKER).count(), 1);
        assert!(out.contains("<!-- merged from OLD_README.md -->"));
        assert!(out.contains("#### Usage\n\nCall it."));
        assert_eq!(report.appended, vec!["OLD_README.md: Usage"]);
        assert_eq!(report.dropped_duplicates, vec!["OLD_README.md: Project"]);
    }

    #[test]
    fn identical_content_adds_nothing() {
        let text = "# Guide\n\nSteps.\n";
        let (out, report) =
            merge_contents("docs/guide.md", text, &[("docs/copy.md".into(), text.into())]);
        assert_eq!(out, text);
        assert!(report.appended.is_empty());
        assert_eq!(report.dropped_duplicates.len(), 1);
    }

    #[test]
    fn body_already_present_elsewhere_is_duplicate() {
        let target = "# Notes\n\nAlpha   beta.\n";
        let source = "## Other title\n\nAlpha beta.\n";
        let (out, report) = merge_contents("a.md", target, &[("b.md".into(), source.into())]);
        assert_eq!(out, target);
        assert_eq!(report.dropped_duplicates, vec!["b.md: Other title"]);
    }

    #[test]
    fn second_merge_reuses_marker() {
        let (once, _) = merge_contents("a.md", "# A\n", &[("b.md".into(), "# B\nb\n".into())]);
        let (twice, report) = merge_contents("a.md", &once, &[("c.md".into(), "# C\nc\n".into())]);
        assert_eq!(twice.matches(MERGE_MARKER).count(), 1);
        assert!(twice.starts_with(&once));
        assert_eq!(report.appended, vec!["c.md: C"]);
    }

    #[test]
    fn plain_text_source_becomes_preamble() {
        let (out, report) = merge_contents("README.md", "# R\n", &[("README.txt".into(), "hello".into())]);
        assert!(out.ends_with("hello\n"));
        assert_eq!(report.appended, vec!["README.txt: (preamble)"]);
    }
}
