//! Repo-relative path arithmetic.
//!
//! Every path the engine reasons about is repo-relative, `/`-separated, and
//! normalized. The repository root directory is the empty string.

use std::path::{Component, Path};

/// Collapse `.` and `..` segments. Returns `None` when the path escapes the root.
pub fn normalize(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            s => parts.push(s),
        }
    }
    Some(parts.join("/"))
}

/// Join a repo-relative directory with a relative reference and normalize.
pub fn join(dir: &str, rel: &str) -> Option<String> {
    if dir.is_empty() {
        normalize(rel)
    } else {
        normalize(&format!("{}/{}", dir, rel))
    }
}

pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Extension without the dot, if any (`README` has none, `.env` has none).
pub fn extension(path: &str) -> Option<&str> {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(&name[idx + 1..]),
    }
}

/// Display form of a directory key: the root renders as `.`.
pub fn display_dir(dir: &str) -> &str {
    if dir.is_empty() { "." } else { dir }
}

/// Relative path from `from_dir` to `to`, both repo-relative.
pub fn relative(from_dir: &str, to: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|s| !s.is_empty()).collect();
    let target: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();
    let common = from
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut out: Vec<&str> = Vec::new();
    for _ in common..from.len() {
        out.push("..");
    }
    out.extend_from_slice(&target[common..]);
    out.join("/")
}

/// Convert an absolute path under `root` to the repo-relative form.
pub fn to_rel_string(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(c) => parts.push(c.to_string_lossy().to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

/// Insert `-n` before the extension: `notes.md` -> `notes-2.md`.
pub fn with_suffix(path: &str, n: usize) -> String {
    let dir = parent_dir(path);
    let name = file_name(path);
    let suffixed = match name.rfind('.') {
        Some(idx) if idx > 0 => format!("{}-{}{}", &name[..idx], n, &name[idx..]),
        _ => format!("{}-{}", name, n),
    };
    if dir.is_empty() {
        suffixed
    } else {
        format!("{}/{}", dir, suffixed)
    }
}
