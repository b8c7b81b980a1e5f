//! Thin `git` adapter. Only moves go through version control; everything else
//! is plain filesystem work the operator stages as usual.

use crate::core::error::ReshelfError;
use std::fs;
use std::path::{Path, PathBuf};

pub fn run_git(repo_root: &Path, args: &[&str]) -> Result<String, String> {
    let output = std::process::Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .map_err(|e| format!("git failed: {}", e))?;

    if !output.status.success() {
        return Err(format!(
            "git failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// How a path was moved, so the move can be undone the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    Git,
    Rename,
}

#[derive(Debug, Clone)]
pub struct Vcs {
    root: PathBuf,
    git: bool,
}

impl Vcs {
    /// Detect whether `root` is inside a git work tree.
    pub fn detect(root: &Path) -> Self {
        let git = run_git(root, &["rev-parse", "--is-inside-work-tree"])
            .map(|out| out == "true")
            .unwrap_or(false);
        Vcs {
            root: root.to_path_buf(),
            git,
        }
    }

    /// Plain filesystem only.
    pub fn disabled(root: &Path) -> Self {
        Vcs {
            root: root.to_path_buf(),
            git: false,
        }
    }

    pub fn is_git(&self) -> bool {
        self.git
    }

    pub fn is_tracked(&self, rel: &str) -> bool {
        self.git && run_git(&self.root, &["ls-files", "--error-unmatch", "--", rel]).is_ok()
    }

    /// Move `src` to `dst` (repo-relative). Parent directories must exist.
    /// Uses `git mv` for tracked files and falls back to a rename.
    pub fn move_path(&self, src: &str, dst: &str) -> Result<MoveMethod, ReshelfError> {
        if self.is_tracked(src) && run_git(&self.root, &["mv", "--", src, dst]).is_ok() {
            return Ok(MoveMethod::Git);
        }
        fs::rename(self.abs(src), self.abs(dst))?;
        Ok(MoveMethod::Rename)
    }

    /// Reverse a move made with `method`.
    pub fn undo_move(&self, src: &str, dst: &str, method: MoveMethod) -> Result<(), ReshelfError> {
        if method == MoveMethod::Git {
            run_git(&self.root, &["mv", "--", dst, src]).map_err(ReshelfError::VcsError)?;
            return Ok(());
        }
        fs::rename(self.abs(dst), self.abs(src))?;
        Ok(())
    }

    fn abs(&self, rel: &str) -> PathBuf {
        let mut p = self.root.clone();
        for seg in rel.split('/') {
            p.push(seg);
        }
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn plain_directory_uses_rename() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.md"), "a").unwrap();
        let vcs = Vcs::disabled(tmp.path());
        assert_eq!(vcs.move_path("a.md", "b.md").unwrap(), MoveMethod::Rename);
        assert!(tmp.path().join("b.md").exists());
        vcs.undo_move("a.md", "b.md", MoveMethod::Rename).unwrap();
        assert!(tmp.path().join("a.md").exists());
    }

    #[test]
    fn tracked_file_moves_with_git() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        run_git(root, &["init", "-q"]).unwrap();
        fs::write(root.join("a.md"), "a").unwrap();
        fs::write(root.join("untracked.md"), "u").unwrap();
        run_git(root, &["add", "a.md"]).unwrap();

        let vcs = Vcs::detect(root);
        assert!(vcs.is_git());
        assert!(vcs.is_tracked("a.md"));
        assert!(!vcs.is_tracked("untracked.md"));
        assert_eq!(vcs.move_path("a.md", "b.md").unwrap(), MoveMethod::Git);
        assert!(vcs.is_tracked("b.md"));
        vcs.undo_move("a.md", "b.md", MoveMethod::Git).unwrap();
        assert!(vcs.is_tracked("a.md"));
        assert_eq!(
            vcs.move_path("untracked.md", "u2.md").unwrap(),
            MoveMethod::Rename
        );
    }
}
