//! `reshelf init`: writes `.reshelf/config.toml` and `.reshelf/schema.toml`
//! from the embedded templates.
//!
//! Existing files are never overwritten without `force`.

use crate::core::assets;
use crate::core::error::ReshelfError;
use crate::core::store::STATE_DIR;
use std::fs;
use std::path::{Path, PathBuf};

pub struct ScaffoldOptions {
    pub target_dir: PathBuf,
    pub force: bool,
    /// Report what would be written without touching disk.
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaffoldStep {
    Wrote(PathBuf),
    WouldWrite(PathBuf),
    WouldSkip(PathBuf),
}

fn ensure_parent(path: &Path) -> Result<(), ReshelfError> {
    if let Some(p) = path.parent() {
        fs::create_dir_all(p)?;
    }
    Ok(())
}

fn write_file(
    opts: &ScaffoldOptions,
    rel_path: &str,
    content: &str,
) -> Result<ScaffoldStep, ReshelfError> {
    let dest = opts.target_dir.join(rel_path);

    if dest.exists() && !opts.force {
        if opts.dry_run {
            return Ok(ScaffoldStep::WouldSkip(dest));
        }
        return Err(ReshelfError::ValidationError(format!(
            "Refusing to overwrite existing path without --force: {}",
            dest.display()
        )));
    }

    if opts.dry_run {
        return Ok(ScaffoldStep::WouldWrite(dest));
    }

    ensure_parent(&dest)?;
    fs::write(&dest, content)?;
    Ok(ScaffoldStep::Wrote(dest))
}

pub fn scaffold_project(opts: &ScaffoldOptions) -> Result<Vec<ScaffoldStep>, ReshelfError> {
    let files = [
        ("config.toml", format!("{}/config.toml", STATE_DIR)),
        ("schema.toml", format!("{}/schema.toml", STATE_DIR)),
    ];

    // Check every destination first so a refusal leaves nothing half-written.
    if !opts.force && !opts.dry_run {
        if let Some((_, existing)) = files
            .iter()
            .find(|(_, rel)| opts.target_dir.join(rel).exists())
        {
            return Err(ReshelfError::ValidationError(format!(
                "Refusing to overwrite existing path without --force: {}",
                opts.target_dir.join(existing).display()
            )));
        }
    }

    let mut steps = Vec::new();
    for (template, rel) in &files {
        let content = assets::get_template(template)
            .ok_or_else(|| ReshelfError::NotFound(format!("template {}", template)))?;
        steps.push(write_file(opts, rel, content)?);
    }
    Ok(steps)
}
