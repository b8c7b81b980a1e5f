//! Pluggable collaborators of the executor: archive storage, content merging
//! and post-action verification.

pub mod archive;
pub mod merge;
pub mod verify;
