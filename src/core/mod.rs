//! Core of the restructuring engine: state, scanning, analysis, planning and
//! the transactional executor.

pub mod assets;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod journal;
pub mod lock;
pub mod output;
pub mod paths;
pub mod plan;
pub mod refgraph;
pub mod scaffold;
pub mod schema;
pub mod store;
pub mod time;
pub mod vcs;
