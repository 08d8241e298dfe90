//! Conductor drives an external code-editing CLI across Git worktrees to
//! complete one natural-language task as a set of mergeable branches:
//! analyze, optionally refactor, plan, run subtasks in parallel batches,
//! then merge everything into a per-job result branch.

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod git;
pub mod pipeline;
pub mod process;
pub mod server;
pub mod stage;
pub mod store;
pub mod worker;

pub use domain::*;
