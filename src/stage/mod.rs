//! The five stage tools. Each one runs the Worker CLI with a stage-specific
//! prompt in the right directory, streams progress into the store, and
//! normalises the worker's final JSON into a typed report.

pub mod analyze;
pub mod context;
pub mod merge;
pub mod plan;
pub mod refactor;
pub mod subtask;

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::git::{GitError, GitOps};
use crate::process::{ProcessError, ProcessRunner};
use crate::store::StateStore;
use crate::worker::WorkerSettings;

/// Everything a stage needs, injected by the engine so tests can substitute
/// a scripted runner.
#[derive(Clone)]
pub struct StageDeps {
    pub runner: Arc<dyn ProcessRunner>,
    pub store: StateStore,
    pub git: GitOps,
    pub worker: WorkerSettings,
}

/// Cap on child output quoted inside error messages.
pub const ERROR_OUTPUT_CAP: usize = 2_000;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage root does not exist: {0}")]
    InvalidRoot(PathBuf),

    #[error("no JSON object found in {stage} output\nstdout (tail):\n{stdout}\nstderr (tail):\n{stderr}")]
    ParseFailed {
        stage: &'static str,
        stdout: String,
        stderr: String,
    },

    #[error("{stage} returned a malformed payload: {reason}")]
    BadPayload { stage: &'static str, reason: String },

    #[error(transparent)]
    Worker(#[from] ProcessError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("merge of '{branch}' left unresolved conflicts: {files:?}")]
    MergeUnresolved { branch: String, files: Vec<String> },

    #[error("worktree .git pointer was modified during conflict resolution")]
    MergePointerTampered,
}

/// Truncate child output for inclusion in error messages.
pub fn truncate_output(s: &str) -> String {
    if s.chars().count() <= ERROR_OUTPUT_CAP {
        s.to_string()
    } else {
        let tail: String = s
            .chars()
            .rev()
            .take(ERROR_OUTPUT_CAP)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("…{tail}")
    }
}

#[cfg(test)]
mod tests {
    use super::truncate_output;

    #[test]
    fn truncate_keeps_the_tail() {
        let long = "x".repeat(3_000) + "END";
        let out = truncate_output(&long);
        assert!(out.ends_with("END"));
        assert!(out.starts_with('…'));
        assert!(out.chars().count() <= super::ERROR_OUTPUT_CAP + 1);
    }

    #[test]
    fn truncate_leaves_short_output_alone() {
        assert_eq!(truncate_output("short"), "short");
    }
}
