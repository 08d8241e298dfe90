//! Per-job derived paths and names. Everything a stage needs to know about
//! where it runs is computed once here, so no two jobs can ever collide on a
//! worktree or branch: the job id is embedded in all of them.

use std::path::{Path, PathBuf};

use super::naming;
use crate::store::JobSeed;

/// Resolved identity and layout of one job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub seed: JobSeed,
    /// `<repo>/.codex/jobs/<jobId>`
    pub jobs_root: PathBuf,
    /// `<jobsRoot>/worktrees`
    pub worktrees_root: PathBuf,
    /// `result-<jobId>`
    pub result_branch: String,
    /// `<worktreesRoot>/result`
    pub result_worktree: PathBuf,
}

impl JobContext {
    pub fn new(seed: JobSeed) -> Self {
        let jobs_root = seed.repo_root.join(".codex").join("jobs").join(&seed.id);
        let worktrees_root = jobs_root.join("worktrees");
        let result_branch = naming::sanitize_branch(&format!("result-{}", seed.id));
        let result_worktree = worktrees_root.join("result");
        Self {
            seed,
            jobs_root,
            worktrees_root,
            result_branch,
            result_worktree,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.seed.repo_root
    }

    pub fn log_path(&self) -> PathBuf {
        self.jobs_root.join("orchestrator.log")
    }

    pub fn planner_output_path(&self) -> PathBuf {
        self.jobs_root.join("planner-output.json")
    }

    pub fn analysis_output_path(&self) -> PathBuf {
        self.jobs_root.join("analysis-output.json")
    }

    pub fn refactor_branch(&self) -> String {
        naming::sanitize_branch(&format!("refactor-{}", self.seed.id))
    }

    pub fn refactor_worktree(&self) -> PathBuf {
        self.worktrees_root.join("refactor")
    }

    /// Worktree path for a (already uniquified) subtask worktree name.
    pub fn subtask_worktree(&self, worktree_name: &str) -> PathBuf {
        self.worktrees_root.join(worktree_name)
    }

    /// Branch for a subtask worktree name: `<name>-<jobId>`.
    pub fn subtask_branch(&self, worktree_name: &str) -> String {
        naming::sanitize_branch(&format!("{worktree_name}-{}", self.seed.id))
    }

    /// First line of the user task, shortened, for dashboard labels.
    pub fn describe_task(user_task: &str) -> String {
        let first = user_task.lines().next().unwrap_or("").trim();
        let mut out: String = first.chars().take(80).collect();
        if first.chars().count() > 80 {
            out.push('…');
        }
        out
    }
}
