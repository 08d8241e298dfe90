//! The optional pre-factor: a minimal, behaviour-preserving refactor in its
//! own worktree that makes the task easier to parallelise.

use serde_json::Value;

use super::context::{commit_dirty, ensure_worktree, require_dir, run_worker};
use super::{StageDeps, StageError};
use crate::domain::{AnalysisReport, RefactorReport};
use crate::pipeline::JobContext;
use crate::worker::{prompts, ProgressTracker};

pub async fn run(
    deps: &StageDeps,
    ctx: &JobContext,
    analysis: &AnalysisReport,
) -> Result<RefactorReport, StageError> {
    require_dir(ctx.repo_root())?;

    let branch = ctx.refactor_branch();
    let worktree = ctx.refactor_worktree();
    let actual_branch = ensure_worktree(
        &deps.git,
        ctx.repo_root(),
        &worktree,
        &branch,
        &ctx.seed.base_branch,
    )?;

    let store = deps.store.clone();
    let seed = ctx.seed.clone();
    let progress = ProgressTracker::new(move |tail| {
        store.record_refactor_progress(&seed, &tail);
    });

    let prompt = prompts::refactor(&ctx.seed.user_task, &analysis.reasons);
    let value = run_worker(deps, &worktree, "refactor", "refactor", &prompt, progress).await?;

    let mut report = RefactorReport::from_value(&value).map_err(|reason| {
        StageError::BadPayload {
            stage: "refactor",
            reason,
        }
    })?;

    // The worker edits files but never commits; pick up whatever it left.
    let message = format!("job {}: pre-factor for parallel work", ctx.seed.id);
    commit_dirty(&deps.git, &worktree, &message)?;

    // The worker's own idea of branch/paths/touched files is unreliable;
    // recompute from git against the base branch.
    report.branch = actual_branch;
    report.worktree_path = worktree.to_string_lossy().to_string();
    report.touched_files = deps
        .git
        .diff_names(&worktree, &format!("{}..HEAD", ctx.seed.base_branch))?;

    let data = serde_json::to_value(&report).unwrap_or(Value::Null);
    deps.store.record_refactor_output(&ctx.seed, data);
    Ok(report)
}
