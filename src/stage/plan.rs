//! Read-only planning: ask the worker for a deterministic decomposition of
//! the user task. Runs in the refactor worktree when a pre-factor happened,
//! so the plan sees the refactored layout; otherwise in the repo root.

use std::path::PathBuf;

use super::context::{require_dir, run_worker, write_output_file};
use super::{StageDeps, StageError};
use crate::domain::Plan;
use crate::pipeline::JobContext;
use crate::worker::{prompts, ProgressTracker};

pub async fn run(
    deps: &StageDeps,
    ctx: &JobContext,
    refactor_worktree: Option<PathBuf>,
) -> Result<Plan, StageError> {
    let root = refactor_worktree.unwrap_or_else(|| ctx.repo_root().to_path_buf());
    require_dir(&root)?;

    let store = deps.store.clone();
    let seed = ctx.seed.clone();
    let progress = ProgressTracker::new(move |tail| {
        store.record_plan_progress(&seed, &tail);
    });

    let prompt = prompts::plan(&ctx.seed.user_task);
    let value = run_worker(deps, &root, "plan", "plan", &prompt, progress).await?;

    let plan = Plan::from_value(&value).map_err(|reason| StageError::BadPayload {
        stage: "plan",
        reason,
    })?;

    // Persist the normalised form, not the raw worker payload, so every
    // downstream consumer sees the same coerced fields.
    let normalised = serde_json::to_value(&plan).unwrap_or(value);
    write_output_file(&ctx.planner_output_path(), &normalised);
    deps.store.record_planner_output(&ctx.seed, normalised);
    Ok(plan)
}
