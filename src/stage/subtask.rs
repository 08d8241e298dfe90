//! One subtask: its own worktree, its own branch, one worker run, one
//! commit. Subtasks never see each other's state; everything they share
//! travels through branches and the store.

use super::context::{commit_dirty, ensure_worktree, require_dir, run_worker};
use super::{StageDeps, StageError};
use crate::domain::{PlannedSubtask, SubtaskReport, SubtaskReportStatus};
use crate::pipeline::JobContext;
use crate::worker::{prompts, ProgressTracker};

/// Where a finished subtask left its work.
#[derive(Debug, Clone)]
pub struct SubtaskOutcome {
    pub report: SubtaskReport,
    pub branch: String,
    pub worktree: std::path::PathBuf,
}

pub async fn run(
    deps: &StageDeps,
    ctx: &JobContext,
    planned: &PlannedSubtask,
    worktree_name: &str,
) -> Result<SubtaskOutcome, StageError> {
    require_dir(ctx.repo_root())?;

    let worktree = ctx.subtask_worktree(worktree_name);
    let branch = ctx.subtask_branch(worktree_name);
    let branch = ensure_worktree(
        &deps.git,
        ctx.repo_root(),
        &worktree,
        &branch,
        &ctx.seed.base_branch,
    )?;

    deps.store
        .record_subtask_start(&ctx.seed, planned, &worktree, &branch);

    let store = deps.store.clone();
    let seed = ctx.seed.clone();
    let subtask_id = planned.id.clone();
    let progress = ProgressTracker::new(move |tail| {
        store.record_subtask_reasoning(&seed, &subtask_id, &tail);
    });

    let label = format!("subtask:{}", planned.id);
    let prompt = prompts::subtask(&ctx.seed.user_task, planned);

    let outcome: Result<SubtaskReport, StageError> = async {
        let value = run_worker(deps, &worktree, "run-subtask", &label, &prompt, progress).await?;
        let report = SubtaskReport::from_value(&value, &planned.id).map_err(|reason| {
            StageError::BadPayload {
                stage: "run-subtask",
                reason,
            }
        })?;

        let mut summary = report.summary.chars().take(120).collect::<String>();
        if summary.is_empty() {
            summary = planned.title.clone();
        }
        let message = format!("job {}: subtask {} - {}", ctx.seed.id, planned.id, summary);
        commit_dirty(&deps.git, &worktree, &message)?;
        Ok(report)
    }
    .await;

    match outcome {
        Ok(report) => {
            let succeeded = report.status == SubtaskReportStatus::Ok;
            deps.store.record_subtask_result(
                &ctx.seed,
                &report.subtask_id,
                succeeded,
                &report.summary,
                &report.important_files,
                None,
            );
            Ok(SubtaskOutcome {
                report,
                branch,
                worktree,
            })
        }
        Err(e) => {
            deps.store.record_subtask_result(
                &ctx.seed,
                &planned.id,
                false,
                "",
                &[],
                Some(&e.to_string()),
            );
            Err(e)
        }
    }
}
