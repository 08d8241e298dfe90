//! Read-only pre-factor assessment. Runs straight in the repo root; no
//! worktree, no edits.

use super::context::{require_dir, run_worker, write_output_file};
use super::{StageDeps, StageError};
use crate::domain::AnalysisReport;
use crate::pipeline::JobContext;
use crate::worker::{prompts, ProgressTracker};

pub async fn run(deps: &StageDeps, ctx: &JobContext) -> Result<AnalysisReport, StageError> {
    let root = ctx.repo_root().to_path_buf();
    require_dir(&root)?;

    let store = deps.store.clone();
    let seed = ctx.seed.clone();
    let progress = ProgressTracker::new(move |tail| {
        store.record_analysis_progress(&seed, &tail);
    });

    let prompt = prompts::analyze(&ctx.seed.user_task);
    let value = run_worker(deps, &root, "analyze", "analyze", &prompt, progress).await?;

    let report = AnalysisReport::from_value(&value).map_err(|reason| StageError::BadPayload {
        stage: "analyze",
        reason,
    })?;

    write_output_file(&ctx.analysis_output_path(), &value);
    deps.store.record_analysis_output(&ctx.seed, value);
    Ok(report)
}
