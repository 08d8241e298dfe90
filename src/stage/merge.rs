//! Folding subtask branches into the per-job result branch, one at a time.
//!
//! Clean merges commit directly. Conflicted merges hand the conflicted
//! files to the worker, with two hard guards afterwards: the worktree's
//! `.git` pointer file must be byte-identical to what it was before the
//! worker ran, and no file may remain in the unmerged state.

use serde_json::Value;
use std::path::Path;

use super::context::{ensure_worktree, require_dir, run_worker};
use super::{StageDeps, StageError};
use crate::domain::{MergeReport, MergeStatus};
use crate::pipeline::JobContext;
use crate::worker::{prompts, ProgressTracker};

/// One branch to fold in, as produced by a completed subtask.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeItem {
    pub subtask_id: String,
    pub worktree_path: String,
    pub branch: String,
    pub summary: String,
}

pub async fn run(
    deps: &StageDeps,
    ctx: &JobContext,
    items: &[MergeItem],
) -> Result<MergeReport, StageError> {
    match run_inner(deps, ctx, items).await {
        Ok(report) => {
            deps.store.record_merge_result(&ctx.seed, &report);
            Ok(report)
        }
        Err(e) => {
            deps.store.record_merge_failure(&ctx.seed, &e.to_string());
            Err(e)
        }
    }
}

async fn run_inner(
    deps: &StageDeps,
    ctx: &JobContext,
    items: &[MergeItem],
) -> Result<MergeReport, StageError> {
    require_dir(ctx.repo_root())?;

    deps.git
        .ensure_branch(ctx.repo_root(), &ctx.result_branch, &ctx.seed.base_branch)?;
    ensure_worktree(
        &deps.git,
        ctx.repo_root(),
        &ctx.result_worktree,
        &ctx.result_branch,
        &ctx.seed.base_branch,
    )?;

    deps.store.record_merge_start(
        &ctx.seed,
        serde_json::json!({
            "resultBranch": ctx.result_branch,
            "baseBranch": ctx.seed.base_branch,
            "branches": items,
        }),
    );

    let mut needs_review_notes: Vec<String> = Vec::new();

    for item in items {
        let merged = merge_one(deps, ctx, item).await?;
        if let Some(note) = merged {
            needs_review_notes.push(note);
        }
    }

    let touched_files = deps.git.diff_names(
        &ctx.result_worktree,
        &format!("{}...HEAD", ctx.seed.base_branch),
    )?;

    let mut notes = format!(
        "Merged {} branches into {}",
        items.len(),
        ctx.result_branch
    );

    if ctx.seed.push_result {
        deps.git
            .push(&ctx.result_worktree, "origin", &ctx.result_branch)?;
        notes.push_str("; pushed to origin");
    }

    let status = if needs_review_notes.is_empty() {
        MergeStatus::Ok
    } else {
        notes.push_str("; worker flagged conflicts for manual review: ");
        notes.push_str(&needs_review_notes.join("; "));
        MergeStatus::NeedsManualReview
    };

    Ok(MergeReport {
        status,
        notes,
        touched_files,
    })
}

/// Merge one branch into the result worktree. Returns a note when the
/// worker asked for manual review of its conflict resolution.
async fn merge_one(
    deps: &StageDeps,
    ctx: &JobContext,
    item: &MergeItem,
) -> Result<Option<String>, StageError> {
    let worktree = &ctx.result_worktree;

    let merge = deps.git.merge_no_commit(worktree, &item.branch)?;
    let unmerged = deps.git.unmerged_files(worktree)?;

    if merge.success() && unmerged.is_empty() {
        // --no-commit leaves the merge staged; nothing staged means the
        // branch was already contained and there is nothing to commit.
        if deps.git.is_dirty(worktree)? {
            let message = format!("Merge branch {} into {}", item.branch, ctx.result_branch);
            deps.git.add_all(worktree)?;
            deps.git.commit(worktree, &message)?;
        }
        return Ok(None);
    }

    if unmerged.is_empty() {
        // Merge failed outright without conflict markers (e.g. unknown ref).
        return Err(StageError::Git(crate::git::GitError::Failed {
            args: vec!["merge".into(), "--no-commit".into(), item.branch.clone()],
            exit_code: merge.exit_code,
            stdout: merge.stdout,
            stderr: merge.stderr,
        }));
    }

    let review_note = resolve_conflicts(deps, ctx, item, &unmerged).await?;

    let still_unmerged = deps.git.unmerged_files(worktree)?;
    if !still_unmerged.is_empty() {
        return Err(StageError::MergeUnresolved {
            branch: item.branch.clone(),
            files: still_unmerged,
        });
    }

    let message = format!(
        "Merge branch {} into {} (conflicts resolved via worker)",
        item.branch, ctx.result_branch
    );
    deps.git.add_all(worktree)?;
    deps.git.commit(worktree, &message)?;
    Ok(review_note)
}

/// Delegate conflict resolution to the worker, guarding the `.git` pointer
/// file against tampering. Returns a note when the worker reported
/// `needs_manual_review`.
async fn resolve_conflicts(
    deps: &StageDeps,
    ctx: &JobContext,
    item: &MergeItem,
    unmerged: &[String],
) -> Result<Option<String>, StageError> {
    let worktree = &ctx.result_worktree;
    let pointer_before = read_pointer(worktree);

    let store = deps.store.clone();
    let seed = ctx.seed.clone();
    let progress = ProgressTracker::new(move |tail| {
        store.record_merge_progress(&seed, &tail);
    });

    let prompt = prompts::resolve_conflicts(&item.branch, unmerged);
    let label = format!("merge:{}", item.subtask_id);
    let value = match run_worker(deps, worktree, "merge", &label, &prompt, progress).await {
        Ok(value) => Some(value),
        // The resolution itself is judged by the unmerged-files re-check;
        // a worker that fixed the files but printed no JSON still counts.
        Err(StageError::ParseFailed { .. }) => None,
        Err(other) => return Err(other),
    };

    let pointer_after = read_pointer(worktree);
    if pointer_before != pointer_after {
        return Err(StageError::MergePointerTampered);
    }

    Ok(value.as_ref().and_then(review_note))
}

fn read_pointer(worktree: &Path) -> Option<Vec<u8>> {
    std::fs::read(worktree.join(".git")).ok()
}

fn review_note(value: &Value) -> Option<String> {
    let status = value.get("status").and_then(Value::as_str)?;
    if status != "needs_manual_review" {
        return None;
    }
    Some(
        value
            .get("notes")
            .and_then(Value::as_str)
            .unwrap_or("worker requested manual review")
            .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::review_note;
    use serde_json::json;

    #[test]
    fn review_note_only_for_needs_manual_review() {
        assert_eq!(review_note(&json!({"status": "ok"})), None);
        assert_eq!(review_note(&json!({"notes": "x"})), None);
        assert_eq!(
            review_note(&json!({"status": "needs_manual_review", "notes": "odd hunk"})),
            Some("odd hunk".to_string())
        );
        assert_eq!(
            review_note(&json!({"status": "needs_manual_review"})),
            Some("worker requested manual review".to_string())
        );
    }
}
