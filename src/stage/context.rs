//! Shared stage plumbing: the root-resolution cascade, worktree setup, and
//! the worker invocation wrapper every stage goes through.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{truncate_output, StageDeps, StageError};
use crate::git::GitOps;
use crate::process::ProcessError;
use crate::worker::{extract_json, worker_spec, ProgressTracker};

/// Resolve the directory a stage operates in.
///
/// Precedence: a job-context repo root wins; otherwise an absolute
/// project-root parameter; otherwise the project root joined onto the
/// configured base directory; otherwise the current working directory.
/// Under a context root, relative parameters resolve against it and
/// absolute parameters outside it are snapped back to the root, so a stage
/// can never be pointed out of the repository it belongs to.
pub fn resolve_stage_root(
    context_root: Option<&Path>,
    project_root: Option<&Path>,
    base_dir: Option<&Path>,
    cwd: &Path,
) -> PathBuf {
    if let Some(ctx) = context_root {
        return match project_root {
            None => ctx.to_path_buf(),
            Some(p) if p.is_absolute() => {
                if p.starts_with(ctx) {
                    p.to_path_buf()
                } else {
                    ctx.to_path_buf()
                }
            }
            Some(p) => ctx.join(p),
        };
    }

    match project_root {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => match base_dir {
            Some(base) => base.join(p),
            None => cwd.join(p),
        },
        None => base_dir.map(Path::to_path_buf).unwrap_or_else(|| cwd.to_path_buf()),
    }
}

/// Fail unless `root` is an existing directory.
pub fn require_dir(root: &Path) -> Result<(), StageError> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(StageError::InvalidRoot(root.to_path_buf()))
    }
}

/// Make sure `worktree` exists and is checked out to `branch`.
///
/// Creates the branch from `base` and the worktree as needed; an existing
/// directory is reused as-is (its branch was fixed when it was created).
/// Returns the branch the worktree is actually on.
pub fn ensure_worktree(
    git: &GitOps,
    repo: &Path,
    worktree: &Path,
    branch: &str,
    base: &str,
) -> Result<String, StageError> {
    if worktree.is_dir() {
        return Ok(git.current_branch(worktree)?);
    }

    let base_check = git.run_allow_non_zero(repo, &["rev-parse", "--verify", "--quiet", base])?;
    if !base_check.success() {
        return Err(StageError::Git(crate::git::GitError::Failed {
            args: vec!["rev-parse".into(), "--verify".into(), base.into()],
            exit_code: base_check.exit_code,
            stdout: base_check.stdout,
            stderr: base_check.stderr,
        }));
    }

    if let Some(parent) = worktree.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|_| StageError::InvalidRoot(parent.to_path_buf()))?;
    }

    if git.branch_exists(repo, branch)? {
        git.worktree_add(repo, worktree, branch, None)?;
    } else {
        git.worktree_add(repo, worktree, branch, Some(base))?;
    }
    Ok(branch.to_string())
}

/// Run the worker in `cwd` with `prompt`, streaming line tails through
/// `progress`, and return the recovered JSON object.
///
/// A non-zero exit is not fatal by itself: the buffers are still searched
/// for a final JSON object (stdout first, then stderr), and only when
/// neither stream yields one does the stage fail.
pub async fn run_worker(
    deps: &StageDeps,
    cwd: &Path,
    stage: &'static str,
    label: &str,
    prompt: &str,
    progress: Arc<ProgressTracker>,
) -> Result<Value, StageError> {
    let spec = worker_spec(&deps.worker, cwd, label, prompt)
        .on_stdout_line(progress.callback())
        .on_stderr_line(progress.callback());

    let outcome = deps.runner.run(spec).await;
    progress.finish();

    let (stdout, stderr) = match outcome {
        Ok(output) => (output.stdout, output.stderr),
        Err(ProcessError::Exit { stdout, stderr, .. }) => (stdout, stderr),
        Err(other) => return Err(StageError::Worker(other)),
    };

    if let Ok(value) = extract_json(&stdout) {
        return Ok(value);
    }
    if let Ok(value) = extract_json(&stderr) {
        return Ok(value);
    }

    Err(StageError::ParseFailed {
        stage,
        stdout: truncate_output(&stdout),
        stderr: truncate_output(&stderr),
    })
}

/// Commit whatever the worker left uncommitted, with an engine-authored
/// message. Returns true when a commit was created.
pub fn commit_dirty(
    git: &GitOps,
    worktree: &Path,
    message: &str,
) -> Result<bool, StageError> {
    if !git.is_dirty(worktree)? {
        return Ok(false);
    }
    git.add_all(worktree)?;
    git.commit(worktree, message)?;
    Ok(true)
}

/// Best-effort write of a stage's normalised output next to the job log.
pub fn write_output_file(path: &Path, value: &Value) {
    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(path, pretty) {
        tracing::warn!("failed to write {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::resolve_stage_root;
    use std::path::Path;

    #[test]
    fn context_root_wins_when_no_parameter() {
        let root = resolve_stage_root(
            Some(Path::new("/repo")),
            None,
            Some(Path::new("/base")),
            Path::new("/cwd"),
        );
        assert_eq!(root, Path::new("/repo"));
    }

    #[test]
    fn relative_parameter_resolves_against_context_root() {
        let root = resolve_stage_root(
            Some(Path::new("/repo")),
            Some(Path::new("sub/dir")),
            None,
            Path::new("/cwd"),
        );
        assert_eq!(root, Path::new("/repo/sub/dir"));
    }

    #[test]
    fn absolute_parameter_inside_context_root_is_kept() {
        let root = resolve_stage_root(
            Some(Path::new("/repo")),
            Some(Path::new("/repo/sub")),
            None,
            Path::new("/cwd"),
        );
        assert_eq!(root, Path::new("/repo/sub"));
    }

    #[test]
    fn absolute_parameter_escaping_context_root_is_rejected() {
        let root = resolve_stage_root(
            Some(Path::new("/repo")),
            Some(Path::new("/elsewhere")),
            None,
            Path::new("/cwd"),
        );
        assert_eq!(root, Path::new("/repo"));
    }

    #[test]
    fn without_context_absolute_parameter_wins() {
        let root = resolve_stage_root(
            None,
            Some(Path::new("/project")),
            Some(Path::new("/base")),
            Path::new("/cwd"),
        );
        assert_eq!(root, Path::new("/project"));
    }

    #[test]
    fn without_context_relative_parameter_joins_base_dir() {
        let root = resolve_stage_root(
            None,
            Some(Path::new("project")),
            Some(Path::new("/base")),
            Path::new("/cwd"),
        );
        assert_eq!(root, Path::new("/base/project"));
    }

    #[test]
    fn falls_back_to_cwd() {
        let root = resolve_stage_root(None, None, None, Path::new("/cwd"));
        assert_eq!(root, Path::new("/cwd"));
        let root = resolve_stage_root(None, Some(Path::new("p")), None, Path::new("/cwd"));
        assert_eq!(root, Path::new("/cwd/p"));
    }
}
