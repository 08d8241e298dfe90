//! Git operations used by the engine. Every operation shells out to `git`
//! with an explicit working directory; worktrees make concurrent invocations
//! safe as long as no two run in the same directory, which the engine
//! guarantees.

use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Captured result of one git invocation.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Non-empty stdout lines, trimmed.
    pub fn lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("git {args:?} failed with exit code {exit_code}: {stderr}")]
    Failed {
        args: Vec<String>,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
}

/// Find the repository root containing `path`, if any.
pub fn find_repo_root(path: &Path) -> Option<PathBuf> {
    let start = if path.is_file() { path.parent()? } else { path };
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(start)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if root.is_empty() {
        None
    } else {
        Some(PathBuf::from(root))
    }
}

/// Git operations with a fixed orchestrator author identity for commits, so
/// every commit the engine makes is identifiable as engine-authored.
#[derive(Debug, Clone)]
pub struct GitOps {
    author_name: String,
    author_email: String,
}

impl Default for GitOps {
    fn default() -> Self {
        Self::new()
    }
}

impl GitOps {
    pub fn new() -> Self {
        Self {
            author_name: "Conductor Orchestrator".to_string(),
            author_email: "conductor@localhost".to_string(),
        }
    }

    /// Run git, raising `GitError::Failed` on non-zero exit.
    pub fn run(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        let output = self.run_allow_non_zero(cwd, args)?;
        if output.success() {
            Ok(output)
        } else {
            Err(GitError::Failed {
                args: args.iter().map(|s| s.to_string()).collect(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }

    /// Run git, returning the exit status as a value. Callers branch on the
    /// code; the merge flow uses this to detect conflicts.
    pub fn run_allow_non_zero(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        let output = Command::new("git").args(args).current_dir(cwd).output()?;
        Ok(GitOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// `rev-parse --abbrev-ref HEAD`
    pub fn current_branch(&self, cwd: &Path) -> Result<String, GitError> {
        let output = self.run(cwd, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(output.stdout.trim().to_string())
    }

    /// Does a local branch with this name exist?
    pub fn branch_exists(&self, repo: &Path, name: &str) -> Result<bool, GitError> {
        let refname = format!("refs/heads/{name}");
        let output =
            self.run_allow_non_zero(repo, &["rev-parse", "--verify", "--quiet", &refname])?;
        Ok(output.success())
    }

    /// Create `name` pointing at `base` unless it already exists.
    pub fn ensure_branch(&self, repo: &Path, name: &str, base: &str) -> Result<(), GitError> {
        if self.branch_exists(repo, name)? {
            return Ok(());
        }
        self.run(repo, &["branch", name, base])?;
        Ok(())
    }

    /// `git worktree add [-b branch] <path> <ref>`. With `create_from`, the
    /// branch is created from that base as part of the add.
    pub fn worktree_add(
        &self,
        repo: &Path,
        worktree: &Path,
        branch: &str,
        create_from: Option<&str>,
    ) -> Result<(), GitError> {
        let path = worktree.to_string_lossy().to_string();
        match create_from {
            Some(base) => {
                self.run(repo, &["worktree", "add", "-b", branch, &path, base])?;
            }
            None => {
                self.run(repo, &["worktree", "add", &path, branch])?;
            }
        }
        Ok(())
    }

    pub fn worktree_remove(&self, repo: &Path, worktree: &Path) -> Result<(), GitError> {
        let path = worktree.to_string_lossy().to_string();
        self.run(repo, &["worktree", "remove", "--force", &path])?;
        Ok(())
    }

    /// Attempt a merge leaving the index and working tree in the merged
    /// state without committing. Conflicts surface as a non-zero exit, which
    /// is returned, not raised.
    pub fn merge_no_commit(&self, worktree: &Path, branch: &str) -> Result<GitOutput, GitError> {
        self.run_allow_non_zero(worktree, &["merge", "--no-commit", "--no-ff", branch])
    }

    /// Paths still in the unmerged state after a conflicted merge.
    pub fn unmerged_files(&self, worktree: &Path) -> Result<Vec<String>, GitError> {
        let output = self.run(worktree, &["diff", "--name-only", "--diff-filter=U"])?;
        Ok(output.lines())
    }

    pub fn status_porcelain(&self, worktree: &Path) -> Result<String, GitError> {
        let output = self.run(worktree, &["status", "--porcelain"])?;
        Ok(output.stdout)
    }

    /// Any tracked or untracked change in the working tree?
    pub fn is_dirty(&self, worktree: &Path) -> Result<bool, GitError> {
        Ok(!self.status_porcelain(worktree)?.trim().is_empty())
    }

    pub fn add_all(&self, worktree: &Path) -> Result<(), GitError> {
        self.run(worktree, &["add", "-A"])?;
        Ok(())
    }

    /// Commit staged changes as the orchestrator author. Committer identity
    /// is overridden too so fresh clones without git config still work.
    pub fn commit(&self, worktree: &Path, message: &str) -> Result<(), GitError> {
        let name = format!("user.name={}", self.author_name);
        let email = format!("user.email={}", self.author_email);
        self.run(
            worktree,
            &["-c", &name, "-c", &email, "commit", "-m", message],
        )?;
        Ok(())
    }

    /// `git diff --name-only <range>`, e.g. `main...HEAD`.
    pub fn diff_names(&self, worktree: &Path, range: &str) -> Result<Vec<String>, GitError> {
        let output = self.run(worktree, &["diff", "--name-only", range])?;
        Ok(output.lines())
    }

    pub fn push(&self, worktree: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        self.run(worktree, &["push", remote, branch])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{find_repo_root, GitOps};
    use std::fs;
    use std::path::Path;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap_or_else(|e| panic!("failed to run git {args:?}: {e}"));
        assert!(
            output.status.success(),
            "git {:?} failed:\nstdout:\n{}\nstderr:\n{}",
            args,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn init_repo() -> TempDir {
        let tmp = TempDir::new().expect("tempdir");
        let repo = tmp.path();
        git(repo, &["init", "-b", "main"]);
        git(repo, &["config", "user.email", "test@example.com"]);
        git(repo, &["config", "user.name", "Test User"]);
        fs::write(repo.join("README.md"), "hello\n").expect("write README");
        git(repo, &["add", "."]);
        git(repo, &["commit", "-m", "init"]);
        tmp
    }

    #[test]
    fn branch_lifecycle() {
        let tmp = init_repo();
        let repo = tmp.path();
        let ops = GitOps::new();

        assert!(!ops.branch_exists(repo, "result-x").expect("exists"));
        ops.ensure_branch(repo, "result-x", "main").expect("create");
        assert!(ops.branch_exists(repo, "result-x").expect("exists"));
        // Idempotent
        ops.ensure_branch(repo, "result-x", "main").expect("again");
    }

    #[test]
    fn worktree_add_creates_branch_and_checkout() {
        let tmp = init_repo();
        let repo = tmp.path();
        let ops = GitOps::new();

        let worktree = repo.join("wt").join("task-a");
        ops.worktree_add(repo, &worktree, "task-a-job", Some("main"))
            .expect("worktree add");

        assert!(worktree.join("README.md").exists());
        assert_eq!(ops.current_branch(&worktree).expect("branch"), "task-a-job");
    }

    #[test]
    fn worktree_remove_cleans_up() {
        let tmp = init_repo();
        let repo = tmp.path();
        let ops = GitOps::new();

        let worktree = repo.join("wt").join("gone");
        ops.worktree_add(repo, &worktree, "gone-branch", Some("main"))
            .expect("worktree add");
        assert!(worktree.exists());

        ops.worktree_remove(repo, &worktree).expect("worktree remove");
        assert!(!worktree.exists());
    }

    #[test]
    fn merge_conflict_is_reported_as_value_and_unmerged_files() {
        let tmp = init_repo();
        let repo = tmp.path();
        let ops = GitOps::new();

        // Two branches editing the same line
        git(repo, &["checkout", "-b", "left"]);
        fs::write(repo.join("README.md"), "left\n").expect("write");
        git(repo, &["commit", "-am", "left"]);
        git(repo, &["checkout", "main"]);
        git(repo, &["checkout", "-b", "right"]);
        fs::write(repo.join("README.md"), "right\n").expect("write");
        git(repo, &["commit", "-am", "right"]);

        let merge = ops.merge_no_commit(repo, "left").expect("merge runs");
        assert!(!merge.success());
        let unmerged = ops.unmerged_files(repo).expect("unmerged");
        assert_eq!(unmerged, vec!["README.md".to_string()]);
    }

    #[test]
    fn clean_merge_leaves_no_commit() {
        let tmp = init_repo();
        let repo = tmp.path();
        let ops = GitOps::new();

        git(repo, &["checkout", "-b", "feature"]);
        fs::write(repo.join("new.txt"), "new\n").expect("write");
        git(repo, &["add", "."]);
        git(repo, &["commit", "-m", "feature"]);
        git(repo, &["checkout", "main"]);

        let merge = ops.merge_no_commit(repo, "feature").expect("merge runs");
        assert!(merge.success());
        // Merge is staged but not committed
        assert!(ops.is_dirty(repo).expect("dirty"));
    }

    #[test]
    fn commit_uses_orchestrator_author() {
        let tmp = init_repo();
        let repo = tmp.path();
        let ops = GitOps::new();

        fs::write(repo.join("a.txt"), "a\n").expect("write");
        ops.add_all(repo).expect("add");
        ops.commit(repo, "engine change").expect("commit");

        let author = Command::new("git")
            .args(["log", "-1", "--format=%an <%ae>"])
            .current_dir(repo)
            .output()
            .expect("log");
        assert_eq!(
            String::from_utf8_lossy(&author.stdout).trim(),
            "Conductor Orchestrator <conductor@localhost>"
        );
    }

    #[test]
    fn diff_names_against_base() {
        let tmp = init_repo();
        let repo = tmp.path();
        let ops = GitOps::new();

        git(repo, &["checkout", "-b", "work"]);
        fs::write(repo.join("touched.txt"), "x\n").expect("write");
        git(repo, &["add", "."]);
        git(repo, &["commit", "-m", "work"]);

        let names = ops.diff_names(repo, "main...HEAD").expect("diff");
        assert_eq!(names, vec!["touched.txt".to_string()]);
    }

    #[test]
    fn find_repo_root_walks_up_from_subdir() {
        let tmp = init_repo();
        let repo = tmp.path();
        let sub = repo.join("src");
        fs::create_dir_all(&sub).expect("mkdir");

        let found = find_repo_root(&sub).expect("root");
        assert_eq!(
            found.canonicalize().expect("canon"),
            repo.canonicalize().expect("canon")
        );
    }

    #[test]
    fn allow_non_zero_surfaces_exit_code() {
        let tmp = init_repo();
        let ops = GitOps::new();
        let output = ops
            .run_allow_non_zero(tmp.path(), &["rev-parse", "--verify", "--quiet", "nope"])
            .expect("runs");
        assert!(!output.success());
    }
}
