//! Shared test utilities: throwaway git repositories and a scripted worker
//! runner that stands in for the real Worker CLI.

use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use tempfile::TempDir;

use conductor::process::{ProcessError, ProcessRunner, RunOutput, RunSpec};

/// Run git in `dir`, panicking loudly on failure.
pub fn git(dir: &Path, args: &[&str]) {
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

/// Capture one line of git stdout in `dir`.
pub fn git_out(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("failed to run git {args:?}: {e}"));
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Creates a temporary git repository on branch `main` with one commit.
pub fn create_test_repo() -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let repo_path = temp_dir.path();

    git(repo_path, &["init", "-b", "main"]);
    git(repo_path, &["config", "user.email", "test@test.com"]);
    git(repo_path, &["config", "user.name", "Test User"]);

    fs::write(repo_path.join("base.txt"), "initial content\n")
        .expect("Failed to write initial file");
    git(repo_path, &["add", "."]);
    git(repo_path, &["commit", "-m", "Initial commit"]);

    temp_dir
}

/// What one scripted worker invocation does before "exiting".
#[derive(Default)]
pub struct ScriptedResponse {
    /// Files written into the invocation's cwd (the stage worktree)
    pub files: Vec<(String, String)>,
    /// Bytes appended to the worktree's `.git` pointer file (tamper tests)
    pub tamper_pointer: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ScriptedResponse {
    pub fn json(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn write(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.push((path.into(), content.into()));
        self
    }
}

type Rule = (String, Box<dyn Fn(&RunSpec) -> ScriptedResponse + Send + Sync>);

/// A `ProcessRunner` that matches each invocation's prompt against ordered
/// substring rules and plays back the scripted response, editing files in
/// the cwd exactly like the real worker would.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        mut self,
        prompt_substring: impl Into<String>,
        respond: impl Fn(&RunSpec) -> ScriptedResponse + Send + Sync + 'static,
    ) -> Self {
        self.rules
            .push((prompt_substring.into(), Box::new(respond)));
        self
    }

    pub fn labels(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, spec: RunSpec) -> Result<RunOutput, ProcessError> {
        self.calls.lock().unwrap().push(spec.label.clone());

        let prompt = spec.args.last().cloned().unwrap_or_default();
        let rule = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .unwrap_or_else(|| panic!("no scripted response for prompt:\n{prompt}"));
        let response = (rule.1)(&spec);

        for (path, content) in &response.files {
            let target = spec.cwd.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).expect("create parent dirs");
            }
            fs::write(&target, content).expect("write scripted file");
        }
        if response.tamper_pointer {
            let pointer = spec.cwd.join(".git");
            let mut content = fs::read(&pointer).expect("read .git pointer");
            content.extend_from_slice(b"# tampered\n");
            fs::write(&pointer, content).expect("tamper .git pointer");
        }

        if let Some(cb) = &spec.on_stdout_line {
            for line in response.stdout.lines() {
                cb(line);
            }
        }

        if response.exit_code == 0 {
            Ok(RunOutput {
                stdout: response.stdout,
                stderr: response.stderr,
                exit_code: 0,
            })
        } else {
            Err(ProcessError::Exit {
                label: spec.label,
                code: Some(response.exit_code),
                signal: None,
                stdout: response.stdout,
                stderr: response.stderr,
            })
        }
    }
}
