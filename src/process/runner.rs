//! The process runner: spawns a child with stdin closed, splits stdout and
//! stderr into lines, fans each line out to the configured sinks and
//! callbacks, and retains a bounded tail of both streams for parsing.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::sink::LineSink;

/// Default bound on each retained output stream. Worker runs can be very
/// verbose; only the tail matters because the final JSON appears at the end.
pub const DEFAULT_CAPTURE_LIMIT: usize = 2 * 1024 * 1024;

/// Observer for completed output lines, used for live-progress capture.
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// One subprocess invocation.
pub struct RunSpec {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Short tag written into log lines, e.g. `plan` or `subtask:s2`
    pub label: String,
    pub capture_limit: usize,
    pub on_stdout_line: Option<LineCallback>,
    pub on_stderr_line: Option<LineCallback>,
}

impl RunSpec {
    pub fn new(
        command: impl Into<String>,
        cwd: impl Into<PathBuf>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            label: label.into(),
            capture_limit: DEFAULT_CAPTURE_LIMIT,
            on_stdout_line: None,
            on_stderr_line: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn capture_limit(mut self, limit: usize) -> Self {
        self.capture_limit = limit;
        self
    }

    pub fn on_stdout_line(mut self, callback: LineCallback) -> Self {
        self.on_stdout_line = Some(callback);
        self
    }

    pub fn on_stderr_line(mut self, callback: LineCallback) -> Self {
        self.on_stderr_line = Some(callback);
        self
    }
}

/// Captured output of a finished child.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    /// The binary could not be spawned at all (typically: not installed)
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Non-zero exit or signal termination. The captured tails ride along so
    /// callers can still pull an embedded JSON object out of them.
    #[error("process '{label}' exited with code {code:?}, signal {signal:?}")]
    Exit {
        label: String,
        code: Option<i32>,
        signal: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("process '{label}' was cancelled")]
    Cancelled { label: String },

    #[error("i/o error while supervising child: {0}")]
    Io(#[from] std::io::Error),
}

/// Seam between the engine and real subprocesses. Stages receive a runner by
/// injection; tests substitute a scripted fake.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, spec: RunSpec) -> Result<RunOutput, ProcessError>;
}

/// Tail-preserving bounded buffer: when the limit is exceeded the oldest
/// bytes are discarded, on a char boundary.
struct TailBuffer {
    buf: String,
    limit: usize,
}

impl TailBuffer {
    fn new(limit: usize) -> Self {
        Self {
            buf: String::new(),
            limit,
        }
    }

    fn push_line(&mut self, line: &str) {
        self.buf.push_str(line);
        self.buf.push('\n');
        if self.buf.len() > self.limit {
            let mut cut = self.buf.len() - self.limit;
            while cut < self.buf.len() && !self.buf.is_char_boundary(cut) {
                cut += 1;
            }
            self.buf.drain(..cut);
        }
    }

    fn into_string(self) -> String {
        self.buf
    }
}

/// Real subprocess runner backed by `tokio::process`.
pub struct CommandRunner {
    sinks: Vec<Arc<dyn LineSink>>,
    cancel: CancellationToken,
}

impl CommandRunner {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            sinks: Vec::new(),
            cancel,
        }
    }

    /// Add a sink that receives every output line of every run.
    pub fn with_sink(mut self, sink: Arc<dyn LineSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    fn spawn_reader<R>(
        &self,
        stream: R,
        label: String,
        limit: usize,
        callback: Option<LineCallback>,
    ) -> tokio::task::JoinHandle<String>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let sinks = self.sinks.clone();
        tokio::spawn(async move {
            let mut tail = TailBuffer::new(limit);
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                for sink in &sinks {
                    sink.write_line(&label, &line);
                }
                if let Some(cb) = &callback {
                    cb(&line);
                }
                tail.push_line(&line);
            }
            tail.into_string()
        })
    }
}

#[async_trait]
impl ProcessRunner for CommandRunner {
    async fn run(&self, spec: RunSpec) -> Result<RunOutput, ProcessError> {
        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: spec.command.clone(),
                source,
            })?;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let stdout_task = self.spawn_reader(
            stdout,
            spec.label.clone(),
            spec.capture_limit,
            spec.on_stdout_line.clone(),
        );
        let stderr_task = self.spawn_reader(
            stderr,
            spec.label.clone(),
            spec.capture_limit,
            spec.on_stderr_line.clone(),
        );

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = self.cancel.cancelled() => {
                // Terminate the child and wait for it so no zombie survives
                // the cancellation.
                let _ = child.start_kill();
                let _ = child.wait().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(ProcessError::Cancelled { label: spec.label });
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if status.success() {
            Ok(RunOutput {
                stdout,
                stderr,
                exit_code: 0,
            })
        } else {
            #[cfg(unix)]
            let signal = {
                use std::os::unix::process::ExitStatusExt;
                status.signal()
            };
            #[cfg(not(unix))]
            let signal = None;

            Err(ProcessError::Exit {
                label: spec.label,
                code: status.code(),
                signal,
                stdout,
                stderr,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CollectingSink(Mutex<Vec<String>>);

    impl LineSink for CollectingSink {
        fn write_line(&self, label: &str, line: &str) {
            self.0.lock().unwrap().push(format!("[{label}] {line}"));
        }
    }

    fn runner() -> CommandRunner {
        CommandRunner::new(CancellationToken::new())
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr_separately() {
        let spec = RunSpec::new("sh", std::env::temp_dir(), "test")
            .args(["-c", "echo out; echo err >&2"]);

        let output = runner().run(spec).await.expect("run");
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn nonzero_exit_returns_buffers_in_error() {
        let spec = RunSpec::new("sh", std::env::temp_dir(), "boom")
            .args(["-c", "echo partial; echo oops >&2; exit 3"]);

        let err = runner().run(spec).await.expect_err("should fail");
        match err {
            ProcessError::Exit {
                code,
                stdout,
                stderr,
                ..
            } => {
                assert_eq!(code, Some(3));
                assert_eq!(stdout, "partial\n");
                assert_eq!(stderr, "oops\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let spec = RunSpec::new(
            "definitely-not-a-real-binary-4729",
            std::env::temp_dir(),
            "missing",
        );
        let err = runner().run(spec).await.expect_err("should fail");
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn capture_is_tail_preserving() {
        // 200 numbered lines, limit small enough to evict the head
        let spec = RunSpec::new("sh", std::env::temp_dir(), "tail")
            .args(["-c", "i=0; while [ $i -lt 200 ]; do echo line-$i; i=$((i+1)); done"])
            .capture_limit(256);

        let output = runner().run(spec).await.expect("run");
        assert!(output.stdout.len() <= 256);
        assert!(!output.stdout.contains("line-0\n"));
        assert!(output.stdout.ends_with("line-199\n"));
    }

    #[tokio::test]
    async fn lines_reach_sinks_and_callbacks() {
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();

        let runner =
            CommandRunner::new(CancellationToken::new()).with_sink(sink.clone());
        let spec = RunSpec::new("sh", std::env::temp_dir(), "fan")
            .args(["-c", "echo one; echo two"])
            .on_stdout_line(Arc::new(move |line| {
                seen_cb.lock().unwrap().push(line.to_string());
            }));

        runner.run(spec).await.expect("run");

        let sunk = sink.0.lock().unwrap().clone();
        assert_eq!(sunk, vec!["[fan] one", "[fan] two"]);
        assert_eq!(*seen.lock().unwrap(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let cancel = CancellationToken::new();
        let runner = CommandRunner::new(cancel.clone());
        let spec = RunSpec::new("sh", std::env::temp_dir(), "sleeper").args(["-c", "sleep 30"]);

        let handle = tokio::spawn(async move { runner.run(spec).await });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        cancel.cancel();

        let err = handle.await.expect("join").expect_err("cancelled");
        assert!(matches!(err, ProcessError::Cancelled { .. }));
    }

    #[test]
    fn tail_buffer_respects_char_boundaries() {
        let mut tail = TailBuffer::new(8);
        tail.push_line("aaaa");
        tail.push_line("ééé");
        let out = tail.into_string();
        assert!(out.len() <= 8);
        assert!(out.ends_with("ééé\n"));
    }
}
