//! Building Worker-CLI invocations and harvesting their live progress.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::process::{LineCallback, RunSpec};

/// How the Worker CLI is invoked. Comes from config; tests point `binary` at
/// a stub script.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Binary name or path, e.g. `worker-cli`
    pub binary: String,
    /// Passed as `--config model_reasoning_effort="…"` when set
    pub reasoning_effort: Option<String>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            binary: "worker-cli".to_string(),
            reasoning_effort: Some("medium".to_string()),
        }
    }
}

/// Assemble the `worker-cli exec --full-auto … <prompt>` run spec for one
/// stage invocation.
pub fn worker_spec(
    settings: &WorkerSettings,
    cwd: &Path,
    label: &str,
    prompt: &str,
) -> RunSpec {
    let mut spec = RunSpec::new(&settings.binary, cwd, label)
        .arg("exec")
        .arg("--full-auto");
    if let Some(effort) = &settings.reasoning_effort {
        spec = spec
            .arg("--config")
            .arg(format!("model_reasoning_effort=\"{effort}\""));
    }
    spec.arg(prompt)
}

const PROGRESS_TAIL_LINES: usize = 30;
const PROGRESS_MIN_INTERVAL: Duration = Duration::from_secs(1);

struct ProgressState {
    lines: VecDeque<String>,
    last_flush: Option<Instant>,
    dirty: bool,
}

/// Collects recent worker output lines and periodically hands the joined
/// tail to a flush function, at most once per second. Stages wire the flush
/// to a `*_progress` artifact write so the dashboard can stream reasoning
/// while the worker is still running.
pub struct ProgressTracker {
    state: Mutex<ProgressState>,
    flush: Box<dyn Fn(String) + Send + Sync>,
}

impl ProgressTracker {
    pub fn new(flush: impl Fn(String) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ProgressState {
                lines: VecDeque::with_capacity(PROGRESS_TAIL_LINES),
                last_flush: None,
                dirty: false,
            }),
            flush: Box::new(flush),
        })
    }

    /// Line callback to hang on a `RunSpec`.
    pub fn callback(self: &Arc<Self>) -> LineCallback {
        let tracker = Arc::clone(self);
        Arc::new(move |line: &str| tracker.push(line))
    }

    fn push(&self, line: &str) {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            return;
        }

        let tail = {
            let mut state = self.state.lock().expect("progress state");
            if state.lines.len() == PROGRESS_TAIL_LINES {
                state.lines.pop_front();
            }
            state.lines.push_back(trimmed.to_string());
            state.dirty = true;

            let due = state
                .last_flush
                .is_none_or(|at| at.elapsed() >= PROGRESS_MIN_INTERVAL);
            if !due {
                return;
            }
            state.last_flush = Some(Instant::now());
            state.dirty = false;
            join_tail(&state.lines)
        };
        (self.flush)(tail);
    }

    /// Flush whatever arrived since the last periodic flush. Called once
    /// when the worker exits so the final lines are never lost.
    pub fn finish(&self) {
        let tail = {
            let mut state = self.state.lock().expect("progress state");
            if !state.dirty {
                return;
            }
            state.dirty = false;
            state.last_flush = Some(Instant::now());
            join_tail(&state.lines)
        };
        (self.flush)(tail);
    }
}

fn join_tail(lines: &VecDeque<String>) -> String {
    lines.iter().cloned().collect::<Vec<_>>().join("\n")
}
