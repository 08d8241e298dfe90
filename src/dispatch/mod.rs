//! The task dispatcher: polls ordered task sources and feeds the pipeline
//! engine one task at a time.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::pipeline::{Pipeline, PipelineOptions};

/// Where user tasks come from. Implementations wrap a queue, a bot inbox,
/// an environment variable, whatever; the dispatcher only sees this.
#[async_trait]
pub trait TaskSource: Send + Sync {
    fn name(&self) -> &str;

    /// The next task, or None when the source is currently empty.
    async fn next_task(&self) -> Result<Option<String>>;

    async fn mark_done(&self, task: &str) -> Result<()>;

    async fn mark_failed(&self, task: &str, error: &str) -> Result<()>;
}

/// Observer hooks around each dispatched task. All default to no-ops.
#[async_trait]
pub trait DispatchReporter: Send + Sync {
    async fn on_start(&self, _source: &str, _task: &str) {}
    async fn on_success(&self, _source: &str, _task: &str) {}
    async fn on_failure(&self, _source: &str, _task: &str, _error: &str) {}
    async fn on_idle(&self) {}
}

/// Reporter that does nothing beyond the log lines the engine writes.
pub struct SilentReporter;

#[async_trait]
impl DispatchReporter for SilentReporter {}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub poll_interval: Duration,
    pub stop_when_empty: bool,
    /// Options applied to every job the dispatcher starts.
    pub job_options: PipelineOptions,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(crate::config::DEFAULT_POLL_INTERVAL_MS),
            stop_when_empty: false,
            job_options: PipelineOptions::default(),
        }
    }
}

pub struct Dispatcher {
    pipeline: Pipeline,
    options: DispatchOptions,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(pipeline: Pipeline, options: DispatchOptions, cancel: CancellationToken) -> Self {
        Self {
            pipeline,
            options,
            cancel,
        }
    }

    /// Poll `sources` in order, running one job at a time. A pass restarts
    /// from the first source after every completed task, so earlier sources
    /// always win. When a full pass yields nothing the dispatcher idles,
    /// then sleeps or exits depending on `stop_when_empty`.
    pub async fn run(
        &self,
        sources: &[Arc<dyn TaskSource>],
        reporter: &dyn DispatchReporter,
    ) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let mut dispatched = false;
            for source in sources {
                let Some(task) = source.next_task().await? else {
                    continue;
                };
                dispatched = true;
                self.dispatch_one(source.as_ref(), &task, reporter).await;
                break;
            }

            if dispatched {
                continue;
            }

            reporter.on_idle().await;
            if self.options.stop_when_empty {
                return Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(self.options.poll_interval) => {}
                _ = self.cancel.cancelled() => return Ok(()),
            }
        }
    }

    async fn dispatch_one(
        &self,
        source: &dyn TaskSource,
        task: &str,
        reporter: &dyn DispatchReporter,
    ) {
        reporter.on_start(source.name(), task).await;
        let outcome = self
            .pipeline
            .run_job(task, self.options.job_options.clone())
            .await;

        match outcome {
            Ok(report) if report.succeeded() => {
                if let Err(e) = source.mark_done(task).await {
                    tracing::warn!("source {}: mark_done failed: {e}", source.name());
                }
                reporter.on_success(source.name(), task).await;
            }
            Ok(report) => {
                let error = report
                    .error
                    .unwrap_or_else(|| format!("job ended {}", report.status));
                if let Err(e) = source.mark_failed(task, &error).await {
                    tracing::warn!("source {}: mark_failed failed: {e}", source.name());
                }
                reporter.on_failure(source.name(), task, &error).await;
            }
            Err(e) => {
                let error = e.to_string();
                if let Err(e) = source.mark_failed(task, &error).await {
                    tracing::warn!("source {}: mark_failed failed: {e}", source.name());
                }
                reporter.on_failure(source.name(), task, &error).await;
            }
        }
    }
}

/// In-memory FIFO source: seed tasks up front, watch them drain. The CLI
/// uses one for `dispatch --task …`; tests use it to script the dispatcher.
pub struct QueueSource {
    name: String,
    queue: Mutex<VecDeque<String>>,
    done: Mutex<Vec<String>>,
    failed: Mutex<Vec<(String, String)>>,
}

impl QueueSource {
    pub fn new(name: impl Into<String>, tasks: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(tasks.into_iter().collect()),
            done: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
        }
    }

    pub fn done(&self) -> Vec<String> {
        self.done.lock().expect("queue source lock").clone()
    }

    pub fn failed(&self) -> Vec<(String, String)> {
        self.failed.lock().expect("queue source lock").clone()
    }
}

#[async_trait]
impl TaskSource for QueueSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_task(&self) -> Result<Option<String>> {
        Ok(self.queue.lock().expect("queue source lock").pop_front())
    }

    async fn mark_done(&self, task: &str) -> Result<()> {
        self.done
            .lock()
            .expect("queue source lock")
            .push(task.to_string());
        Ok(())
    }

    async fn mark_failed(&self, task: &str, error: &str) -> Result<()> {
        self.failed
            .lock()
            .expect("queue source lock")
            .push((task.to_string(), error.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::QueueSource;
    use super::TaskSource;

    #[tokio::test]
    async fn queue_source_drains_in_order() {
        let source = QueueSource::new("test", ["a".to_string(), "b".to_string()]);
        assert_eq!(source.next_task().await.unwrap().as_deref(), Some("a"));
        assert_eq!(source.next_task().await.unwrap().as_deref(), Some("b"));
        assert_eq!(source.next_task().await.unwrap(), None);

        source.mark_done("a").await.unwrap();
        source.mark_failed("b", "broke").await.unwrap();
        assert_eq!(source.done(), vec!["a"]);
        assert_eq!(source.failed(), vec![("b".to_string(), "broke".to_string())]);
    }
}
