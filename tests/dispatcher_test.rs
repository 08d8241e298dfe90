//! Dispatcher behaviour: ordered polling, per-task callbacks, stop-when-empty.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use conductor::config::Config;
use conductor::dispatch::{
    DispatchOptions, DispatchReporter, Dispatcher, QueueSource, TaskSource,
};
use conductor::pipeline::{Pipeline, PipelineOptions};
use conductor::store::StateStore;

mod common;
use common::{create_test_repo, ScriptedResponse, ScriptedRunner};

struct CollectingReporter(Mutex<Vec<String>>);

#[async_trait]
impl DispatchReporter for CollectingReporter {
    async fn on_start(&self, source: &str, task: &str) {
        self.0.lock().unwrap().push(format!("start {source} {task}"));
    }
    async fn on_success(&self, source: &str, task: &str) {
        self.0
            .lock()
            .unwrap()
            .push(format!("success {source} {task}"));
    }
    async fn on_failure(&self, source: &str, task: &str, _error: &str) {
        self.0
            .lock()
            .unwrap()
            .push(format!("failure {source} {task}"));
    }
    async fn on_idle(&self) {
        self.0.lock().unwrap().push("idle".to_string());
    }
}

fn dispatcher_for(repo: &std::path::Path, db_dir: &TempDir) -> Dispatcher {
    // Every job plans to nothing, so each dispatched task completes fast.
    let runner = Arc::new(ScriptedRunner::new().on("Break the following task", |_| {
        ScriptedResponse::json(r#"{"canParallelize": false, "subtasks": []}"#)
    }));

    let store = StateStore::open(&db_dir.path().join("orchestrator.db")).expect("open store");
    let pipeline = Pipeline::new(store, Config::default(), CancellationToken::new())
        .with_runner(runner);

    Dispatcher::new(
        pipeline,
        DispatchOptions {
            poll_interval: Duration::from_millis(10),
            stop_when_empty: true,
            job_options: PipelineOptions {
                repo_root: Some(repo.to_path_buf()),
                base_branch: Some("main".to_string()),
                ..PipelineOptions::default()
            },
        },
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn drains_sources_in_order_and_reports_each_task() {
    let repo_dir = create_test_repo();
    let db_dir = TempDir::new().expect("tempdir");

    let first = Arc::new(QueueSource::new("first", ["t1".to_string()]));
    let second = Arc::new(QueueSource::new("second", ["t2".to_string()]));
    let sources: Vec<Arc<dyn TaskSource>> = vec![first.clone(), second.clone()];
    let reporter = CollectingReporter(Mutex::new(Vec::new()));

    dispatcher_for(repo_dir.path(), &db_dir)
        .run(&sources, &reporter)
        .await
        .expect("dispatch");

    let events = reporter.0.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "start first t1",
            "success first t1",
            "start second t2",
            "success second t2",
            "idle",
        ]
    );
    assert_eq!(first.done(), vec!["t1"]);
    assert_eq!(second.done(), vec!["t2"]);
}

#[tokio::test]
async fn earlier_sources_win_between_tasks() {
    let repo_dir = create_test_repo();
    let db_dir = TempDir::new().expect("tempdir");

    // Both sources hold two tasks; the first source must drain completely
    // before the second gets a turn, because each pass restarts at the top.
    let first = Arc::new(QueueSource::new(
        "first",
        ["a1".to_string(), "a2".to_string()],
    ));
    let second = Arc::new(QueueSource::new("second", ["b1".to_string()]));
    let sources: Vec<Arc<dyn TaskSource>> = vec![first.clone(), second.clone()];
    let reporter = CollectingReporter(Mutex::new(Vec::new()));

    dispatcher_for(repo_dir.path(), &db_dir)
        .run(&sources, &reporter)
        .await
        .expect("dispatch");

    let events = reporter.0.lock().unwrap().clone();
    let starts: Vec<&String> = events.iter().filter(|e| e.starts_with("start")).collect();
    assert_eq!(
        starts,
        vec!["start first a1", "start first a2", "start second b1"]
    );
}

#[tokio::test]
async fn empty_sources_idle_once_and_stop() {
    let repo_dir = create_test_repo();
    let db_dir = TempDir::new().expect("tempdir");

    let empty = Arc::new(QueueSource::new("empty", Vec::<String>::new()));
    let sources: Vec<Arc<dyn TaskSource>> = vec![empty];
    let reporter = CollectingReporter(Mutex::new(Vec::new()));

    dispatcher_for(repo_dir.path(), &db_dir)
        .run(&sources, &reporter)
        .await
        .expect("dispatch");

    let events = reporter.0.lock().unwrap().clone();
    assert_eq!(events, vec!["idle"]);
}
