//! The engine: resolve the job context, run the stages in order, fan
//! subtask batches out over concurrent tasks, fold the branches together,
//! and always leave the job in a terminal status.

use anyhow::{bail, Context as _, Result};
use futures::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::batch::group_batches;
use super::context::JobContext;
use super::naming;
use crate::config::Config;
use crate::domain::{JobStatus, MergeReport, PlannedSubtask, SubtaskReportStatus};
use crate::git::{find_repo_root, GitOps};
use crate::process::{CommandRunner, JobLog, LineSink, ProcessRunner, TerminalSink};
use crate::stage::{self, merge::MergeItem, subtask::SubtaskOutcome, StageDeps, StageError};
use crate::store::{JobSeed, StateStore};

/// Per-run knobs, typically straight off the CLI.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub repo_root: Option<PathBuf>,
    pub base_branch: Option<String>,
    pub job_id: Option<String>,
    pub push_result: bool,
    pub enable_prefactor: bool,
    pub verbose_log: bool,
}

/// What a finished run reports back to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalReport {
    pub job_id: String,
    pub status: JobStatus,
    pub merge: Option<MergeReport>,
    pub error: Option<String>,
}

impl FinalReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, JobStatus::Done | JobStatus::NeedsManualReview)
    }
}

pub struct Pipeline {
    store: StateStore,
    config: Config,
    cancel: CancellationToken,
    /// Test seam; when unset a `CommandRunner` wired to the job log is
    /// built per job.
    runner: Option<Arc<dyn ProcessRunner>>,
}

impl Pipeline {
    pub fn new(store: StateStore, config: Config, cancel: CancellationToken) -> Self {
        Self {
            store,
            config,
            cancel,
            runner: None,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Drive one job through the whole pipeline. Stage failures come back
    /// as a failed `FinalReport`; only environment problems (bad repo path,
    /// unwritable log) are errors.
    pub async fn run_job(&self, user_task: &str, options: PipelineOptions) -> Result<FinalReport> {
        let ctx = self.build_context(user_task, &options)?;
        std::fs::create_dir_all(&ctx.jobs_root)
            .with_context(|| format!("failed to create {}", ctx.jobs_root.display()))?;

        let job_log = Arc::new(
            JobLog::open(ctx.log_path())
                .with_context(|| format!("failed to open {}", ctx.log_path().display()))?,
        );
        let deps = self.build_deps(&options, job_log.clone());

        job_log.write_line(
            "engine",
            &format!(
                "job {} started on {} (base branch {})",
                ctx.seed.id,
                ctx.repo_root().display(),
                ctx.seed.base_branch
            ),
        );

        let report = self
            .run_stages(&deps, &ctx, job_log.as_ref(), options.enable_prefactor)
            .await;

        // Whatever happened above, never leave a live-looking job behind.
        self.store
            .ensure_terminal_job_status(&ctx.seed.id, JobStatus::Done);

        job_log.write_line(
            "engine",
            &format!("job {} finished: {}", ctx.seed.id, report.status),
        );
        Ok(report)
    }

    fn build_context(&self, user_task: &str, options: &PipelineOptions) -> Result<JobContext> {
        let cwd = std::env::current_dir().context("cannot determine working directory")?;
        let repo_root = options
            .repo_root
            .clone()
            .or_else(|| self.config.base_dir.clone())
            .or_else(|| find_repo_root(&cwd))
            .unwrap_or(cwd);
        if !repo_root.is_dir() {
            bail!("repository root does not exist: {}", repo_root.display());
        }

        let git = GitOps::new();
        let base_branch = options
            .base_branch
            .clone()
            .or_else(|| self.config.base_branch.clone())
            .or_else(|| {
                git.current_branch(&repo_root)
                    .ok()
                    .filter(|b| !b.is_empty() && b != "HEAD")
            })
            .unwrap_or_else(|| self.config.default_base_branch.clone());

        let job_id = naming::sanitize_job_id(
            &options
                .job_id
                .clone()
                .or_else(|| self.config.job_id.clone())
                .unwrap_or_else(naming::default_job_id),
        );

        Ok(JobContext::new(JobSeed {
            id: job_id,
            repo_root,
            base_branch,
            description: JobContext::describe_task(user_task),
            user_task: user_task.to_string(),
            push_result: options.push_result,
        }))
    }

    fn build_deps(&self, options: &PipelineOptions, job_log: Arc<JobLog>) -> StageDeps {
        let runner: Arc<dyn ProcessRunner> = match &self.runner {
            Some(runner) => runner.clone(),
            None => {
                let mut runner = CommandRunner::new(self.cancel.clone()).with_sink(job_log);
                // With a job log active the terminal stays quiet unless the
                // override or the verbose flag turns the tee on.
                let tee = self
                    .config
                    .tee_override
                    .unwrap_or(options.verbose_log);
                if tee {
                    runner = runner.with_sink(Arc::new(TerminalSink));
                }
                Arc::new(runner)
            }
        };
        StageDeps {
            runner,
            store: self.store.clone(),
            git: GitOps::new(),
            worker: self.config.worker.clone(),
        }
    }

    async fn run_stages(
        &self,
        deps: &StageDeps,
        ctx: &JobContext,
        log: &JobLog,
        enable_prefactor: bool,
    ) -> FinalReport {
        // Optional pre-factor
        let mut refactor_worktree = None;
        if enable_prefactor {
            match self.prefactor(deps, ctx, log).await {
                Ok(worktree) => refactor_worktree = worktree,
                Err(failed) => return failed,
            }
        }

        // Plan
        log.write_line("engine", "stage plan started");
        let plan = match stage::plan::run(deps, ctx, refactor_worktree).await {
            Ok(plan) => plan,
            Err(e) => return self.fail(ctx, "plan", e),
        };

        if plan.subtasks.is_empty() {
            let report = MergeReport {
                status: crate::domain::MergeStatus::Ok,
                notes: "Planner produced no subtasks; nothing to merge".to_string(),
                touched_files: vec![],
            };
            self.store.record_merge_result(&ctx.seed, &report);
            return FinalReport {
                job_id: ctx.seed.id.clone(),
                status: JobStatus::Done,
                merge: Some(report),
                error: None,
            };
        }

        // Worktree names are assigned in plan order, before anything runs,
        // so collisions between look-alike ids resolve deterministically.
        let mut taken = std::collections::HashSet::new();
        let named: Vec<(PlannedSubtask, String)> = plan
            .subtasks
            .iter()
            .map(|s| {
                let base = format!("task-{}", naming::slugify(&s.id));
                let name = naming::unique_name(&mut taken, &base);
                (s.clone(), name)
            })
            .collect();

        // Batches run strictly in order; members of one batch run together.
        let batches = group_batches(&plan);
        let mut outcomes: Vec<SubtaskOutcome> = Vec::new();
        for batch in &batches {
            log.write_line(
                "engine",
                &format!(
                    "batch started: {}",
                    batch
                        .iter()
                        .map(|s| s.id.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            );

            // Worktrees are created one at a time before the batch spawns:
            // concurrent `git worktree add` invocations contend on the
            // repository lock.
            for planned in batch {
                let name = named
                    .iter()
                    .find(|(s, _)| s.id == planned.id)
                    .map(|(_, n)| n.as_str())
                    .expect("every planned subtask was named");
                if let Err(e) = stage::context::ensure_worktree(
                    &deps.git,
                    ctx.repo_root(),
                    &ctx.subtask_worktree(name),
                    &ctx.subtask_branch(name),
                    &ctx.seed.base_branch,
                ) {
                    return self.fail(ctx, "run-subtask", e);
                }
            }

            let tasks = batch.iter().map(|planned| {
                let deps = deps.clone();
                let ctx = ctx.clone();
                let planned = planned.clone();
                let name = named
                    .iter()
                    .find(|(s, _)| s.id == planned.id)
                    .map(|(_, n)| n.clone())
                    .expect("every planned subtask was named");
                tokio::spawn(async move {
                    stage::subtask::run(&deps, &ctx, &planned, &name).await
                })
            });

            let mut batch_failed = false;
            for joined in join_all(tasks).await {
                match joined {
                    Ok(Ok(outcome)) => {
                        if outcome.report.status == SubtaskReportStatus::Ok {
                            outcomes.push(outcome);
                        } else {
                            log.write_line(
                                "engine",
                                &format!("subtask {} reported failure", outcome.report.subtask_id),
                            );
                            batch_failed = true;
                        }
                    }
                    Ok(Err(e)) => {
                        log.write_line("engine", &format!("subtask failed: {e}"));
                        batch_failed = true;
                    }
                    Err(join_error) => {
                        log.write_line("engine", &format!("subtask task panicked: {join_error}"));
                        batch_failed = true;
                    }
                }
            }

            // Finish the batch, then stop: later batches may depend on the
            // failed work and the merge would fold in broken branches.
            if batch_failed {
                self.store.mark_job_status(&ctx.seed, JobStatus::Failed);
                return FinalReport {
                    job_id: ctx.seed.id.clone(),
                    status: JobStatus::Failed,
                    merge: None,
                    error: Some("one or more subtasks failed; merge skipped".to_string()),
                };
            }
        }

        // Merge
        log.write_line("engine", "stage merge started");
        let items: Vec<MergeItem> = outcomes
            .iter()
            .map(|o| MergeItem {
                subtask_id: o.report.subtask_id.clone(),
                worktree_path: o.worktree.to_string_lossy().to_string(),
                branch: o.branch.clone(),
                summary: o.report.summary.clone(),
            })
            .collect();

        match stage::merge::run(deps, ctx, &items).await {
            Ok(report) => {
                let status = match report.status {
                    crate::domain::MergeStatus::Ok => JobStatus::Done,
                    crate::domain::MergeStatus::NeedsManualReview => JobStatus::NeedsManualReview,
                };
                FinalReport {
                    job_id: ctx.seed.id.clone(),
                    status,
                    merge: Some(report),
                    error: None,
                }
            }
            Err(e) => self.fail(ctx, "merge", e),
        }
    }

    /// Run analyze, and refactor when the analysis asks for it. Returns the
    /// refactor worktree to plan in, or a failed report.
    async fn prefactor(
        &self,
        deps: &StageDeps,
        ctx: &JobContext,
        log: &JobLog,
    ) -> Result<Option<PathBuf>, FinalReport> {
        log.write_line("engine", "stage analyze started");
        let analysis = match stage::analyze::run(deps, ctx).await {
            Ok(analysis) => analysis,
            Err(e) => return Err(self.fail(ctx, "analyze", e)),
        };

        if !analysis.should_refactor {
            log.write_line("engine", "analysis: no pre-factor needed");
            return Ok(None);
        }

        log.write_line("engine", "stage refactor started");
        match stage::refactor::run(deps, ctx, &analysis).await {
            Ok(report) => match report.status {
                crate::domain::RefactorStatus::Ok => {
                    Ok(Some(ctx.refactor_worktree()))
                }
                crate::domain::RefactorStatus::Skipped => Ok(None),
                crate::domain::RefactorStatus::Failed => Err(self.fail(
                    ctx,
                    "refactor",
                    StageError::BadPayload {
                        stage: "refactor",
                        reason: format!("worker reported failure: {}", report.summary),
                    },
                )),
            },
            Err(e) => Err(self.fail(ctx, "refactor", e)),
        }
    }

    fn fail(&self, ctx: &JobContext, stage: &str, error: StageError) -> FinalReport {
        tracing::error!("job {}: stage {stage} failed: {error}", ctx.seed.id);
        self.store.mark_job_status(&ctx.seed, JobStatus::Failed);
        FinalReport {
            job_id: ctx.seed.id.clone(),
            status: JobStatus::Failed,
            merge: None,
            error: Some(format!("stage {stage} failed: {error}")),
        }
    }
}
