//! The write and read API over the database.
//!
//! Every write runs in one transaction and enforces the monotonic-status
//! rule. Every write swallows its own errors after logging them: a broken
//! disk degrades the dashboard, never the pipeline.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Transaction};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::path::PathBuf;

use super::db::Db;
use crate::domain::{
    Artifact, ArtifactKind, Job, JobStatus, MergeReport, MergeStatus, PlannedSubtask, Subtask,
    SubtaskStatus,
};

/// Identity and immutable attributes of a job, passed with every write so
/// the row can be created on the first stage write regardless of which
/// stage gets there first.
#[derive(Debug, Clone)]
pub struct JobSeed {
    pub id: String,
    pub repo_root: PathBuf,
    pub base_branch: String,
    pub description: String,
    pub user_task: String,
    pub push_result: bool,
}

/// One job with everything the dashboard needs to render it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    pub subtasks: Vec<Subtask>,
    pub artifacts: Vec<Artifact>,
    /// Payload of the latest `plan` artifact, if any
    pub plan: Option<Value>,
    /// Payload of the latest `merge_result` artifact, if any
    pub merge_result: Option<Value>,
}

/// Full snapshot served by `GET /api/db`.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardData {
    pub jobs: Vec<JobView>,
}

#[derive(Clone)]
pub struct StateStore {
    db: Db,
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad timestamp in store: {raw}"))?
        .with_timezone(&Utc))
}

impl StateStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Db::open(path)?))
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    // ── write API ──────────────────────────────────────────────────────

    /// Upsert the job row and move it to `status` if the monotonic rule
    /// allows.
    pub fn mark_job_status(&self, seed: &JobSeed, status: JobStatus) {
        self.swallow("mark_job_status", || {
            let mut conn = self.db.conn();
            let tx = conn.transaction()?;
            upsert_job(&tx, seed, status)?;
            tx.commit()?;
            Ok(())
        });
    }

    pub fn record_analysis_output(&self, seed: &JobSeed, data: Value) {
        self.record_stage_output(seed, ArtifactKind::Analysis, JobStatus::Analyzing, data);
    }

    pub fn record_refactor_output(&self, seed: &JobSeed, data: Value) {
        self.record_stage_output(seed, ArtifactKind::Refactor, JobStatus::Refactoring, data);
    }

    pub fn record_planner_output(&self, seed: &JobSeed, data: Value) {
        self.record_stage_output(seed, ArtifactKind::Plan, JobStatus::Planning, data);
    }

    pub fn record_analysis_progress(&self, seed: &JobSeed, tail: &str) {
        self.record_progress(seed, ArtifactKind::AnalysisProgress, JobStatus::Analyzing, tail);
    }

    pub fn record_refactor_progress(&self, seed: &JobSeed, tail: &str) {
        self.record_progress(seed, ArtifactKind::RefactorProgress, JobStatus::Refactoring, tail);
    }

    pub fn record_plan_progress(&self, seed: &JobSeed, tail: &str) {
        self.record_progress(seed, ArtifactKind::PlanProgress, JobStatus::Planning, tail);
    }

    pub fn record_merge_progress(&self, seed: &JobSeed, tail: &str) {
        self.record_progress(seed, ArtifactKind::MergeProgress, JobStatus::Merging, tail);
    }

    /// Record the branches about to be merged and enter the merging status.
    pub fn record_merge_start(&self, seed: &JobSeed, inputs: Value) {
        self.record_stage_output(seed, ArtifactKind::MergeInput, JobStatus::Merging, inputs);
    }

    /// Record the final merge outcome; the job status follows the report.
    pub fn record_merge_result(&self, seed: &JobSeed, report: &MergeReport) {
        let status = match report.status {
            MergeStatus::Ok => JobStatus::Done,
            MergeStatus::NeedsManualReview => JobStatus::NeedsManualReview,
        };
        let data = match serde_json::to_value(report) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("state store: failed to serialise merge report: {e}");
                return;
            }
        };
        self.record_stage_output(seed, ArtifactKind::MergeResult, status, data);
    }

    pub fn record_merge_failure(&self, seed: &JobSeed, error: &str) {
        self.record_stage_output(
            seed,
            ArtifactKind::MergeError,
            JobStatus::Failed,
            serde_json::json!({ "error": error }),
        );
    }

    /// Upsert the subtask as running. `started_at` is only set if it was
    /// never set before.
    pub fn record_subtask_start(
        &self,
        seed: &JobSeed,
        planned: &PlannedSubtask,
        worktree: &Path,
        branch: &str,
    ) {
        self.swallow("record_subtask_start", || {
            let now = ts(Utc::now());
            let mut conn = self.db.conn();
            let tx = conn.transaction()?;
            upsert_job(&tx, seed, JobStatus::Running)?;
            tx.execute(
                r#"INSERT INTO subtasks
                       (job_id, id, title, description, parallel_group,
                        worktree_path, branch, status, started_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'running', ?8, ?8)
                   ON CONFLICT(job_id, id) DO UPDATE SET
                       title = excluded.title,
                       description = excluded.description,
                       parallel_group = excluded.parallel_group,
                       worktree_path = excluded.worktree_path,
                       branch = excluded.branch,
                       status = 'running',
                       started_at = COALESCE(subtasks.started_at, excluded.started_at),
                       updated_at = excluded.updated_at"#,
                params![
                    seed.id,
                    planned.id,
                    planned.title,
                    planned.description,
                    planned.parallel_group,
                    worktree.to_string_lossy().into_owned(),
                    branch,
                    now,
                ],
            )?;
            tx.commit()?;
            Ok(())
        });
    }

    /// Final subtask write: status, summary, important files, error, and a
    /// `subtask_result` artifact. The job moves to running on success (the
    /// merge stage promotes it later) or failed on failure.
    pub fn record_subtask_result(
        &self,
        seed: &JobSeed,
        subtask_id: &str,
        succeeded: bool,
        summary: &str,
        important_files: &[String],
        error: Option<&str>,
    ) {
        self.swallow("record_subtask_result", || {
            let now = ts(Utc::now());
            let status = if succeeded {
                SubtaskStatus::Completed
            } else {
                SubtaskStatus::Failed
            };
            let files_json =
                serde_json::to_string(important_files).unwrap_or_else(|_| "[]".to_string());

            let mut conn = self.db.conn();
            let tx = conn.transaction()?;
            upsert_job(
                &tx,
                seed,
                if succeeded {
                    JobStatus::Running
                } else {
                    JobStatus::Failed
                },
            )?;
            tx.execute(
                r#"INSERT INTO subtasks
                       (job_id, id, status, summary, important_files, error,
                        finished_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                   ON CONFLICT(job_id, id) DO UPDATE SET
                       status = excluded.status,
                       summary = excluded.summary,
                       important_files = excluded.important_files,
                       error = excluded.error,
                       finished_at = excluded.finished_at,
                       updated_at = excluded.updated_at"#,
                params![
                    seed.id,
                    subtask_id,
                    status.as_str(),
                    summary,
                    files_json,
                    error,
                    now,
                ],
            )?;
            let artifact = Artifact::new(
                &seed.id,
                ArtifactKind::SubtaskResult,
                serde_json::json!({
                    "subtaskId": subtask_id,
                    "status": status,
                    "summary": summary,
                    "importantFiles": important_files,
                    "error": error,
                }),
            )
            .with_subtask(subtask_id);
            append_artifact(&tx, &artifact)?;
            tx.commit()?;
            Ok(())
        });
    }

    /// Streamed output tail for a running subtask. No artifact; the
    /// dashboard reads it off the subtask row.
    pub fn record_subtask_reasoning(&self, seed: &JobSeed, subtask_id: &str, tail: &str) {
        self.swallow("record_subtask_reasoning", || {
            let conn = self.db.conn();
            conn.execute(
                "UPDATE subtasks SET last_reasoning = ?3, updated_at = ?4
                 WHERE job_id = ?1 AND id = ?2",
                params![seed.id, subtask_id, tail, ts(Utc::now())],
            )?;
            Ok(())
        });
    }

    /// If the job exists and is not terminal, promote it to `fallback`.
    /// Called unconditionally at the end of every run so a crashed or
    /// short-circuited pipeline never leaves a live-looking job behind.
    pub fn ensure_terminal_job_status(&self, job_id: &str, fallback: JobStatus) {
        self.swallow("ensure_terminal_job_status", || {
            let conn = self.db.conn();
            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM jobs WHERE id = ?1",
                    params![job_id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            let Some(current) = current else {
                return Ok(());
            };
            let is_terminal = JobStatus::parse(&current).is_some_and(|s| s.is_terminal());
            if is_terminal {
                return Ok(());
            }
            conn.execute(
                "UPDATE jobs SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![job_id, fallback.as_str(), ts(Utc::now())],
            )?;
            Ok(())
        });
    }

    fn record_stage_output(
        &self,
        seed: &JobSeed,
        kind: ArtifactKind,
        status: JobStatus,
        data: Value,
    ) {
        self.swallow("record_stage_output", || {
            let mut conn = self.db.conn();
            let tx = conn.transaction()?;
            upsert_job(&tx, seed, status)?;
            append_artifact(&tx, &Artifact::new(&seed.id, kind, data))?;
            tx.commit()?;
            Ok(())
        });
    }

    fn record_progress(&self, seed: &JobSeed, kind: ArtifactKind, status: JobStatus, tail: &str) {
        self.record_stage_output(seed, kind, status, serde_json::json!({ "tail": tail }));
    }

    fn swallow(&self, op: &str, f: impl FnOnce() -> rusqlite::Result<()>) {
        if let Err(e) = f() {
            tracing::warn!("state store: {op} failed: {e}");
        }
    }

    // ── read API ───────────────────────────────────────────────────────

    /// All jobs with their subtasks and artifacts, newest job first.
    pub fn read_dashboard_data(&self) -> Result<DashboardData> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, repo_root, base_branch, description, user_task, push_result,
                    status, started_at, updated_at
             FROM jobs ORDER BY started_at DESC, id DESC",
        )?;
        let jobs = stmt
            .query_map([], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        let mut views = Vec::with_capacity(jobs.len());
        for job in jobs {
            let job = job?;
            let view = load_view(&conn, job)?;
            views.push(view);
        }
        Ok(DashboardData { jobs: views })
    }

    /// The most recent non-terminal job, or None when everything settled.
    pub fn read_active_job(&self) -> Result<Option<JobView>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, repo_root, base_branch, description, user_task, push_result,
                    status, started_at, updated_at
             FROM jobs
             WHERE status NOT IN ('done', 'failed', 'needs_manual_review')
             ORDER BY started_at DESC, id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], job_from_row)?;
        let Some(job) = rows.next() else {
            return Ok(None);
        };
        let job = job??;
        drop(rows);
        drop(stmt);
        Ok(Some(load_view(&conn, job)?))
    }
}

fn upsert_job(tx: &Transaction<'_>, seed: &JobSeed, status: JobStatus) -> rusqlite::Result<()> {
    let now = ts(Utc::now());
    let current: Option<String> = tx
        .query_row(
            "SELECT status FROM jobs WHERE id = ?1",
            params![seed.id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    match current {
        None => {
            tx.execute(
                r#"INSERT INTO jobs
                       (id, repo_root, base_branch, description, user_task,
                        push_result, status, started_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)"#,
                params![
                    seed.id,
                    seed.repo_root.to_string_lossy().into_owned(),
                    seed.base_branch,
                    seed.description,
                    seed.user_task,
                    seed.push_result as i64,
                    status.as_str(),
                    now,
                ],
            )?;
        }
        Some(raw) => {
            let Some(existing) = JobStatus::parse(&raw) else {
                return Ok(());
            };
            // Terminal statuses are frozen; lower-priority writes are lost
            // on purpose (a late subtask update must not roll the job back).
            if existing.is_terminal() || status.priority() < existing.priority() {
                return Ok(());
            }
            tx.execute(
                "UPDATE jobs SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![seed.id, status.as_str(), now],
            )?;
        }
    }
    Ok(())
}

fn append_artifact(tx: &Transaction<'_>, artifact: &Artifact) -> rusqlite::Result<()> {
    tx.execute(
        r#"INSERT INTO artifacts (id, job_id, type, label, subtask_id, created_at, data)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        params![
            artifact.id,
            artifact.job_id,
            artifact.kind.as_str(),
            artifact.label,
            artifact.subtask_id,
            ts(artifact.created_at),
            artifact.data.to_string(),
        ],
    )?;
    Ok(())
}

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Job>> {
    let id: String = row.get(0)?;
    let repo_root: String = row.get(1)?;
    let base_branch: String = row.get(2)?;
    let description: String = row.get(3)?;
    let user_task: String = row.get(4)?;
    let push_result: i64 = row.get(5)?;
    let status: String = row.get(6)?;
    let started_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok((|| {
        Ok(Job {
            id,
            repo_root: PathBuf::from(repo_root),
            base_branch,
            description,
            user_task,
            push_result: push_result != 0,
            status: JobStatus::parse(&status)
                .ok_or_else(|| anyhow!("unknown job status in store: {status}"))?,
            started_at: parse_ts(&started_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    })())
}

fn load_view(conn: &rusqlite::Connection, job: Job) -> Result<JobView> {
    let mut stmt = conn.prepare(
        "SELECT job_id, id, title, description, parallel_group, worktree_path, branch,
                summary, important_files, error, last_reasoning, status,
                started_at, finished_at, updated_at
         FROM subtasks WHERE job_id = ?1 ORDER BY rowid",
    )?;
    let subtasks = stmt
        .query_map(params![job.id], subtask_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .collect::<Result<Vec<_>>>()?;
    drop(stmt);

    let mut stmt = conn.prepare(
        "SELECT id, job_id, type, label, subtask_id, created_at, data
         FROM artifacts WHERE job_id = ?1 ORDER BY created_at DESC, rowid DESC",
    )?;
    let artifacts = stmt
        .query_map(params![job.id], artifact_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .collect::<Result<Vec<_>>>()?;
    drop(stmt);

    // Artifacts are newest-first, so the first hit is the latest.
    let plan = artifacts
        .iter()
        .find(|a| a.kind == ArtifactKind::Plan)
        .map(|a| a.data.clone());
    let merge_result = artifacts
        .iter()
        .find(|a| a.kind == ArtifactKind::MergeResult)
        .map(|a| a.data.clone());

    Ok(JobView {
        job,
        subtasks,
        artifacts,
        plan,
        merge_result,
    })
}

fn subtask_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Subtask>> {
    let job_id: String = row.get(0)?;
    let id: String = row.get(1)?;
    let title: String = row.get(2)?;
    let description: String = row.get(3)?;
    let parallel_group: Option<String> = row.get(4)?;
    let worktree_path: Option<String> = row.get(5)?;
    let branch: Option<String> = row.get(6)?;
    let summary: Option<String> = row.get(7)?;
    let important_files: String = row.get(8)?;
    let error: Option<String> = row.get(9)?;
    let last_reasoning: Option<String> = row.get(10)?;
    let status: String = row.get(11)?;
    let started_at: Option<String> = row.get(12)?;
    let finished_at: Option<String> = row.get(13)?;
    let updated_at: String = row.get(14)?;

    Ok((|| {
        Ok(Subtask {
            job_id,
            id,
            title,
            description,
            parallel_group,
            worktree_path: worktree_path.map(PathBuf::from),
            branch,
            summary,
            important_files: serde_json::from_str(&important_files).unwrap_or_default(),
            error,
            last_reasoning,
            status: SubtaskStatus::parse(&status)
                .ok_or_else(|| anyhow!("unknown subtask status in store: {status}"))?,
            started_at: started_at.as_deref().map(parse_ts).transpose()?,
            finished_at: finished_at.as_deref().map(parse_ts).transpose()?,
            updated_at: parse_ts(&updated_at)?,
        })
    })())
}

fn artifact_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Artifact>> {
    let id: String = row.get(0)?;
    let job_id: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let label: Option<String> = row.get(3)?;
    let subtask_id: Option<String> = row.get(4)?;
    let created_at: String = row.get(5)?;
    let data: String = row.get(6)?;

    Ok((|| {
        Ok(Artifact {
            id,
            job_id,
            kind: ArtifactKind::parse(&kind)
                .ok_or_else(|| anyhow!("unknown artifact type in store: {kind}"))?,
            label,
            subtask_id,
            created_at: parse_ts(&created_at)?,
            data: serde_json::from_str(&data).unwrap_or(Value::Null),
        })
    })())
}
