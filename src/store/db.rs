//! SQLite connection and schema.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id           TEXT PRIMARY KEY,
    repo_root    TEXT NOT NULL,
    base_branch  TEXT NOT NULL,
    description  TEXT NOT NULL DEFAULT '',
    user_task    TEXT NOT NULL DEFAULT '',
    push_result  INTEGER NOT NULL DEFAULT 0,
    status       TEXT NOT NULL,
    started_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS subtasks (
    job_id          TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    id              TEXT NOT NULL,
    title           TEXT NOT NULL DEFAULT '',
    description     TEXT NOT NULL DEFAULT '',
    parallel_group  TEXT,
    worktree_path   TEXT,
    branch          TEXT,
    summary         TEXT,
    important_files TEXT NOT NULL DEFAULT '[]',
    error           TEXT,
    last_reasoning  TEXT,
    status          TEXT NOT NULL DEFAULT 'pending',
    started_at      TEXT,
    finished_at     TEXT,
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (job_id, id)
);

CREATE TABLE IF NOT EXISTS artifacts (
    id         TEXT PRIMARY KEY,
    job_id     TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    type       TEXT NOT NULL,
    label      TEXT,
    subtask_id TEXT,
    created_at TEXT NOT NULL,
    data       TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_subtasks_job ON subtasks(job_id);
CREATE INDEX IF NOT EXISTS idx_artifacts_job ON artifacts(job_id, created_at);
"#;

/// Connection wrapper shared by the writer (engine) and readers (dashboard).
/// WAL keeps readers unblocked while a write transaction is open.
#[derive(Clone)]
pub struct Db {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open or create the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create db dir: {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open db: {}", path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            path: path.to_path_buf(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Db;
    use tempfile::TempDir;

    #[test]
    fn open_creates_schema_and_parents() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("nested").join("orchestrator.db");

        let db = Db::open(&path).expect("open");
        let count: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('jobs', 'subtasks', 'artifacts')",
                [],
                |row| row.get(0),
            )
            .expect("query");
        assert_eq!(count, 3);
    }

    #[test]
    fn reopen_is_idempotent() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("orchestrator.db");
        Db::open(&path).expect("first");
        Db::open(&path).expect("second");
    }
}
