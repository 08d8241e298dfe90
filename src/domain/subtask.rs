use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Execution status of one planned unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SubtaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubtaskStatus::Pending => "pending",
            SubtaskStatus::Running => "running",
            SubtaskStatus::Completed => "completed",
            SubtaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SubtaskStatus::Pending),
            "running" => Some(SubtaskStatus::Running),
            "completed" => Some(SubtaskStatus::Completed),
            "failed" => Some(SubtaskStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of the plan, executed by the worker in its own worktree.
///
/// `started_at` is set exactly once, on the first transition to running, and
/// never cleared. The branch embeds both the subtask slug and the job id so
/// no two subtasks (of any job) ever share one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub job_id: String,

    pub id: String,

    pub title: String,

    pub description: String,

    /// Plan-assigned group label; subtasks sharing one may run concurrently
    pub parallel_group: Option<String>,

    /// Absolute path of the worktree, set when the subtask starts
    pub worktree_path: Option<PathBuf>,

    /// Branch the subtask commits to, set when the subtask starts
    pub branch: Option<String>,

    /// Worker-reported summary of what was done
    pub summary: Option<String>,

    /// Worker-reported list of files worth reviewing
    pub important_files: Vec<String>,

    pub error: Option<String>,

    /// Most recent output tail, streamed to the dashboard while running
    pub last_reasoning: Option<String>,

    pub status: SubtaskStatus,

    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,

    pub updated_at: DateTime<Utc>,
}
