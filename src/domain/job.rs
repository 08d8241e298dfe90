use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The status of a job as it moves through the pipeline.
///
/// Statuses are ordered: a job may only move to a status of equal or higher
/// priority, and once it reaches a terminal status it is frozen. The store
/// enforces this on every write, so out-of-order updates from concurrent
/// subtasks cannot roll a job backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Deciding whether a preparatory refactor would help parallelism
    Analyzing,
    /// Running the pre-factor in its own worktree
    Refactoring,
    /// Asking the worker for a subtask plan
    Planning,
    /// Subtask batches are executing
    Running,
    /// Folding subtask branches into the result branch
    Merging,
    /// All stages completed
    Done,
    /// Merge completed but a human should look at the result
    NeedsManualReview,
    /// A stage failed; the pipeline stopped
    Failed,
}

impl JobStatus {
    /// Ordering used by the monotonic-status rule. Writes that would lower
    /// this value are ignored by the store.
    pub fn priority(&self) -> u8 {
        match self {
            JobStatus::Analyzing => 0,
            JobStatus::Refactoring => 1,
            JobStatus::Planning => 2,
            JobStatus::Running => 3,
            JobStatus::Merging => 4,
            JobStatus::Done => 5,
            JobStatus::NeedsManualReview => 6,
            JobStatus::Failed => 7,
        }
    }

    /// Terminal statuses are frozen: no later write may change them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Failed | JobStatus::NeedsManualReview
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Analyzing => "analyzing",
            JobStatus::Refactoring => "refactoring",
            JobStatus::Planning => "planning",
            JobStatus::Running => "running",
            JobStatus::Merging => "merging",
            JobStatus::Done => "done",
            JobStatus::NeedsManualReview => "needs_manual_review",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "analyzing" => Some(JobStatus::Analyzing),
            "refactoring" => Some(JobStatus::Refactoring),
            "planning" => Some(JobStatus::Planning),
            "running" => Some(JobStatus::Running),
            "merging" => Some(JobStatus::Merging),
            "done" => Some(JobStatus::Done),
            "needs_manual_review" => Some(JobStatus::NeedsManualReview),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One orchestrator run, as stored and served to the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Process-unique identifier, e.g. `job-20250612-142256`
    pub id: String,

    /// Absolute path of the repository the job operates on
    pub repo_root: PathBuf,

    /// Branch every stage worktree is created from
    pub base_branch: String,

    /// Human-readable description shown by the dashboard
    pub description: String,

    /// The raw user task, verbatim
    pub user_task: String,

    /// Whether the result branch is pushed to origin after a successful merge
    pub push_result: bool,

    pub status: JobStatus,

    pub started_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::JobStatus;

    #[test]
    fn status_priorities_are_strictly_increasing() {
        let order = [
            JobStatus::Analyzing,
            JobStatus::Refactoring,
            JobStatus::Planning,
            JobStatus::Running,
            JobStatus::Merging,
            JobStatus::Done,
            JobStatus::NeedsManualReview,
            JobStatus::Failed,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].priority() < pair[1].priority());
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::NeedsManualReview.is_terminal());
        assert!(!JobStatus::Merging.is_terminal());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            JobStatus::Analyzing,
            JobStatus::Refactoring,
            JobStatus::Planning,
            JobStatus::Running,
            JobStatus::Merging,
            JobStatus::Done,
            JobStatus::NeedsManualReview,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&JobStatus::NeedsManualReview).unwrap();
        assert_eq!(json, "\"needs_manual_review\"");
    }
}
