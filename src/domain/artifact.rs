use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of event an artifact records. The payload shape depends on the kind;
/// the store treats it as opaque JSON either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Plan,
    PlanProgress,
    Analysis,
    AnalysisProgress,
    Refactor,
    RefactorProgress,
    MergeInput,
    MergeResult,
    MergeError,
    MergeProgress,
    SubtaskResult,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Plan => "plan",
            ArtifactKind::PlanProgress => "plan_progress",
            ArtifactKind::Analysis => "analysis",
            ArtifactKind::AnalysisProgress => "analysis_progress",
            ArtifactKind::Refactor => "refactor",
            ArtifactKind::RefactorProgress => "refactor_progress",
            ArtifactKind::MergeInput => "merge_input",
            ArtifactKind::MergeResult => "merge_result",
            ArtifactKind::MergeError => "merge_error",
            ArtifactKind::MergeProgress => "merge_progress",
            ArtifactKind::SubtaskResult => "subtask_result",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plan" => Some(ArtifactKind::Plan),
            "plan_progress" => Some(ArtifactKind::PlanProgress),
            "analysis" => Some(ArtifactKind::Analysis),
            "analysis_progress" => Some(ArtifactKind::AnalysisProgress),
            "refactor" => Some(ArtifactKind::Refactor),
            "refactor_progress" => Some(ArtifactKind::RefactorProgress),
            "merge_input" => Some(ArtifactKind::MergeInput),
            "merge_result" => Some(ArtifactKind::MergeResult),
            "merge_error" => Some(ArtifactKind::MergeError),
            "merge_progress" => Some(ArtifactKind::MergeProgress),
            "subtask_result" => Some(ArtifactKind::SubtaskResult),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable, append-only event record. Artifacts are never updated or
/// deleted; the dashboard reconstructs stage history by ordering them on
/// `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Random opaque id
    pub id: String,

    pub job_id: String,

    #[serde(rename = "type")]
    pub kind: ArtifactKind,

    pub label: Option<String>,

    pub subtask_id: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Opaque JSON payload; shape varies by `kind`
    pub data: serde_json::Value,
}

impl Artifact {
    /// Build a new artifact with a fresh random id stamped now.
    pub fn new(job_id: impl Into<String>, kind: ArtifactKind, data: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            kind,
            label: None,
            subtask_id: None,
            created_at: Utc::now(),
            data,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_subtask(mut self, subtask_id: impl Into<String>) -> Self {
        self.subtask_id = Some(subtask_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::ArtifactKind;

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in [
            ArtifactKind::Plan,
            ArtifactKind::PlanProgress,
            ArtifactKind::Analysis,
            ArtifactKind::AnalysisProgress,
            ArtifactKind::Refactor,
            ArtifactKind::RefactorProgress,
            ArtifactKind::MergeInput,
            ArtifactKind::MergeResult,
            ArtifactKind::MergeError,
            ArtifactKind::MergeProgress,
            ArtifactKind::SubtaskResult,
        ] {
            assert_eq!(ArtifactKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn artifact_json_uses_type_field() {
        let artifact = super::Artifact::new("job-1", ArtifactKind::Plan, serde_json::json!({}));
        let value = serde_json::to_value(&artifact).unwrap();
        assert_eq!(value["type"], "plan");
        assert_eq!(value["jobId"], "job-1");
    }
}
