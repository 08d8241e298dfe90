//! Normalised worker outputs for the analyze, refactor, run-subtask, and
//! merge stages. Each report has a lenient `from_value` that fills optional
//! fields with defaults, because the worker's JSON is free-form around the
//! edges even when the core fields are present.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::plan::coerce_string;

/// A spot in the repository the analyzer thinks should be split up before
/// parallel work starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusArea {
    pub path: String,
    pub why: String,
    pub suggested_split: Option<String>,
}

/// Output of the read-only analyze stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub should_refactor: bool,
    pub reasons: Vec<String>,
    pub focus_areas: Vec<FocusArea>,
    pub notes: Option<String>,
}

impl AnalysisReport {
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "analysis payload is not a JSON object".to_string())?;

        let should_refactor = obj
            .get("shouldRefactor")
            .and_then(Value::as_bool)
            .ok_or_else(|| "analysis payload has no boolean 'shouldRefactor'".to_string())?;

        let reasons = string_array(obj.get("reasons"));

        let focus_areas = obj
            .get("focusAreas")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let area = item.as_object()?;
                        Some(FocusArea {
                            path: area.get("path").and_then(coerce_string)?,
                            why: area.get("why").and_then(coerce_string).unwrap_or_default(),
                            suggested_split: area.get("suggestedSplit").and_then(coerce_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(AnalysisReport {
            should_refactor,
            reasons,
            focus_areas,
            notes: obj.get("notes").and_then(coerce_string),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefactorStatus {
    Ok,
    Skipped,
    Failed,
}

/// Output of the pre-factor stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefactorReport {
    pub status: RefactorStatus,
    pub summary: String,
    pub branch: String,
    pub worktree_path: String,
    pub touched_files: Vec<String>,
    pub notes: Option<String>,
}

impl RefactorReport {
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "refactor payload is not a JSON object".to_string())?;

        let status = match obj.get("status").and_then(Value::as_str) {
            Some("ok") => RefactorStatus::Ok,
            Some("skipped") => RefactorStatus::Skipped,
            Some("failed") => RefactorStatus::Failed,
            Some(other) => return Err(format!("unknown refactor status '{other}'")),
            None => return Err("refactor payload has no 'status'".to_string()),
        };

        Ok(RefactorReport {
            status,
            summary: obj.get("summary").and_then(coerce_string).unwrap_or_default(),
            branch: obj.get("branch").and_then(coerce_string).unwrap_or_default(),
            worktree_path: obj
                .get("worktreePath")
                .and_then(coerce_string)
                .unwrap_or_default(),
            touched_files: string_array(obj.get("touchedFiles")),
            notes: obj.get("notes").and_then(coerce_string),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskReportStatus {
    Ok,
    Failed,
}

/// The worker's final word on one subtask.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskReport {
    pub subtask_id: String,
    pub status: SubtaskReportStatus,
    pub summary: String,
    pub important_files: Vec<String>,
}

impl SubtaskReport {
    /// Normalise a subtask payload. `fallback_id` fills in when the worker
    /// dropped the `subtaskId` field, which happens often enough to matter.
    pub fn from_value(value: &Value, fallback_id: &str) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "subtask payload is not a JSON object".to_string())?;

        let status = match obj.get("status").and_then(Value::as_str) {
            Some("ok") => SubtaskReportStatus::Ok,
            Some("failed") => SubtaskReportStatus::Failed,
            Some(other) => return Err(format!("unknown subtask status '{other}'")),
            None => return Err("subtask payload has no 'status'".to_string()),
        };

        Ok(SubtaskReport {
            subtask_id: obj
                .get("subtaskId")
                .and_then(coerce_string)
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| fallback_id.to_string()),
            status,
            summary: obj.get("summary").and_then(coerce_string).unwrap_or_default(),
            important_files: string_array(obj.get("importantFiles")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Ok,
    NeedsManualReview,
}

/// Final outcome of folding all subtask branches into the result branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub status: MergeStatus,
    pub notes: String,
    pub touched_files: Vec<String>,
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(coerce_string)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
