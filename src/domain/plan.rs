use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One subtask as described by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedSubtask {
    /// Stable id, unique within the plan
    pub id: String,
    pub title: String,
    pub description: String,
    /// Subtasks sharing a group label may run concurrently
    pub parallel_group: Option<String>,
    pub context: Option<String>,
    pub notes: Option<String>,
}

/// The planner's decomposition of the user task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub can_parallelize: bool,
    pub subtasks: Vec<PlannedSubtask>,
}

impl Plan {
    /// Normalise a raw planner payload.
    ///
    /// The worker emits JSON that is mostly right but not reliably typed:
    /// `parallelGroup` shows up as a number, ids as integers, `subtasks`
    /// occasionally missing. Coerce what can be coerced, default the rest,
    /// and reject only plans that are structurally unusable (a subtask with
    /// no id, or duplicate ids).
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "plan payload is not a JSON object".to_string())?;

        let can_parallelize = obj
            .get("canParallelize")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let raw_subtasks = match obj.get("subtasks") {
            Some(Value::Array(items)) => items.as_slice(),
            Some(_) => return Err("plan field 'subtasks' is not an array".to_string()),
            None => &[],
        };

        let mut subtasks = Vec::with_capacity(raw_subtasks.len());
        for (index, raw) in raw_subtasks.iter().enumerate() {
            let item = raw
                .as_object()
                .ok_or_else(|| format!("plan subtask #{index} is not an object"))?;

            let id = item
                .get("id")
                .and_then(coerce_string)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| format!("plan subtask #{index} has no id"))?;

            let title = item
                .get("title")
                .and_then(coerce_string)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| id.clone());

            let description = item
                .get("description")
                .and_then(coerce_string)
                .unwrap_or_default();

            let parallel_group = item
                .get("parallelGroup")
                .and_then(coerce_string)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());

            let context = item.get("context").and_then(coerce_string);
            let notes = item.get("notes").and_then(coerce_string);

            subtasks.push(PlannedSubtask {
                id,
                title,
                description,
                parallel_group,
                context,
                notes,
            });
        }

        let mut seen = std::collections::HashSet::new();
        for subtask in &subtasks {
            if !seen.insert(subtask.id.as_str()) {
                return Err(format!("plan contains duplicate subtask id '{}'", subtask.id));
            }
        }

        Ok(Plan {
            can_parallelize,
            subtasks,
        })
    }
}

/// String coercion for worker payload fields: numbers and bools become their
/// display form, everything else is dropped.
pub(crate) fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::Plan;
    use serde_json::json;

    #[test]
    fn normalises_numeric_groups_and_missing_optionals() {
        let raw = json!({
            "canParallelize": true,
            "subtasks": [
                {"id": "a", "title": "First", "description": "do a", "parallelGroup": 1},
                {"id": 2, "title": "Second", "description": "do b", "parallelGroup": "1"},
                {"id": "c", "title": "Third", "description": "do c"},
            ]
        });

        let plan = Plan::from_value(&raw).expect("plan");
        assert!(plan.can_parallelize);
        assert_eq!(plan.subtasks.len(), 3);
        assert_eq!(plan.subtasks[0].parallel_group.as_deref(), Some("1"));
        assert_eq!(plan.subtasks[1].id, "2");
        assert_eq!(plan.subtasks[1].parallel_group.as_deref(), Some("1"));
        assert!(plan.subtasks[2].parallel_group.is_none());
        assert!(plan.subtasks[2].context.is_none());
        assert!(plan.subtasks[2].notes.is_none());
    }

    #[test]
    fn missing_subtasks_is_an_empty_plan() {
        let plan = Plan::from_value(&json!({"canParallelize": false})).expect("plan");
        assert!(plan.subtasks.is_empty());
        assert!(!plan.can_parallelize);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let raw = json!({
            "canParallelize": false,
            "subtasks": [
                {"id": "a", "title": "x", "description": ""},
                {"id": "a", "title": "y", "description": ""},
            ]
        });
        let err = Plan::from_value(&raw).unwrap_err();
        assert!(err.contains("duplicate"), "{err}");
    }

    #[test]
    fn rejects_subtask_without_id() {
        let raw = json!({"subtasks": [{"title": "x"}]});
        assert!(Plan::from_value(&raw).is_err());
    }

    #[test]
    fn title_falls_back_to_id() {
        let raw = json!({"subtasks": [{"id": "fix-auth", "description": "d"}]});
        let plan = Plan::from_value(&raw).expect("plan");
        assert_eq!(plan.subtasks[0].title, "fix-auth");
    }
}
