//! Grouping planned subtasks into sequential batches of parallel work.

use crate::domain::{Plan, PlannedSubtask};

/// Split the plan into batches. Subtasks inside one batch run concurrently;
/// batches run strictly one after another, ordered by first appearance of
/// their group label in the plan.
///
/// When the plan is not parallelisable every subtask is its own batch.
/// Subtasks without a group label never share a batch with anything.
pub fn group_batches(plan: &Plan) -> Vec<Vec<PlannedSubtask>> {
    if !plan.can_parallelize {
        return plan.subtasks.iter().cloned().map(|s| vec![s]).collect();
    }

    let mut batches: Vec<(Option<String>, Vec<PlannedSubtask>)> = Vec::new();
    for subtask in &plan.subtasks {
        match &subtask.parallel_group {
            Some(group) => {
                if let Some((_, members)) = batches
                    .iter_mut()
                    .find(|(key, _)| key.as_deref() == Some(group.as_str()))
                {
                    members.push(subtask.clone());
                } else {
                    batches.push((Some(group.clone()), vec![subtask.clone()]));
                }
            }
            // Ungrouped subtasks run alone.
            None => batches.push((None, vec![subtask.clone()])),
        }
    }
    batches.into_iter().map(|(_, members)| members).collect()
}

#[cfg(test)]
mod tests {
    use super::group_batches;
    use crate::domain::{Plan, PlannedSubtask};

    fn subtask(id: &str, group: Option<&str>) -> PlannedSubtask {
        PlannedSubtask {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            parallel_group: group.map(str::to_string),
            context: None,
            notes: None,
        }
    }

    fn ids(batch: &[PlannedSubtask]) -> Vec<&str> {
        batch.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn groups_by_label_in_first_appearance_order() {
        let plan = Plan {
            can_parallelize: true,
            subtasks: vec![
                subtask("a", Some("g1")),
                subtask("b", Some("g2")),
                subtask("c", Some("g1")),
                subtask("d", Some("g2")),
            ],
        };
        let batches = group_batches(&plan);
        assert_eq!(batches.len(), 2);
        assert_eq!(ids(&batches[0]), vec!["a", "c"]);
        assert_eq!(ids(&batches[1]), vec!["b", "d"]);
    }

    #[test]
    fn ungrouped_subtasks_get_solo_batches() {
        let plan = Plan {
            can_parallelize: true,
            subtasks: vec![
                subtask("a", Some("g1")),
                subtask("b", None),
                subtask("c", Some("g1")),
                subtask("d", None),
            ],
        };
        let batches = group_batches(&plan);
        assert_eq!(batches.len(), 3);
        assert_eq!(ids(&batches[0]), vec!["a", "c"]);
        assert_eq!(ids(&batches[1]), vec!["b"]);
        assert_eq!(ids(&batches[2]), vec!["d"]);
    }

    #[test]
    fn sequential_plans_become_singleton_batches() {
        let plan = Plan {
            can_parallelize: false,
            subtasks: vec![subtask("a", Some("g1")), subtask("b", Some("g1"))],
        };
        let batches = group_batches(&plan);
        assert_eq!(batches.len(), 2);
        assert_eq!(ids(&batches[0]), vec!["a"]);
        assert_eq!(ids(&batches[1]), vec!["b"]);
    }

    #[test]
    fn empty_plan_has_no_batches() {
        let plan = Plan {
            can_parallelize: true,
            subtasks: vec![],
        };
        assert!(group_batches(&plan).is_empty());
    }
}
