//! Stage prompt templates. Each template states the job, the constraints,
//! and the exact shape of the JSON object the worker must end its output
//! with. The engine relies on that object being last; everything before it
//! is treated as commentary.

use crate::domain::PlannedSubtask;

/// Read-only analysis: should a preparatory refactor happen first?
pub fn analyze(user_task: &str) -> String {
    format!(
        r#"You are assessing a repository before a team of independent agents works on it in parallel.

Task the team will perform:
{user_task}

Decide whether a small preparatory refactor would make this task easier to split into independent parallel subtasks (for example: untangling a god-module that every subtask would otherwise touch). This is a READ-ONLY assessment: do not modify any files and do not run git commands.

End your output with exactly one JSON object of this shape:
{{"shouldRefactor": true/false, "reasons": ["..."], "focusAreas": [{{"path": "...", "why": "...", "suggestedSplit": "..."}}], "notes": "..."}}"#
    )
}

/// Behaviour-preserving pre-factor inside a dedicated worktree.
pub fn refactor(user_task: &str, reasons: &[String]) -> String {
    let reasons = if reasons.is_empty() {
        "- (none given)".to_string()
    } else {
        reasons
            .iter()
            .map(|r| format!("- {r}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        r#"Perform a minimal, behaviour-preserving refactor of this repository so that the following task can be split into independent parallel subtasks:

{user_task}

Reasons a refactor was requested:
{reasons}

Rules:
- Change as little as possible; no functional changes.
- Do NOT run any git commands; just edit files. Committing is handled for you.

End your output with exactly one JSON object of this shape:
{{"status": "ok"|"skipped"|"failed", "summary": "...", "branch": "", "worktreePath": "", "touchedFiles": ["..."], "notes": "..."}}"#
    )
}

/// Read-only planning: decompose the task into subtasks with parallel groups.
pub fn plan(user_task: &str) -> String {
    format!(
        r#"Break the following task into subtasks that independent agents can perform, each in its own copy of this repository:

{user_task}

Rules:
- This is READ-ONLY planning: do not modify files, do not run git commands.
- Give every subtask a short stable string id (e.g. "s1", "auth-model").
- Subtasks that can safely run at the same time share a "parallelGroup" label. Groups run in the order they first appear.
- If nothing can run in parallel, set "canParallelize" to false and omit the group labels.

End your output with exactly one JSON object of this shape:
{{"canParallelize": true/false, "subtasks": [{{"id": "...", "title": "...", "description": "...", "parallelGroup": "...", "context": "...", "notes": "..."}}]}}"#
    )
}

/// One subtask, executed in its own worktree.
pub fn subtask(user_task: &str, subtask: &PlannedSubtask) -> String {
    let context = subtask
        .context
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .map(|c| format!("\nAdditional context:\n{c}\n"))
        .unwrap_or_default();
    format!(
        r#"You are one agent in a team completing this overall task:

{user_task}

Your subtask (id: {id}) is: {title}

{description}
{context}
Rules:
- Modify files to complete your subtask only; stay out of areas other subtasks own.
- Do NOT run any git commands; just edit files. Committing is handled for you.

End your output with exactly one JSON object of this shape:
{{"subtaskId": "{id}", "status": "ok"|"failed", "summary": "...", "importantFiles": ["..."]}}"#,
        id = subtask.id,
        title = subtask.title,
        description = subtask.description,
    )
}

/// Conflict resolution inside the result worktree.
pub fn resolve_conflicts(branch: &str, files: &[String]) -> String {
    let files = files
        .iter()
        .map(|f| format!("- {f}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"A git merge of branch '{branch}' into the result branch stopped with conflicts. The conflicted files, still containing <<<<<<< / ======= / >>>>>>> markers, are:

{files}

Resolve every conflict by editing these files so both sides' intent is preserved, then remove all conflict markers.

Rules:
- Do NOT run ANY git command. No add, no commit, no merge, no checkout. Committing is handled for you.
- Do NOT touch the .git or .git-local entries in this directory, or anything inside them.

End your output with exactly one JSON object of this shape:
{{"status": "ok"|"needs_manual_review", "notes": "..."}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PlannedSubtask;

    #[test]
    fn subtask_prompt_embeds_task_and_id_verbatim() {
        let planned = PlannedSubtask {
            id: "s2".to_string(),
            title: "Add retry".to_string(),
            description: "Retry transient failures".to_string(),
            parallel_group: None,
            context: Some("touch only src/net".to_string()),
            notes: None,
        };
        let prompt = subtask("Make the client resilient", &planned);
        assert!(prompt.contains("Make the client resilient"));
        assert!(prompt.contains("(id: s2)"));
        assert!(prompt.contains("\"subtaskId\": \"s2\""));
        assert!(prompt.contains("touch only src/net"));
    }

    #[test]
    fn conflict_prompt_lists_files_and_forbids_git() {
        let prompt = resolve_conflicts("task-a-job-1", &["src/lib.rs".to_string()]);
        assert!(prompt.contains("- src/lib.rs"));
        assert!(prompt.contains("Do NOT run ANY git command"));
        assert!(prompt.contains(".git-local"));
    }
}
