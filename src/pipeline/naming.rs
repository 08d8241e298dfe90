//! Job ids, branch names, and worktree slugs. Everything that ends up in a
//! ref name or a path goes through here first.

use chrono::Local;
use std::collections::HashSet;

/// Keep `[A-Za-z0-9._-]`, replacing every other run of characters with a
/// single `-`. Falls back to a timestamped id when nothing survives.
pub fn sanitize_job_id(raw: &str) -> String {
    let cleaned = collapse(raw, |c: char| c.is_ascii_alphanumeric() || "._-".contains(c));
    if cleaned.is_empty() {
        default_job_id()
    } else {
        cleaned
    }
}

/// `job-YYYYMMDD-HHMMSS`
pub fn default_job_id() -> String {
    format!("job-{}", Local::now().format("%Y%m%d-%H%M%S"))
}

/// Branch names allow `[A-Za-z0-9._/-]`; runs of anything else become one
/// `-`, and leading/trailing `-`/`.` are trimmed. An empty result gets a
/// timestamped fallback so the caller always has a usable ref.
pub fn sanitize_branch(raw: &str) -> String {
    let cleaned = collapse(raw, |c: char| {
        c.is_ascii_alphanumeric() || "._/-".contains(c)
    });
    if cleaned.is_empty() {
        format!("branch-{}", Local::now().format("%Y%m%d-%H%M%S"))
    } else {
        cleaned
    }
}

/// Lowercased subtask slug for worktree directory names: non-alphanumeric
/// runs become one `-`.
pub fn slugify(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let cleaned = collapse(&lower, |c: char| c.is_ascii_alphanumeric());
    if cleaned.is_empty() {
        "task".to_string()
    } else {
        cleaned
    }
}

/// Make `base` unique against `taken` by appending `-2`, `-3`, … and record
/// the winner.
pub fn unique_name(taken: &mut HashSet<String>, base: &str) -> String {
    if taken.insert(base.to_string()) {
        return base.to_string();
    }
    let mut n = 2usize;
    loop {
        let candidate = format!("{base}-{n}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn collapse(raw: &str, keep: impl Fn(char) -> bool) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut gap = false;
    for c in raw.chars() {
        if keep(c) {
            if gap && !out.is_empty() {
                out.push('-');
            }
            gap = false;
            out.push(c);
        } else {
            gap = true;
        }
    }
    out.trim_matches(|c| c == '-' || c == '.').to_string()
}
