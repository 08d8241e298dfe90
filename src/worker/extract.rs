use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no JSON object found in output")]
pub struct NoJsonFound;

/// Recover a JSON object from free-form worker output.
///
/// The worker is supposed to end its output with a JSON object, but it also
/// prints commentary, and that commentary can itself contain `{...}`
/// snippets. Strategy: try the whole (trimmed) text first; failing that,
/// anchor on the last `}` and try every `{` before it from right to left,
/// returning the first candidate that parses to an object. The rightmost
/// opener wins ties, which keeps a trailing well-formed object from being
/// swallowed by an unbalanced brace earlier in the prose.
pub fn extract_json(text: &str) -> Result<Value, NoJsonFound> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(NoJsonFound);
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Ok(value);
        }
    }

    let last = trimmed.rfind('}').ok_or(NoJsonFound)?;
    for (start, _) in trimmed[..last]
        .char_indices()
        .rev()
        .filter(|(_, c)| *c == '{')
    {
        let candidate = &trimmed[start..=last];
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            if value.is_object() {
                return Ok(value);
            }
        }
    }

    Err(NoJsonFound)
}
