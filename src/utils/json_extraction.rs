//! Tolerant JSON extraction from LLM replies.
//!
//! Model replies wrap their JSON payload in markdown fences or surrounding
//! prose often enough that direct `serde_json::from_str` on the raw reply is
//! unreliable. The helpers here locate the first balanced JSON object or
//! array in a reply, honoring string literals and escape sequences, so the
//! caller can hand a clean slice to serde.

/// Extracts the first JSON object (`{...}`) from a model reply.
///
/// Tries, in order: a fenced ```json block, a generic fenced block, and the
/// first balanced `{...}` anywhere in the text. Returns `None` when no
/// balanced object exists.
pub fn extract_object(reply: &str) -> Option<String> {
    extract_delimited(reply, '{', '}')
}

/// Extracts the first JSON array (`[...]`) from a model reply.
pub fn extract_array(reply: &str) -> Option<String> {
    extract_delimited(reply, '[', ']')
}

fn extract_delimited(reply: &str, open: char, close: char) -> Option<String> {
    let candidate = fenced_block(reply).unwrap_or(reply);

    let start = candidate.find(open)?;
    let rest = &candidate[start..];
    let end = balanced_end(rest, open, close)?;
    Some(rest[..=end].to_string())
}

/// Returns the body of the first fenced code block, if any.
///
/// Accepts both ```json and bare ``` fences.
fn fenced_block(text: &str) -> Option<&str> {
    let fence_start = text.find("```")?;
    let after_fence = &text[fence_start + 3..];
    // Skip the info string ("json", "JSON", ...) up to the first newline.
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let fence_end = body.find("```")?;
    Some(body[..fence_end].trim())
}

/// Index of the delimiter closing the one at position 0, tracking nesting
/// and string literals.
fn balanced_end(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_object_direct() {
        let reply = r#"{"category": "terrorism", "score": 85}"#;
        assert_eq!(extract_object(reply), Some(reply.to_string()));
    }

    #[test]
    fn test_extract_object_with_prose() {
        let reply = r#"Here is the assessment: {"score": 85} as requested."#;
        assert_eq!(extract_object(reply), Some(r#"{"score": 85}"#.to_string()));
    }

    #[test]
    fn test_extract_object_fenced() {
        let reply = "```json\n{\"score\": 12}\n```";
        assert_eq!(extract_object(reply), Some("{\"score\": 12}".to_string()));
    }

    #[test]
    fn test_extract_object_generic_fence() {
        let reply = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_object(reply), Some("{\"a\": 1}".to_string()));
    }

    #[test]
    fn test_extract_object_nested() {
        let reply = r#"{"outer": {"inner": [1, 2]}}"#;
        assert_eq!(extract_object(reply), Some(reply.to_string()));
    }

    #[test]
    fn test_extract_object_braces_in_strings() {
        let reply = r#"{"note": "contains } and { inside"}"#;
        assert_eq!(extract_object(reply), Some(reply.to_string()));
    }

    #[test]
    fn test_extract_object_escaped_quotes() {
        let reply = r#"{"quote": "she said \"run\""}"#;
        assert_eq!(extract_object(reply), Some(reply.to_string()));
    }

    #[test]
    fn test_extract_array() {
        let reply = "The batch results:\n[{\"index\": 0, \"country\": \"Serbia\"}]";
        assert_eq!(
            extract_array(reply),
            Some("[{\"index\": 0, \"country\": \"Serbia\"}]".to_string())
        );
    }

    #[test]
    fn test_extract_missing_returns_none() {
        assert_eq!(extract_object("no json here"), None);
        assert_eq!(extract_array("still nothing"), None);
    }

    #[test]
    fn test_unbalanced_returns_none() {
        assert_eq!(extract_object(r#"{"truncated": "#), None);
    }
}
