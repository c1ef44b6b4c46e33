//! Tolerant recovery of a JSON value from model output
//!
//! Order of attempts: strip markdown code fences, parse directly, then parse
//! the first balanced `{...}` or `[...]` substring. Only objects and arrays
//! count as structured output; a bare scalar or `null` is rejected.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("fence pattern is valid")
    })
}

/// Remove a surrounding markdown code fence, if the text contains one
pub fn strip_code_fences(text: &str) -> &str {
    match fence_regex().captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => text.trim(),
    }
}

fn is_structured(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

/// Recover a JSON object or array from `text`
pub fn extract_json(text: &str) -> Result<Value, String> {
    let stripped = strip_code_fences(text);
    if stripped.is_empty() {
        return Err("response is empty".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(stripped) {
        if is_structured(&value) {
            return Ok(value);
        }
    }

    // Fall back to scanning the raw text in case the fence hid nothing useful
    for candidate in [stripped, text] {
        let mut from = 0;
        while let Some((start, slice)) = balanced_from(candidate, from) {
            if let Ok(value) = serde_json::from_str::<Value>(slice) {
                return Ok(value);
            }
            from = start + 1;
        }
    }

    Err(format!(
        "no JSON object or array could be recovered from {} characters of output",
        text.chars().count()
    ))
}

/// Locate the first balanced JSON object or array at or after `from`,
/// honouring string literals and escapes. Returns its start offset too.
fn balanced_from(text: &str, from: usize) -> Option<(usize, &str)> {
    let bytes = text.as_bytes();
    let mut search_from = from;

    while let Some(offset) = text[search_from..].find(['{', '[']) {
        let start = search_from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, &b) in bytes.iter().enumerate().skip(start) {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some((start, &text[start..=i]));
                    }
                }
                _ => {}
            }
        }

        // Unbalanced from this opener; try the next one
        search_from = start + 1;
    }

    None
}
