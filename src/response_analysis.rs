// Response analysis for Gauntlet
// Heuristics for user-facing rejection messages and error-shaped bodies

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref REJECTION_TEXT: Regex = Regex::new(
        r"(?i)\b(invalid|required|not allowed|must|too (long|large|big|short)|exceeds?|unsupported|not supported|rejected|denied|forbidden|error|incorrect|wrong|please (enter|provide|select|upload))\b"
    ).unwrap();
}

/// Whether visible feedback text reads like the form refused the input.
pub fn is_visible_rejection(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && REJECTION_TEXT.is_match(trimmed)
}

/// Whether a JSON body looks like an error envelope rather than a success payload.
pub fn is_error_body(value: &Value) -> bool {
    if let Value::Object(obj) = value {
        if obj.get("success") == Some(&Value::Bool(false)) {
            return true;
        }
        if obj.contains_key("error") || obj.contains_key("errors") {
            return true;
        }
    }
    false
}

/// Short single-line summary of a body for finding details.
pub fn summarize_body(body: &Value, max: usize) -> String {
    let text = match body {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let line: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.chars().count() <= max {
        line
    } else {
        let cut: String = line.chars().take(max).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_visible_rejection() {
        assert!(is_visible_rejection("Please enter a valid email"));
        assert!(is_visible_rejection("File too large"));
        assert!(is_visible_rejection("This field is required."));
        assert!(!is_visible_rejection("Saved!"));
        assert!(!is_visible_rejection("   "));
    }

    #[test]
    fn test_error_body() {
        assert!(is_error_body(&json!({"success": false})));
        assert!(is_error_body(&json!({"errors": []})));
        assert!(!is_error_body(&json!({"id": 1})));
        assert!(!is_error_body(&json!([1])));
    }

    #[test]
    fn test_summarize_body() {
        assert_eq!(summarize_body(&json!("a\n  b"), 10), "a b");
        assert_eq!(summarize_body(&json!("abcdefghijkl"), 5), "abcde…");
        assert_eq!(summarize_body(&json!({"a": 1}), 40), "{\"a\":1}");
    }
}
