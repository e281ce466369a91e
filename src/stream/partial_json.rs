//! Best-effort parsing of incomplete JSON argument buffers.
//!
//! Tool-call arguments stream in as arbitrary fragments of a JSON object. For
//! live display we want "params so far": the buffer is closed up (open string
//! terminated, open containers closed) and, if that still does not parse, cut
//! back to the last point where a member or element ended.

use serde_json::Value;

/// Position where the buffer can be truncated, with the containers open there.
#[derive(Debug, Clone)]
struct CutPoint {
    pos: usize,
    open: Vec<u8>,
}

/// Parse a possibly incomplete JSON document.
///
/// Returns `None` when nothing sensible can be recovered (empty input, a bare
/// partial scalar, or garbage).
pub fn parse_partial_json(input: &str) -> Option<Value> {
    let trimmed = input.trim_start();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let mut stack: Vec<u8> = Vec::new();
    let mut cuts: Vec<CutPoint> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let bytes = trimmed.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => {
                stack.push(b);
                cuts.push(CutPoint {
                    pos: i + 1,
                    open: stack.clone(),
                });
            }
            b'}' | b']' => {
                stack.pop();
            }
            b',' => cuts.push(CutPoint {
                pos: i,
                open: stack.clone(),
            }),
            _ => {}
        }
    }

    let mut completed = trimmed.to_string();
    if in_string {
        if escaped {
            completed.pop();
        }
        strip_incomplete_unicode_escape(&mut completed);
        completed.push('"');
    }
    if let Some(value) = close_and_parse(&completed, &stack) {
        return Some(value);
    }

    for cut in cuts.iter().rev() {
        if let Some(value) = close_and_parse(&trimmed[..cut.pos], &cut.open) {
            return Some(value);
        }
    }
    None
}

fn close_and_parse(head: &str, open: &[u8]) -> Option<Value> {
    let mut candidate = head.trim_end().to_string();
    if candidate.ends_with(',') {
        candidate.pop();
    }
    for &opener in open.iter().rev() {
        candidate.push(if opener == b'{' { '}' } else { ']' });
    }
    serde_json::from_str(&candidate).ok()
}

/// Drop a trailing `\u` escape that has fewer than four hex digits.
fn strip_incomplete_unicode_escape(s: &mut String) {
    if let Some(pos) = s.rfind("\\u") {
        let digits = &s[pos + 2..];
        let backslashes = s[..pos].bytes().rev().take_while(|&b| b == b'\\').count();
        if backslashes % 2 == 0 && digits.len() < 4 && digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            s.truncate(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complete_json_passes_through() {
        assert_eq!(parse_partial_json(r#"{"a": 1}"#), Some(json!({"a": 1})));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(parse_partial_json(""), None);
        assert_eq!(parse_partial_json("   "), None);
    }

    #[test]
    fn test_open_object() {
        assert_eq!(parse_partial_json("{"), Some(json!({})));
    }

    #[test]
    fn test_open_string_value_is_kept() {
        assert_eq!(
            parse_partial_json(r#"{"path": "src/ma"#),
            Some(json!({"path": "src/ma"}))
        );
    }

    #[test]
    fn test_partial_key_is_dropped() {
        assert_eq!(parse_partial_json(r#"{"pa"#), Some(json!({})));
        assert_eq!(
            parse_partial_json(r#"{"a": 1, "b"#),
            Some(json!({"a": 1}))
        );
    }

    #[test]
    fn test_key_without_value_is_dropped() {
        assert_eq!(
            parse_partial_json(r#"{"a": 1, "b":"#),
            Some(json!({"a": 1}))
        );
    }

    #[test]
    fn test_partial_literal_is_dropped() {
        assert_eq!(
            parse_partial_json(r#"{"a": 1, "b": tr"#),
            Some(json!({"a": 1}))
        );
    }

    #[test]
    fn test_trailing_comma() {
        assert_eq!(parse_partial_json(r#"{"a": 1,"#), Some(json!({"a": 1})));
    }

    #[test]
    fn test_nested_containers() {
        assert_eq!(
            parse_partial_json(r#"{"files": [{"path": "a.rs"}, {"path": "b"#),
            Some(json!({"files": [{"path": "a.rs"}, {"path": "b"}]}))
        );
    }

    #[test]
    fn test_trailing_escape() {
        assert_eq!(
            parse_partial_json(r#"{"content": "line\"#),
            Some(json!({"content": "line"}))
        );
        assert_eq!(
            parse_partial_json(r#"{"content": "x\u00"#),
            Some(json!({"content": "x"}))
        );
    }

    #[test]
    fn test_number_in_progress() {
        assert_eq!(parse_partial_json(r#"{"n": 12"#), Some(json!({"n": 12})));
        assert_eq!(parse_partial_json(r#"{"n": -"#), Some(json!({})));
    }

    #[test]
    fn test_bare_partial_scalar() {
        assert_eq!(parse_partial_json("tru"), None);
    }
}
