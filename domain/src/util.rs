//! Shared utility functions.

/// Truncate a string to approximately `max_bytes` without splitting a UTF-8
/// character boundary.
///
/// Returns a sub-slice of the original string. If the string is shorter than
/// `max_bytes`, the entire string is returned unchanged.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Lossily decode captured process output, bounded to `max_bytes`.
///
/// A marker line is appended when the output was cut.
pub fn bounded_output(bytes: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max_bytes {
        return text.into_owned();
    }
    let mut out = truncate_str(&text, max_bytes).to_string();
    out.push_str("\n... (output truncated)");
    out
}

/// Reduce an arbitrary identifier to the character set container runtimes
/// accept in container and volume names (`[a-zA-Z0-9_.-]`).
pub fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_ascii() {
        assert_eq!(truncate_str("hello world", 5), "hello");
    }

    #[test]
    fn truncate_no_op_when_short() {
        assert_eq!(truncate_str("hi", 10), "hi");
    }

    #[test]
    fn truncate_multibyte_boundary() {
        // 'の' is 3 bytes (U+306E)
        let s = "あのね";
        assert_eq!(truncate_str(s, 4), "あ");
        assert_eq!(truncate_str(s, 6), "あの");
    }

    #[test]
    fn bounded_output_marks_truncation() {
        let big = vec![b'a'; 32];
        let out = bounded_output(&big, 8);
        assert!(out.starts_with("aaaaaaaa\n"));
        assert!(out.ends_with("(output truncated)"));

        assert_eq!(bounded_output(b"short", 8), "short");
    }

    #[test]
    fn sanitize_replaces_invalid_chars() {
        assert_eq!(sanitize_name("my tool/v1"), "my-tool-v1");
        assert_eq!(sanitize_name("calc.add_2"), "calc.add_2");
        assert_eq!(sanitize_name("///"), "unnamed");
    }
}
