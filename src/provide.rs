//! Provide-code prefix handling.
//!
//! The provide code is the declared signature and variable block of a
//! function. Removing it yields the implementation-only text that is scored
//! against implementation-only ground truth.

/// Remove `provide_code` from the front of `current`.
///
/// Matching is exact, byte for byte. Returns `None` when `current` does not
/// begin with the provide code.
pub fn strip_provide_code<'a>(current: &'a str, provide_code: &str) -> Option<&'a str> {
    current.strip_prefix(provide_code)
}

/// Inverse of [`strip_provide_code`].
pub fn reprepend(provide_code: &str, no_provide: &str) -> String {
    let mut text = String::with_capacity(provide_code.len() + no_provide.len());
    text.push_str(provide_code);
    text.push_str(no_provide);
    text
}

/// Drop the declaration part of a function text.
///
/// Keeps everything from the first line that is exactly `VAR`; otherwise
/// everything after the last `END_VAR` line; otherwise the whole text.
pub fn strip_declarations(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();

    if let Some(start) = lines
        .iter()
        .position(|line| line.trim().eq_ignore_ascii_case("VAR"))
    {
        return lines[start..].join("\n");
    }

    if let Some(last_end) = lines
        .iter()
        .rposition(|line| line.trim().eq_ignore_ascii_case("END_VAR"))
    {
        return lines[last_end + 1..].join("\n");
    }

    text.to_string()
}
