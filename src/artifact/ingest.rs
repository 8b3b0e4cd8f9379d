//! Turning raw generator output into stored function text.

const FENCE: &str = "```";

/// Keep the contents of the first fenced block, without a leading `st`
/// language tag. Text without a complete fence pair is returned trimmed.
pub fn extract_code_from_markdown(text: &str) -> String {
    let Some(open) = text.find(FENCE) else {
        return text.trim().to_string();
    };
    let after_open = &text[open + FENCE.len()..];
    let Some(close) = after_open.find(FENCE) else {
        return text.trim().to_string();
    };
    let inner = &after_open[..close];

    let inner = match inner.split_once('\n') {
        Some((tag, rest)) if tag.trim().eq_ignore_ascii_case("st") => rest,
        _ => inner,
    };
    inner.trim().to_string()
}

/// Which POU closer, if any, the provide code requires.
fn required_closer(provide_code: &str) -> Option<&'static str> {
    let first_word = provide_code
        .split_whitespace()
        .next()
        .map(|w| w.to_ascii_uppercase())?;
    match first_word.as_str() {
        "FUNCTION_BLOCK" => Some("END_FUNCTION_BLOCK"),
        "FUNCTION" => Some("END_FUNCTION"),
        _ => None,
    }
}

/// Build the full function text from its provide code and a generated body.
///
/// The result always starts with the normalized provide code (trailing
/// whitespace trimmed), so stripping that prefix later is exact.
pub fn assemble_with_provide_code(provide_code: &str, body: &str) -> String {
    let provide = provide_code.trim_end();
    let body = body.trim_end();
    let mut text = String::with_capacity(provide.len() + body.len() + 32);
    text.push_str(provide);
    text.push_str("\n\n");
    text.push_str(body);

    if let Some(closer) = required_closer(provide) {
        let already_closed = body
            .lines()
            .last()
            .map(|line| {
                line.trim()
                    .trim_end_matches(';')
                    .eq_ignore_ascii_case(closer)
            })
            .unwrap_or(false);
        if !already_closed {
            text.push_str("\n\n");
            text.push_str(closer);
        }
    }
    text.push('\n');
    text
}
