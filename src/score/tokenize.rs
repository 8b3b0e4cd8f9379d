//! Case-insensitive Structured Text tokenizer shared by the default metrics.

use crate::error::{EvalError, EvalResult};

const KEYWORDS: &[&str] = &[
    "ACTION", "AND", "ARRAY", "AT", "BOOL", "BY", "BYTE", "CASE", "CONSTANT", "CONTINUE",
    "DATE", "DATE_AND_TIME", "DINT", "DO", "DT", "DWORD", "ELSE", "ELSIF", "END_ACTION",
    "END_CASE", "END_FOR", "END_FUNCTION", "END_FUNCTION_BLOCK", "END_IF", "END_METHOD",
    "END_PROGRAM", "END_REPEAT", "END_STRUCT", "END_TYPE", "END_VAR", "END_WHILE", "EXIT",
    "FALSE", "FOR", "FUNCTION", "FUNCTION_BLOCK", "IF", "INT", "LINT", "LREAL", "LWORD",
    "METHOD", "MOD", "NOT", "OF", "OR", "POINTER", "PROGRAM", "REAL", "REF_TO", "REPEAT",
    "RETAIN", "RETURN", "SINT", "STRING", "STRUCT", "THEN", "TIME", "TIME_OF_DAY", "TO",
    "TOD", "TRUE", "TYPE", "UDINT", "UINT", "ULINT", "UNTIL", "USINT", "VAR", "VAR_EXTERNAL",
    "VAR_GLOBAL", "VAR_INPUT", "VAR_IN_OUT", "VAR_OUTPUT", "VAR_TEMP", "WHILE", "WORD",
    "WSTRING", "XOR",
];

const TWO_CHAR_OPS: &[&str] = &[":=", "=>", "<=", ">=", "<>", "**", ".."];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.binary_search(&word).is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Keyword,
    Ident,
    Number,
    Str,
    Op,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }

    pub fn is_keyword(&self, word: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text == word
    }
}

fn parse_failure(metric: &'static str, message: impl Into<String>) -> EvalError {
    EvalError::ParseFailure {
        metric,
        message: message.into(),
    }
}

/// Split `source` into tokens. Identifiers and keywords are upper-cased and
/// comments are dropped. `metric` names the caller in a `ParseFailure`.
pub fn tokenize(source: &str, metric: &'static str) -> EvalResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '/' && next == Some('/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if (c == '(' && next == Some('*')) || (c == '/' && next == Some('*')) {
            let close = if c == '(' { ')' } else { '/' };
            let start_line = line_of(&chars, i);
            i += 2;
            loop {
                if i + 1 >= chars.len() {
                    return Err(parse_failure(
                        metric,
                        format!("unterminated comment starting on line {}", start_line),
                    ));
                }
                if chars[i] == '*' && chars[i + 1] == close {
                    i += 2;
                    break;
                }
                i += 1;
            }
            continue;
        }

        if c == '\'' || c == '"' {
            let start = i;
            i += 1;
            loop {
                match chars.get(i) {
                    None => {
                        return Err(parse_failure(
                            metric,
                            format!("unterminated string starting on line {}", line_of(&chars, start)),
                        ))
                    }
                    Some('$') => i += 2,
                    Some(q) if *q == c => {
                        i += 1;
                        break;
                    }
                    Some(_) => i += 1,
                }
            }
            tokens.push(Token {
                kind: TokenKind::Str,
                text: chars[start..i.min(chars.len())].iter().collect(),
            });
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            // Typed literals such as T#5S or INT#16#FF.
            if chars.get(i) == Some(&'#') {
                i = literal_end(&chars, i);
                tokens.push(Token {
                    kind: TokenKind::Number,
                    text: upper(&chars[start..i]),
                });
                continue;
            }
            let word = upper(&chars[start..i]);
            let kind = if is_keyword(&word) {
                TokenKind::Keyword
            } else {
                TokenKind::Ident
            };
            tokens.push(Token { kind, text: word });
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            i = literal_end(&chars, i);
            tokens.push(Token {
                kind: TokenKind::Number,
                text: upper(&chars[start..i]),
            });
            continue;
        }

        if let Some(n) = next {
            let pair: String = [c, n].iter().collect();
            if TWO_CHAR_OPS.contains(&pair.as_str()) {
                tokens.push(Token {
                    kind: TokenKind::Op,
                    text: pair,
                });
                i += 2;
                continue;
            }
        }

        tokens.push(Token {
            kind: TokenKind::Op,
            text: c.to_string(),
        });
        i += 1;
    }

    Ok(tokens)
}

/// End of a numeric literal body starting at `i`. A `.` is only taken when
/// a digit follows, so `1..10` stays a range.
fn literal_end(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() {
        let c = chars[i];
        let take = c.is_ascii_alphanumeric()
            || c == '_'
            || c == '#'
            || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()));
        if !take {
            break;
        }
        i += 1;
    }
    i
}

fn upper(chars: &[char]) -> String {
    chars.iter().collect::<String>().to_ascii_uppercase()
}

fn line_of(chars: &[char], index: usize) -> usize {
    chars[..index].iter().filter(|c| **c == '\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(source: &str) -> Vec<String> {
        tokenize(source, "test")
            .unwrap()
            .into_iter()
            .map(|t| t.text)
            .collect()
    }

    #[test]
    fn keyword_table_is_sorted() {
        let mut sorted = KEYWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, KEYWORDS);
    }

    #[test]
    fn uppercases_and_drops_comments() {
        assert_eq!(
            texts("if x>=1 then (* note *) y := x; // done\nend_if;"),
            vec!["IF", "X", ">=", "1", "THEN", "Y", ":=", "X", ";", "END_IF", ";"]
        );
    }

    #[test]
    fn literals_stay_whole() {
        assert_eq!(
            texts("t := T#5s; a[1..10] := 16#FF; r := 1.5E3; s := 'it$'s';"),
            vec![
                "T", ":=", "T#5S", ";", "A", "[", "1", "..", "10", "]", ":=", "16#FF", ";", "R",
                ":=", "1.5E3", ";", "S", ":=", "'it$'s'", ";"
            ]
        );
    }

    #[test]
    fn classifies_keywords() {
        let tokens = tokenize("IF Counter THEN", "test").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[1].kind, TokenKind::Ident);
        assert!(tokens[2].is_keyword("THEN"));
    }

    #[test]
    fn unterminated_comment_or_string_fails() {
        assert!(matches!(
            tokenize("x := 1; (* open", "lexical"),
            Err(EvalError::ParseFailure { metric: "lexical", .. })
        ));
        assert!(matches!(
            tokenize("s := 'open;", "lexical"),
            Err(EvalError::ParseFailure { .. })
        ));
        assert!(matches!(
            tokenize("/* a *", "lexical"),
            Err(EvalError::ParseFailure { .. })
        ));
    }
}
