//! Static fixer for unclosed control blocks, and fixer chaining.

use super::{Diagnostic, Fixer, ServiceError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    If,
    Case,
    For,
    While,
}

impl Block {
    fn closer(self) -> &'static str {
        match self {
            Block::If => "END_IF;",
            Block::Case => "END_CASE;",
            Block::For => "END_FOR;",
            Block::While => "END_WHILE;",
        }
    }

    fn closer_keyword(self) -> &'static str {
        self.closer().trim_end_matches(';')
    }
}

/// A closer the fixer inserted. `before_line` is the 1-based input line it
/// was placed in front of, `None` when appended at the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion {
    pub closer: &'static str,
    pub before_line: Option<usize>,
}

fn code_part(line: &str) -> &str {
    match line.split_once("//") {
        Some((code, _)) => code,
        None => line,
    }
}

fn starts_with_word(upper: &str, word: &str) -> bool {
    upper.strip_prefix(word).is_some_and(|rest| {
        rest.chars()
            .next()
            .map_or(true, |c| c.is_whitespace() || c == '(')
    })
}

fn contains_word(upper: &str, word: &str) -> bool {
    upper
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|w| w == word)
}

fn opener(upper: &str) -> Option<Block> {
    let block = if starts_with_word(upper, "IF") && contains_word(upper, "THEN") {
        Block::If
    } else if starts_with_word(upper, "CASE") && contains_word(upper, "OF") {
        Block::Case
    } else if starts_with_word(upper, "FOR") && contains_word(upper, "DO") {
        Block::For
    } else if starts_with_word(upper, "WHILE") && contains_word(upper, "DO") {
        Block::While
    } else {
        return None;
    };
    // One-line blocks close themselves.
    (!contains_word(upper, block.closer_keyword())).then_some(block)
}

fn closer(upper: &str) -> Option<Block> {
    [Block::If, Block::Case, Block::For, Block::While]
        .into_iter()
        .find(|block| starts_with_word(upper, block.closer_keyword()) || upper.starts_with(block.closer()))
}

fn is_pou_closer(upper: &str) -> bool {
    ["END_FUNCTION_BLOCK", "END_FUNCTION", "END_PROGRAM"]
        .iter()
        .any(|word| upper.starts_with(word))
}

/// Close unclosed `IF`/`CASE`/`FOR`/`WHILE` blocks.
///
/// Missing closers are inserted in front of a mismatched closer, in front
/// of the POU closer, or at the end. Text that needs nothing is returned
/// unchanged.
pub fn fix_missing_end_blocks(code: &str) -> (String, Vec<Insertion>) {
    let mut stack: Vec<(Block, String)> = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut inserted = Vec::new();

    let mut flush = |stack: &mut Vec<(Block, String)>,
                     lines: &mut Vec<String>,
                     until: Option<Block>,
                     before_line: Option<usize>| {
        while let Some((open, indent)) = stack.last() {
            if Some(*open) == until {
                break;
            }
            lines.push(format!("{}{}", indent, open.closer()));
            inserted.push(Insertion {
                closer: open.closer(),
                before_line,
            });
            stack.pop();
        }
    };

    for (idx, raw) in code.lines().enumerate() {
        let upper = code_part(raw).trim().to_ascii_uppercase();
        let indent: String = raw.chars().take_while(|c| c.is_whitespace()).collect();

        if let Some(block) = closer(&upper) {
            if stack.iter().any(|(open, _)| *open == block) {
                flush(&mut stack, &mut lines, Some(block), Some(idx + 1));
                stack.pop();
            }
        } else if is_pou_closer(&upper) {
            flush(&mut stack, &mut lines, None, Some(idx + 1));
        } else if let Some(block) = opener(&upper) {
            stack.push((block, indent));
        }
        lines.push(raw.to_string());
    }
    flush(&mut stack, &mut lines, None, None);

    if inserted.is_empty() {
        return (code.to_string(), inserted);
    }
    let mut fixed = lines.join("\n");
    if code.ends_with('\n') {
        fixed.push('\n');
    }
    (fixed, inserted)
}

/// Deterministic fixer backed by [`fix_missing_end_blocks`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EndBlockFixer;

impl Fixer for EndBlockFixer {
    fn fix(&self, code: &str, _diagnostics: &[Diagnostic]) -> Result<String, ServiceError> {
        let (fixed, inserted) = fix_missing_end_blocks(code);
        if !inserted.is_empty() {
            debug!(inserted = inserted.len(), "closed unterminated blocks");
        }
        Ok(fixed)
    }
}

/// Tries each fixer in order and returns the first answer that changes the
/// code. When none does, the input comes back unchanged.
pub struct ChainFixer {
    fixers: Vec<Box<dyn Fixer>>,
}

impl ChainFixer {
    pub fn new(fixers: Vec<Box<dyn Fixer>>) -> Self {
        Self { fixers }
    }
}

impl Fixer for ChainFixer {
    fn fix(&self, code: &str, diagnostics: &[Diagnostic]) -> Result<String, ServiceError> {
        for fixer in &self.fixers {
            let candidate = fixer.fix(code, diagnostics)?;
            if candidate != code {
                return Ok(candidate);
            }
        }
        Ok(code.to_string())
    }
}
