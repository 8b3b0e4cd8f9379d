//! Block-structure tree and subtree matching.

use super::tokenize::{tokenize, Token, TokenKind};
use super::{empty_rule, SubMetric};
use crate::error::{EvalError, EvalResult};
use std::collections::BTreeMap;

const METRIC: &str = "syntax_match";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub label: String,
    pub children: Vec<Node>,
}

impl Node {
    fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            children: Vec::new(),
        }
    }

    fn sexp(&self, out: &mut String) {
        out.push('(');
        out.push_str(&self.label);
        for child in &self.children {
            out.push(' ');
            child.sexp(out);
        }
        out.push(')');
    }

    /// Canonical form of every subtree below this node, the node excluded.
    fn collect_subtrees(&self, out: &mut Vec<String>) {
        for child in &self.children {
            let mut repr = String::new();
            child.sexp(&mut repr);
            out.push(repr);
            child.collect_subtrees(out);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Root,
    Pou,
    VarSection,
    If,
    Case,
    For,
    While,
    Repeat,
    Branch,
}

const POU_OPENERS: &[&str] = &[
    "FUNCTION",
    "FUNCTION_BLOCK",
    "PROGRAM",
    "METHOD",
    "ACTION",
    "TYPE",
    "STRUCT",
];
const POU_CLOSERS: &[&str] = &[
    "END_FUNCTION",
    "END_FUNCTION_BLOCK",
    "END_PROGRAM",
    "END_METHOD",
    "END_ACTION",
    "END_TYPE",
    "END_STRUCT",
];

fn control_for_closer(word: &str) -> Option<Frame> {
    match word {
        "END_IF" => Some(Frame::If),
        "END_CASE" => Some(Frame::Case),
        "END_FOR" => Some(Frame::For),
        "END_WHILE" => Some(Frame::While),
        "END_REPEAT" => Some(Frame::Repeat),
        _ => None,
    }
}

struct TreeBuilder {
    stack: Vec<(Frame, Node)>,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            stack: vec![(Frame::Root, Node::new("ROOT"))],
        }
    }

    fn top(&self) -> Frame {
        self.stack.last().map(|(frame, _)| *frame).unwrap_or(Frame::Root)
    }

    /// Frame that owns the innermost open branch.
    fn branch_owner(&self) -> Option<Frame> {
        let len = self.stack.len();
        if self.top() == Frame::Branch && len >= 2 {
            Some(self.stack[len - 2].0)
        } else {
            None
        }
    }

    fn open(&mut self, frame: Frame, label: impl Into<String>) {
        self.stack.push((frame, Node::new(label)));
    }

    fn leaf(&mut self, label: impl Into<String>) {
        if let Some((_, node)) = self.stack.last_mut() {
            node.children.push(Node::new(label));
        }
    }

    fn close(&mut self) {
        if self.stack.len() < 2 {
            return;
        }
        if let Some((_, node)) = self.stack.pop() {
            if let Some((_, parent)) = self.stack.last_mut() {
                parent.children.push(node);
            }
        }
    }

    fn close_branch(&mut self) {
        if self.top() == Frame::Branch {
            self.close();
        }
    }

    fn finish(mut self) -> Node {
        while self.stack.len() > 1 {
            self.close();
        }
        self.stack
            .pop()
            .map(|(_, node)| node)
            .unwrap_or_else(|| Node::new("ROOT"))
    }
}

fn failure(message: impl Into<String>) -> EvalError {
    EvalError::ParseFailure {
        metric: METRIC,
        message: message.into(),
    }
}

fn statement_label(tokens: &[Token]) -> Option<&'static str> {
    let first = tokens.first()?;
    if tokens.iter().any(|t| t.is(":=")) {
        return Some("ASSIGN");
    }
    match first.text.as_str() {
        "RETURN" => return Some("RETURN"),
        "EXIT" => return Some("EXIT"),
        "CONTINUE" => return Some("CONTINUE"),
        _ => {}
    }
    if first.kind == TokenKind::Ident && tokens.get(1).is_some_and(|t| t.is("(")) {
        return Some("CALL");
    }
    Some("EXPR")
}

fn declaration_label(tokens: &[Token]) -> Option<String> {
    tokens.first()?;
    let colon = tokens.iter().position(|t| t.is(":"));
    let type_name = colon
        .and_then(|i| tokens.get(i + 1))
        .map(|t| t.text.clone())
        .unwrap_or_else(|| "?".to_string());
    Some(format!("DECL:{}", type_name))
}

/// Whether the statement at `tokens[start..]` is a CASE label (`1, 2:` or
/// `A..B:`), returning the index just past its colon.
fn case_label_end(tokens: &[Token], start: usize) -> Option<usize> {
    for (offset, token) in tokens[start..].iter().enumerate() {
        if token.is(":") {
            return (offset > 0).then_some(start + offset + 1);
        }
        if token.is(";") || token.is(":=") || token.kind == TokenKind::Keyword {
            return None;
        }
    }
    None
}

fn is_structural(word: &str) -> bool {
    POU_OPENERS.contains(&word) || word.starts_with("VAR")
}

/// Skip a POU header (name, `EXTENDS` clause, `: <return type>`).
fn header_end(tokens: &[Token], mut i: usize) -> usize {
    let start = i;
    while i < tokens.len() && tokens[i].kind != TokenKind::Keyword && !tokens[i].is(";") {
        i += 1;
    }
    if i < tokens.len()
        && i > start
        && tokens[i - 1].is(":")
        && !is_structural(&tokens[i].text)
    {
        i += 1;
    }
    i
}

/// Parse tokens into a block tree.
pub fn parse_tree(tokens: &[Token]) -> EvalResult<Node> {
    let mut builder = TreeBuilder::new();
    let mut statement: Vec<Token> = Vec::new();
    let mut i = 0;

    let flush = |builder: &mut TreeBuilder, statement: &mut Vec<Token>| {
        if statement.is_empty() {
            return;
        }
        let label = if builder.top() == Frame::VarSection {
            declaration_label(statement)
        } else {
            statement_label(statement).map(str::to_string)
        };
        if let Some(label) = label {
            builder.leaf(label);
        }
        statement.clear();
    };

    // Skip to just past the first `stop` keyword at or after `from`.
    let skip_past = |from: usize, stop: &str| -> usize {
        tokens[from..]
            .iter()
            .position(|t| t.is_keyword(stop))
            .map(|p| from + p + 1)
            .unwrap_or(tokens.len())
    };

    while i < tokens.len() {
        let token = &tokens[i];

        if token.is(";") {
            flush(&mut builder, &mut statement);
            i += 1;
            continue;
        }

        if statement.is_empty()
            && builder.top() != Frame::VarSection
            && (builder.top() == Frame::Case || builder.branch_owner() == Some(Frame::Case))
        {
            if let Some(end) = case_label_end(tokens, i) {
                builder.close_branch();
                builder.open(Frame::Branch, "CASE_BRANCH");
                i = end;
                continue;
            }
        }

        if token.kind != TokenKind::Keyword {
            statement.push(token.clone());
            i += 1;
            continue;
        }

        let word = token.text.as_str();
        if POU_OPENERS.contains(&word) {
            flush(&mut builder, &mut statement);
            builder.open(Frame::Pou, word);
            i = header_end(tokens, i + 1);
            continue;
        }
        if POU_CLOSERS.contains(&word) {
            flush(&mut builder, &mut statement);
            if builder.stack.iter().any(|(frame, _)| *frame == Frame::Pou) {
                while builder.top() != Frame::Pou {
                    builder.close();
                }
                builder.close();
            }
            i += 1;
            continue;
        }
        if word.starts_with("VAR") {
            flush(&mut builder, &mut statement);
            builder.open(Frame::VarSection, word);
            i += 1;
            continue;
        }
        if word == "END_VAR" {
            flush(&mut builder, &mut statement);
            if builder.top() != Frame::VarSection {
                return Err(failure("END_VAR without an open VAR section"));
            }
            builder.close();
            i += 1;
            continue;
        }

        if builder.top() == Frame::VarSection {
            statement.push(token.clone());
            i += 1;
            continue;
        }

        match word {
            "IF" => {
                flush(&mut builder, &mut statement);
                builder.open(Frame::If, "IF");
                builder.open(Frame::Branch, "THEN");
                i = skip_past(i + 1, "THEN");
            }
            "ELSIF" => {
                flush(&mut builder, &mut statement);
                if builder.branch_owner() != Some(Frame::If) {
                    return Err(failure("ELSIF outside of IF"));
                }
                builder.close_branch();
                builder.open(Frame::Branch, "ELSIF");
                i = skip_past(i + 1, "THEN");
            }
            "ELSE" => {
                flush(&mut builder, &mut statement);
                let owner = builder.branch_owner().or(match builder.top() {
                    Frame::Case => Some(Frame::Case),
                    _ => None,
                });
                if !matches!(owner, Some(Frame::If) | Some(Frame::Case)) {
                    return Err(failure("ELSE outside of IF or CASE"));
                }
                builder.close_branch();
                builder.open(Frame::Branch, "ELSE");
                i += 1;
            }
            "CASE" => {
                flush(&mut builder, &mut statement);
                builder.open(Frame::Case, "CASE");
                i = skip_past(i + 1, "OF");
            }
            "FOR" => {
                flush(&mut builder, &mut statement);
                builder.open(Frame::For, "FOR");
                i = skip_past(i + 1, "DO");
            }
            "WHILE" => {
                flush(&mut builder, &mut statement);
                builder.open(Frame::While, "WHILE");
                i = skip_past(i + 1, "DO");
            }
            "REPEAT" => {
                flush(&mut builder, &mut statement);
                builder.open(Frame::Repeat, "REPEAT");
                i += 1;
            }
            "UNTIL" => {
                flush(&mut builder, &mut statement);
                if builder.top() != Frame::Repeat {
                    return Err(failure("UNTIL outside of REPEAT"));
                }
                builder.leaf("UNTIL");
                let end = tokens[i + 1..]
                    .iter()
                    .position(|t| t.is_keyword("END_REPEAT"))
                    .map(|p| i + 1 + p)
                    .unwrap_or(tokens.len());
                i = end;
            }
            _ => {
                if let Some(expected) = control_for_closer(word) {
                    flush(&mut builder, &mut statement);
                    builder.close_branch();
                    if builder.top() != expected {
                        return Err(failure(format!("{} does not close an open block", word)));
                    }
                    builder.close();
                } else {
                    statement.push(token.clone());
                }
                i += 1;
            }
        }
    }
    flush(&mut builder, &mut statement);
    Ok(builder.finish())
}

fn subtree_counts(tree: &Node) -> BTreeMap<String, usize> {
    let mut subtrees = Vec::new();
    tree.collect_subtrees(&mut subtrees);
    let mut counts = BTreeMap::new();
    for subtree in subtrees {
        *counts.entry(subtree).or_insert(0) += 1;
    }
    counts
}

/// Fraction of reference subtrees (multiset) present in the candidate.
pub fn subtree_match(candidate: &Node, reference: &Node) -> f64 {
    let reference_counts = subtree_counts(reference);
    let candidate_counts = subtree_counts(candidate);
    let total: usize = reference_counts.values().sum();
    if total == 0 {
        return if candidate_counts.is_empty() { 1.0 } else { 0.0 };
    }
    let matched: usize = reference_counts
        .iter()
        .map(|(subtree, &count)| count.min(candidate_counts.get(subtree).copied().unwrap_or(0)))
        .sum();
    matched as f64 / total as f64
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyntaxMatch;

impl SubMetric for SyntaxMatch {
    fn name(&self) -> &'static str {
        METRIC
    }

    fn score(&self, candidate: &str, reference: &str) -> EvalResult<f64> {
        let cand_tokens = tokenize(candidate, METRIC)?;
        let ref_tokens = tokenize(reference, METRIC)?;
        let cand_tree = parse_tree(&cand_tokens)?;
        let ref_tree = parse_tree(&ref_tokens)?;
        if let Some(score) = empty_rule(cand_tokens.is_empty(), ref_tokens.is_empty()) {
            return Ok(score);
        }
        Ok(subtree_match(&cand_tree, &ref_tree))
    }
}
