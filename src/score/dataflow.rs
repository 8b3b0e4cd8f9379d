//! Variable-dependency edges and edge matching.

use super::tokenize::{tokenize, Token, TokenKind};
use super::{empty_rule, SubMetric};
use crate::error::EvalResult;
use std::collections::{BTreeMap, HashMap};

const METRIC: &str = "dataflow_match";

/// Keywords that may appear inside an expression.
const EXPRESSION_KEYWORDS: &[&str] = &["AND", "OR", "XOR", "NOT", "MOD", "TRUE", "FALSE"];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Edge {
    pub target: String,
    pub source: String,
    pub kind: &'static str,
}

fn is_variable(tokens: &[Token], i: usize) -> bool {
    let token = &tokens[i];
    if token.kind != TokenKind::Ident {
        return false;
    }
    let member = i > 0 && tokens[i - 1].is(".");
    let call = tokens.get(i + 1).is_some_and(|t| t.is("("));
    !member && !call
}

/// Index one past the expression that starts at `from`.
fn expression_end(tokens: &[Token], from: usize) -> usize {
    tokens[from..]
        .iter()
        .position(|t| {
            t.is(";")
                || (t.kind == TokenKind::Keyword && !EXPRESSION_KEYWORDS.contains(&t.text.as_str()))
        })
        .map(|p| from + p)
        .unwrap_or(tokens.len())
}

fn variables(tokens: &[Token], range: std::ops::Range<usize>) -> Vec<String> {
    range
        .filter(|&i| is_variable(tokens, i))
        .map(|i| tokens[i].text.clone())
        .collect()
}

fn push_edges(edges: &mut Vec<Edge>, target: &str, sources: Vec<String>, kind: &'static str) {
    if sources.is_empty() {
        edges.push(Edge {
            target: target.to_string(),
            source: String::new(),
            kind,
        });
        return;
    }
    for source in sources {
        edges.push(Edge {
            target: target.to_string(),
            source,
            kind,
        });
    }
}

/// Start of the lvalue ending at `end` (inclusive), walking back over
/// member access and indexing.
fn lvalue_start(tokens: &[Token], end: usize) -> usize {
    let mut i = end;
    let mut depth = 0usize;
    loop {
        let token = &tokens[i];
        if token.is("]") {
            depth += 1;
        } else if token.is("[") {
            depth = depth.saturating_sub(1);
        } else if depth == 0 && !(token.kind == TokenKind::Ident || token.is(".") || token.is("^")) {
            return i + 1;
        }
        if i == 0 {
            return 0;
        }
        i -= 1;
    }
}

/// Marks the tokens that sit inside a `VAR*` ... `END_VAR` block.
fn declaration_mask(tokens: &[Token]) -> Vec<bool> {
    let mut inside = false;
    tokens
        .iter()
        .map(|t| {
            if t.kind == TokenKind::Keyword && t.text.starts_with("VAR") {
                inside = true;
            } else if t.is_keyword("END_VAR") {
                inside = false;
            }
            inside
        })
        .collect()
}

/// Name declared by `name : TYPE := init` whose `:=` sits at `assign`.
fn declared_name(tokens: &[Token], assign: usize) -> Option<&str> {
    let colon = tokens[..assign]
        .iter()
        .rposition(|t| t.is(":") || t.is(";"))?;
    if !tokens[colon].is(":") || colon == 0 {
        return None;
    }
    let name = &tokens[colon - 1];
    (name.kind == TokenKind::Ident).then_some(name.text.as_str())
}

/// Extract raw (un-normalized) edges in source order.
pub fn extract_edges(tokens: &[Token]) -> Vec<Edge> {
    let in_declarations = declaration_mask(tokens);
    let mut edges = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        if !token.is(":=") || i == 0 {
            continue;
        }
        let rhs = i + 1..expression_end(tokens, i + 1);

        if in_declarations[i] {
            if let Some(name) = declared_name(tokens, i) {
                push_edges(&mut edges, name, variables(tokens, rhs), "INIT");
            }
            continue;
        }

        if i >= 2 && tokens[i - 2].is_keyword("FOR") && tokens[i - 1].kind == TokenKind::Ident {
            let header_end = tokens[i..]
                .iter()
                .position(|t| t.is_keyword("DO"))
                .map(|p| i + p)
                .unwrap_or(tokens.len());
            push_edges(&mut edges, &tokens[i - 1].text, variables(tokens, i + 1..header_end), "FOR");
            continue;
        }

        let start = lvalue_start(tokens, i - 1);
        if start >= i || tokens[start].kind != TokenKind::Ident {
            continue;
        }
        let mut sources = variables(tokens, start + 1..i);
        sources.extend(variables(tokens, rhs));
        push_edges(&mut edges, &tokens[start].text, sources, "ASSIGN");
    }
    edges
}

/// Rename variables to `V0`, `V1`, ... in order of first appearance.
pub fn normalize(edges: &[Edge]) -> Vec<Edge> {
    let mut names: HashMap<String, String> = HashMap::new();
    let mut rename = |name: &str| -> String {
        if name.is_empty() {
            return String::new();
        }
        let next = names.len();
        names
            .entry(name.to_string())
            .or_insert_with(|| format!("V{}", next))
            .clone()
    };
    edges
        .iter()
        .map(|edge| {
            let target = rename(&edge.target);
            let source = rename(&edge.source);
            Edge {
                target,
                source,
                kind: edge.kind,
            }
        })
        .collect()
}

/// Fraction of reference edges (multiset) found in the candidate.
pub fn edge_match(candidate: &[Edge], reference: &[Edge]) -> f64 {
    if reference.is_empty() {
        return if candidate.is_empty() { 1.0 } else { 0.0 };
    }
    let mut available: BTreeMap<&Edge, usize> = BTreeMap::new();
    for edge in candidate {
        *available.entry(edge).or_insert(0) += 1;
    }
    let mut matched = 0usize;
    for edge in reference {
        if let Some(count) = available.get_mut(edge) {
            if *count > 0 {
                *count -= 1;
                matched += 1;
            }
        }
    }
    matched as f64 / reference.len() as f64
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DataflowMatch;

impl SubMetric for DataflowMatch {
    fn name(&self) -> &'static str {
        METRIC
    }

    fn score(&self, candidate: &str, reference: &str) -> EvalResult<f64> {
        let cand_tokens = tokenize(candidate, METRIC)?;
        let ref_tokens = tokenize(reference, METRIC)?;
        if let Some(score) = empty_rule(cand_tokens.is_empty(), ref_tokens.is_empty()) {
            return Ok(score);
        }
        let cand_edges = normalize(&extract_edges(&cand_tokens));
        let ref_edges = normalize(&extract_edges(&ref_tokens));
        Ok(edge_match(&cand_edges, &ref_edges))
    }
}
