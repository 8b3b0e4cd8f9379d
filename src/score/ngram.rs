//! BLEU-style n-gram overlap, plain and keyword-weighted.

use super::tokenize::{is_keyword, tokenize};
use super::{empty_rule, SubMetric};
use crate::error::EvalResult;
use std::collections::BTreeMap;

const MAX_ORDER: usize = 4;
const SMOOTHING: f64 = 0.1;
const KEYWORD_WEIGHT: f64 = 1.0;
const OTHER_WEIGHT: f64 = 0.2;

fn ngram_counts<'a>(tokens: &'a [&'a str], n: usize) -> BTreeMap<&'a [&'a str], usize> {
    let mut counts = BTreeMap::new();
    for gram in tokens.windows(n) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

/// Sentence BLEU of `candidate` against `reference`.
///
/// Unigram matches and totals are scaled by `unigram_weight`; higher orders
/// count every gram as 1. Orders longer than the candidate are skipped and
/// a higher order without matches is smoothed to `0.1 / total`.
pub fn bleu(candidate: &[&str], reference: &[&str], unigram_weight: &dyn Fn(&str) -> f64) -> f64 {
    if let Some(score) = empty_rule(candidate.is_empty(), reference.is_empty()) {
        return score;
    }

    let mut log_sum = 0.0;
    let mut orders = 0;
    for n in 1..=MAX_ORDER.min(candidate.len()) {
        let cand_counts = ngram_counts(candidate, n);
        let ref_counts = ngram_counts(reference, n);

        let mut matched = 0.0;
        let mut total = 0.0;
        for (gram, &count) in &cand_counts {
            let weight = if n == 1 { unigram_weight(gram[0]) } else { 1.0 };
            let clipped = count.min(ref_counts.get(gram).copied().unwrap_or(0));
            matched += clipped as f64 * weight;
            total += count as f64 * weight;
        }
        if total <= 0.0 {
            continue;
        }

        let precision = if matched > 0.0 {
            matched / total
        } else if n == 1 {
            return 0.0;
        } else {
            SMOOTHING / total
        };
        log_sum += precision.ln();
        orders += 1;
    }
    if orders == 0 {
        return 0.0;
    }

    let c = candidate.len() as f64;
    let r = reference.len() as f64;
    let brevity = if c >= r { 1.0 } else { (1.0 - r / c).exp() };
    (brevity * (log_sum / orders as f64).exp()).clamp(0.0, 1.0)
}

fn token_texts(source: &str, metric: &'static str) -> EvalResult<Vec<String>> {
    Ok(tokenize(source, metric)?.into_iter().map(|t| t.text).collect())
}

fn score_with(
    metric: &'static str,
    candidate: &str,
    reference: &str,
    unigram_weight: &dyn Fn(&str) -> f64,
) -> EvalResult<f64> {
    let cand = token_texts(candidate, metric)?;
    let refs = token_texts(reference, metric)?;
    let cand: Vec<&str> = cand.iter().map(String::as_str).collect();
    let refs: Vec<&str> = refs.iter().map(String::as_str).collect();
    Ok(bleu(&cand, &refs, unigram_weight))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalMatch;

impl SubMetric for LexicalMatch {
    fn name(&self) -> &'static str {
        "ngram_match"
    }

    fn score(&self, candidate: &str, reference: &str) -> EvalResult<f64> {
        score_with(self.name(), candidate, reference, &|_| 1.0)
    }
}

/// Keyword unigrams count fully, everything else at a fifth.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedLexicalMatch;

impl SubMetric for WeightedLexicalMatch {
    fn name(&self) -> &'static str {
        "weighted_ngram_match"
    }

    fn score(&self, candidate: &str, reference: &str) -> EvalResult<f64> {
        score_with(self.name(), candidate, reference, &|token| {
            if is_keyword(token) {
                KEYWORD_WEIGHT
            } else {
                OTHER_WEIGHT
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: &str = "IF Level > Max THEN\n\tPump := FALSE;\nELSE\n\tPump := TRUE;\nEND_IF;";

    #[test]
    fn identical_text_scores_one() {
        assert_eq!(LexicalMatch.score(REFERENCE, REFERENCE).unwrap(), 1.0);
        assert_eq!(WeightedLexicalMatch.score(REFERENCE, REFERENCE).unwrap(), 1.0);
    }

    #[test]
    fn case_and_comments_do_not_matter() {
        let candidate = "if level > max then // guard\n pump := false; else pump := true; end_if;";
        assert_eq!(LexicalMatch.score(candidate, REFERENCE).unwrap(), 1.0);
    }

    #[test]
    fn empty_texts_follow_edge_rules() {
        assert_eq!(LexicalMatch.score("", REFERENCE).unwrap(), 0.0);
        assert_eq!(LexicalMatch.score("  (* only *) ", "").unwrap(), 1.0);
        assert_eq!(LexicalMatch.score("x := 1;", "").unwrap(), 0.0);
    }

    #[test]
    fn disjoint_text_scores_zero() {
        assert_eq!(LexicalMatch.score("a b c d", "w x y z").unwrap(), 0.0);
    }

    #[test]
    fn partial_overlap_is_between_bounds() {
        let candidate = "IF Level > Max THEN\n\tPump := FALSE;\nEND_IF;";
        let score = LexicalMatch.score(candidate, REFERENCE).unwrap();
        assert!(score > 0.0 && score < 1.0, "score {}", score);
    }

    #[test]
    fn short_candidate_skips_long_orders() {
        let score = bleu(&["A", "B"], &["A", "B"], &|_| 1.0);
        assert_eq!(score, 1.0);
        let penalized = bleu(&["A", "B"], &["A", "B", "C", "D"], &|_| 1.0);
        assert!((penalized - (1.0f64 - 2.0).exp()).abs() < 1e-12);
    }

    #[test]
    fn weighted_variant_favors_keyword_matches() {
        let reference = "IF A THEN B := C; END_IF;";
        let same_keywords = "IF X THEN Y := Z; END_IF;";
        let plain = LexicalMatch.score(same_keywords, reference).unwrap();
        let weighted = WeightedLexicalMatch.score(same_keywords, reference).unwrap();
        assert!(weighted > plain, "weighted {} plain {}", weighted, plain);
    }

    #[test]
    fn unparsable_input_is_reported() {
        assert!(LexicalMatch.score("x := 'open", REFERENCE).is_err());
    }
}
