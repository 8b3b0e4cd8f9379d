//! Four-component similarity scoring.
//!
//! The components are independent [`SubMetric`] capabilities. The defaults
//! work on a shared ST tokenizer; any of them can be swapped out, which is
//! how tests pin scores to known values.

pub mod dataflow;
pub mod ngram;
pub mod syntax;
pub mod tokenize;

use crate::error::{ErrorKind, EvalError, EvalResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use dataflow::DataflowMatch;
pub use ngram::{LexicalMatch, WeightedLexicalMatch};
pub use syntax::SyntaxMatch;

pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// One similarity capability. Must be deterministic and return a value in
/// `[0, 1]`, or `ParseFailure` when it cannot evaluate the inputs.
pub trait SubMetric: Send + Sync {
    fn name(&self) -> &'static str;
    fn score(&self, candidate: &str, reference: &str) -> EvalResult<f64>;
}

/// Scores shared by every default metric when either side is empty.
pub(crate) fn empty_rule(candidate_empty: bool, reference_empty: bool) -> Option<f64> {
    match (candidate_empty, reference_empty) {
        (true, true) => Some(1.0),
        (true, false) | (false, true) => Some(0.0),
        (false, false) => None,
    }
}

/// Component weights, validated on construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct Weights([f64; 4]);

impl Weights {
    pub fn new(values: [f64; 4]) -> EvalResult<Self> {
        Self::with_tolerance(values, WEIGHT_TOLERANCE)
    }

    /// Each weight must be finite and in `[0, 1]`; the sum must be 1 within
    /// `tolerance`.
    pub fn with_tolerance(values: [f64; 4], tolerance: f64) -> EvalResult<Self> {
        let invalid = |reason: String| EvalError::InvalidWeights {
            weights: values,
            reason,
        };
        if let Some(bad) = values.iter().find(|w| !w.is_finite() || **w < 0.0 || **w > 1.0) {
            return Err(invalid(format!("weight {} is outside [0, 1]", bad)));
        }
        let sum: f64 = values.iter().sum();
        if (sum - 1.0).abs() > tolerance {
            return Err(invalid(format!(
                "weights sum to {} (tolerance {})",
                sum, tolerance
            )));
        }
        Ok(Self(values))
    }

    pub fn uniform() -> Self {
        Self([0.25; 4])
    }

    pub fn values(&self) -> [f64; 4] {
        self.0
    }

    /// Σ weight_i × component_i, clamped to `[0, 1]`.
    pub fn combine(&self, components: [f64; 4]) -> f64 {
        self.0
            .iter()
            .zip(components.iter())
            .map(|(w, c)| w * c)
            .sum::<f64>()
            .clamp(0.0, 1.0)
    }
}

impl Default for Weights {
    fn default() -> Self {
        Self::uniform()
    }
}

impl TryFrom<[f64; 4]> for Weights {
    type Error = EvalError;

    fn try_from(values: [f64; 4]) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<Weights> for [f64; 4] {
    fn from(weights: Weights) -> Self {
        weights.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentScores {
    pub ngram_match_score: f64,
    pub weighted_ngram_match_score: f64,
    pub syntax_match_score: f64,
    pub dataflow_match_score: f64,
}

impl ComponentScores {
    pub fn from_array(values: [f64; 4]) -> Self {
        Self {
            ngram_match_score: values[0],
            weighted_ngram_match_score: values[1],
            syntax_match_score: values[2],
            dataflow_match_score: values[3],
        }
    }

    pub fn as_array(&self) -> [f64; 4] {
        [
            self.ngram_match_score,
            self.weighted_ngram_match_score,
            self.syntax_match_score,
            self.dataflow_match_score,
        ]
    }
}

/// Score of one candidate against its reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseScore {
    pub case_id: String,
    #[serde(flatten)]
    pub components: ComponentScores,
    #[serde(rename = "codebleu")]
    pub composite: f64,
    /// Character counts.
    pub reference_length: usize,
    pub prediction_length: usize,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CaseScore {
    /// A case that could not be scored. It is kept in reports but excluded
    /// from averages.
    pub fn failed(case_id: impl Into<String>, err: &EvalError) -> Self {
        Self {
            case_id: case_id.into(),
            components: ComponentScores::default(),
            composite: 0.0,
            reference_length: 0,
            prediction_length: 0,
            success: false,
            error_kind: Some(err.kind()),
            error: Some(err.to_string()),
        }
    }

    pub fn with_lengths(mut self, reference: &str, prediction: &str) -> Self {
        self.reference_length = reference.chars().count();
        self.prediction_length = prediction.chars().count();
        self
    }
}

pub struct SimilarityScorer {
    metrics: [Box<dyn SubMetric>; 4],
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self::new([
            Box::new(LexicalMatch),
            Box::new(WeightedLexicalMatch),
            Box::new(SyntaxMatch),
            Box::new(DataflowMatch),
        ])
    }
}

impl SimilarityScorer {
    /// Metrics in component order: lexical, weighted lexical, syntax,
    /// dataflow.
    pub fn new(metrics: [Box<dyn SubMetric>; 4]) -> Self {
        Self { metrics }
    }

    pub fn metric_names(&self) -> [&'static str; 4] {
        [
            self.metrics[0].name(),
            self.metrics[1].name(),
            self.metrics[2].name(),
            self.metrics[3].name(),
        ]
    }

    fn components(&self, candidate: &str, reference: &str) -> EvalResult<[f64; 4]> {
        let mut values = [0.0; 4];
        for (slot, metric) in values.iter_mut().zip(self.metrics.iter()) {
            let value = metric.score(candidate, reference)?;
            if !value.is_finite() {
                return Err(EvalError::ParseFailure {
                    metric: metric.name(),
                    message: format!("non-finite score {}", value),
                });
            }
            *slot = value.clamp(0.0, 1.0);
        }
        Ok(values)
    }

    /// Score one case. A metric failure yields `success = false` rather than
    /// an error.
    pub fn score(
        &self,
        case_id: &str,
        candidate: &str,
        reference: &str,
        weights: &Weights,
    ) -> CaseScore {
        match self.components(candidate, reference) {
            Ok(values) => CaseScore {
                case_id: case_id.to_string(),
                components: ComponentScores::from_array(values),
                composite: weights.combine(values),
                reference_length: 0,
                prediction_length: 0,
                success: true,
                error_kind: None,
                error: None,
            }
            .with_lengths(reference, candidate),
            Err(err) => {
                warn!(case = case_id, error = %err, "case excluded from aggregation");
                CaseScore::failed(case_id, &err).with_lengths(reference, candidate)
            }
        }
    }
}
