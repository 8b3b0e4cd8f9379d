//! Reduction of case scores into project summaries and version trends.

use crate::report::non_finite;
use crate::score::{CaseScore, ComponentScores, Weights};
use serde::{Deserialize, Serialize};

/// Mean of `values`, summed in sorted order so the result does not depend
/// on the order cases arrived in.
fn order_independent_mean(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(f64::total_cmp);
    values.iter().sum::<f64>() / values.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AverageScores {
    pub codebleu: f64,
    #[serde(flatten)]
    pub components: ComponentScores,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectScoreSummary {
    pub project_id: String,
    /// Every case seen, scored or not.
    pub case_count: usize,
    pub successful_count: usize,
    pub failed_count: usize,
    pub weights: Weights,
    /// `None` when no case scored successfully.
    pub average_scores: Option<AverageScores>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendClass {
    Improvement,
    Regression,
    Unchanged,
}

impl TrendClass {
    /// Strict comparison: a delta of exactly `epsilon` is `Unchanged`.
    pub fn classify(delta: f64, epsilon: f64) -> Self {
        if delta > epsilon {
            TrendClass::Improvement
        } else if delta < -epsilon {
            TrendClass::Regression
        } else {
            TrendClass::Unchanged
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionPoint {
    pub version_index: usize,
    #[serde(flatten)]
    pub score: CaseScore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionTrend {
    pub function_id: String,
    pub versions: Vec<VersionPoint>,
    /// Composite of version 0, if it scored.
    pub first_score: Option<f64>,
    /// Composite of the highest successfully scored version.
    pub last_score: Option<f64>,
    #[serde(with = "non_finite")]
    pub delta: f64,
    /// NaN when `first_score` is zero or either end is missing.
    #[serde(with = "non_finite")]
    pub delta_percent: f64,
    pub trend: Option<TrendClass>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectAggregator {
    weights: Weights,
    trend_epsilon: f64,
}

impl ProjectAggregator {
    pub fn new(weights: Weights, trend_epsilon: f64) -> Self {
        Self {
            weights,
            trend_epsilon,
        }
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    /// Mean of each component and of the composite over successful cases.
    pub fn aggregate(&self, project_id: &str, cases: &[CaseScore]) -> ProjectScoreSummary {
        let successful: Vec<&CaseScore> = cases.iter().filter(|c| c.success).collect();

        let average_scores = (!successful.is_empty()).then(|| {
            let column = |f: &dyn Fn(&CaseScore) -> f64| {
                order_independent_mean(successful.iter().map(|c| f(*c)).collect())
            };
            AverageScores {
                codebleu: column(&|c| c.composite),
                components: ComponentScores {
                    ngram_match_score: column(&|c| c.components.ngram_match_score),
                    weighted_ngram_match_score: column(&|c| c.components.weighted_ngram_match_score),
                    syntax_match_score: column(&|c| c.components.syntax_match_score),
                    dataflow_match_score: column(&|c| c.components.dataflow_match_score),
                },
            }
        });

        ProjectScoreSummary {
            project_id: project_id.to_string(),
            case_count: cases.len(),
            successful_count: successful.len(),
            failed_count: cases.len() - successful.len(),
            weights: self.weights,
            average_scores,
        }
    }

    /// Trend over the scored versions of one function.
    pub fn trend(&self, function_id: &str, mut versions: Vec<VersionPoint>) -> VersionTrend {
        versions.sort_by_key(|v| v.version_index);

        let first_score = versions
            .iter()
            .find(|v| v.version_index == 0 && v.score.success)
            .map(|v| v.score.composite);
        let last_score = versions
            .iter()
            .rev()
            .find(|v| v.score.success)
            .map(|v| v.score.composite);

        let (delta, delta_percent, trend) = match (first_score, last_score) {
            (Some(first), Some(last)) => {
                let delta = last - first;
                let percent = if first == 0.0 {
                    f64::NAN
                } else {
                    delta / first * 100.0
                };
                (
                    delta,
                    percent,
                    Some(TrendClass::classify(delta, self.trend_epsilon)),
                )
            }
            _ => (f64::NAN, f64::NAN, None),
        };

        VersionTrend {
            function_id: function_id.to_string(),
            versions,
            first_score,
            last_score,
            delta,
            delta_percent,
            trend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use proptest::prelude::*;

    fn case(id: &str, values: [f64; 4], weights: &Weights) -> CaseScore {
        CaseScore {
            case_id: id.to_string(),
            components: ComponentScores::from_array(values),
            composite: weights.combine(values),
            reference_length: 10,
            prediction_length: 10,
            success: true,
            error_kind: None,
            error: None,
        }
    }

    fn point(version: usize, composite: f64) -> VersionPoint {
        let mut score = case(&format!("F_{}", version), [composite; 4], &Weights::uniform());
        score.composite = composite;
        VersionPoint {
            version_index: version,
            score,
        }
    }

    fn failed_point(version: usize) -> VersionPoint {
        let err = EvalError::ParseFailure {
            metric: "syntax_match",
            message: "bad".to_string(),
        };
        VersionPoint {
            version_index: version,
            score: CaseScore::failed(format!("F_{}", version), &err),
        }
    }

    #[test]
    fn failures_are_counted_but_not_averaged() {
        let weights = Weights::uniform();
        let aggregator = ProjectAggregator::new(weights, 1e-3);
        let err = EvalError::NotFound("ground truth".to_string());
        let cases = vec![
            case("a", [1.0, 1.0, 1.0, 1.0], &weights),
            case("b", [0.5, 0.5, 0.5, 0.5], &weights),
            CaseScore::failed("c", &err),
        ];
        let summary = aggregator.aggregate("proj", &cases);
        assert_eq!(summary.case_count, 3);
        assert_eq!(summary.successful_count, 2);
        assert_eq!(summary.failed_count, 1);
        let averages = summary.average_scores.unwrap();
        assert_eq!(averages.codebleu, 0.75);
        assert_eq!(averages.components.syntax_match_score, 0.75);
    }

    #[test]
    fn no_successful_case_has_no_averages() {
        let aggregator = ProjectAggregator::new(Weights::uniform(), 1e-3);
        let err = EvalError::NotFound("x".to_string());
        let summary = aggregator.aggregate("proj", &[CaseScore::failed("a", &err)]);
        assert!(summary.average_scores.is_none());
        assert_eq!(summary.case_count, 1);
    }

    #[test]
    fn trend_classification_boundary_is_strict() {
        let epsilon = 1e-3;
        assert_eq!(TrendClass::classify(epsilon, epsilon), TrendClass::Unchanged);
        assert_eq!(TrendClass::classify(-epsilon, epsilon), TrendClass::Unchanged);
        assert_eq!(
            TrendClass::classify(epsilon + 1e-9, epsilon),
            TrendClass::Improvement
        );
        assert_eq!(
            TrendClass::classify(-epsilon - 1e-9, epsilon),
            TrendClass::Regression
        );
    }

    #[test]
    fn trend_uses_last_successful_version() {
        let aggregator = ProjectAggregator::new(Weights::uniform(), 0.125);
        let trend = aggregator.trend(
            "F",
            vec![failed_point(3), point(2, 0.75), point(0, 0.5), point(1, 0.625)],
        );
        assert_eq!(trend.first_score, Some(0.5));
        assert_eq!(trend.last_score, Some(0.75));
        assert_eq!(trend.delta, 0.25);
        assert_eq!(trend.delta_percent, 50.0);
        assert_eq!(trend.trend, Some(TrendClass::Improvement));
        assert_eq!(trend.versions[0].version_index, 0);

        let flat = aggregator.trend("F", vec![point(0, 0.5), point(1, 0.625)]);
        assert_eq!(flat.delta, 0.125);
        assert_eq!(flat.trend, Some(TrendClass::Unchanged));
    }

    #[test]
    fn zero_first_score_gives_nan_percent() {
        let aggregator = ProjectAggregator::new(Weights::uniform(), 1e-3);
        let trend = aggregator.trend("F", vec![point(0, 0.0), point(1, 0.5)]);
        assert_eq!(trend.delta, 0.5);
        assert!(trend.delta_percent.is_nan());
        assert_eq!(trend.trend, Some(TrendClass::Improvement));

        let json = serde_json::to_value(&trend).unwrap();
        assert_eq!(json["delta_percent"], "NaN");
    }

    #[test]
    fn failed_first_version_leaves_trend_undefined() {
        let aggregator = ProjectAggregator::new(Weights::uniform(), 1e-3);
        let trend = aggregator.trend("F", vec![failed_point(0), point(1, 0.5)]);
        assert_eq!(trend.first_score, None);
        assert!(trend.delta.is_nan());
        assert_eq!(trend.trend, None);
    }

    proptest! {
        #[test]
        fn aggregate_ignores_input_order(
            (cases, shuffled) in prop::collection::vec(
                (prop::array::uniform4(0.0f64..=1.0), any::<bool>()),
                0..24,
            )
            .prop_flat_map(|cases| (Just(cases.clone()), Just(cases).prop_shuffle())),
        ) {
            let weights = Weights::uniform();
            let aggregator = ProjectAggregator::new(weights, 1e-3);
            let build = |input: &[([f64; 4], bool)]| -> Vec<CaseScore> {
                input
                    .iter()
                    .enumerate()
                    .map(|(i, (values, ok))| {
                        let mut c = case(&i.to_string(), *values, &weights);
                        c.success = *ok;
                        c
                    })
                    .collect()
            };
            let original = aggregator.aggregate("p", &build(&cases));
            let permuted = aggregator.aggregate("p", &build(&shuffled));
            prop_assert_eq!(original, permuted);
        }
    }
}
