//! JSON reports produced by the pipelines.

use crate::aggregate::{AverageScores, ProjectScoreSummary, TrendClass, VersionTrend};
use crate::artifact::{ArtifactKey, VariantKind};
use crate::error::{ErrorKind, EvalError};
use crate::lookup::Corpus;
use crate::repair::{ExhaustReason, RepairOutcome, TerminalState};
use crate::score::{CaseScore, Weights};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const LANGUAGE_HINT: &str = "st";

/// Serde adapter for `f64` fields that may legitimately be NaN or infinite.
///
/// Finite values stay JSON numbers; the others become `"NaN"`, `"inf"` or
/// `"-inf"` instead of the `null` serde_json would otherwise emit.
pub mod non_finite {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => match text.as_str() {
                "NaN" | "nan" => Ok(f64::NAN),
                "inf" | "Infinity" => Ok(f64::INFINITY),
                "-inf" | "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(de::Error::custom(format!("not a number: {}", other))),
            },
        }
    }
}

/// Percentage of `part` in `whole`; NaN for an empty whole.
fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        f64::NAN
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// A unit (artifact, project, function) that could not be processed at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedUnit {
    pub id: String,
    pub error_kind: ErrorKind,
    pub error: String,
}

impl FailedUnit {
    pub fn new(id: impl Into<String>, err: &EvalError) -> Self {
        Self {
            id: id.into(),
            error_kind: err.kind(),
            error: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub project_name: String,
    pub generated_at: DateTime<Utc>,
    pub variant: VariantKind,
    pub corpus: Corpus,
    pub case_count: usize,
    pub successful_count: usize,
    pub failed_count: usize,
    pub language_hint: String,
    pub weights: Weights,
    pub average_scores: Option<AverageScores>,
    pub case_results: Vec<CaseScore>,
}

impl EvaluationReport {
    pub fn new(
        summary: ProjectScoreSummary,
        variant: VariantKind,
        corpus: Corpus,
        case_results: Vec<CaseScore>,
    ) -> Self {
        Self {
            project_name: summary.project_id,
            generated_at: Utc::now(),
            variant,
            corpus,
            case_count: summary.case_count,
            successful_count: summary.successful_count,
            failed_count: summary.failed_count,
            language_hint: LANGUAGE_HINT.to_string(),
            weights: summary.weights,
            average_scores: summary.average_scores,
            case_results,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallStatistics {
    pub total_files: usize,
    pub successful_files: usize,
    pub average_scores: Option<AverageScores>,
}

/// Summary of an evaluation run over several projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEvaluationSummary {
    pub generated_at: DateTime<Utc>,
    pub weights: Weights,
    pub total_projects: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub overall_statistics: OverallStatistics,
    pub project_statistics: BTreeMap<String, ProjectScoreSummary>,
    #[serde(default)]
    pub failed_projects: Vec<FailedUnit>,
}

impl BatchEvaluationSummary {
    /// `overall` is the aggregate over every case of every project.
    pub fn new(
        projects: Vec<ProjectScoreSummary>,
        overall: ProjectScoreSummary,
        failed_projects: Vec<FailedUnit>,
    ) -> Self {
        let success_count = projects.len();
        Self {
            generated_at: Utc::now(),
            weights: overall.weights,
            total_projects: success_count + failed_projects.len(),
            success_count,
            failed_count: failed_projects.len(),
            overall_statistics: OverallStatistics {
                total_files: overall.case_count,
                successful_files: overall.successful_count,
                average_scores: overall.average_scores,
            },
            project_statistics: projects
                .into_iter()
                .map(|p| (p.project_id.clone(), p))
                .collect(),
            failed_projects,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendCounts {
    pub improvement: usize,
    pub regression: usize,
    pub unchanged: usize,
    pub undefined: usize,
}

impl TrendCounts {
    fn add(&mut self, other: &TrendCounts) {
        self.improvement += other.improvement;
        self.regression += other.regression;
        self.unchanged += other.unchanged;
        self.undefined += other.undefined;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryReport {
    pub project_name: String,
    pub generated_at: DateTime<Utc>,
    pub strip_declarations: bool,
    pub weights: Weights,
    pub functions: Vec<VersionTrend>,
    pub failed_functions: Vec<FailedUnit>,
    pub total_versions: usize,
    pub total_evaluated: usize,
    pub total_failed: usize,
    /// Percentage of versions that scored; NaN when there were none.
    #[serde(with = "non_finite")]
    pub success_rate: f64,
    pub trend_counts: TrendCounts,
}

impl HistoryReport {
    pub fn new(
        project_name: impl Into<String>,
        strip_declarations: bool,
        weights: Weights,
        functions: Vec<VersionTrend>,
        failed_functions: Vec<FailedUnit>,
    ) -> Self {
        let mut counts = TrendCounts::default();
        let mut total_versions = 0;
        let mut total_evaluated = 0;
        for function in &functions {
            total_versions += function.versions.len();
            total_evaluated += function.versions.iter().filter(|v| v.score.success).count();
            match function.trend {
                Some(TrendClass::Improvement) => counts.improvement += 1,
                Some(TrendClass::Regression) => counts.regression += 1,
                Some(TrendClass::Unchanged) => counts.unchanged += 1,
                None => counts.undefined += 1,
            }
        }
        Self {
            project_name: project_name.into(),
            generated_at: Utc::now(),
            strip_declarations,
            weights,
            functions,
            failed_functions,
            total_versions,
            total_evaluated,
            total_failed: total_versions - total_evaluated,
            success_rate: percentage(total_evaluated, total_versions),
            trend_counts: counts,
        }
    }
}

/// Index of one history run over several projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryBatchSummary {
    pub generated_at: DateTime<Utc>,
    pub total_projects: usize,
    pub evaluated_projects: Vec<String>,
    pub trend_counts: TrendCounts,
    pub failed_projects: Vec<FailedUnit>,
}

impl HistoryBatchSummary {
    pub fn new(reports: &[HistoryReport], failed_projects: Vec<FailedUnit>) -> Self {
        let mut trend_counts = TrendCounts::default();
        for report in reports {
            trend_counts.add(&report.trend_counts);
        }
        Self {
            generated_at: Utc::now(),
            total_projects: reports.len() + failed_projects.len(),
            evaluated_projects: reports.iter().map(|r| r.project_name.clone()).collect(),
            trend_counts,
            failed_projects,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoProvideStatus {
    Derived,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairArtifactReport {
    pub key: ArtifactKey,
    /// `None` when the run could not start (store or lookup failure).
    pub terminal: Option<TerminalState>,
    pub succeeded: bool,
    pub attempts: usize,
    pub validations: usize,
    pub fix_calls: usize,
    pub no_provide: NoProvideStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RepairArtifactReport {
    pub fn from_outcome(outcome: &RepairOutcome) -> Self {
        Self {
            key: outcome.key.clone(),
            terminal: Some(outcome.terminal),
            succeeded: outcome.succeeded,
            attempts: outcome.history.len(),
            validations: outcome.validations,
            fix_calls: outcome.fix_calls,
            no_provide: NoProvideStatus::Skipped,
            error_kind: outcome
                .service_error
                .as_ref()
                .map(|_| ErrorKind::ServiceUnavailable),
            error: outcome.service_error.clone(),
        }
    }

    pub fn failed(key: ArtifactKey, err: &EvalError) -> Self {
        Self {
            key,
            terminal: None,
            succeeded: false,
            attempts: 0,
            validations: 0,
            fix_calls: 0,
            no_provide: NoProvideStatus::Skipped,
            error_kind: Some(err.kind()),
            error: Some(err.to_string()),
        }
    }

    /// Record the no-provide derivation result. A derivation error does not
    /// replace an earlier repair error.
    pub fn with_no_provide(mut self, result: Result<(), &EvalError>) -> Self {
        match result {
            Ok(()) => self.no_provide = NoProvideStatus::Derived,
            Err(err) => {
                self.no_provide = NoProvideStatus::Failed;
                if self.error_kind.is_none() {
                    self.error_kind = Some(err.kind());
                    self.error = Some(err.to_string());
                }
            }
        }
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairTotals {
    pub artifacts: usize,
    pub validated: usize,
    pub attempts_exhausted: usize,
    pub stalled: usize,
    pub service_errors: usize,
    pub not_started: usize,
    pub no_provide_derived: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairBatchReport {
    pub generated_at: DateTime<Utc>,
    pub max_attempts: usize,
    pub totals: RepairTotals,
    pub artifacts: Vec<RepairArtifactReport>,
    /// Projects whose functions could not be listed.
    #[serde(default)]
    pub failed_projects: Vec<FailedUnit>,
}

impl RepairBatchReport {
    pub fn new(max_attempts: usize, mut artifacts: Vec<RepairArtifactReport>) -> Self {
        artifacts.sort_by(|a, b| a.key.cmp(&b.key));
        let mut totals = RepairTotals {
            artifacts: artifacts.len(),
            ..RepairTotals::default()
        };
        for artifact in &artifacts {
            match artifact.terminal {
                Some(TerminalState::Validated) => totals.validated += 1,
                Some(TerminalState::Exhausted(ExhaustReason::AttemptsExhausted)) => {
                    totals.attempts_exhausted += 1
                }
                Some(TerminalState::Exhausted(ExhaustReason::Stalled)) => totals.stalled += 1,
                Some(TerminalState::Exhausted(ExhaustReason::ServiceError)) => {
                    totals.service_errors += 1
                }
                None => totals.not_started += 1,
            }
            if artifact.no_provide == NoProvideStatus::Derived {
                totals.no_provide_derived += 1;
            }
        }
        Self {
            generated_at: Utc::now(),
            max_attempts,
            totals,
            artifacts,
            failed_projects: Vec::new(),
        }
    }

    pub fn with_failed_projects(mut self, failed_projects: Vec<FailedUnit>) -> Self {
        self.failed_projects = failed_projects;
        self
    }
}

/// Result of deriving no-provide variants without repairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StripReport {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub derived: usize,
    pub prefix_mismatches: usize,
    pub failed: Vec<FailedUnit>,
    #[serde(default)]
    pub failed_projects: Vec<FailedUnit>,
}

impl StripReport {
    pub fn new(total: usize, mut failed: Vec<FailedUnit>) -> Self {
        failed.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            generated_at: Utc::now(),
            total,
            derived: total.saturating_sub(failed.len()),
            prefix_mismatches: failed
                .iter()
                .filter(|f| f.error_kind == ErrorKind::PrefixMismatch)
                .count(),
            failed,
            failed_projects: Vec::new(),
        }
    }

    pub fn with_failed_projects(mut self, failed_projects: Vec<FailedUnit>) -> Self {
        self.failed_projects = failed_projects;
        self
    }
}

/// Generation outputs written into the `current` slot of one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectIngest {
    pub project_name: String,
    pub records: usize,
    pub written: usize,
    /// Written as bare generated code because the record had no prompt.
    pub without_provide: usize,
    /// Functions whose earlier repair state was dropped for the new text.
    pub reset: usize,
    pub failed: Vec<FailedUnit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub generated_at: DateTime<Utc>,
    pub total_written: usize,
    pub projects: Vec<ProjectIngest>,
    pub failed_projects: Vec<FailedUnit>,
}

impl IngestReport {
    pub fn new(projects: Vec<ProjectIngest>, failed_projects: Vec<FailedUnit>) -> Self {
        Self {
            generated_at: Utc::now(),
            total_written: projects.iter().map(|p| p.written).sum(),
            projects,
            failed_projects,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileCheck {
    pub key: ArtifactKey,
    pub pass: bool,
    pub diagnostic_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_diagnostic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectCompileRate {
    pub project_name: String,
    pub total_files: usize,
    pub passed_files: usize,
    pub failed_files: usize,
    /// Checks that never got a verdict from the validator.
    pub errored_files: usize,
    #[serde(with = "non_finite")]
    pub pass_rate: f64,
    pub results: Vec<CompileCheck>,
}

impl ProjectCompileRate {
    pub fn new(project_name: impl Into<String>, results: Vec<CompileCheck>) -> Self {
        let passed = results.iter().filter(|r| r.pass).count();
        let errored = results.iter().filter(|r| r.error_kind.is_some()).count();
        Self {
            project_name: project_name.into(),
            total_files: results.len(),
            passed_files: passed,
            failed_files: results.len() - passed - errored,
            errored_files: errored,
            pass_rate: percentage(passed, results.len()),
            results,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileRateReport {
    pub generated_at: DateTime<Utc>,
    pub variant: VariantKind,
    pub total_projects: usize,
    pub total_files: usize,
    pub total_passed_files: usize,
    pub total_failed_files: usize,
    #[serde(with = "non_finite")]
    pub overall_pass_rate: f64,
    pub projects: Vec<ProjectCompileRate>,
    #[serde(default)]
    pub failed_projects: Vec<FailedUnit>,
}

impl CompileRateReport {
    pub fn new(
        variant: VariantKind,
        projects: Vec<ProjectCompileRate>,
        failed_projects: Vec<FailedUnit>,
    ) -> Self {
        let total_files = projects.iter().map(|p| p.total_files).sum();
        let passed = projects.iter().map(|p| p.passed_files).sum();
        Self {
            generated_at: Utc::now(),
            variant,
            total_projects: projects.len(),
            total_files,
            total_passed_files: passed,
            total_failed_files: total_files - passed,
            overall_pass_rate: percentage(passed, total_files),
            projects,
            failed_projects,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricDiff {
    pub baseline: f64,
    pub compare: f64,
    pub absolute_diff: f64,
    /// NaN when the baseline is zero.
    #[serde(with = "non_finite")]
    pub relative_diff_percent: f64,
}

impl MetricDiff {
    pub fn new(baseline: f64, compare: f64) -> Self {
        let absolute_diff = compare - baseline;
        let relative_diff_percent = if baseline == 0.0 {
            f64::NAN
        } else {
            absolute_diff / baseline * 100.0
        };
        Self {
            baseline,
            compare,
            absolute_diff,
            relative_diff_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountDiff {
    pub baseline: usize,
    pub compare: usize,
    pub diff: i64,
}

impl CountDiff {
    pub fn new(baseline: usize, compare: usize) -> Self {
        Self {
            baseline,
            compare,
            diff: compare as i64 - baseline as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectPresence {
    Both,
    Added,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectComparison {
    pub status: ProjectPresence,
    /// Empty unless both sides have averages.
    pub average_scores: BTreeMap<String, MetricDiff>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareReport {
    pub generated_at: DateTime<Utc>,
    pub baseline_file: PathBuf,
    pub compare_file: PathBuf,
    pub total_projects: CountDiff,
    pub total_files: CountDiff,
    pub average_scores: BTreeMap<String, MetricDiff>,
    pub projects: BTreeMap<String, ProjectComparison>,
}

fn score_columns(scores: &AverageScores) -> [(&'static str, f64); 5] {
    [
        ("codebleu", scores.codebleu),
        ("ngram_match_score", scores.components.ngram_match_score),
        (
            "weighted_ngram_match_score",
            scores.components.weighted_ngram_match_score,
        ),
        ("syntax_match_score", scores.components.syntax_match_score),
        ("dataflow_match_score", scores.components.dataflow_match_score),
    ]
}

fn diff_scores(
    baseline: Option<&AverageScores>,
    compare: Option<&AverageScores>,
) -> BTreeMap<String, MetricDiff> {
    match (baseline, compare) {
        (Some(baseline), Some(compare)) => score_columns(baseline)
            .into_iter()
            .zip(score_columns(compare))
            .map(|((name, b), (_, c))| (name.to_string(), MetricDiff::new(b, c)))
            .collect(),
        _ => BTreeMap::new(),
    }
}

impl CompareReport {
    pub fn new(
        baseline_file: &Path,
        baseline: &BatchEvaluationSummary,
        compare_file: &Path,
        compare: &BatchEvaluationSummary,
    ) -> Self {
        let mut projects = BTreeMap::new();
        let names = baseline
            .project_statistics
            .keys()
            .chain(compare.project_statistics.keys());
        for name in names {
            if projects.contains_key(name) {
                continue;
            }
            let b = baseline.project_statistics.get(name);
            let c = compare.project_statistics.get(name);
            let status = match (b, c) {
                (Some(_), Some(_)) => ProjectPresence::Both,
                (None, _) => ProjectPresence::Added,
                (_, None) => ProjectPresence::Missing,
            };
            let average_scores = diff_scores(
                b.and_then(|p| p.average_scores.as_ref()),
                c.and_then(|p| p.average_scores.as_ref()),
            );
            projects.insert(
                name.clone(),
                ProjectComparison {
                    status,
                    average_scores,
                },
            );
        }

        Self {
            generated_at: Utc::now(),
            baseline_file: baseline_file.to_path_buf(),
            compare_file: compare_file.to_path_buf(),
            total_projects: CountDiff::new(baseline.total_projects, compare.total_projects),
            total_files: CountDiff::new(
                baseline.overall_statistics.total_files,
                compare.overall_statistics.total_files,
            ),
            average_scores: diff_scores(
                baseline.overall_statistics.average_scores.as_ref(),
                compare.overall_statistics.average_scores.as_ref(),
            ),
            projects,
        }
    }
}

/// Where to write a report: the requested path (relative paths resolve
/// against `root`) or a timestamped file under `<root>/reports/`.
pub fn output_path(requested: Option<&PathBuf>, root: &Path, prefix: &str) -> PathBuf {
    match requested {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => root.join(path),
        None => {
            let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
            root.join("reports")
                .join(format!("{}-{}.json", prefix, timestamp))
        }
    }
}

pub fn write_report_json<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory '{}'", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(report)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report '{}'", path.display()))?;
    Ok(())
}

pub fn read_report_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read report '{}'", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse report '{}'", path.display()))
}
