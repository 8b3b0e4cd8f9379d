//! Score stored variants against ground truth and aggregate per project.

use super::{collect_keys, normalize_project_ids, run_parallel};
use crate::aggregate::ProjectAggregator;
use crate::artifact::{project_id_from_dir_name, ArtifactKey, ArtifactStore, VariantKind};
use crate::error::{EvalError, EvalResult};
use crate::lookup::{Corpus, ReferenceSource};
use crate::report::{BatchEvaluationSummary, EvaluationReport, FailedUnit};
use crate::score::{CaseScore, SimilarityScorer, Weights};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct EvaluateSettings {
    pub weights: Weights,
    pub trend_epsilon: f64,
    /// `Current` or `NoProvide`; the pristine slot works too.
    pub variant: VariantKind,
    /// Recorded in the report; the reference source decides what is read.
    pub corpus: Corpus,
    pub workers: usize,
}

fn score_case(
    store: &ArtifactStore,
    references: &dyn ReferenceSource,
    scorer: &SimilarityScorer,
    key: &ArtifactKey,
    settings: &EvaluateSettings,
) -> CaseScore {
    let inputs = store
        .read_variant(key, settings.variant)
        .and_then(|candidate| Ok((candidate, references.reference(key)?)));
    match inputs {
        Ok((candidate, reference)) => {
            scorer.score(&key.function_id, &candidate, &reference, &settings.weights)
        }
        Err(err) => {
            warn!(artifact = %key, error = %err, "case not scored");
            CaseScore::failed(key.function_id.as_str(), &err)
        }
    }
}

/// Evaluate one project. Only a project that cannot be listed fails.
pub fn evaluate_project(
    store: &ArtifactStore,
    references: &dyn ReferenceSource,
    scorer: &SimilarityScorer,
    project_id: &str,
    settings: &EvaluateSettings,
) -> EvalResult<EvaluationReport> {
    if settings.variant == VariantKind::History {
        return Err(EvalError::Config(
            "history is evaluated with the history command".to_string(),
        ));
    }
    let project_id = project_id_from_dir_name(project_id);
    let keys = store.list_functions(&project_id)?;
    let cases = run_parallel(settings.workers, &keys, |key| {
        score_case(store, references, scorer, key, settings)
    });
    let summary = ProjectAggregator::new(settings.weights, settings.trend_epsilon)
        .aggregate(&project_id, &cases);
    info!(
        project = %project_id,
        cases = summary.case_count,
        failed = summary.failed_count,
        codebleu = summary.average_scores.map(|a| a.codebleu),
        "project evaluated"
    );
    Ok(EvaluationReport::new(summary, settings.variant, settings.corpus, cases))
}

/// Evaluate several projects and summarize them together. The overall
/// averages run over every successfully scored case, not over project means.
pub fn evaluate_projects(
    store: &ArtifactStore,
    references: &dyn ReferenceSource,
    scorer: &SimilarityScorer,
    projects: &[String],
    settings: &EvaluateSettings,
) -> (Vec<EvaluationReport>, BatchEvaluationSummary) {
    let projects = normalize_project_ids(projects);
    let (keys, listing_failures) = collect_keys(store, &projects);
    info!(
        cases = keys.len(),
        metrics = ?scorer.metric_names(),
        variant = ?settings.variant,
        "scoring cases"
    );
    let cases = run_parallel(settings.workers, &keys, |key| {
        score_case(store, references, scorer, key, settings)
    });

    let aggregator = ProjectAggregator::new(settings.weights, settings.trend_epsilon);
    let mut reports = Vec::new();
    let mut summaries = Vec::new();
    for project in &projects {
        if listing_failures.iter().any(|f| &f.id == project) {
            continue;
        }
        let project_cases: Vec<CaseScore> = keys
            .iter()
            .zip(cases.iter())
            .filter(|(key, _)| &key.project_id == project)
            .map(|(_, case)| case.clone())
            .collect();
        let summary = aggregator.aggregate(project, &project_cases);
        summaries.push(summary.clone());
        reports.push(EvaluationReport::new(
            summary,
            settings.variant,
            settings.corpus,
            project_cases,
        ));
    }

    let overall = aggregator.aggregate("overall", &cases);
    let failed: Vec<FailedUnit> = listing_failures;
    info!(
        projects = summaries.len(),
        failed_projects = failed.len(),
        cases = overall.case_count,
        "evaluation finished"
    );
    (reports, BatchEvaluationSummary::new(summaries, overall, failed))
}
