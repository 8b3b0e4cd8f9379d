//! Score every recorded version of repaired functions and report trends.

use super::run_parallel;
use crate::aggregate::{ProjectAggregator, VersionPoint, VersionTrend};
use crate::artifact::{project_id_from_dir_name, ArtifactKey, ArtifactStore};
use crate::error::EvalResult;
use crate::lookup::ReferenceSource;
use crate::provide::strip_declarations;
use crate::report::{FailedUnit, HistoryBatchSummary, HistoryReport};
use crate::score::{SimilarityScorer, Weights};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct HistorySettings {
    pub weights: Weights,
    pub trend_epsilon: f64,
    /// Compare implementation parts only.
    pub strip_declarations: bool,
    pub workers: usize,
}

fn prepare(text: &str, settings: &HistorySettings) -> String {
    if settings.strip_declarations {
        strip_declarations(text)
    } else {
        text.to_string()
    }
}

fn function_trend(
    store: &ArtifactStore,
    references: &dyn ReferenceSource,
    scorer: &SimilarityScorer,
    aggregator: &ProjectAggregator,
    key: &ArtifactKey,
    settings: &HistorySettings,
) -> EvalResult<Option<VersionTrend>> {
    if store.read_history(key)?.is_empty() {
        debug!(artifact = %key, "no recorded history");
        return Ok(None);
    }
    let versions = store.versions(key)?;
    let reference = prepare(&references.reference(key)?, settings);

    let points = versions
        .into_iter()
        .map(|(version_index, text)| VersionPoint {
            version_index,
            score: scorer.score(
                &format!("{}_{}", key.function_id, version_index),
                &prepare(&text, settings),
                &reference,
                &settings.weights,
            ),
        })
        .collect();
    Ok(Some(aggregator.trend(&key.function_id, points)))
}

/// Trends for every function of `project_id` that has a repair history.
pub fn evaluate_history(
    store: &ArtifactStore,
    references: &dyn ReferenceSource,
    scorer: &SimilarityScorer,
    project_id: &str,
    settings: &HistorySettings,
) -> EvalResult<HistoryReport> {
    let project_id = project_id_from_dir_name(project_id);
    let keys = store.list_functions(&project_id)?;
    let aggregator = ProjectAggregator::new(settings.weights, settings.trend_epsilon);
    let results = run_parallel(settings.workers, &keys, |key| {
        function_trend(store, references, scorer, &aggregator, key, settings)
            .map_err(|err| {
                warn!(artifact = %key, error = %err, "history not evaluated");
                FailedUnit::new(key.function_id.as_str(), &err)
            })
    });

    let mut functions = Vec::new();
    let mut failed = Vec::new();
    for result in results {
        match result {
            Ok(Some(trend)) => functions.push(trend),
            Ok(None) => {}
            Err(unit) => failed.push(unit),
        }
    }

    let report = HistoryReport::new(
        project_id.as_str(),
        settings.strip_declarations,
        settings.weights,
        functions,
        failed,
    );
    info!(
        project = %project_id,
        functions = report.functions.len(),
        improved = report.trend_counts.improvement,
        regressed = report.trend_counts.regression,
        "history evaluated"
    );
    Ok(report)
}

/// History reports for several projects. A project whose history cannot be
/// evaluated is listed in the summary instead of its own report.
pub fn evaluate_histories(
    store: &ArtifactStore,
    references: &dyn ReferenceSource,
    scorer: &SimilarityScorer,
    projects: &[String],
    settings: &HistorySettings,
) -> (Vec<HistoryReport>, HistoryBatchSummary) {
    let mut reports = Vec::new();
    let mut failed = Vec::new();
    for project in &super::normalize_project_ids(projects) {
        match evaluate_history(store, references, scorer, project, settings) {
            Ok(report) => reports.push(report),
            Err(err) => {
                warn!(project = %project, error = %err, "history not evaluated");
                failed.push(FailedUnit::new(project.as_str(), &err));
            }
        }
    }
    let summary = HistoryBatchSummary::new(&reports, failed);
    (reports, summary)
}
