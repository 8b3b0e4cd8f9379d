//! Batch drivers over an artifact store.
//!
//! Every driver fans out per artifact (or per case) on a rayon pool and
//! folds per-unit failures into its report instead of aborting the batch.

pub mod check;
pub mod compare;
pub mod evaluate;
pub mod history;
pub mod ingest;
pub mod repair;

#[cfg(test)]
mod tests;

use crate::artifact::{project_id_from_dir_name, ArtifactKey, ArtifactStore};
use crate::error::EvalResult;
use crate::report::FailedUnit;
use rayon::prelude::*;
use tracing::warn;

pub use check::check_compile_rate;
pub use compare::compare_summaries;
pub use evaluate::{evaluate_project, evaluate_projects, EvaluateSettings};
pub use history::{evaluate_histories, evaluate_history, HistorySettings};
pub use ingest::{ingest_project, ingest_projects, list_generation_projects};
pub use repair::{
    repair_artifacts, repair_projects, strip_artifacts, strip_projects, RepairSettings, StartFrom,
};

/// Map `job` over `items` on a pool of `workers` threads (0 = rayon's
/// default). Output order follows input order.
pub(crate) fn run_parallel<T, R, F>(workers: usize, items: &[T], job: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    let mut builder = rayon::ThreadPoolBuilder::new();
    if workers > 0 {
        builder = builder.num_threads(workers);
    }
    match builder.build() {
        Ok(pool) => pool.install(|| items.par_iter().map(&job).collect()),
        Err(err) => {
            warn!(error = %err, "thread pool unavailable, running sequentially");
            items.iter().map(job).collect()
        }
    }
}

/// Canonical ids for requested projects: a `repoeval_` directory prefix is
/// dropped and repeats are removed, keeping the first occurrence.
pub fn normalize_project_ids(requested: &[String]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::with_capacity(requested.len());
    for project in requested {
        let id = project_id_from_dir_name(project);
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// Projects to process: the requested ones, or every project in the store.
pub fn select_projects(store: &ArtifactStore, requested: &[String]) -> EvalResult<Vec<String>> {
    if !requested.is_empty() {
        return Ok(normalize_project_ids(requested));
    }
    store.list_projects()
}

/// Keys of every function in `projects`. A project that cannot be listed
/// is reported and skipped.
pub fn collect_keys(
    store: &ArtifactStore,
    projects: &[String],
) -> (Vec<ArtifactKey>, Vec<FailedUnit>) {
    let mut keys = Vec::new();
    let mut failed = Vec::new();
    for project in &normalize_project_ids(projects) {
        match store.list_functions(project) {
            Ok(found) => keys.extend(found),
            Err(err) => {
                warn!(project = %project, error = %err, "skipping project");
                failed.push(FailedUnit::new(project.as_str(), &err));
            }
        }
    }
    (keys, failed)
}
