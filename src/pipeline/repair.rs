//! Batch repair and no-provide derivation.

use super::{collect_keys, run_parallel};
use crate::artifact::{ArtifactKey, ArtifactStore, VariantKind};
use crate::error::{EvalError, EvalResult};
use crate::lookup::ProvideCodeSource;
use crate::repair::{Fixer, RepairOrchestrator, RetryPolicy, Validator};
use crate::report::{FailedUnit, RepairArtifactReport, RepairBatchReport, StripReport};
use tracing::{info, warn};

/// Which text a repair run starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartFrom {
    /// The pristine backup of an earlier run when one exists, else
    /// `current`. Re-running never compounds earlier repairs.
    #[default]
    Pristine,
    /// Always `current`, for freshly regenerated outputs.
    Current,
}

#[derive(Debug, Clone, Copy)]
pub struct RepairSettings {
    pub max_attempts: usize,
    pub retry: RetryPolicy,
    pub workers: usize,
    pub start_from: StartFrom,
}

fn initial_text(store: &ArtifactStore, key: &ArtifactKey, start_from: StartFrom) -> EvalResult<String> {
    if start_from == StartFrom::Pristine {
        match store.read_variant(key, VariantKind::Pristine) {
            Ok(text) => return Ok(text),
            Err(EvalError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
    }
    store.read_variant(key, VariantKind::Current)
}

fn derive(
    store: &ArtifactStore,
    provide: &dyn ProvideCodeSource,
    key: &ArtifactKey,
) -> EvalResult<()> {
    let provide_code = provide.provide_code(key)?;
    store.derive_no_provide(key, &provide_code)?;
    Ok(())
}

fn repair_one(
    store: &ArtifactStore,
    validator: &dyn Validator,
    fixer: &dyn Fixer,
    provide: Option<&dyn ProvideCodeSource>,
    key: &ArtifactKey,
    settings: &RepairSettings,
) -> RepairArtifactReport {
    let initial = match initial_text(store, key, settings.start_from) {
        Ok(text) => text,
        Err(err) => {
            warn!(artifact = %key, error = %err, "cannot start repair");
            return RepairArtifactReport::failed(key.clone(), &err);
        }
    };

    let orchestrator = RepairOrchestrator::new(store, validator, fixer, settings.max_attempts)
        .with_retry(settings.retry);
    let report = match orchestrator.repair(key, &initial) {
        Ok(outcome) => RepairArtifactReport::from_outcome(&outcome),
        Err(err) => {
            warn!(artifact = %key, error = %err, "repair failed");
            return RepairArtifactReport::failed(key.clone(), &err);
        }
    };

    match provide {
        Some(source) => {
            let derived = derive(store, source, key);
            if let Err(err) = &derived {
                warn!(artifact = %key, error = %err, "no-provide variant not derived");
            }
            report.with_no_provide(derived.as_ref().map(|_| ()))
        }
        None => report,
    }
}

/// Repair every key, then derive its no-provide variant when a provide-code
/// source is given. One artifact's failure never stops the others.
pub fn repair_artifacts(
    store: &ArtifactStore,
    validator: &dyn Validator,
    fixer: &dyn Fixer,
    provide: Option<&dyn ProvideCodeSource>,
    keys: &[ArtifactKey],
    settings: &RepairSettings,
) -> RepairBatchReport {
    info!(
        artifacts = keys.len(),
        max_attempts = settings.max_attempts,
        "starting repair batch"
    );
    let reports = run_parallel(settings.workers, keys, |key| {
        repair_one(store, validator, fixer, provide, key, settings)
    });
    let report = RepairBatchReport::new(settings.max_attempts, reports);
    info!(
        validated = report.totals.validated,
        exhausted = report.totals.attempts_exhausted,
        stalled = report.totals.stalled,
        service_errors = report.totals.service_errors,
        "repair batch finished"
    );
    report
}

/// Derive no-provide variants from the current texts without repairing.
pub fn strip_artifacts(
    store: &ArtifactStore,
    provide: &dyn ProvideCodeSource,
    keys: &[ArtifactKey],
    workers: usize,
) -> StripReport {
    let results = run_parallel(workers, keys, |key| {
        derive(store, provide, key).map_err(|err| FailedUnit::new(key.to_string(), &err))
    });
    let failed: Vec<FailedUnit> = results.into_iter().filter_map(Result::err).collect();
    let report = StripReport::new(keys.len(), failed);
    info!(
        derived = report.derived,
        prefix_mismatches = report.prefix_mismatches,
        failed = report.failed.len(),
        "no-provide derivation finished"
    );
    report
}

/// Repair every function of `projects`. Projects that cannot be listed are
/// carried in the report's `failed_projects`.
pub fn repair_projects(
    store: &ArtifactStore,
    validator: &dyn Validator,
    fixer: &dyn Fixer,
    provide: Option<&dyn ProvideCodeSource>,
    projects: &[String],
    settings: &RepairSettings,
) -> RepairBatchReport {
    let (keys, failed_projects) = collect_keys(store, projects);
    repair_artifacts(store, validator, fixer, provide, &keys, settings)
        .with_failed_projects(failed_projects)
}

/// [`strip_artifacts`] over every function of `projects`.
pub fn strip_projects(
    store: &ArtifactStore,
    provide: &dyn ProvideCodeSource,
    projects: &[String],
    workers: usize,
) -> StripReport {
    let (keys, failed_projects) = collect_keys(store, projects);
    strip_artifacts(store, provide, &keys, workers).with_failed_projects(failed_projects)
}
