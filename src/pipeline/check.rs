//! Compile-rate check: validate stored texts without fixing them.

use super::{normalize_project_ids, run_parallel};
use crate::artifact::{ArtifactKey, ArtifactStore, VariantKind};
use crate::repair::{RetryPolicy, Validator};
use crate::report::{CompileCheck, CompileRateReport, FailedUnit, ProjectCompileRate};
use crate::util::truncate;
use tracing::{info, warn};

const DIAGNOSTIC_PREVIEW_CHARS: usize = 240;

fn check_one(
    store: &ArtifactStore,
    validator: &dyn Validator,
    retry: &RetryPolicy,
    key: &ArtifactKey,
    variant: VariantKind,
) -> CompileCheck {
    let verdict = store
        .read_variant(key, variant)
        .and_then(|code| retry.run("validate", || validator.validate(&code)));
    match verdict {
        Ok(result) => CompileCheck {
            key: key.clone(),
            pass: result.pass,
            diagnostic_count: result.diagnostics.len(),
            first_diagnostic: result
                .diagnostics
                .first()
                .map(|d| truncate(&d.message, DIAGNOSTIC_PREVIEW_CHARS)),
            error_kind: None,
            error: None,
        },
        Err(err) => {
            warn!(artifact = %key, error = %err, "compile check failed");
            CompileCheck {
                key: key.clone(),
                pass: false,
                diagnostic_count: 0,
                first_diagnostic: None,
                error_kind: Some(err.kind()),
                error: Some(err.to_string()),
            }
        }
    }
}

pub fn check_compile_rate(
    store: &ArtifactStore,
    validator: &dyn Validator,
    retry: &RetryPolicy,
    projects: &[String],
    variant: VariantKind,
    workers: usize,
) -> CompileRateReport {
    let mut rates = Vec::new();
    let mut failed_projects = Vec::new();
    for project in &normalize_project_ids(projects) {
        let keys = match store.list_functions(project) {
            Ok(keys) => keys,
            Err(err) => {
                warn!(project = %project, error = %err, "skipping project");
                failed_projects.push(FailedUnit::new(project.as_str(), &err));
                continue;
            }
        };
        let checks = run_parallel(workers, &keys, |key| {
            check_one(store, validator, retry, key, variant)
        });
        let rate = ProjectCompileRate::new(project.as_str(), checks);
        info!(
            project = %project,
            passed = rate.passed_files,
            total = rate.total_files,
            "compile check finished"
        );
        rates.push(rate);
    }
    CompileRateReport::new(variant, rates, failed_projects)
}
