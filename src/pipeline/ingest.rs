//! Ingestion of raw generation outputs into the `current` slot.
//!
//! A generation run leaves `results.jsonl` (one record per function, with
//! the prompt that doubles as provide code) and a generations file holding,
//! at the same position, the list of candidates produced for that record.

use crate::artifact::ingest::{assemble_with_provide_code, extract_code_from_markdown};
use crate::artifact::{project_id_from_dir_name, ArtifactKey, ArtifactStore};
use crate::error::{EvalError, EvalResult};
use crate::lookup::{generation_dir, read_generation_records, RESULTS_FILE};
use crate::report::{FailedUnit, IngestReport, ProjectIngest};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const GENERATIONS_FILE: &str = "generations_repoeval-function_repoeval-function.json";

/// Project ids under `root` that carry a results file, sorted.
pub fn list_generation_projects(root: &Path) -> EvalResult<Vec<String>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut projects = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.path().join(RESULTS_FILE).is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            projects.push(project_id_from_dir_name(name));
        }
    }
    projects.sort();
    projects.dedup();
    Ok(projects)
}

/// First non-empty candidate of a generations entry, which is either a list
/// of strings or a single string.
fn first_candidate(entry: Option<&Value>) -> Option<String> {
    let candidates: Vec<&str> = match entry? {
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        Value::String(text) => vec![text.as_str()],
        _ => Vec::new(),
    };
    candidates
        .into_iter()
        .map(extract_code_from_markdown)
        .find(|code| !code.is_empty())
}

/// Write every generated function of one project into `store`. A function
/// whose new text differs from the pristine backup of an earlier repair run
/// loses that run's state, so the next repair works on the new generation.
pub fn ingest_project(
    store: &ArtifactStore,
    results_root: &Path,
    project_id: &str,
) -> EvalResult<ProjectIngest> {
    let project_id = project_id_from_dir_name(project_id);
    let project_id = project_id.as_str();
    let dir = generation_dir(results_root, project_id).ok_or_else(|| {
        EvalError::NotFound(format!("{} for project {}", RESULTS_FILE, project_id))
    })?;
    let records = read_generation_records(&dir.join(RESULTS_FILE))?;
    let generations_path = dir.join(GENERATIONS_FILE);
    let generations: Vec<Value> = match fs::read_to_string(&generations_path) {
        Ok(content) => serde_json::from_str(&content)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(EvalError::NotFound(
                generations_path.display().to_string(),
            ))
        }
        Err(err) => return Err(err.into()),
    };

    let mut ingest = ProjectIngest {
        project_name: project_id.to_string(),
        records: records.len(),
        written: 0,
        without_provide: 0,
        reset: 0,
        failed: Vec::new(),
    };
    for (idx, record) in records.iter().enumerate() {
        let Some(record) = record else {
            ingest.failed.push(FailedUnit::new(
                format!("line {}", idx + 1),
                &EvalError::Config("unparsable results record".to_string()),
            ));
            continue;
        };
        let Some(function_id) = record.function_name() else {
            ingest.failed.push(FailedUnit::new(
                format!("line {}", idx + 1),
                &EvalError::NotFound("function name".to_string()),
            ));
            continue;
        };
        let key = ArtifactKey::new(project_id, function_id);
        let Some(body) = first_candidate(generations.get(idx)) else {
            warn!(artifact = %key, "no generated code");
            ingest.failed.push(FailedUnit::new(
                key.to_string(),
                &EvalError::NotFound(format!("generated code for {}", key)),
            ));
            continue;
        };

        let text = match record.provide_code() {
            Some(provide) => assemble_with_provide_code(&provide, &body),
            None => {
                ingest.without_provide += 1;
                format!("{}\n", body)
            }
        };
        match store.replace_generation(&key, &text) {
            Ok(reset) => {
                ingest.written += 1;
                if reset {
                    ingest.reset += 1;
                }
            }
            Err(err) => {
                warn!(artifact = %key, error = %err, "failed to write generated code");
                ingest.failed.push(FailedUnit::new(key.to_string(), &err));
            }
        }
    }
    info!(
        project = %project_id,
        written = ingest.written,
        records = ingest.records,
        "ingested generations"
    );
    Ok(ingest)
}

/// Ingest several projects; a project that cannot be read is reported.
pub fn ingest_projects(
    store: &ArtifactStore,
    results_root: &Path,
    projects: &[String],
) -> IngestReport {
    let mut ingested = Vec::new();
    let mut failed = Vec::new();
    for project in projects {
        match ingest_project(store, results_root, project) {
            Ok(project_ingest) => ingested.push(project_ingest),
            Err(err) => {
                warn!(project = %project, error = %err, "project not ingested");
                failed.push(FailedUnit::new(project.as_str(), &err));
            }
        }
    }
    IngestReport::new(ingested, failed)
}
