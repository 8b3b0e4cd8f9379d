use super::*;
use crate::aggregate::TrendClass;
use crate::artifact::VariantKind;
use crate::error::ErrorKind;
use crate::lookup::{Corpus, FsGroundTruth, MapProvideCode};
use crate::repair::{Diagnostic, RetryPolicy, ServiceError, ValidationResult};
use crate::report::{write_report_json, NoProvideStatus};
use crate::score::{SimilarityScorer, Weights};
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

const PROJECT: &str = "tank";
const PROVIDE_FILL: &str = "FUNCTION Fill : BOOL\nVAR_INPUT\n\tlevel : INT;\nEND_VAR";

fn fill_text(threshold: &str) -> String {
    format!(
        "{}\n\nFill := level > {};\nEND_FUNCTION\n",
        PROVIDE_FILL, threshold
    )
}

const DRAIN: &str = "FUNCTION Drain : BOOL\nDrain := TRUE;\nEND_FUNCTION\n";
const STUCK: &str = "FUNCTION Stuck : BOOL\nStuck := STALL BROKEN;\nEND_FUNCTION\n";

fn validator(code: &str) -> Result<ValidationResult, ServiceError> {
    if code.contains("BROKEN") {
        Ok(ValidationResult::failed(vec![
            Diagnostic::new("unknown identifier BROKEN").at(6)
        ]))
    } else {
        Ok(ValidationResult::passed())
    }
}

fn fixer(code: &str, _diagnostics: &[Diagnostic]) -> Result<String, ServiceError> {
    if code.contains("STALL") {
        Ok(code.to_string())
    } else {
        Ok(code.replace("BROKEN", "3"))
    }
}

struct Fixture {
    _root: TempDir,
    store: ArtifactStore,
    dataset: std::path::PathBuf,
}

fn fixture() -> Fixture {
    let root = tempdir().unwrap();
    let store = ArtifactStore::new(root.path().join("out"));
    store
        .write_current(&ArtifactKey::new(PROJECT, "Fill"), &fill_text("BROKEN"))
        .unwrap();
    store
        .write_current(&ArtifactKey::new(PROJECT, "Drain"), DRAIN)
        .unwrap();
    store
        .write_current(&ArtifactKey::new(PROJECT, "Stuck"), STUCK)
        .unwrap();

    let dataset = root.path().join("dataset");
    let truth = dataset.join("generation_context_ground_truth").join(PROJECT);
    fs::create_dir_all(&truth).unwrap();
    fs::write(truth.join("Fill.st"), fill_text("3")).unwrap();

    Fixture {
        _root: root,
        store,
        dataset,
    }
}

fn provide() -> MapProvideCode {
    let mut provide = MapProvideCode::new();
    provide.insert(ArtifactKey::new(PROJECT, "Fill"), PROVIDE_FILL);
    provide
}

fn settings(start_from: StartFrom) -> RepairSettings {
    RepairSettings {
        max_attempts: 3,
        retry: RetryPolicy::none(),
        workers: 2,
        start_from,
    }
}

fn repair_all(fx: &Fixture, start_from: StartFrom) -> crate::report::RepairBatchReport {
    let keys = fx.store.list_functions(PROJECT).unwrap();
    let provide = provide();
    repair_artifacts(
        &fx.store,
        &validator,
        &fixer,
        Some(&provide),
        &keys,
        &settings(start_from),
    )
}

fn evaluate_settings() -> EvaluateSettings {
    EvaluateSettings {
        weights: Weights::uniform(),
        trend_epsilon: 1e-3,
        variant: VariantKind::Current,
        corpus: Corpus::GenerationContext,
        workers: 2,
    }
}

fn archived_histories(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with("Fill.history.") && name != "Fill.history.jsonl")
        .count()
}

#[test]
fn repair_batch_repairs_and_derives_no_provide() {
    let fx = fixture();
    let report = repair_all(&fx, StartFrom::Pristine);

    assert_eq!(report.totals.artifacts, 3);
    assert_eq!(report.totals.validated, 2);
    assert_eq!(report.totals.stalled, 1);
    assert_eq!(report.totals.no_provide_derived, 1);

    let names: Vec<&str> = report
        .artifacts
        .iter()
        .map(|a| a.key.function_id.as_str())
        .collect();
    assert_eq!(names, vec!["Drain", "Fill", "Stuck"]);

    let fill = &report.artifacts[1];
    assert!(fill.succeeded);
    assert_eq!(fill.attempts, 1);
    assert_eq!(fill.no_provide, NoProvideStatus::Derived);

    let drain = &report.artifacts[0];
    assert_eq!(drain.attempts, 0);
    assert_eq!(drain.no_provide, NoProvideStatus::Failed);
    assert_eq!(drain.error_kind, Some(ErrorKind::NotFound));

    let fill_key = ArtifactKey::new(PROJECT, "Fill");
    assert_eq!(
        fx.store.read_variant(&fill_key, VariantKind::Current).unwrap(),
        fill_text("3")
    );
    assert_eq!(
        fx.store.read_variant(&fill_key, VariantKind::Pristine).unwrap(),
        fill_text("BROKEN")
    );
    assert_eq!(
        fx.store.read_variant(&fill_key, VariantKind::NoProvide).unwrap(),
        "\n\nFill := level > 3;\nEND_FUNCTION\n"
    );
}

#[test]
fn rerun_starts_from_pristine_and_archives_history() {
    let fx = fixture();
    repair_all(&fx, StartFrom::Pristine);
    let report = repair_all(&fx, StartFrom::Pristine);
    assert_eq!(report.artifacts[1].attempts, 1);

    let fill_key = ArtifactKey::new(PROJECT, "Fill");
    let history = fx.store.read_history(&fill_key).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].input_text, fill_text("BROKEN"));

    let history_dir = fx
        .store
        .root()
        .join(PROJECT)
        .join(VariantKind::History.dir_name());
    assert_eq!(archived_histories(&history_dir), 1);

    let from_current = repair_all(&fx, StartFrom::Current);
    assert_eq!(from_current.artifacts[1].attempts, 0);
    assert!(fx.store.read_history(&fill_key).unwrap().is_empty());
}

#[test]
fn evaluation_scores_successes_and_reports_missing_references() {
    let fx = fixture();
    repair_all(&fx, StartFrom::Pristine);
    let references = FsGroundTruth::new(&fx.dataset, Corpus::GenerationContext);
    let scorer = SimilarityScorer::default();

    let report =
        evaluate_project(&fx.store, &references, &scorer, PROJECT, &evaluate_settings()).unwrap();
    assert_eq!(report.case_count, 3);
    assert_eq!(report.successful_count, 1);
    assert_eq!(report.failed_count, 2);
    assert_eq!(report.language_hint, "st");
    assert_eq!(report.average_scores.unwrap().codebleu, 1.0);

    let drain = report
        .case_results
        .iter()
        .find(|c| c.case_id == "Drain")
        .unwrap();
    assert!(!drain.success);
    assert_eq!(drain.error_kind, Some(ErrorKind::NotFound));
}

#[test]
fn batch_evaluation_reports_unknown_projects() {
    let fx = fixture();
    let references = FsGroundTruth::new(&fx.dataset, Corpus::GenerationContext);
    let scorer = SimilarityScorer::default();
    let projects = vec![PROJECT.to_string(), "ghost".to_string()];

    let (reports, summary) =
        evaluate_projects(&fx.store, &references, &scorer, &projects, &evaluate_settings());
    assert_eq!(reports.len(), 1);
    assert_eq!(summary.total_projects, 2);
    assert_eq!(summary.failed_projects[0].id, "ghost");
    assert_eq!(summary.overall_statistics.total_files, 3);
    assert_eq!(summary.overall_statistics.successful_files, 1);
    assert!(summary.project_statistics.contains_key(PROJECT));
}

#[test]
fn history_evaluation_tracks_improvement() {
    let fx = fixture();
    repair_all(&fx, StartFrom::Pristine);
    let references = FsGroundTruth::new(&fx.dataset, Corpus::GenerationContext);
    let scorer = SimilarityScorer::default();
    let settings = HistorySettings {
        weights: Weights::uniform(),
        trend_epsilon: 1e-3,
        strip_declarations: true,
        workers: 2,
    };

    let report = evaluate_history(&fx.store, &references, &scorer, PROJECT, &settings).unwrap();
    assert_eq!(report.functions.len(), 1);
    let fill = &report.functions[0];
    assert_eq!(fill.function_id, "Fill");
    assert_eq!(fill.versions.len(), 2);
    assert_eq!(fill.last_score, Some(1.0));
    assert!(fill.first_score.unwrap() < 1.0);
    assert_eq!(fill.trend, Some(TrendClass::Improvement));

    assert_eq!(report.failed_functions.len(), 1);
    assert_eq!(report.failed_functions[0].id, "Stuck");
    assert_eq!(report.total_versions, 2);
    assert_eq!(report.total_evaluated, 2);
    assert_eq!(report.trend_counts.improvement, 1);
}

#[test]
fn compile_rate_of_pristine_texts() {
    let fx = fixture();
    repair_all(&fx, StartFrom::Pristine);
    let report = check_compile_rate(
        &fx.store,
        &validator,
        &RetryPolicy::none(),
        &[PROJECT.to_string()],
        VariantKind::Pristine,
        2,
    );
    assert_eq!(report.total_files, 3);
    assert_eq!(report.total_passed_files, 1);
    assert!((report.overall_pass_rate - 100.0 / 3.0).abs() < 1e-9);
    let project = &report.projects[0];
    assert_eq!(project.failed_files, 2);
    assert_eq!(project.errored_files, 0);
}

#[test]
fn strip_reports_prefix_mismatches() {
    let fx = fixture();
    let keys = fx.store.list_functions(PROJECT).unwrap();
    let mut provide = provide();
    provide.insert(ArtifactKey::new(PROJECT, "Drain"), "FUNCTION Drain : INT");

    let report = strip_artifacts(&fx.store, &provide, &keys, 2);
    assert_eq!(report.total, 3);
    assert_eq!(report.derived, 1);
    assert_eq!(report.prefix_mismatches, 1);
    assert_eq!(report.failed.len(), 2);
}

#[test]
fn compare_reads_two_summaries() {
    let fx = fixture();
    repair_all(&fx, StartFrom::Pristine);
    let references = FsGroundTruth::new(&fx.dataset, Corpus::GenerationContext);
    let scorer = SimilarityScorer::default();
    let projects = vec![PROJECT.to_string()];
    let (_, summary) =
        evaluate_projects(&fx.store, &references, &scorer, &projects, &evaluate_settings());

    let dir = tempdir().unwrap();
    let baseline = dir.path().join("baseline.json");
    let compare = dir.path().join("compare.json");
    write_report_json(&baseline, &summary).unwrap();
    write_report_json(&compare, &summary).unwrap();

    let report = compare_summaries(&baseline, &compare).unwrap();
    let codebleu = report.average_scores["codebleu"];
    assert_eq!(codebleu.absolute_diff, 0.0);
    assert_eq!(codebleu.relative_diff_percent, 0.0);
    assert_eq!(report.total_files.diff, 0);
}

#[test]
fn ingest_assembles_generations_into_current_slot() {
    let root = tempdir().unwrap();
    let results_root = root.path().join("generations");
    let project_dir = results_root.join("repoeval_mixer");
    fs::create_dir_all(&project_dir).unwrap();
    let results = [
        r#"{"task_id":"Blend","prompt":"FUNCTION Blend : INT\\nVAR_INPUT\\n\\ta : INT;\\nEND_VAR\\n"}"#,
        r#"{"metadata":{"function_name":"Dose"}}"#,
        "not json",
        r#"{"task_id":"Empty","prompt":"FUNCTION Empty : INT"}"#,
    ]
    .join("\n");
    fs::write(project_dir.join("results.jsonl"), results).unwrap();
    let generations = serde_json::json!([
        ["```st\nBlend := a * 2;\n```", "ignored second candidate"],
        "Dose := 1;",
        ["unused"],
        ["", "   "]
    ]);
    fs::write(
        project_dir.join(ingest::GENERATIONS_FILE),
        generations.to_string(),
    )
    .unwrap();

    assert_eq!(
        list_generation_projects(&results_root).unwrap(),
        vec!["mixer"]
    );
    let store = ArtifactStore::new(root.path().join("out"));
    let report = ingest_projects(
        &store,
        &results_root,
        &["mixer".to_string(), "ghost".to_string()],
    );
    assert_eq!(report.total_written, 2);
    assert_eq!(report.failed_projects[0].id, "ghost");
    let mixer = &report.projects[0];
    assert_eq!(mixer.records, 4);
    assert_eq!(mixer.without_provide, 1);
    assert_eq!(mixer.failed.len(), 2);

    let blend = ArtifactKey::new("mixer", "Blend");
    assert_eq!(
        store.read_variant(&blend, VariantKind::Current).unwrap(),
        "FUNCTION Blend : INT\nVAR_INPUT\n\ta : INT;\nEND_VAR\n\nBlend := a * 2;\n\nEND_FUNCTION\n"
    );
    assert_eq!(
        store
            .read_variant(&ArtifactKey::new("mixer", "Dose"), VariantKind::Current)
            .unwrap(),
        "Dose := 1;\n"
    );

    let listed: Vec<String> = store
        .list_functions("mixer")
        .unwrap()
        .into_iter()
        .map(|k| k.function_id)
        .collect();
    assert_eq!(listed, vec!["Blend", "Dose"]);

    let provide = crate::lookup::JsonlProvideCode::new(&results_root);
    let strip = strip_artifacts(&store, &provide, &[blend], 1);
    assert_eq!(strip.derived, 1);
}

#[test]
fn evaluation_accepts_prefixed_project_ids() {
    let root = tempdir().unwrap();
    let current = root.path().join("out/repoeval_tank/readful_result");
    fs::create_dir_all(&current).unwrap();
    fs::write(current.join("Fill.st"), fill_text("3")).unwrap();
    let truth = root
        .path()
        .join("dataset/generation_context_ground_truth")
        .join(PROJECT);
    fs::create_dir_all(&truth).unwrap();
    fs::write(truth.join("Fill.st"), fill_text("3")).unwrap();

    let store = ArtifactStore::new(root.path().join("out"));
    let requested = vec!["repoeval_tank".to_string(), PROJECT.to_string()];
    assert_eq!(normalize_project_ids(&requested), vec![PROJECT]);
    assert_eq!(select_projects(&store, &requested).unwrap(), vec![PROJECT]);

    let references = FsGroundTruth::new(root.path().join("dataset"), Corpus::GenerationContext);
    let scorer = SimilarityScorer::default();
    let (reports, summary) = evaluate_projects(
        &store,
        &references,
        &scorer,
        &["repoeval_tank".to_string()],
        &evaluate_settings(),
    );
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].project_name, PROJECT);
    assert_eq!(reports[0].case_count, 1);
    assert_eq!(reports[0].successful_count, 1);
    assert_eq!(summary.project_statistics[PROJECT].case_count, 1);
    assert!(summary.failed_projects.is_empty());
}

fn write_generation(results_root: &Path, threshold: &str) {
    let project_dir = results_root.join(PROJECT);
    fs::create_dir_all(&project_dir).unwrap();
    let record = serde_json::json!({ "task_id": "Fill", "prompt": PROVIDE_FILL });
    fs::write(project_dir.join("results.jsonl"), record.to_string()).unwrap();
    let body = format!("Fill := level > {};", threshold);
    fs::write(
        project_dir.join(ingest::GENERATIONS_FILE),
        serde_json::json!([[body]]).to_string(),
    )
    .unwrap();
}

#[test]
fn reingest_replaces_state_of_an_earlier_repair() {
    let root = tempdir().unwrap();
    let results_root = root.path().join("generations");
    let store = ArtifactStore::new(root.path().join("out"));
    let key = ArtifactKey::new(PROJECT, "Fill");
    let projects = vec![PROJECT.to_string()];
    let repair = |store: &ArtifactStore| {
        repair_projects(
            store,
            &validator,
            &fixer,
            None,
            &projects,
            &settings(StartFrom::Pristine),
        )
    };

    write_generation(&results_root, "BROKEN");
    let first = ingest_projects(&store, &results_root, &projects);
    assert_eq!(first.total_written, 1);
    assert_eq!(first.projects[0].reset, 0);
    let first_text = store.read_variant(&key, VariantKind::Current).unwrap();
    assert!(first_text.contains("level > BROKEN"));
    assert_eq!(repair(&store).totals.validated, 1);
    assert_eq!(
        store.read_variant(&key, VariantKind::Current).unwrap(),
        first_text.replace("BROKEN", "3")
    );

    let again = ingest_projects(&store, &results_root, &projects);
    assert_eq!(again.projects[0].reset, 0);
    assert_eq!(store.read_variant(&key, VariantKind::Pristine).unwrap(), first_text);

    write_generation(&results_root, "BROKEN + 1");
    let second = ingest_projects(&store, &results_root, &projects);
    assert_eq!(second.projects[0].reset, 1);
    let second_text = store.read_variant(&key, VariantKind::Current).unwrap();
    assert!(second_text.contains("level > BROKEN + 1"));
    assert!(store.read_history(&key).unwrap().is_empty());

    assert_eq!(repair(&store).totals.validated, 1);
    assert_eq!(
        store.read_variant(&key, VariantKind::Current).unwrap(),
        second_text.replace("BROKEN", "3")
    );
    assert_eq!(store.read_variant(&key, VariantKind::Pristine).unwrap(), second_text);
}

#[test]
fn batch_drivers_report_unlistable_projects() {
    let fx = fixture();
    let projects = vec![PROJECT.to_string(), "ghost".to_string()];
    let provide = provide();

    let repaired = repair_projects(
        &fx.store,
        &validator,
        &fixer,
        Some(&provide),
        &projects,
        &settings(StartFrom::Pristine),
    );
    assert_eq!(repaired.totals.artifacts, 3);
    assert_eq!(repaired.failed_projects.len(), 1);
    assert_eq!(repaired.failed_projects[0].id, "ghost");
    assert_eq!(repaired.failed_projects[0].error_kind, ErrorKind::NotFound);

    let stripped = strip_projects(&fx.store, &provide, &projects, 2);
    assert_eq!(stripped.total, 3);
    assert_eq!(stripped.failed_projects.len(), 1);
    assert_eq!(stripped.failed_projects[0].id, "ghost");

    let checked = check_compile_rate(
        &fx.store,
        &validator,
        &RetryPolicy::none(),
        &projects,
        VariantKind::Current,
        2,
    );
    assert_eq!(checked.projects.len(), 1);
    assert_eq!(checked.failed_projects.len(), 1);
    assert_eq!(checked.failed_projects[0].id, "ghost");

    let dir = tempdir().unwrap();
    let path = dir.path().join("repair.json");
    write_report_json(&path, &repaired).unwrap();
    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["failed_projects"][0]["id"], "ghost");
}

#[test]
fn history_batch_lists_projects_it_could_not_evaluate() {
    let fx = fixture();
    repair_all(&fx, StartFrom::Pristine);
    let references = FsGroundTruth::new(&fx.dataset, Corpus::GenerationContext);
    let scorer = SimilarityScorer::default();
    let settings = HistorySettings {
        weights: Weights::uniform(),
        trend_epsilon: 1e-3,
        strip_declarations: true,
        workers: 2,
    };
    let projects = vec![PROJECT.to_string(), "ghost".to_string()];

    let (reports, summary) =
        evaluate_histories(&fx.store, &references, &scorer, &projects, &settings);
    assert_eq!(reports.len(), 1);
    assert_eq!(summary.total_projects, 2);
    assert_eq!(summary.evaluated_projects, vec![PROJECT]);
    assert_eq!(summary.trend_counts.improvement, 1);
    assert_eq!(summary.failed_projects.len(), 1);
    assert_eq!(summary.failed_projects[0].id, "ghost");
}
