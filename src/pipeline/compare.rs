//! Compare two batch evaluation summaries read from disk.

use crate::report::{read_report_json, BatchEvaluationSummary, CompareReport};
use anyhow::Result;
use std::path::Path;
use tracing::info;

pub fn compare_summaries(baseline: &Path, compare: &Path) -> Result<CompareReport> {
    let baseline_summary: BatchEvaluationSummary = read_report_json(baseline)?;
    let compare_summary: BatchEvaluationSummary = read_report_json(compare)?;
    let report = CompareReport::new(baseline, &baseline_summary, compare, &compare_summary);
    if let Some(diff) = report.average_scores.get("codebleu") {
        info!(
            baseline = diff.baseline,
            compare = diff.compare,
            absolute_diff = diff.absolute_diff,
            "compared evaluation summaries"
        );
    }
    Ok(report)
}
