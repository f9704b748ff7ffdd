//! Post-run processing utilities.
//!
//! Turns a completed run into a serializable report and handles exports.

use crate::error::RunError;
use crate::model::{RunReport, RunRequest, RunResult};
use anyhow::{Context, Result};
use std::path::Path;

/// Result of post-run processing, ready for presentation layers.
#[cfg(any(test, feature = "tui"))]
pub(crate) struct ProcessedRun {
    pub report: RunReport,
    pub export_messages: Vec<String>,
}

fn timestamp_utc() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

/// Build the report for one completed run.
pub(crate) fn build_report(request: &RunRequest, result: &RunResult) -> Result<RunReport, RunError> {
    let top = result.top()?.clone();
    Ok(RunReport {
        timestamp_utc: timestamp_utc(),
        model_id: request.model_id.clone(),
        input_kind: request.input_kind(),
        top,
        predictions: result.predictions.iter().cloned().collect(),
        elapsed_ms: result.elapsed_ms,
    })
}

/// Process a completed run: build its report and write any requested exports.
/// Export failures are reported as messages, not errors.
#[cfg(any(test, feature = "tui"))]
pub(crate) fn process_run_completion(
    export_path: Option<&Path>,
    request: &RunRequest,
    result: &RunResult,
) -> Result<ProcessedRun> {
    let report = build_report(request, result).context("completed run has no predictions")?;

    let mut export_messages = Vec::new();
    if let Some(path) = export_path {
        match export_json(path, &report) {
            Ok(_) => export_messages.push(format!("Exported JSON: {}", path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }

    Ok(ProcessedRun {
        report,
        export_messages,
    })
}

pub(crate) fn export_json(path: &Path, report: &RunReport) -> Result<()> {
    let body = serde_json::to_string_pretty(report).context("serialize report")?;
    std::fs::write(path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Default export file name for a report, e.g. `inference-2024-05-01_10-00-00Z-Cat.json`.
#[cfg(any(test, feature = "tui"))]
pub(crate) fn default_export_name(report: &RunReport) -> std::path::PathBuf {
    let stamp = report.timestamp_utc.replace(':', "-").replace('T', "_");
    let label: String = report
        .top
        .label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    std::path::PathBuf::from(format!("inference-{}-{}.json", stamp, label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InputKind, ModelId, Prediction, DEFAULT_MODEL};
    use crate::ranking;
    use std::path::PathBuf;

    fn completed() -> (RunRequest, RunResult) {
        let request = RunRequest::image(ModelId::new(DEFAULT_MODEL), vec![1u8, 2, 3], None);
        let result = RunResult {
            predictions: ranking::rank(vec![
                Prediction::new("Dog", 0.05),
                Prediction::new("Cat", 0.925),
            ])
            .unwrap(),
            elapsed_ms: 35,
        };
        (request, result)
    }

    #[test]
    fn test_build_report() {
        let (request, result) = completed();
        let report = build_report(&request, &result).unwrap();
        assert_eq!(report.top.label, "Cat");
        assert_eq!(report.input_kind, InputKind::Image);
        assert_eq!(report.predictions.len(), 2);
        assert_eq!(report.elapsed_ms, 35);
        assert!(!report.timestamp_utc.is_empty());
    }

    #[test]
    fn test_report_json_shape() {
        let (request, result) = completed();
        let report = build_report(&request, &result).unwrap();
        let v: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(v["model_id"], DEFAULT_MODEL);
        assert_eq!(v["input_kind"], "image");
        assert_eq!(v["predictions"][0]["label"], "Cat");
        assert_eq!(v["top"]["confidence"], 0.925);
    }

    #[test]
    fn test_export_json_writes_file() {
        let (request, result) = completed();
        let path = std::env::temp_dir().join(format!(
            "inference-tester-export-{}.json",
            std::process::id()
        ));
        let processed = process_run_completion(Some(&path), &request, &result).unwrap();
        assert_eq!(processed.export_messages.len(), 1);
        assert!(processed.export_messages[0].starts_with("Exported JSON"));

        let written: RunReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.top.label, "Cat");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_default_export_name_is_filesystem_safe() {
        let (request, result) = completed();
        let mut report = build_report(&request, &result).unwrap();
        report.timestamp_utc = "2024-05-01T10:00:00Z".into();
        report.top.label = "a/b c".into();
        assert_eq!(
            default_export_name(&report),
            PathBuf::from("inference-2024-05-01_10-00-00Z-a_b_c.json")
        );
    }
}
