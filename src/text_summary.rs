//! Text summary builder for CLI output.
//!
//! Formats a run report as human-readable lines for text mode.

use crate::model::RunReport;
use crate::ranking::format_percent;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Width of the confidence bar in text mode, in characters.
const BAR_WIDTH: usize = 30;

fn text_bar(confidence: f64) -> String {
    let filled = ((confidence * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);
    format!("{}{}", "█".repeat(filled), "·".repeat(BAR_WIDTH - filled))
}

/// Build a text summary from a completed run report.
pub(crate) fn build_text_summary(report: &RunReport) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!("Model: {}", report.model_id));
    lines.push(format!(
        "{}: {} ({})",
        report.input_kind.result_heading(),
        report.top.label,
        format_percent(report.top.confidence)
    ));
    lines.push("Confidence scores:".to_string());

    let label_width = report
        .predictions
        .iter()
        .map(|p| p.label.chars().count())
        .max()
        .unwrap_or(0);
    for p in &report.predictions {
        lines.push(format!(
            "  {:>width$} {} {:>6}",
            p.label,
            text_bar(p.confidence),
            format_percent(p.confidence),
            width = label_width
        ));
    }

    lines.push(format!("Inference time: {} ms", report.elapsed_ms));

    TextSummary { lines }
}

/// One-line summary, used for clipboard copies.
#[cfg(any(test, feature = "tui"))]
pub(crate) fn one_line(report: &RunReport) -> String {
    format!(
        "{} -> {} {} in {} ms",
        report.model_id,
        report.top.label,
        format_percent(report.top.confidence),
        report.elapsed_ms
    )
}
