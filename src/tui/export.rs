use crate::model::RunReport;
use anyhow::{Context, Result};
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

use super::state::UiState;

// Global clipboard manager channel - initialized once on first use
static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

/// Export the report to a timestamped JSON file in the current directory.
/// Returns the absolute path of the exported file.
pub fn export_report_json(report: &RunReport) -> Result<std::path::PathBuf> {
    let current_dir = std::env::current_dir().context("get current directory")?;
    let path = current_dir.join(crate::orchestrator::default_export_name(report));
    crate::orchestrator::export_json(&path, report)?;
    Ok(path)
}

/// Export the last report and update state.info with the outcome.
pub fn export_and_show_path(state: &mut UiState) {
    let Some(report) = state.last_report.as_ref() else {
        state.info = "No result to export".into();
        return;
    };
    match export_report_json(report) {
        Ok(path) => {
            state.info = format!("Exported: {}", path.display());
            state.last_exported_path = Some(path.display().to_string());
        }
        Err(e) => {
            state.info = format!("Export failed: {e:#}");
        }
    }
}

/// Initialize the clipboard manager thread if not already initialized.
/// This creates a background thread that processes clipboard operations sequentially,
/// keeping each clipboard instance alive for a sufficient duration.
fn init_clipboard_manager() -> Result<&'static std_mpsc::Sender<String>> {
    CLIPBOARD_SENDER.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();

        std::thread::spawn(move || {
            use arboard::Clipboard;

            for text in rx {
                if let Ok(mut clipboard) = Clipboard::new() {
                    if clipboard.set_text(&text).is_ok() {
                        // Clipboard managers on Linux read lazily; keep the owner alive.
                        std::thread::sleep(Duration::from_secs(2));
                    }
                }
            }
        });

        tx
    });

    CLIPBOARD_SENDER
        .get()
        .ok_or_else(|| anyhow::anyhow!("Failed to initialize clipboard manager"))
}

/// Queue text for the clipboard without blocking the UI thread.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    let sender = init_clipboard_manager()?;
    sender
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("Clipboard manager channel closed"))?;
    Ok(())
}

/// Copy a one-line summary of the last report and update state.info.
pub fn copy_summary(state: &mut UiState) {
    let Some(report) = state.last_report.as_ref() else {
        state.info = "No result to copy".into();
        return;
    };
    let line = crate::text_summary::one_line(report);
    state.info = match copy_to_clipboard(&line) {
        Ok(()) => format!("Copied: {line}"),
        Err(e) => format!("Copy failed: {e:#}"),
    };
}
