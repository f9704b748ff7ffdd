use crate::model::{InputKind, ModelCatalog, ModelId, RunReport, RunRequest, RunState};
use anyhow::{Context, Result};
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};
use std::path::{Path, PathBuf};
use std::time::Instant;

pub struct UiState {
    pub show_help: bool,
    pub info: String,

    // Input panel
    pub models: Vec<ModelId>,
    pub model_idx: usize,
    pub input_kind: InputKind,
    pub text_input: String,
    pub image_path: String,

    // Mirror of the controller's state; the UI never writes it directly.
    pub run_state: RunState,
    pub run_started: Option<Instant>,
    pub last_error: Option<String>,
    pub last_report: Option<RunReport>,
    pub last_exported_path: Option<String>,
    pub export_json: Option<PathBuf>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            show_help: false,
            info: String::new(),
            models: ModelCatalog::default().models().to_vec(),
            model_idx: 0,
            input_kind: InputKind::Image,
            text_input: String::new(),
            image_path: String::new(),
            run_state: RunState::Idle,
            run_started: None,
            last_error: None,
            last_report: None,
            last_exported_path: None,
            export_json: None,
        }
    }
}

impl UiState {
    /// Start on `selected`. An id missing from the catalog falls back to the first model and
    /// says so in `info`.
    pub fn new(catalog: &ModelCatalog, selected: &ModelId) -> Self {
        let mut state = Self {
            models: catalog.models().to_vec(),
            ..Default::default()
        };
        match catalog.position(selected) {
            Some(idx) => state.model_idx = idx,
            None => {
                state.info = format!(
                    "Unknown model {}; using {}",
                    selected,
                    state.selected_model()
                );
            }
        }
        state
    }

    pub fn selected_model(&self) -> ModelId {
        self.models
            .get(self.model_idx)
            .cloned()
            .unwrap_or_else(|| ModelId::new(""))
    }

    pub fn next_model(&mut self) {
        if !self.models.is_empty() {
            self.model_idx = (self.model_idx + 1) % self.models.len();
        }
    }

    pub fn prev_model(&mut self) {
        if !self.models.is_empty() {
            self.model_idx = (self.model_idx + self.models.len() - 1) % self.models.len();
        }
    }

    /// Input may only change while no run is in flight.
    pub fn can_edit(&self) -> bool {
        !self.run_state.is_running()
    }

    pub fn active_buffer(&mut self) -> &mut String {
        match self.input_kind {
            InputKind::Text => &mut self.text_input,
            InputKind::Image => &mut self.image_path,
        }
    }

    pub fn has_input(&self) -> bool {
        match self.input_kind {
            InputKind::Text => !self.text_input.is_empty(),
            InputKind::Image => !self.image_path.trim().is_empty(),
        }
    }

    pub fn clear_inputs(&mut self) {
        self.text_input.clear();
        self.image_path.clear();
        self.last_error = None;
    }

    /// Build a request from the current input panel.
    pub fn build_request(&self) -> Result<RunRequest> {
        let model = self.selected_model();
        match self.input_kind {
            InputKind::Text => Ok(RunRequest::text(model, self.text_input.clone())),
            InputKind::Image => {
                let path = self.image_path.trim();
                if path.is_empty() {
                    // Empty payload; the controller reports it as an invalid request.
                    return Ok(RunRequest::image(model, Vec::new(), None));
                }
                crate::cli::load_image_request(model, Path::new(path))
                    .context("load image input")
            }
        }
    }
}

pub fn push_wrapped_status_kv(
    out: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    status_area_width: u16,
) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    // Account for borders (2 chars on each side)
    let usable_width = status_area_width.saturating_sub(4).max(1);
    let label_text = format!("{label}:");
    let label_width = label_text.chars().count() as u16;

    let value_chars: Vec<char> = value.chars().collect();
    let mut remaining = value_chars.as_slice();
    let mut first = true;

    while !remaining.is_empty() {
        let line_width = if first {
            usable_width.saturating_sub(label_width + 1).max(1)
        } else {
            usable_width.saturating_sub(2).max(1)
        };

        let chars_to_take = (remaining.len() as u16).min(line_width) as usize;
        let (line_chars, rest) = remaining.split_at(chars_to_take);
        let line_text: String = line_chars.iter().collect();

        if first {
            out.push(Line::from(vec![
                Span::styled(label_text.clone(), Style::default().fg(Color::Gray)),
                Span::raw(" "),
                Span::raw(line_text),
            ]));
            first = false;
        } else {
            out.push(Line::from(vec![Span::raw("  "), Span::raw(line_text)]));
        }

        remaining = rest;
    }
}
