use crate::error::{RequestError, RunError};
use crate::ranking::RankedPredictions;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Model list offered by the harness when no extra models are configured.
pub const DEFAULT_MODELS: [&str; 4] = [
    "cifar10-resnet-best.pth",
    "onnx-mobilenet-v2.onnx",
    "transformer-gpt2-small.pt",
    "yolov5-medium.pt",
];

pub const DEFAULT_MODEL: &str = "cifar10-resnet-best.pth";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The set of model ids a request may name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalog {
    models: Vec<ModelId>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            models: DEFAULT_MODELS.iter().map(|m| ModelId::new(*m)).collect(),
        }
    }
}

impl ModelCatalog {
    /// Default catalog plus `extra`, skipping blanks and ids already present.
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut catalog = Self::default();
        for id in extra {
            let id: String = id.into();
            let id = id.trim();
            if id.is_empty() {
                continue;
            }
            let id = ModelId::new(id);
            if !catalog.contains(&id) {
                catalog.models.push(id);
            }
        }
        catalog
    }

    pub fn contains(&self, id: &ModelId) -> bool {
        self.models.iter().any(|m| m == id)
    }

    pub fn models(&self) -> &[ModelId] {
        &self.models
    }

    #[cfg(any(test, feature = "tui"))]
    pub fn position(&self, id: &ModelId) -> Option<usize> {
        self.models.iter().position(|m| m == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Text,
    Image,
}

impl InputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InputKind::Text => "text",
            InputKind::Image => "image",
        }
    }

    #[cfg(any(test, feature = "tui"))]
    pub fn toggled(self) -> Self {
        match self {
            InputKind::Text => InputKind::Image,
            InputKind::Image => InputKind::Text,
        }
    }

    /// Heading shown in front of the top prediction.
    pub fn result_heading(self) -> &'static str {
        match self {
            InputKind::Image => "Class Label",
            InputKind::Text => "Sentiment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Bytes,
    pub media_type: Option<String>,
}

/// Input payload; the variant is the request's input kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Image(ImagePayload),
}

impl Payload {
    pub fn kind(&self) -> InputKind {
        match self {
            Payload::Text(_) => InputKind::Text,
            Payload::Image(_) => InputKind::Image,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub model_id: ModelId,
    pub payload: Payload,
}

impl RunRequest {
    pub fn text(model_id: ModelId, text: impl Into<String>) -> Self {
        Self {
            model_id,
            payload: Payload::Text(text.into()),
        }
    }

    pub fn image(model_id: ModelId, bytes: impl Into<Bytes>, media_type: Option<String>) -> Self {
        Self {
            model_id,
            payload: Payload::Image(ImagePayload {
                bytes: bytes.into(),
                media_type,
            }),
        }
    }

    pub fn input_kind(&self) -> InputKind {
        self.payload.kind()
    }

    /// A request is well-formed iff it names a catalog model and its payload is non-empty.
    pub fn validate(&self, catalog: &ModelCatalog) -> Result<(), RequestError> {
        if self.model_id.as_str().is_empty() {
            return Err(RequestError::EmptyModelId);
        }
        if !catalog.contains(&self.model_id) {
            return Err(RequestError::UnknownModel(self.model_id.to_string()));
        }
        match &self.payload {
            Payload::Text(t) if t.is_empty() => Err(RequestError::EmptyText),
            Payload::Image(img) if img.bytes.is_empty() => Err(RequestError::EmptyImage),
            _ => Ok(()),
        }
    }

    /// Short human-readable description of the input.
    pub fn preview(&self, max_chars: usize) -> String {
        match &self.payload {
            Payload::Text(t) => {
                let mut out: String = t.chars().take(max_chars).collect();
                if t.chars().count() > max_chars {
                    out.push('…');
                }
                out
            }
            Payload::Image(img) => match img.media_type.as_deref() {
                Some(mt) => format!("{} image ({} bytes)", mt, img.bytes.len()),
                None => format!("image ({} bytes)", img.bytes.len()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// What a backend hands back: predictions in any order plus its own latency figure.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResultRaw {
    pub predictions: Vec<Prediction>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub predictions: RankedPredictions,
    pub elapsed_ms: u64,
}

impl RunResult {
    pub fn top(&self) -> Result<&Prediction, RunError> {
        self.predictions.top()
    }
}

/// Identity of one submitted run; backend completions are matched against it.
pub type RunId = u64;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running {
        run_id: RunId,
        request: Arc<RunRequest>,
    },
    Completed {
        run_id: RunId,
        request: Arc<RunRequest>,
        result: Arc<RunResult>,
    },
}

impl RunState {
    pub fn name(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running { .. } => "running",
            RunState::Completed { .. } => "completed",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running { .. })
    }

    /// Id of the in-flight run, if any.
    pub fn in_flight(&self) -> Option<RunId> {
        match self {
            RunState::Running { run_id, .. } => Some(*run_id),
            _ => None,
        }
    }
}

/// Notifications delivered to controller subscribers.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    StateChanged {
        state: RunState,
    },
    RunFailed {
        run_id: RunId,
        error: RunError,
    },
    /// A command sent through the controller handle was refused; state is unchanged.
    CommandRejected {
        error: RunError,
    },
    Info(InfoEvent),
}

/// Structured info events consumed by UI/CLI layers.
#[derive(Debug, Clone, PartialEq)]
pub enum InfoEvent {
    StaleResultDropped { run_id: RunId },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::StaleResultDropped { run_id } => {
                format!("Dropped stale result for run #{}", run_id)
            }
        }
    }
}

/// Serializable record of one completed run, used for JSON output and exports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub timestamp_utc: String,
    pub model_id: ModelId,
    pub input_kind: InputKind,
    pub top: Prediction,
    pub predictions: Vec<Prediction>,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ModelCatalog {
        ModelCatalog::default()
    }

    #[test]
    fn test_valid_text_request() {
        let req = RunRequest::text(ModelId::new(DEFAULT_MODEL), "great movie");
        assert_eq!(req.input_kind(), InputKind::Text);
        assert_eq!(req.validate(&catalog()), Ok(()));
    }

    #[test]
    fn test_empty_text_rejected() {
        let req = RunRequest::text(ModelId::new(DEFAULT_MODEL), "");
        assert_eq!(req.validate(&catalog()), Err(RequestError::EmptyText));
    }

    #[test]
    fn test_empty_image_rejected() {
        let req = RunRequest::image(ModelId::new(DEFAULT_MODEL), Vec::new(), None);
        assert_eq!(req.input_kind(), InputKind::Image);
        assert_eq!(req.validate(&catalog()), Err(RequestError::EmptyImage));
    }

    #[test]
    fn test_unknown_and_empty_model_rejected() {
        let req = RunRequest::text(ModelId::new("bert-huge.bin"), "hi");
        assert_eq!(
            req.validate(&catalog()),
            Err(RequestError::UnknownModel("bert-huge.bin".into()))
        );

        let req = RunRequest::text(ModelId::new(""), "hi");
        assert_eq!(req.validate(&catalog()), Err(RequestError::EmptyModelId));
    }

    #[test]
    fn test_catalog_with_extra_dedupes_and_skips_blank() {
        let cat = ModelCatalog::with_extra(["custom.onnx", " ", "yolov5-medium.pt", "custom.onnx"]);
        assert_eq!(cat.models().len(), DEFAULT_MODELS.len() + 1);
        assert!(cat.contains(&ModelId::new("custom.onnx")));
        assert_eq!(cat.position(&ModelId::new(DEFAULT_MODEL)), Some(0));
    }

    #[test]
    fn test_preview_truncates_text() {
        let req = RunRequest::text(ModelId::new(DEFAULT_MODEL), "abcdefgh");
        assert_eq!(req.preview(4), "abcd…");
        let req = RunRequest::image(ModelId::new(DEFAULT_MODEL), vec![1u8, 2, 3], Some("image/png".into()));
        assert_eq!(req.preview(4), "image/png image (3 bytes)");
    }

    #[test]
    fn test_run_state_helpers() {
        let req = Arc::new(RunRequest::text(ModelId::new(DEFAULT_MODEL), "x"));
        let running = RunState::Running {
            run_id: 7,
            request: req,
        };
        assert!(running.is_running());
        assert_eq!(running.in_flight(), Some(7));
        assert_eq!(running.name(), "running");
        assert_eq!(RunState::default(), RunState::Idle);
        assert_eq!(RunState::Idle.in_flight(), None);
    }
}
