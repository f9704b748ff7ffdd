use crate::engine::{InferenceBackend, SimulatedConfig, SimulatedEngine};
use crate::model::{
    ControllerEvent, ModelCatalog, ModelId, RunReport, RunRequest, RunState, DEFAULT_MODEL,
};
use crate::orchestrator::{self, RunController};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "inference-tester",
    version,
    about = "Interactive harness for classification-style inference backends"
)]
pub struct Cli {
    /// Model/checkpoint to run
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Add a model id to the known-model list (repeatable)
    #[arg(long = "extra-model")]
    pub extra_models: Vec<String>,

    /// Free-form text input
    #[arg(long, conflicts_with = "input_image")]
    pub input_text: Option<String>,

    /// Image file input
    #[arg(long)]
    pub input_image: Option<PathBuf>,

    /// Print JSON report and exit (no TUI)
    #[arg(long, conflicts_with = "summary")]
    pub json: bool,

    /// Print text summary and exit (no TUI)
    #[arg(long)]
    pub summary: bool,

    /// Print the known models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Export the report of each completed run as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Simulated backend latency
    #[arg(long, default_value = "800ms")]
    pub delay: humantime::Duration,

    /// Random extra latency added on top of --delay (upper bound)
    #[arg(long, default_value = "0ms")]
    pub jitter: humantime::Duration,

    /// Probability in [0, 1] that a simulated run fails
    #[arg(long, default_value_t = 0.0)]
    pub failure_rate: f64,
}

impl Cli {
    pub fn is_one_shot(&self) -> bool {
        self.json || self.summary || self.list_models
    }
}

/// Install the stderr log subscriber. `RUST_LOG` overrides the default `warn` level.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub async fn run(args: Cli) -> Result<()> {
    if !(0.0..=1.0).contains(&args.failure_rate) {
        return Err(anyhow::anyhow!(
            "--failure-rate must be between 0 and 1, got {}",
            args.failure_rate
        ));
    }

    if args.list_models {
        for m in build_catalog(&args).models() {
            println!("{}", m);
        }
        return Ok(());
    }

    if !args.is_one_shot() {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_once(args, OutputMode::Summary).await;
        }
    }

    if args.json {
        return run_once(args, OutputMode::Json).await;
    }

    run_once(args, OutputMode::Summary).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Json,
    Summary,
}

/// Build the simulated backend configuration from CLI arguments.
pub fn build_config(args: &Cli) -> SimulatedConfig {
    SimulatedConfig {
        delay: Duration::from(args.delay),
        jitter: Duration::from(args.jitter),
        failure_rate: args.failure_rate,
    }
}

pub fn build_catalog(args: &Cli) -> ModelCatalog {
    ModelCatalog::with_extra(args.extra_models.iter().cloned())
}

pub fn build_backend(args: &Cli) -> Arc<dyn InferenceBackend> {
    Arc::new(SimulatedEngine::new(build_config(args)))
}

/// Media type for a file accepted as image input, by extension.
pub fn image_media_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

/// Read an image file into a request. Only the extension is checked; contents are not decoded.
pub fn load_image_request(model_id: ModelId, path: &Path) -> Result<RunRequest> {
    let media_type = image_media_type(path)
        .with_context(|| format!("{} is not an image file", path.display()))?;
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(RunRequest::image(model_id, bytes, Some(media_type.to_string())))
}

/// Build the run request from CLI arguments.
pub fn build_request(args: &Cli) -> Result<RunRequest> {
    let model_id = ModelId::new(args.model.clone());
    match (&args.input_text, &args.input_image) {
        (Some(text), None) => Ok(RunRequest::text(model_id, text.clone())),
        (None, Some(path)) => load_image_request(model_id, path),
        (None, None) => Err(anyhow::anyhow!(
            "--input-text or --input-image is required with --json/--summary"
        )),
        (Some(_), Some(_)) => Err(anyhow::anyhow!(
            "--input-text and --input-image cannot be used together"
        )),
    }
}

/// Submit one run through the controller and wait for its outcome. Ctrl-C cancels the run.
async fn execute_once(
    args: &Cli,
    progress: Option<&mpsc::UnboundedSender<OutputLine>>,
) -> Result<RunReport> {
    let request = build_request(args)?;

    let (mut controller, completions) = RunController::new(build_backend(args), build_catalog(args));
    let (subscription, mut events) = controller.subscribe();
    let (handle, join) = orchestrator::spawn_controller(controller, completions);

    if let Some(tx) = progress {
        let _ = tx.send(OutputLine::Stderr(format!(
            "Running inference on {} ({} input: {})…",
            request.model_id,
            request.input_kind().as_str(),
            request.preview(40)
        )));
    }
    handle.submit(request);

    let mut cancelled = false;
    let outcome = loop {
        tokio::select! {
            ev = events.recv() => {
                match ev {
                    Some(ControllerEvent::StateChanged {
                        state: RunState::Completed { request, result, .. },
                    }) => {
                        break orchestrator::build_report(&request, &result)
                            .context("completed run has no predictions");
                    }
                    Some(ControllerEvent::StateChanged { state: RunState::Idle }) if cancelled => {
                        break Err(anyhow::anyhow!("run cancelled"));
                    }
                    Some(ControllerEvent::RunFailed { error, .. })
                    | Some(ControllerEvent::CommandRejected { error }) => {
                        let what = if error.is_run_failure() {
                            "inference run failed"
                        } else {
                            "run request rejected"
                        };
                        break Err(anyhow::Error::new(error).context(what));
                    }
                    Some(ControllerEvent::Info(info)) => {
                        if let Some(tx) = progress {
                            let _ = tx.send(OutputLine::Stderr(info.to_message()));
                        }
                    }
                    Some(ControllerEvent::StateChanged { .. }) => {}
                    None => break Err(anyhow::anyhow!("controller stopped unexpectedly")),
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                cancelled = true;
                handle.cancel();
            }
        }
    };

    handle.unsubscribe(subscription);
    handle.quit();
    let _ = join.await;
    outcome
}

async fn run_once(args: Cli, mode: OutputMode) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let progress = match mode {
        OutputMode::Summary => Some(&out_tx),
        OutputMode::Json => None,
    };

    let report = match execute_once(&args, progress).await {
        Ok(r) => r,
        Err(e) => {
            drop(out_tx);
            let _ = out_handle.await;
            return Err(e);
        }
    };

    if let Some(p) = args.export_json.as_deref() {
        orchestrator::export_json(p, &report)?;
        let _ = out_tx.send(OutputLine::Stderr(format!("Exported JSON: {}", p.display())));
    }

    match mode {
        OutputMode::Json => {
            let out = serde_json::to_string_pretty(&report)?;
            let _ = out_tx.send(OutputLine::Stdout(out));
        }
        OutputMode::Summary => {
            let summary = crate::text_summary::build_text_summary(&report);
            for line in summary.lines {
                let _ = out_tx.send(OutputLine::Stdout(line));
            }
        }
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}
