mod charts;
mod export;
mod help;
mod state;

use crate::cli::{self, Cli};
use crate::model::{ControllerEvent, InputKind, ModelCatalog, ModelId, RunRequest, RunResult, RunState};
use crate::orchestrator::{self, ControllerHandle, RunController, SubscriptionId};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Terminal,
};
use state::{push_wrapped_status_kv, UiState};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc::UnboundedReceiver;

const PREVIEW_CHARS: usize = 60;

/// What a key press asks of the controller.
#[derive(Debug)]
enum Action {
    Quit,
    Submit(RunRequest),
    Cancel,
    Clear,
}

pub async fn run(args: Cli) -> Result<()> {
    let (mut controller, completion_rx) =
        RunController::new(cli::build_backend(&args), cli::build_catalog(&args));
    let (subscription, event_rx) = controller.subscribe();
    let catalog = controller.catalog().clone();
    let (handle, controller_task) = orchestrator::spawn_controller(controller, completion_rx);

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_handle = std::thread::spawn(move || {
        run_threaded(args, catalog, subscription, event_rx, handle)
    });

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    // The UI thread dropped its handle on exit, which stops the controller.
    let _ = controller_task.await;

    match join_res {
        Ok(Ok(res)) => res,
        Ok(Err(_)) => Err(anyhow::anyhow!("TUI thread panicked")),
        Err(e) => Err(anyhow::anyhow!("join TUI thread: {e}")),
    }
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    args: Cli,
    catalog: ModelCatalog,
    subscription: SubscriptionId,
    mut event_rx: UnboundedReceiver<ControllerEvent>,
    handle: ControllerHandle,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = initial_state(&args, &catalog);

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        while let Ok(ev) = event_rx.try_recv() {
            apply_event(&mut state, ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match handle_key(&mut state, k) {
                    Some(Action::Quit) => {
                        handle.unsubscribe(subscription);
                        handle.quit();
                        break Ok(());
                    }
                    Some(Action::Submit(request)) => handle.submit(request),
                    Some(Action::Cancel) => handle.cancel(),
                    Some(Action::Clear) => handle.clear(),
                    None => {}
                }
                // Redraw right away so typing feels immediate.
                terminal.draw(|f| draw(f.area(), f, &state)).ok();
                last_tick = Instant::now();
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn initial_state(args: &Cli, catalog: &ModelCatalog) -> UiState {
    let mut state = UiState::new(catalog, &ModelId::new(args.model.clone()));
    state.export_json = args.export_json.clone();
    if let Some(text) = args.input_text.as_ref() {
        state.input_kind = InputKind::Text;
        state.text_input = text.clone();
    } else if let Some(path) = args.input_image.as_ref() {
        state.input_kind = InputKind::Image;
        state.image_path = path.display().to_string();
    }
    if state.info.is_empty() {
        state.info = "F1 for help".into();
    }
    state
}

fn handle_key(state: &mut UiState, k: KeyEvent) -> Option<Action> {
    let ctrl = k.modifiers.contains(KeyModifiers::CONTROL);
    match k.code {
        KeyCode::Char('c') | KeyCode::Char('q') if ctrl => Some(Action::Quit),
        KeyCode::F(1) => {
            state.show_help = !state.show_help;
            None
        }
        KeyCode::Esc => {
            if state.show_help {
                state.show_help = false;
                None
            } else if state.run_state.is_running() {
                Some(Action::Cancel)
            } else {
                None
            }
        }
        // The controller decides whether a submit is allowed.
        KeyCode::Enter => match state.build_request() {
            Ok(request) => Some(Action::Submit(request)),
            Err(e) => {
                state.info = format!("{e:#}");
                None
            }
        },
        KeyCode::Char('l') if ctrl => {
            if state.can_edit() {
                state.clear_inputs();
                state.last_report = None;
            }
            Some(Action::Clear)
        }
        KeyCode::Char('e') if ctrl => {
            export::export_and_show_path(state);
            None
        }
        KeyCode::Char('y') if ctrl => {
            export::copy_summary(state);
            None
        }
        _ if !state.can_edit() => None,
        KeyCode::Up => {
            state.prev_model();
            None
        }
        KeyCode::Down => {
            state.next_model();
            None
        }
        KeyCode::Tab => {
            state.input_kind = state.input_kind.toggled();
            None
        }
        KeyCode::Backspace => {
            state.active_buffer().pop();
            None
        }
        KeyCode::Char(c) if !ctrl => {
            state.active_buffer().push(c);
            None
        }
        _ => None,
    }
}

fn apply_event(state: &mut UiState, ev: ControllerEvent) {
    match ev {
        ControllerEvent::StateChanged { state: run_state } => {
            match &run_state {
                RunState::Running { request, .. } => {
                    state.run_started = Some(Instant::now());
                    state.last_error = None;
                    state.last_report = None;
                    state.info = format!("Running inference on {}", request.model_id);
                }
                RunState::Completed {
                    request, result, ..
                } => handle_run_completed(state, request, result),
                RunState::Idle => {
                    if state.run_state.is_running() {
                        state.info = "Run cancelled".into();
                    }
                    state.run_started = None;
                    state.last_report = None;
                }
            }
            state.run_state = run_state;
        }
        ControllerEvent::RunFailed { run_id, error } => {
            state.info = format!("Run #{run_id} failed");
            state.last_error = Some(error.to_string());
        }
        ControllerEvent::CommandRejected { error } => {
            state.info = error.to_string();
        }
        ControllerEvent::Info(info) => {
            state.info = info.to_message();
        }
    }
}

fn handle_run_completed(state: &mut UiState, request: &RunRequest, result: &RunResult) {
    state.run_started = None;
    match orchestrator::process_run_completion(state.export_json.as_deref(), request, result) {
        Ok(processed) => {
            state.info = if processed.export_messages.is_empty() {
                format!("Completed in {} ms", processed.report.elapsed_ms)
            } else {
                processed.export_messages.join("; ")
            };
            state.last_report = Some(processed.report);
        }
        Err(e) => {
            state.last_error = Some(format!("{e:#}"));
        }
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Min(0),
                Constraint::Length(4),
            ]
            .as_ref(),
        )
        .split(area);

    let title = Paragraph::new(Line::from(vec![
        Span::styled(
            "Model Inference Tester",
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw("   state: "),
        Span::styled(state.run_state.name(), state_style(&state.run_state)),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("inference-tester"),
    );
    f.render_widget(title, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(chunks[1]);

    draw_input_panel(body[0], f, state);
    if state.show_help {
        help::draw_help(body[1], f);
    } else {
        draw_output_panel(body[1], f, state);
    }

    draw_status(chunks[2], f, state);
}

fn state_style(run_state: &RunState) -> Style {
    match run_state {
        RunState::Idle => Style::default().fg(Color::Gray),
        RunState::Running { .. } => Style::default().fg(Color::Yellow),
        RunState::Completed { .. } => Style::default().fg(Color::Green),
    }
}

fn draw_input_panel(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let editable = state.can_edit();
    let border = if editable {
        Style::default()
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(3),
                Constraint::Length(3),
            ]
            .as_ref(),
        )
        .split(area);

    let model = Paragraph::new(Line::from(vec![
        Span::raw("◀ "),
        Span::styled(
            state.selected_model().to_string(),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw(" ▶"),
        Span::styled(
            format!("  ({}/{})", state.model_idx + 1, state.models.len()),
            Style::default().fg(Color::DarkGray),
        ),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(border)
            .title("Model / Checkpoint"),
    );
    f.render_widget(model, rows[0]);

    let kind_span = |kind: InputKind, label: &'static str| {
        if state.input_kind == kind {
            Span::styled(
                format!("(•) {label}"),
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
        } else {
            Span::raw(format!("( ) {label}"))
        }
    };
    let kinds = Paragraph::new(Line::from(vec![
        kind_span(InputKind::Text, "Text"),
        Span::raw("   "),
        kind_span(InputKind::Image, "Image"),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(border)
            .title("Input Type"),
    );
    f.render_widget(kinds, rows[1]);

    let (title, buffer, placeholder) = match state.input_kind {
        InputKind::Text => ("Text Input", &state.text_input, "Type text to classify"),
        InputKind::Image => ("Image Path", &state.image_path, "Type the path of an image file"),
    };
    let mut input_line = if buffer.is_empty() {
        vec![Span::styled(placeholder, Style::default().fg(Color::DarkGray))]
    } else {
        vec![Span::raw(buffer.clone())]
    };
    if editable {
        input_line.push(Span::styled("▏", Style::default().fg(Color::Yellow)));
    }
    let input = Paragraph::new(Line::from(input_line))
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border)
                .title(title),
        );
    f.render_widget(input, rows[2]);

    let run_enabled = editable && state.has_input();
    let run_style = if run_enabled {
        Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let actions = Paragraph::new(Line::from(vec![
        Span::styled("[Enter] Run Inference", run_style),
        Span::raw("   "),
        Span::styled(
            "[Ctrl-L] Clear",
            if editable {
                Style::default()
            } else {
                Style::default().fg(Color::DarkGray)
            },
        ),
        Span::raw("   "),
        Span::styled(
            "[Esc] Cancel",
            if editable {
                Style::default().fg(Color::DarkGray)
            } else {
                Style::default().fg(Color::Red)
            },
        ),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Actions"));
    f.render_widget(actions, rows[3]);
}

fn local_preview(state: &UiState) -> String {
    match state.input_kind {
        InputKind::Text if !state.text_input.is_empty() => {
            RunRequest::text(state.selected_model(), state.text_input.clone()).preview(PREVIEW_CHARS)
        }
        InputKind::Image if !state.image_path.trim().is_empty() => {
            format!("image file {}", state.image_path.trim())
        }
        _ => "No input".into(),
    }
}

fn draw_output_panel(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let preview_text = match &state.run_state {
        RunState::Running { request, .. } | RunState::Completed { request, .. } => {
            request.preview(PREVIEW_CHARS)
        }
        RunState::Idle => local_preview(state),
    };
    let preview = Paragraph::new(preview_text)
        .block(Block::default().borders(Borders::ALL).title("Input Preview"));
    f.render_widget(preview, rows[0]);

    match &state.run_state {
        RunState::Running { .. } => {
            let elapsed = state
                .run_started
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0);
            let p = Paragraph::new(vec![
                Line::from(Span::styled(
                    "Running inference…",
                    Style::default().fg(Color::Yellow),
                )),
                Line::from(format!("Elapsed: {elapsed:.1}s")),
                Line::from(Span::styled(
                    "Esc to cancel",
                    Style::default().fg(Color::DarkGray),
                )),
            ])
            .block(Block::default().borders(Borders::ALL).title("Results"));
            f.render_widget(p, rows[1]);
        }
        RunState::Completed { request, result, .. } => {
            charts::draw_results(f, rows[1], request, result);
        }
        RunState::Idle => {
            let line = match state.last_error.as_ref() {
                Some(err) => Line::from(Span::styled(
                    format!("Error: {err}"),
                    Style::default().fg(Color::Red),
                )),
                None => Line::from(Span::styled(
                    "Run inference to see results",
                    Style::default().fg(Color::DarkGray),
                )),
            };
            let p = Paragraph::new(line)
                .wrap(Wrap { trim: true })
                .block(Block::default().borders(Borders::ALL).title("Results"));
            f.render_widget(p, rows[1]);
        }
    }
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines = Vec::new();
    push_wrapped_status_kv(&mut lines, "Info", &state.info, area.width);
    if let Some(path) = state.last_exported_path.as_deref() {
        push_wrapped_status_kv(&mut lines, "Exported", path, area.width);
    }
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(p, area);
}
