use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph},
    Frame,
};

use crate::model::{InputKind, Prediction, RunRequest, RunResult};
use crate::ranking::format_percent;

const LABEL_COLUMN_MAX: u16 = 16;

/// Bar color by rank: the top prediction stands out, the rest fade.
fn bar_color(rank: usize) -> Color {
    match rank {
        0 => Color::Green,
        1 => Color::Cyan,
        2 => Color::Blue,
        _ => Color::DarkGray,
    }
}

fn label_column_width(predictions: &[Prediction]) -> u16 {
    predictions
        .iter()
        .map(|p| p.label.chars().count() as u16)
        .max()
        .unwrap_or(0)
        .min(LABEL_COLUMN_MAX)
        + 1
}

/// Render one labelled gauge row per prediction, in ranked order.
pub fn render_confidence_bars(f: &mut Frame, area: Rect, predictions: &[Prediction]) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Confidence Scores");
    let inner = block.inner(area);
    f.render_widget(block, area);

    if predictions.is_empty() || inner.height == 0 {
        return;
    }

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            predictions
                .iter()
                .map(|_| Constraint::Length(1))
                .chain(std::iter::once(Constraint::Min(0)))
                .collect::<Vec<_>>(),
        )
        .split(inner);

    let label_w = label_column_width(predictions);
    for (rank, (p, row)) in predictions.iter().zip(rows.iter()).enumerate() {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(label_w), Constraint::Min(0)].as_ref())
            .split(*row);

        let label: String = p.label.chars().take(LABEL_COLUMN_MAX as usize).collect();
        f.render_widget(
            Paragraph::new(label).alignment(Alignment::Left),
            cols[0],
        );
        let gauge = Gauge::default()
            .gauge_style(Style::default().fg(bar_color(rank)))
            .ratio(p.confidence.clamp(0.0, 1.0))
            .label(format_percent(p.confidence));
        f.render_widget(gauge, cols[1]);
    }
}

/// Stand-in text for the explanation view, which no backend provides yet.
fn explanation_placeholder(kind: InputKind) -> &'static str {
    match kind {
        InputKind::Image => "[Attention Map / Saliency will appear here]",
        InputKind::Text => "[Word importance visualization will appear here]",
    }
}

/// Results panel for a completed run: top prediction, confidence bars, timing.
pub fn draw_results(f: &mut Frame, area: Rect, request: &RunRequest, result: &RunResult) {
    let predictions = result.predictions.as_slice();
    let bars_height = (predictions.len() as u16).saturating_add(2);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Length(bars_height),
                Constraint::Length(3),
                Constraint::Min(0),
            ]
            .as_ref(),
        )
        .split(area);

    let heading = request.input_kind().result_heading();
    let top_line = match result.top() {
        Ok(top) => Line::from(vec![
            Span::styled(format!("{heading}: "), Style::default().fg(Color::Gray)),
            Span::styled(
                top.label.clone(),
                Style::default()
                    .fg(Color::Green)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!(" ({})", format_percent(top.confidence))),
        ]),
        Err(e) => Line::from(Span::styled(e.to_string(), Style::default().fg(Color::Red))),
    };
    f.render_widget(
        Paragraph::new(top_line).block(Block::default().borders(Borders::ALL).title("Prediction")),
        chunks[0],
    );

    render_confidence_bars(f, chunks[1], predictions);

    let metrics = Paragraph::new(Line::from(vec![
        Span::styled("Inference Time: ", Style::default().fg(Color::Gray)),
        Span::raw(format!("{} ms", result.elapsed_ms)),
        Span::raw("   "),
        Span::styled("Model: ", Style::default().fg(Color::Gray)),
        Span::raw(request.model_id.to_string()),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Metrics"));
    f.render_widget(metrics, chunks[2]);

    let explanation = Paragraph::new(Line::from(Span::styled(
        explanation_placeholder(request.input_kind()),
        Style::default().fg(Color::DarkGray),
    )))
    .alignment(Alignment::Center)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("Explanation / Visualization"),
    );
    f.render_widget(explanation, chunks[3]);
}
