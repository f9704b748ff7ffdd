use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: usize, action: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(action),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("Ctrl-Q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit"),
        ]),
        key_line("Enter", 7, "Run inference"),
        key_line("Esc", 9, "Cancel running inference"),
        key_line("Ctrl-L", 6, "Clear input and results"),
        key_line("↑/↓", 9, "Select model"),
        key_line("Tab", 9, "Switch text/image input"),
        key_line("Ctrl-E", 6, "Export result as JSON"),
        key_line("Ctrl-Y", 6, "Copy result summary to clipboard"),
        key_line("F1", 10, "Toggle this help"),
        Line::from(""),
        Line::from("Input:"),
        Line::from("  Type text directly, or type the path of an image file."),
        Line::from("  Input cannot be changed while a run is in progress."),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
