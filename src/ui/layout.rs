use crate::app::App;
use crate::speedtest::Phase;
use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame,
};

const ACCENT: Color = Color::Rgb(100, 149, 237);
const SUCCESS: Color = Color::Rgb(134, 194, 156);
const SUCCESS_DIM: Color = Color::Rgb(80, 120, 90);
const INFO: Color = Color::Rgb(147, 180, 220);
const INFO_DIM: Color = Color::Rgb(90, 110, 140);
const TEXT_PRIMARY: Color = Color::Rgb(230, 230, 230);
const TEXT_SECONDARY: Color = Color::Rgb(160, 160, 160);
const TEXT_MUTED: Color = Color::Rgb(100, 100, 100);
const BORDER: Color = Color::Rgb(60, 60, 65);
const BORDER_ACTIVE: Color = Color::Rgb(100, 100, 110);

pub fn draw_ui(frame: &mut Frame, app: &App) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(8),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .split(frame.area());

    draw_header(frame, chunks[0], app);

    let panels = Layout::horizontal([Constraint::Ratio(1, 2), Constraint::Ratio(1, 2)]).split(chunks[1]);
    draw_metric_panel(
        frame,
        panels[0],
        MeterStyle::new("Download", SUCCESS, SUCCESS_DIM),
        app.active_phase == Some(Phase::Download),
        app.download_speed,
        app.download_percent,
        &app.download_samples,
    );
    draw_metric_panel(
        frame,
        panels[1],
        MeterStyle::new("Upload", INFO, INFO_DIM),
        app.active_phase == Some(Phase::Upload),
        app.upload_speed,
        app.upload_percent,
        &app.upload_samples,
    );

    frame.render_widget(
        Paragraph::new(app.status.as_str()).style(Style::default().fg(TEXT_SECONDARY)),
        chunks[2],
    );
    draw_help(frame, chunks[3], app);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::horizontal([Constraint::Length(12), Constraint::Min(10)]).split(inner);

    frame.render_widget(
        Paragraph::new("speedofme")
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD)),
        chunks[0],
    );
    frame.render_widget(
        Paragraph::new(create_phase_text(app)).alignment(Alignment::Right),
        chunks[1],
    );
}

fn create_phase_text(app: &App) -> Line<'static> {
    let phases = [(Phase::Download, "down"), (Phase::Upload, "up")];

    let mut spans = Vec::new();
    for (i, (phase, label)) in phases.iter().enumerate() {
        let style = if app.active_phase == Some(*phase) {
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
        } else if app.running && app.active_phase == Some(Phase::Upload) {
            Style::default().fg(TEXT_SECONDARY)
        } else {
            Style::default().fg(TEXT_MUTED)
        };

        spans.push(Span::styled(*label, style));
        if i < phases.len() - 1 {
            spans.push(Span::styled(" / ", Style::default().fg(TEXT_MUTED)));
        }
    }

    Line::from(spans)
}

struct MeterStyle {
    title: &'static str,
    color: Color,
    dim_color: Color,
}

impl MeterStyle {
    fn new(title: &'static str, color: Color, dim_color: Color) -> Self {
        Self {
            title,
            color,
            dim_color,
        }
    }
}

fn draw_metric_panel(
    frame: &mut Frame,
    area: Rect,
    style: MeterStyle,
    active: bool,
    speed: Option<f64>,
    percent: u8,
    samples: &[f64],
) {
    let border_color = if active { BORDER_ACTIVE } else { BORDER };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(Span::styled(
            format!(" {} ", style.title),
            Style::default().fg(if active { style.color } else { TEXT_SECONDARY }),
        ));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Min(3),
    ])
    .split(inner);

    frame.render_widget(
        Paragraph::new(format_speed(speed))
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center),
        chunks[0],
    );

    draw_progress_bar(frame, chunks[1], percent as f64 / 100.0, style.color, style.dim_color);

    if !samples.is_empty() {
        draw_sparkline(frame, chunks[2], samples, style.color);
    }
}

fn draw_progress_bar(frame: &mut Frame, area: Rect, ratio: f64, color: Color, dim_color: Color) {
    if area.width < 4 {
        return;
    }

    let width = (area.width - 2) as usize;
    let filled = ((ratio * width as f64) as usize).min(width);
    let empty = width.saturating_sub(filled);

    let bar = Line::from(vec![
        Span::raw(" "),
        Span::styled("━".repeat(filled), Style::default().fg(color)),
        Span::styled("━".repeat(empty), Style::default().fg(dim_color)),
        Span::raw(" "),
    ]);

    frame.render_widget(Paragraph::new(bar), area);
}

fn draw_sparkline(frame: &mut Frame, area: Rect, data: &[f64], color: Color) {
    if data.is_empty() || area.width < 4 || area.height < 2 {
        return;
    }

    let (min_val, max_val) = get_data_range(data);
    let range = (max_val - min_val).max(1.0);

    let points: Vec<(f64, f64)> = data
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as f64, v))
        .collect();

    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(&points);

    let chart = Chart::new(vec![dataset])
        .x_axis(Axis::default().bounds([0.0, data.len() as f64]))
        .y_axis(Axis::default().bounds([min_val - range * 0.1, max_val + range * 0.1]));

    frame.render_widget(chart, area);
}

fn draw_help(frame: &mut Frame, area: Rect, app: &App) {
    let help = format!("enter {} · q quit", app.action_label.to_lowercase());

    frame.render_widget(
        Paragraph::new(help)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        area,
    );
}

fn get_data_range(data: &[f64]) -> (f64, f64) {
    let min = data.iter().cloned().fold(f64::MAX, f64::min);
    let max = data.iter().cloned().fold(f64::MIN, f64::max);
    (if min == f64::MAX { 0.0 } else { min }, if max == f64::MIN { 0.0 } else { max })
}

pub fn format_speed(mbps: Option<f64>) -> String {
    match mbps {
        Some(mbps) if mbps >= 1000.0 => format!("{:.1} Gbps", mbps / 1000.0),
        Some(mbps) if mbps >= 1.0 => format!("{:.1} Mbps", mbps),
        Some(mbps) if mbps > 0.0 => format!("{:.0} Kbps", mbps * 1000.0),
        Some(_) => "0 Mbps".to_string(),
        None => "—".to_string(),
    }
}
