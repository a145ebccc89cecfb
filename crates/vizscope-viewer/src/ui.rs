use crate::app::{App, Focus, InputMode};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color as TuiColor, Modifier, Style};
use ratatui::symbols::Marker;
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::canvas::{Canvas, Context, Rectangle};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use std::cell::Cell;
use vizscope_core::geometry::{view_size, Orientation, Point, Rect as ViewRect, Size};
use vizscope_core::image::DecodedImage;
use vizscope_core::{Color, ConnectionState, Painter, RenderStats};

#[derive(Clone, Copy)]
struct ScopeTheme {
    bg: TuiColor,
    surface: TuiColor,
    border: TuiColor,
    title: TuiColor,
    text: TuiColor,
    muted: TuiColor,
    accent: TuiColor,
    ok: TuiColor,
    warn: TuiColor,
    critical: TuiColor,
}

const CANVAS_BG: (u8, u8, u8) = (11, 18, 32);

fn scope_theme() -> ScopeTheme {
    ScopeTheme {
        bg: TuiColor::Rgb(CANVAS_BG.0, CANVAS_BG.1, CANVAS_BG.2),
        surface: TuiColor::Rgb(17, 26, 46),
        border: TuiColor::Rgb(71, 85, 105),
        title: TuiColor::Rgb(191, 219, 254),
        text: TuiColor::Rgb(226, 232, 240),
        muted: TuiColor::Rgb(148, 163, 184),
        accent: TuiColor::Rgb(56, 189, 248),
        ok: TuiColor::Rgb(34, 197, 94),
        warn: TuiColor::Rgb(245, 158, 11),
        critical: TuiColor::Rgb(239, 68, 68),
    }
}

/// Terminals have no alpha; blend toward the canvas background instead.
fn blend(color: Color) -> TuiColor {
    let alpha = color.alpha_fraction();
    let mix = |channel: u8, bg: u8| -> u8 {
        (f32::from(channel) * alpha + f32::from(bg) * (1.0 - alpha)).round() as u8
    };
    TuiColor::Rgb(
        mix(color.r, CANVAS_BG.0),
        mix(color.g, CANVAS_BG.1),
        mix(color.b, CANVAS_BG.2),
    )
}

/// Adapts the canvas context to the frame painter. The canvas y axis
/// grows upward, so every y is mirrored against the view height.
struct CanvasPainter<'c, 'a> {
    ctx: &'c mut Context<'a>,
    height: f64,
}

impl Painter for CanvasPainter<'_, '_> {
    fn fill_rect(&mut self, rect: ViewRect, color: Color) {
        self.ctx.draw(&Rectangle {
            x: rect.x,
            y: self.height - rect.y - rect.height,
            width: rect.width,
            height: rect.height,
            color: blend(color),
        });
    }

    fn draw_image(&mut self, rect: ViewRect, image: &DecodedImage, tint: Color) {
        let [r, g, b, a] = image.mean_rgba();
        let scale = |channel: u8, by: u8| ((u16::from(channel) * u16::from(by)) / 255) as u8;
        let color = Color::rgba(
            scale(r, tint.r),
            scale(g, tint.g),
            scale(b, tint.b),
            scale(a, tint.a),
        );
        self.fill_rect(rect, color);
    }

    fn draw_text(&mut self, at: Point, text: &str, color: Color) {
        self.ctx.print(
            at.x,
            self.height - at.y,
            Line::styled(text.to_string(), Style::default().fg(blend(color))),
        );
    }
}

pub fn render_ui(frame: &mut ratatui::Frame, app: &App) {
    let size = frame.size();
    let theme = scope_theme();
    let input_height = if matches!(app.input, InputMode::AddFilter(_)) { 3 } else { 0 };
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(0),
            Constraint::Length(input_height),
        ])
        .split(size);
    frame.render_widget(render_status(app, theme), layout[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(layout[1]);
    render_canvas(frame, app, theme, body[0]);

    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(30),
            Constraint::Percentage(35),
            Constraint::Percentage(35),
        ])
        .split(body[1]);
    frame.render_widget(render_threads(app, theme), side[0]);
    frame.render_widget(render_filters(app, theme), side[1]);
    frame.render_widget(render_logs(app, theme), side[2]);

    if let InputMode::AddFilter(buffer) = &app.input {
        frame.render_widget(render_input(buffer, theme), layout[2]);
    }
    if app.help_open {
        render_help_overlay(frame, theme);
    }
}

fn panel<'a>(title: &'a str, theme: ScopeTheme, focused: bool) -> Block<'a> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if focused { theme.accent } else { theme.border }))
        .style(Style::default().bg(theme.bg))
        .title(Span::styled(
            title,
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ))
}

fn render_status(app: &App, theme: ScopeTheme) -> Paragraph<'static> {
    let history = app.session.history();
    let window = match (history.oldest_available(), history.newest_available()) {
        (Some(oldest), Some(newest)) => format!("[{oldest}..{newest}]"),
        _ => "[empty]".to_string(),
    };
    let displayed = app
        .session
        .playback()
        .displayed()
        .map(|n| n.to_string())
        .unwrap_or_else(|| "-".to_string());
    let state = app.manager.state();
    let state_color = match state {
        ConnectionState::Connected => theme.ok,
        ConnectionState::Disconnected => theme.critical,
        _ => theme.warn,
    };

    let mut first = vec![
        Span::styled(format!("Stream: {}", state.label()), Style::default().fg(state_color)),
        Span::raw("  "),
        Span::raw(format!("Playback: {}", app.session.playback().state().label())),
        Span::raw("  "),
        Span::raw(format!("Frame: {displayed} {window}")),
    ];
    if let Some(frame) = app.session.displayed_frame() {
        let stats = frame.stats();
        let range = frame.active_range();
        first.push(Span::styled(
            format!(
                "  draws:{} logs:{} range:{}..{}",
                stats.draw_calls, stats.logs, range.min, range.max
            ),
            Style::default().fg(theme.muted),
        ));
    }

    let second = match (&app.alert, &app.status_note) {
        (Some(alert), _) => Span::styled(format!("Alert: {alert}"), Style::default().fg(theme.critical)),
        (None, Some(note)) => Span::styled(note.clone(), Style::default().fg(theme.warn)),
        (None, None) => Span::styled(
            format!(
                "view {} x{:.2}  auto-reconnect {}  received {}  (? help)",
                app.orientation.label(),
                app.scale,
                if app.manager.auto_reconnect() { "on" } else { "off" },
                app.frames_received
            ),
            Style::default().fg(theme.muted),
        ),
    };

    Paragraph::new(Text::from(vec![Line::from(first), Line::from(second)]))
        .style(Style::default().fg(theme.text).bg(theme.bg))
        .block(panel("Status", theme, false))
}

/// Canvas coordinate space for a frame painted at `scale`. Must match the
/// transform the painter applies.
fn canvas_bounds(size: Size, scale: f64, orientation: Orientation) -> Size {
    let bounds = view_size(size, scale, orientation);
    Size::new(bounds.width.max(1.0), bounds.height.max(1.0))
}

fn render_canvas(frame: &mut ratatui::Frame, app: &App, theme: ScopeTheme, area: Rect) {
    let Some(displayed) = app.session.displayed_frame() else {
        frame.render_widget(
            Paragraph::new(Line::from(Span::styled(
                "waiting for frames",
                Style::default().fg(theme.muted),
            )))
            .block(panel("Frame", theme, false)),
            area,
        );
        return;
    };
    let bounds = canvas_bounds(displayed.size(), app.scale, app.orientation);
    let stats: Cell<Option<RenderStats>> = Cell::new(None);
    let title = format!("Frame {}", displayed.frame_number());
    let canvas = Canvas::default()
        .block(panel(&title, theme, false))
        .background_color(theme.bg)
        .marker(Marker::Braille)
        .x_bounds([0.0, bounds.width])
        .y_bounds([0.0, bounds.height])
        .paint(|ctx| {
            let mut painter = CanvasPainter {
                ctx,
                height: bounds.height,
            };
            stats.set(app.session.render_displayed(&mut painter, app.scale, app.orientation));
        });
    frame.render_widget(canvas, area);
    if let Some(stats) = stats.get() {
        if stats.pending_images > 0 && area.height > 2 {
            let note = Rect::new(area.x + 2, area.y + area.height - 1, area.width.saturating_sub(4), 1);
            frame.render_widget(
                Paragraph::new(Span::styled(
                    format!("{} image(s) decoding", stats.pending_images),
                    Style::default().fg(theme.muted),
                )),
                note,
            );
        }
    }
}

fn cursor_marker(selected: bool) -> &'static str {
    if selected {
        ">> "
    } else {
        "   "
    }
}

fn render_threads(app: &App, theme: ScopeTheme) -> Paragraph<'static> {
    let focused = app.focus == Focus::Threads;
    let lines: Vec<Line<'static>> = app
        .session
        .threads()
        .iter()
        .enumerate()
        .map(|(idx, thread)| {
            let mut spans = vec![
                Span::raw(cursor_marker(focused && idx == app.thread_cursor)),
                Span::styled(
                    if thread.enabled { "[x] " } else { "[ ] " },
                    Style::default().fg(if thread.enabled { theme.ok } else { theme.muted }),
                ),
                Span::raw(thread.name.clone()),
            ];
            if thread.override_filtering {
                spans.push(Span::styled(
                    format!("  ■ {} {:.2}", thread.override_color, thread.override_alpha),
                    Style::default().fg(blend(thread.override_color)),
                ));
            }
            Line::from(spans)
        })
        .collect();
    Paragraph::new(Text::from(lines))
        .style(Style::default().fg(theme.text).bg(theme.bg))
        .block(panel("Threads", theme, focused))
}

fn render_filters(app: &App, theme: ScopeTheme) -> Paragraph<'static> {
    let focused = app.focus == Focus::Filters;
    let lines: Vec<Line<'static>> = app
        .session
        .filters()
        .filters()
        .iter()
        .enumerate()
        .map(|(idx, filter)| {
            let action = &filter.action;
            let (label, color) = if action.skip_draw {
                ("skip".to_string(), theme.muted)
            } else if let Some(color) = action.color {
                (color.to_string(), blend(color))
            } else {
                ("inherit".to_string(), theme.text)
            };
            let alpha = action
                .alpha
                .map(|alpha| format!(" a={alpha:.2}"))
                .unwrap_or_default();
            Line::from(vec![
                Span::raw(cursor_marker(focused && idx == app.filter_cursor)),
                Span::styled(
                    if filter.enabled { "[x] " } else { "[ ] " },
                    Style::default().fg(if filter.enabled { theme.ok } else { theme.muted }),
                ),
                Span::raw(filter.selector.label()),
                Span::raw(" -> "),
                Span::styled(format!("{label}{alpha}"), Style::default().fg(color)),
            ])
        })
        .collect();
    Paragraph::new(Text::from(lines))
        .style(Style::default().fg(theme.text).bg(theme.bg))
        .block(panel("Filters", theme, focused))
}

fn render_logs(app: &App, theme: ScopeTheme) -> Paragraph<'static> {
    let lines: Vec<Line<'static>> = app
        .session
        .displayed_logs()
        .into_iter()
        .map(|log| {
            Line::from(vec![
                Span::styled(
                    format!("{:>4} {} ", log.submission_index, log.thread_name),
                    Style::default().fg(theme.muted),
                ),
                Span::styled(log.text, Style::default().fg(blend(log.color))),
            ])
        })
        .collect();
    Paragraph::new(Text::from(lines))
        .style(Style::default().fg(theme.text).bg(theme.bg))
        .block(panel("Logs", theme, false))
        .wrap(Wrap { trim: false })
}

fn render_input(buffer: &str, theme: ScopeTheme) -> Paragraph<'static> {
    Paragraph::new(Line::from(vec![
        Span::styled("filter> ", Style::default().fg(theme.accent)),
        Span::raw(buffer.to_string()),
        Span::styled("_", Style::default().fg(theme.muted)),
    ]))
    .style(Style::default().fg(theme.text).bg(theme.bg))
    .block(panel("Add filter (anno file= func= #rrggbb alpha= skip)", theme, true))
}

fn help_section(title: &'static str, theme: ScopeTheme) -> Line<'static> {
    Line::from(Span::styled(
        title,
        Style::default()
            .fg(theme.accent)
            .add_modifier(Modifier::BOLD),
    ))
}

fn render_help_overlay(frame: &mut ratatui::Frame, theme: ScopeTheme) {
    let area = centered_rect(70, 80, frame.size());
    let lines = vec![
        help_section("Playback", theme),
        Line::from("  Space    toggle live / pause"),
        Line::from("  l        go live"),
        Line::from("  <- / ->  previous / next buffered frame"),
        Line::from("  Home/End oldest / newest frame"),
        Line::from("  f        freeze first submission / unfreeze"),
        Line::from("  < / >    slide frozen window"),
        Line::from("  { / }    shrink / grow frozen window"),
        Line::from(""),
        help_section("View", theme),
        Line::from("  r        cycle orientation"),
        Line::from("  + / - 0  zoom in / out / reset"),
        Line::from(""),
        help_section("Threads & Filters", theme),
        Line::from("  Tab      switch focus"),
        Line::from("  j/k      move selection"),
        Line::from("  t/Enter  toggle selected"),
        Line::from("  o / a    thread override color / alpha"),
        Line::from("  n        add filter"),
        Line::from("  d        delete filter"),
        Line::from("  J/K      move filter down / up"),
        Line::from(""),
        help_section("Stream", theme),
        Line::from("  c        connect"),
        Line::from("  x        stop stream"),
        Line::from("  R        toggle auto-reconnect"),
        Line::from("  ? or F1  toggle this help"),
        Line::from("  q        quit"),
    ];
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(Text::from(lines))
            .style(Style::default().fg(theme.text).bg(theme.surface))
            .block(panel("Help", theme, false).style(Style::default().bg(theme.surface)))
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100u16.saturating_sub(percent_y)) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100u16.saturating_sub(percent_y)) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100u16.saturating_sub(percent_x)) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100u16.saturating_sub(percent_x)) / 2),
        ])
        .split(vertical[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpha_blends_toward_the_canvas_background() {
        assert_eq!(blend(Color::RED), TuiColor::Rgb(255, 0, 0));
        assert_eq!(
            blend(Color::RED.with_alpha(0)),
            TuiColor::Rgb(CANVAS_BG.0, CANVAS_BG.1, CANVAS_BG.2)
        );
    }

    #[test]
    fn canvas_bounds_follow_zoom_and_rotation() {
        let size = Size::new(100.0, 50.0);
        assert_eq!(canvas_bounds(size, 1.0, Orientation::Rotate0), Size::new(100.0, 50.0));
        assert_eq!(canvas_bounds(size, 2.0, Orientation::Rotate0), Size::new(200.0, 100.0));
        assert_eq!(canvas_bounds(size, 2.0, Orientation::Rotate90), Size::new(100.0, 200.0));
        assert_eq!(canvas_bounds(size, 0.001, Orientation::Rotate0), Size::new(1.0, 1.0));
    }

    #[test]
    fn help_overlay_is_centered() {
        let area = centered_rect(50, 50, Rect::new(0, 0, 100, 40));
        assert_eq!(area, Rect::new(25, 10, 50, 20));
    }
}
