use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Clear, List, ListItem, ListState, Paragraph, Tabs, Wrap};

use super::app::{App, LogKind, Popup};

const HELP: &str = "q quit  ↑↓/jk move  ←→/hl/Tab tab  1-9 jump  Enter run  m machine  x cancel  c clear  y copy  r refresh  p ping";

pub fn draw(f: &mut Frame, app: &App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(f.area());

    draw_tabs(f, app, rows[0]);
    draw_machine_bar(f, app, rows[1]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(38), Constraint::Percentage(62)])
        .split(rows[2]);
    draw_actions(f, app, body[0]);
    draw_log(f, app, body[1]);
    draw_status(f, app, rows[3]);

    match &app.popup {
        Popup::None => {}
        Popup::Confirm { label } => draw_confirm(f, label),
        Popup::ConfirmQuit { running } => draw_confirm_quit(f, *running),
        Popup::Pick(_) => draw_picker(f, app),
    }
}

fn rounded(title: impl Into<String>) -> Block<'static> {
    Block::default()
        .title(title.into())
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
}

fn draw_tabs(f: &mut Frame, app: &App, area: Rect) {
    let titles = app
        .tabs
        .iter()
        .enumerate()
        .map(|(i, c)| Line::from(format!("{} {}", i + 1, c.title())))
        .collect::<Vec<_>>();
    let tabs = Tabs::new(titles)
        .select(app.tab)
        .block(rounded(" manage "))
        .highlight_style(Style::default().fg(Color::Black).bg(Color::LightYellow));
    f.render_widget(tabs, area);
}

fn draw_machine_bar(f: &mut Frame, app: &App, area: Rect) {
    let mut spans = vec![
        Span::raw(" Machine: "),
        Span::styled(
            app.machine().unwrap_or("none").to_string(),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
    ];
    if !app.remotes.is_empty() {
        spans.push(Span::raw("   Remotes:"));
        for remote in &app.remotes {
            let (mark, color) = match remote.reachable {
                Some(true) => ("●", Color::Green),
                Some(false) => ("●", Color::Red),
                None => ("○", Color::DarkGray),
            };
            spans.push(Span::raw(format!(" {} ", remote.name)));
            spans.push(Span::styled(mark, Style::default().fg(color)));
        }
    }
    if app.is_running() {
        spans.push(Span::styled(
            format!("   {} {}", app.spinner_frame(), app.running_labels().join(", ")),
            Style::default().fg(Color::Yellow),
        ));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_actions(f: &mut Frame, app: &App, area: Rect) {
    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(5)])
        .split(area);

    let items: Vec<ListItem> = app
        .actions()
        .iter()
        .map(|def| {
            let mut spans = vec![Span::raw(def.label.clone())];
            if def.dangerous {
                spans.push(Span::styled(" [!]", Style::default().fg(Color::Red)));
            }
            if def.cache.is_some() {
                spans.push(Span::styled(" ⏱", Style::default().fg(Color::DarkGray)));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let title = app
        .category()
        .map(|c| format!(" {} ", c.title()))
        .unwrap_or_default();
    let list = List::new(items)
        .block(rounded(title))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("> ");
    let mut state = ListState::default().with_selected(Some(app.selected_index()));
    f.render_stateful_widget(list, parts[0], &mut state);

    let description = match app.selected_action() {
        Some(def) => {
            let mut lines = vec![Line::from(def.description.clone())];
            let mut flags = Vec::new();
            if def.dangerous {
                flags.push("dangerous");
            }
            if def.requires_machine {
                flags.push("needs machine");
            }
            if !flags.is_empty() {
                lines.push(Line::from(Span::styled(
                    flags.join(" · "),
                    Style::default().fg(Color::DarkGray),
                )));
            }
            lines
        }
        None => Vec::new(),
    };
    f.render_widget(
        Paragraph::new(description)
            .wrap(Wrap { trim: true })
            .block(rounded(" Description ")),
        parts[1],
    );
}

fn draw_log(f: &mut Frame, app: &App, area: Rect) {
    let height = area.height.saturating_sub(2) as usize;
    let end = app.log.len().saturating_sub(app.scroll);
    let start = end.saturating_sub(height);

    let lines: Vec<Line> = app
        .log
        .range(start..end)
        .map(|line| {
            let style = match line.kind {
                LogKind::Stdout => Style::default(),
                LogKind::Stderr => Style::default().fg(Color::Yellow),
                LogKind::Info => Style::default().fg(Color::Cyan),
                LogKind::Error => Style::default().fg(Color::Red),
            };
            let mut spans = Vec::with_capacity(2);
            if let Some(source) = &line.source {
                spans.push(Span::styled(format!("{source} │ "), Style::default().fg(Color::DarkGray)));
            }
            spans.push(Span::styled(line.text.clone(), style));
            Line::from(spans)
        })
        .collect();

    let title = if app.scroll > 0 {
        format!(" Output (scrolled {}) ", app.scroll)
    } else {
        " Output ".to_string()
    };
    f.render_widget(Paragraph::new(lines).block(rounded(title)), area);
}

fn draw_status(f: &mut Frame, app: &App, area: Rect) {
    let line = Line::from(vec![
        Span::styled(format!(" {} ", app.status), Style::default().add_modifier(Modifier::BOLD)),
        Span::styled(format!(" {HELP}"), Style::default().fg(Color::DarkGray)),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

fn draw_confirm(f: &mut Frame, label: &str) {
    let area = centered_rect(50, 20, f.area());
    f.render_widget(Clear, area);
    let text = vec![
        Line::from(format!("'{label}' is a dangerous action.")),
        Line::from(""),
        Line::from(vec![
            Span::raw("Run it? "),
            Span::styled("[y]", Style::default().fg(Color::Green)),
            Span::raw(" yes  "),
            Span::styled("[n]", Style::default().fg(Color::Red)),
            Span::raw(" no"),
        ]),
    ];
    let popup = Paragraph::new(text)
        .wrap(Wrap { trim: true })
        .block(rounded(" Confirm ").border_style(Style::default().fg(Color::Red)));
    f.render_widget(popup, area);
}

fn draw_confirm_quit(f: &mut Frame, running: usize) {
    let area = centered_rect(50, 20, f.area());
    f.render_widget(Clear, area);
    let text = vec![
        Line::from(format!("Quit and cancel {running} running action(s)?")),
        Line::from(""),
        Line::from(vec![
            Span::styled("[y]", Style::default().fg(Color::Green)),
            Span::raw(" quit  "),
            Span::styled("[n]", Style::default().fg(Color::Red)),
            Span::raw(" keep running"),
        ]),
    ];
    let popup = Paragraph::new(text)
        .wrap(Wrap { trim: true })
        .block(rounded(" Quit ").border_style(Style::default().fg(Color::Yellow)));
    f.render_widget(popup, area);
}

fn draw_picker(f: &mut Frame, app: &App) {
    let Popup::Pick(picker) = &app.popup else {
        return;
    };
    let area = centered_rect(50, 50, f.area());
    f.render_widget(Clear, area);

    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    let input = Paragraph::new(format!("{}_", picker.input))
        .block(rounded(format!(" {} for {} ", picker.name, picker.action)));
    f.render_widget(input, parts[0]);

    let items: Vec<ListItem> = picker
        .options
        .iter()
        .map(|o| ListItem::new(o.clone()))
        .collect();
    let list = List::new(items)
        .block(rounded(" Known values (Enter pick, Esc cancel) "))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    let mut state = ListState::default();
    if picker.input.is_empty() && !picker.options.is_empty() {
        state.select(Some(picker.selected));
    }
    f.render_stateful_widget(list, parts[1], &mut state);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn rendered(app: &App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|f| draw(f, app)).unwrap();
        let buffer = terminal.backend().buffer();
        buffer.content().iter().map(|c| c.symbol()).collect()
    }

    #[test]
    fn renders_tabs_machine_and_log() {
        let registry = Arc::new(Registry::with_builtins(&BTreeMap::new()).unwrap());
        let mut app = App::new(registry, vec!["superheavy".into()], Some("superheavy".into()), vec![]);
        app.push_log(LogKind::Stdout, "hello from the log");
        let screen = rendered(&app);
        assert!(screen.contains("NixOS"));
        assert!(screen.contains("superheavy"));
        assert!(screen.contains("hello from the log"));
    }

    #[test]
    fn renders_confirm_popup() {
        let registry = Arc::new(Registry::with_builtins(&BTreeMap::new()).unwrap());
        let mut app = App::new(registry, vec![], None, vec![]);
        app.popup = Popup::Confirm {
            label: "Rollback".into(),
        };
        assert!(rendered(&app).contains("dangerous action"));
    }

    #[test]
    fn renders_quit_popup_and_line_sources() {
        use super::super::app::LogLine;

        let registry = Arc::new(Registry::with_builtins(&BTreeMap::new()).unwrap());
        let mut app = App::new(registry, vec![], None, vec![]);
        app.log.push_back(LogLine {
            kind: LogKind::Stdout,
            text: "copying path".into(),
            source: Some("switch".into()),
        });
        app.popup = Popup::ConfirmQuit { running: 2 };
        let screen = rendered(&app);
        assert!(screen.contains("switch │ copying path"));
        assert!(screen.contains("cancel 2 running"));
    }
}
