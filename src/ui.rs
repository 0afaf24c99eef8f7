//! Terminal interface: today's schedule, open reminder prompts, the dose
//! history and the add/delete forms.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use log::warn;
use ratatui::{prelude::*, widgets::*};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::error::ReminderError;
use crate::model::{DoseStatus, LogRecord, MedicineEntry, TIMESTAMP_FMT, validate_name};
use crate::notify::{Prompt, PromptBoard};
use crate::reminder::{ReminderEvent, ReminderHandle, Resolution, Stage};
use crate::store::RecordStore;

const MAX_ACTIVITY: usize = 50;
const HISTORY_ROWS: usize = 30;

// ============================================================================
// Theme
// ============================================================================

#[derive(Clone, Copy)]
pub struct Theme {
    pending_color: Color,
    taken_color: Color,
    missed_color: Color,
    border_color: Color,
    accent_color: Color,
}

pub const THEMES: [&str; 3] = ["default", "nord", "dracula"];

pub fn get_theme(name: &str) -> Theme {
    match name {
        "nord" => Theme {
            pending_color: Color::Rgb(235, 203, 139),
            taken_color: Color::Rgb(163, 190, 140),
            missed_color: Color::Rgb(191, 97, 106),
            border_color: Color::Rgb(129, 161, 193),
            accent_color: Color::Rgb(136, 192, 208),
        },
        "dracula" => Theme {
            pending_color: Color::Rgb(241, 250, 140),
            taken_color: Color::Rgb(80, 250, 123),
            missed_color: Color::Rgb(255, 85, 85),
            border_color: Color::Rgb(189, 147, 249),
            accent_color: Color::Rgb(255, 121, 198),
        },
        _ => Theme {
            pending_color: Color::Yellow,
            taken_color: Color::Green,
            missed_color: Color::Red,
            border_color: Color::Rgb(0, 200, 255),
            accent_color: Color::Rgb(255, 100, 0),
        },
    }
}

// ============================================================================
// Application State
// ============================================================================

#[derive(PartialEq, Clone, Copy)]
enum View {
    Schedule,
    History,
    Help,
}

#[derive(PartialEq, Clone, Copy)]
enum InputMode {
    Normal,
    AddingName,
    AddingTime,
    ConfirmingDelete,
}

pub struct AppState {
    handle: ReminderHandle,
    store: Arc<dyn RecordStore>,
    board: PromptBoard,
    events: broadcast::Receiver<ReminderEvent>,
    medicines: Vec<MedicineEntry>,
    logs: Vec<LogRecord>,
    prompts: Vec<Prompt>,
    final_warnings: HashSet<String>,
    view: View,
    mode: InputMode,
    input: String,
    draft_name: String,
    selected_medicine: Option<usize>,
    selected_prompt: usize,
    status: Option<(String, bool)>,
    activity: VecDeque<String>,
    theme: Theme,
    animation_frame: u8,
}

impl AppState {
    pub fn new(
        handle: ReminderHandle,
        store: Arc<dyn RecordStore>,
        board: PromptBoard,
        theme_name: &str,
    ) -> Self {
        let events = handle.subscribe();
        let mut app = Self {
            handle,
            store,
            board,
            events,
            medicines: Vec::new(),
            logs: Vec::new(),
            prompts: Vec::new(),
            final_warnings: HashSet::new(),
            view: View::Schedule,
            mode: InputMode::Normal,
            input: String::new(),
            draft_name: String::new(),
            selected_medicine: None,
            selected_prompt: 0,
            status: None,
            activity: VecDeque::new(),
            theme: get_theme(theme_name),
            animation_frame: 0,
        };
        app.refresh();
        app.refresh_stages();
        app
    }

    fn refresh(&mut self) {
        match self.store.load_medicines() {
            Ok(m) => self.medicines = m,
            Err(e) => self.set_error(format!("Could not read medicines: {e}")),
        }
        match self.store.load_logs() {
            Ok(l) => self.logs = l,
            Err(e) => self.set_error(format!("Could not read history: {e}")),
        }
        self.selected_medicine = match (self.medicines.len(), self.selected_medicine) {
            (0, _) => None,
            (n, Some(i)) => Some(i.min(n - 1)),
            (_, None) => Some(0),
        };
    }

    fn refresh_stages(&mut self) {
        match self.handle.blocking_open_reminders() {
            Ok(open) => {
                self.final_warnings = open
                    .into_iter()
                    .filter(|r| r.stage == Stage::FinalWarning)
                    .map(|r| r.name)
                    .collect();
            }
            Err(e) => warn!("Could not fetch open reminders: {e}"),
        }
    }

    /// Called once per frame.
    pub fn update(&mut self) {
        let mut changed = false;
        let mut any = false;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    any = true;
                    changed |= matches!(event, ReminderEvent::Resolved(_));
                    self.push_activity(describe(&event));
                }
                Err(TryRecvError::Lagged(n)) => warn!("Activity feed skipped {n} events"),
                Err(_) => break,
            }
        }
        if changed {
            self.refresh();
        }
        if any {
            self.refresh_stages();
        }

        self.prompts = self.board.prompts();
        if self.selected_prompt >= self.prompts.len() {
            self.selected_prompt = self.prompts.len().saturating_sub(1);
        }
        self.animation_frame = self.animation_frame.wrapping_add(1) % 20;
    }

    fn push_activity(&mut self, line: String) {
        let stamp = chrono::Local::now().format("%H:%M");
        self.activity.push_front(format!("{stamp}  {line}"));
        self.activity.truncate(MAX_ACTIVITY);
    }

    fn set_info(&mut self, msg: String) {
        self.status = Some((msg, false));
    }

    fn set_error(&mut self, msg: String) {
        self.status = Some((msg, true));
    }

    fn answer(&mut self, status: DoseStatus) {
        let Some(prompt) = self.prompts.get(self.selected_prompt).cloned() else {
            self.set_error("No reminder is waiting for an answer".into());
            return;
        };
        match self.handle.blocking_resolve(&prompt.name, status) {
            Ok(Resolution::Logged(rec)) => {
                self.set_info(format!("{} {} logged as {}", rec.status.icon(), rec.name, rec.status));
            }
            Ok(Resolution::AlreadyClosed) => {
                self.set_info(format!("{} was already resolved", prompt.name));
            }
            Err(e) => self.set_error(format!("Could not save answer for {}: {e}", prompt.name)),
        }
        self.prompts = self.board.prompts();
    }

    fn submit_name(&mut self) {
        match validate_name(&self.input) {
            Ok(name) if self.medicines.iter().any(|m| m.name == name) => {
                self.set_error(format!("{name} is already scheduled"));
            }
            Ok(name) => {
                self.draft_name = name;
                self.input.clear();
                self.status = None;
                self.mode = InputMode::AddingTime;
            }
            Err(e) => self.set_error(e.to_string()),
        }
    }

    fn submit_time(&mut self) {
        match self.store.add_medicine(&self.draft_name, &self.input) {
            Ok(entry) => {
                self.set_info(format!("Medicine '{}' added for {}!", entry.name, entry.time));
                self.mode = InputMode::Normal;
                self.input.clear();
                self.draft_name.clear();
                self.refresh();
                self.selected_medicine = Some(self.medicines.len().saturating_sub(1));
            }
            Err(e @ ReminderError::Duplicate(_)) => {
                self.set_error(e.to_string());
                self.input = std::mem::take(&mut self.draft_name);
                self.mode = InputMode::AddingName;
            }
            Err(e) => self.set_error(e.to_string()),
        }
    }

    fn delete_selected(&mut self) {
        let Some(name) = self.selected_medicine.and_then(|i| self.medicines.get(i)).map(|m| m.name.clone()) else {
            return;
        };
        match self.store.remove_medicine(&name) {
            Ok(_) => self.set_info(format!("Removed {name}")),
            Err(e) => self.set_error(format!("Could not remove {name}: {e}")),
        }
        self.refresh();
    }
}

fn describe(event: &ReminderEvent) -> String {
    match event {
        ReminderEvent::Opened { name, .. } => format!("🔔 Time to take {name}"),
        ReminderEvent::Realerted { name } => format!("⚠️  Still waiting on {name}"),
        ReminderEvent::Resolved(rec) => format!("{} {}: {}", rec.status.icon(), rec.name, rec.status),
        ReminderEvent::Reset { cleared } => format!("🌙 New day, {cleared} reminder(s) carried over from yesterday"),
    }
}

// ============================================================================
// Event Handlers
// ============================================================================

/// Returns true when the user asked to quit.
pub fn handle_input(key: KeyEvent, app: &mut AppState) -> bool {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }

    match app.mode {
        InputMode::AddingName | InputMode::AddingTime => {
            match key.code {
                KeyCode::Char(c) => app.input.push(c),
                KeyCode::Backspace => { app.input.pop(); }
                KeyCode::Enter => {
                    if app.mode == InputMode::AddingName { app.submit_name() } else { app.submit_time() }
                }
                KeyCode::Esc => {
                    app.mode = InputMode::Normal;
                    app.input.clear();
                    app.draft_name.clear();
                    app.status = None;
                }
                _ => {}
            }
            return false;
        }
        InputMode::ConfirmingDelete => {
            match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => {
                    app.delete_selected();
                    app.mode = InputMode::Normal;
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => app.mode = InputMode::Normal,
                _ => {}
            }
            return false;
        }
        InputMode::Normal => {}
    }

    if app.view != View::Schedule {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => app.view = View::Schedule,
            KeyCode::Char('l') if app.view == View::History => app.view = View::Schedule,
            KeyCode::Char('?') if app.view == View::Help => app.view = View::Schedule,
            _ => {}
        }
        return false;
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return true,
        KeyCode::Char('t') => app.answer(DoseStatus::Taken),
        KeyCode::Char('x') => app.answer(DoseStatus::Missed),
        KeyCode::Left => app.selected_prompt = app.selected_prompt.saturating_sub(1),
        KeyCode::Right => {
            if app.selected_prompt + 1 < app.prompts.len() {
                app.selected_prompt += 1;
            }
        }
        KeyCode::Down | KeyCode::Char('j') => {
            if !app.medicines.is_empty() {
                app.selected_medicine = Some(match app.selected_medicine {
                    Some(idx) => (idx + 1).min(app.medicines.len() - 1),
                    None => 0,
                });
            }
        }
        KeyCode::Up | KeyCode::Char('k') => {
            if !app.medicines.is_empty() {
                app.selected_medicine = Some(app.selected_medicine.map_or(0, |i| i.saturating_sub(1)));
            }
        }
        KeyCode::Char('a') => {
            app.mode = InputMode::AddingName;
            app.input.clear();
            app.status = None;
        }
        KeyCode::Char('d') => {
            if app.selected_medicine.is_some() {
                app.mode = InputMode::ConfirmingDelete;
            }
        }
        KeyCode::Char('r') => app.refresh(),
        KeyCode::Char('l') => app.view = View::History,
        KeyCode::Char('?') | KeyCode::Char('h') => app.view = View::Help,
        _ => {}
    }
    false
}

// ============================================================================
// UI Rendering
// ============================================================================

pub fn render_ui(f: &mut Frame, app: &AppState) {
    match app.view {
        View::Schedule => render_schedule(f, app),
        View::History => render_history(f, app),
        View::Help => render_help(f, app),
    }
    if matches!(app.mode, InputMode::AddingName | InputMode::AddingTime | InputMode::ConfirmingDelete) {
        render_form(f, app);
    }
}

fn panel<'a>(title: &'a str, app: &AppState) -> Block<'a> {
    Block::default()
        .title(title)
        .title_alignment(Alignment::Center)
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(app.theme.border_color))
}

fn render_schedule(f: &mut Frame, app: &AppState) {
    let prompt_height = (app.prompts.len().max(1) as u16) + 4;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(prompt_height),
            Constraint::Min(6),
            Constraint::Length(1),
            Constraint::Length(2),
        ])
        .split(f.size());

    // Header
    let now = chrono::Local::now();
    let header = Paragraph::new(Line::from(vec![
        Span::styled(now.format("%A, %B %d").to_string(), Style::default().fg(Color::Gray)),
        Span::raw("  •  "),
        Span::styled(now.format("%H:%M").to_string(), Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
    ]))
    .alignment(Alignment::Center)
    .block(Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(app.theme.border_color))
        .title(Span::styled(" 💊 MEDMINDER ", Style::default()
            .fg(app.theme.accent_color).add_modifier(Modifier::BOLD))));
    f.render_widget(header, chunks[0]);

    render_prompts(f, app, chunks[1]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(chunks[2]);
    render_medicines(f, app, body[0]);
    render_activity(f, app, body[1]);

    // Status
    if let Some((msg, is_error)) = &app.status {
        let color = if *is_error { app.theme.missed_color } else { app.theme.taken_color };
        f.render_widget(
            Paragraph::new(msg.as_str()).style(Style::default().fg(color)).alignment(Alignment::Center),
            chunks[3],
        );
    }

    // Controls
    let controls = vec![
        Line::from(vec![
            span_key("T", app), Span::raw(" Taken  •  "),
            span_key("X", app), Span::raw(" Missed  •  "),
            span_key("←→", app), Span::raw(" Pick reminder  •  "),
            span_key("A", app), Span::raw(" Add  •  "),
            span_key("D", app), Span::raw(" Delete"),
        ]),
        Line::from(vec![
            span_key("L", app), Span::raw(" History  •  "),
            span_key("R", app), Span::raw(" Reload  •  "),
            span_key("?", app), Span::raw(" Help  •  "),
            span_key("Q", app), Span::raw(" Quit"),
        ]),
    ];
    f.render_widget(
        Paragraph::new(controls).alignment(Alignment::Center).style(Style::default().fg(Color::DarkGray)),
        chunks[4],
    );
}

fn render_prompts(f: &mut Frame, app: &AppState, area: Rect) {
    let mut lines = vec![Line::from("")];

    if app.prompts.is_empty() {
        lines.push(Line::from(Span::styled("  Nothing due right now.", Style::default().fg(Color::DarkGray))));
    } else {
        let bell = if app.animation_frame < 10 { "🔔" } else { "  " };
        for (idx, prompt) in app.prompts.iter().enumerate() {
            let selected = idx == app.selected_prompt;
            let last_call = app.final_warnings.contains(&prompt.name);
            let waited = prompt.posted_at.elapsed().as_secs() / 60;
            let style = if selected {
                Style::default().fg(app.theme.pending_color).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Gray)
            };
            lines.push(Line::from(vec![
                Span::styled(if selected { "► " } else { "  " }, style),
                Span::raw(bell),
                Span::styled(format!(" Did you take your medicine: {}?", prompt.name), style),
                Span::styled(format!("  ({waited}m)"), Style::default().fg(Color::DarkGray)),
                Span::styled(if last_call { "  ⚠️ last call" } else { "" }, Style::default().fg(app.theme.missed_color)),
                Span::raw("   "),
                Span::styled("[t] Taken ✅", Style::default().fg(app.theme.taken_color)),
                Span::raw("  "),
                Span::styled("[x] Missed ❌", Style::default().fg(app.theme.missed_color)),
            ]));
        }
    }

    f.render_widget(Paragraph::new(lines).block(panel(" Reminders ", app)), area);
}

fn render_medicines(f: &mut Frame, app: &AppState, area: Rect) {
    let mut lines = vec![Line::from("")];

    if app.medicines.is_empty() {
        lines.push(Line::from(Span::styled("  No medicines yet! Press 'a' to add one.", Style::default().fg(Color::Gray))));
    } else {
        for (idx, med) in app.medicines.iter().enumerate() {
            let selected = app.selected_medicine == Some(idx);
            let waiting = app.prompts.iter().any(|p| p.name == med.name);
            let style = if selected {
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Gray)
            };
            lines.push(Line::from(vec![
                Span::styled(
                    if selected { "► " } else { "  " },
                    if selected { Style::default().fg(app.theme.accent_color).add_modifier(Modifier::BOLD) } else { Style::default() },
                ),
                Span::styled(med.time.to_string(), Style::default().fg(app.theme.accent_color)),
                Span::raw("  "),
                Span::styled(med.name.as_str(), style),
                Span::styled(if waiting { "  ⏳" } else { "" }, Style::default().fg(app.theme.pending_color)),
            ]));
        }
    }

    f.render_widget(Paragraph::new(lines).block(panel(" Schedule ", app)), area);
}

fn render_activity(f: &mut Frame, app: &AppState, area: Rect) {
    let lines: Vec<Line> = if app.activity.is_empty() {
        vec![Line::from(""), Line::from(Span::styled("  Waiting for the next reminder…", Style::default().fg(Color::DarkGray)))]
    } else {
        app.activity.iter().map(|a| Line::from(format!(" {a}"))).collect()
    };
    f.render_widget(
        Paragraph::new(lines).wrap(Wrap { trim: false }).block(panel(" Activity ", app)),
        area,
    );
}

fn render_history(f: &mut Frame, app: &AppState) {
    let area = centered_rect(75, 85, f.size());

    let mut lines = vec![
        Line::from(""),
        Line::from(Span::styled("📜 DOSE HISTORY", Style::default().fg(app.theme.accent_color).add_modifier(Modifier::BOLD))),
        Line::from(""),
        Line::from(Span::styled(format!("  Last {HISTORY_ROWS} entries:"), Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC))),
        Line::from(""),
    ];

    if app.logs.is_empty() {
        lines.push(Line::from(Span::styled("  Nothing logged yet!", Style::default().fg(Color::DarkGray))));
    } else {
        for rec in app.logs.iter().rev().take(HISTORY_ROWS) {
            let color = match rec.status {
                DoseStatus::Taken => app.theme.taken_color,
                DoseStatus::Missed | DoseStatus::MissedAuto => app.theme.missed_color,
            };
            lines.push(Line::from(vec![
                Span::raw("  "),
                Span::raw(rec.status.icon()),
                Span::raw(" "),
                Span::styled(rec.timestamp.format(TIMESTAMP_FMT).to_string(), Style::default().fg(Color::Gray)),
                Span::raw(" • "),
                Span::styled(rec.name.as_str(), Style::default().fg(Color::White)),
                Span::raw(" • "),
                Span::styled(rec.status.label(), Style::default().fg(color)),
            ]));
        }
    }

    f.render_widget(Paragraph::new(lines).block(panel(" History ", app)), area);
}

fn render_help(f: &mut Frame, app: &AppState) {
    let area = centered_rect(70, 85, f.size());

    let help_text = vec![
        Line::from(""),
        Line::from(Span::styled("⌨️  KEYBOARD SHORTCUTS", Style::default().fg(app.theme.accent_color).add_modifier(Modifier::BOLD))),
        Line::from(""),
        Line::from("  Reminders:"),
        help_line("T", "Mark selected reminder as taken"),
        help_line("X", "Mark selected reminder as missed"),
        help_line("← →", "Switch between open reminders"),
        Line::from(""),
        Line::from("  Schedule:"),
        help_line("A", "Add a medicine (name, then HH:MM)"),
        help_line("D", "Delete selected medicine"),
        help_line("↑↓ / JK", "Move selection"),
        help_line("R", "Reload from disk"),
        Line::from(""),
        Line::from("  General:"),
        help_line("L", "Dose history"),
        help_line("? / H", "Toggle help"),
        help_line("Q / Esc", "Exit / Go back"),
        help_line("Ctrl+C", "Force quit"),
        Line::from(""),
        Line::from(Span::styled("💡 Unanswered reminders repeat once, then are logged as Missed (Auto)",
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC))),
    ];

    f.render_widget(Paragraph::new(help_text).block(panel(" Help ", app)), area);
}

fn render_form(f: &mut Frame, app: &AppState) {
    let area = centered_rect(50, 30, f.size());

    let mut lines = vec![Line::from("")];
    match app.mode {
        InputMode::ConfirmingDelete => {
            let name = app.selected_medicine.and_then(|i| app.medicines.get(i)).map_or("", |m| m.name.as_str());
            lines.push(Line::from(Span::styled("  ⚠️  DELETE MEDICINE?", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD))));
            lines.push(Line::from(""));
            lines.push(Line::from(vec![Span::raw("  "), Span::styled(name, Style::default().fg(Color::White))]));
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled("  Y: Confirm  •  N/Esc: Cancel", Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC))));
        }
        _ => {
            let label = if app.mode == InputMode::AddingName {
                "  Medicine Name:".to_string()
            } else {
                format!("  Time for {} (24Hr Format HH:MM):", app.draft_name)
            };
            lines.push(Line::from(Span::styled(label, Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))));
            lines.push(Line::from(""));
            lines.push(Line::from(vec![
                Span::raw("  "),
                Span::styled(app.input.as_str(), Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
                Span::styled("█", Style::default().fg(Color::Green)),
            ]));
            lines.push(Line::from(""));
            if let Some((msg, true)) = &app.status {
                lines.push(Line::from(Span::styled(format!("  {msg}"), Style::default().fg(app.theme.missed_color))));
            }
            lines.push(Line::from(Span::styled("  Enter: Next  •  Esc: Cancel", Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC))));
        }
    }

    f.render_widget(Clear, area);
    f.render_widget(Paragraph::new(lines).block(panel(" Add Medicine Reminder ", app)), area);
}

fn span_key<'a>(text: &'a str, app: &AppState) -> Span<'a> {
    Span::styled(text, Style::default().fg(app.theme.accent_color).add_modifier(Modifier::BOLD))
}

fn help_line<'a>(key: &'a str, desc: &'a str) -> Line<'a> {
    Line::from(vec![
        Span::raw("    "),
        Span::styled(key, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(format!("  {}", desc)),
    ])
}

fn centered_rect(w: u16, h: u16, r: Rect) -> Rect {
    let v = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h) / 2),
            Constraint::Percentage(h),
            Constraint::Percentage((100 - h) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w) / 2),
            Constraint::Percentage(w),
            Constraint::Percentage((100 - w) / 2),
        ])
        .split(v[1])[1]
}
