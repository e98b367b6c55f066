use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::io::stdout;
use tracing::error;

use crate::directory::{ContactDirectory, DEFAULT_STATUS};
use crate::models::Contact;
use crate::truncate;

const STATUS_KEYS: [(char, &str); 4] = [
    ('n', DEFAULT_STATUS),
    ('c', "Contacted"),
    ('r', "Replied"),
    ('m', "Meeting Scheduled"),
];

fn status_for_key(key: char) -> Option<&'static str> {
    STATUS_KEYS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, status)| *status)
}

fn status_style(status: &str) -> Style {
    match status {
        DEFAULT_STATUS => Style::default(),
        "Contacted" => Style::default().fg(Color::Yellow),
        "Replied" => Style::default().fg(Color::Cyan),
        "Meeting Scheduled" => Style::default().fg(Color::Green),
        _ => Style::default().fg(Color::DarkGray),
    }
}

struct AppState {
    contacts: Vec<Contact>,
    selected: usize,
    scroll_offset: u16,
    message: Option<String>,
}

impl AppState {
    fn new(contacts: Vec<Contact>) -> Self {
        Self {
            contacts,
            selected: 0,
            scroll_offset: 0,
            message: None,
        }
    }

    fn current(&self) -> Option<&Contact> {
        self.contacts.get(self.selected)
    }

    fn next(&mut self) {
        if !self.contacts.is_empty() && self.selected < self.contacts.len() - 1 {
            self.selected += 1;
            self.scroll_offset = 0;
        }
    }

    fn prev(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.scroll_offset = 0;
        }
    }

    fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(3);
    }

    fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(3);
    }

    fn set_status(&mut self, directory: &ContactDirectory, status: &str) {
        let Some(id) = self.current().map(|c| c.id.clone()) else {
            return;
        };
        match directory.set_status(&id, status) {
            Ok(updated) => {
                self.message = Some(format!("{} -> {}", updated.full_name(), status));
                if let Some(c) = self.contacts.get_mut(self.selected) {
                    *c = updated;
                }
            }
            Err(e) => {
                error!(id = %id, error = %e, "status update failed");
                self.message = Some(format!("Update failed: {}", e));
            }
        }
    }
}

pub fn run_browse(directory: &ContactDirectory) -> Result<()> {
    let outcome = directory.load();
    if let Some(message) = outcome.error {
        println!("{}", message);
        return Ok(());
    }
    if outcome.contacts.is_empty() {
        println!("No contacts saved yet.");
        return Ok(());
    }

    let mut state = AppState::new(outcome.contacts);

    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut state, directory);

    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &mut AppState,
    directory: &ContactDirectory,
) -> Result<()> {
    let mut list_state = ListState::default();
    list_state.select(Some(0));

    loop {
        terminal.draw(|frame| draw(frame, state, &mut list_state))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Down | KeyCode::Char('j') => state.next(),
                KeyCode::Up | KeyCode::Char('k') => state.prev(),
                KeyCode::Char('J') | KeyCode::PageDown => state.scroll_down(),
                KeyCode::Char('K') | KeyCode::PageUp => state.scroll_up(),
                KeyCode::Char(c) => {
                    if let Some(status) = status_for_key(c) {
                        state.set_status(directory, status);
                    }
                }
                _ => {}
            }
            list_state.select(Some(state.selected));
        }
    }
    Ok(())
}

fn draw(frame: &mut Frame, state: &AppState, list_state: &mut ListState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(frame.area());

    let items: Vec<ListItem> = state
        .contacts
        .iter()
        .map(|c| {
            let name = truncate(&c.full_name(), 24);
            let company = if c.company.is_empty() { "?" } else { c.company.as_str() };
            ListItem::new(Line::from(vec![
                Span::styled(format!("{:<2}", status_marker(&c.status)), status_style(&c.status)),
                Span::raw(format!("{} | {}", name, company)),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Contacts ({}) ", state.contacts.len())),
        )
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, chunks[0], list_state);

    let detail = Paragraph::new(build_detail(state))
        .block(Block::default().borders(Borders::ALL).title(" Detail "))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));

    frame.render_widget(detail, chunks[1]);

    let help_area = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(frame.area());

    let help = match &state.message {
        Some(message) => format!(" {}", message),
        None => " j/k:navigate  J/K:scroll  n:not contacted c:contacted r:replied m:meeting  q:quit"
            .to_string(),
    };
    frame.render_widget(
        Paragraph::new(help).style(Style::default().fg(Color::DarkGray)),
        help_area[1],
    );
}

fn status_marker(status: &str) -> &'static str {
    match status {
        DEFAULT_STATUS => " ",
        "Contacted" => "*",
        "Replied" => "+",
        "Meeting Scheduled" => "!",
        _ => "?",
    }
}

fn build_detail(state: &AppState) -> Text<'_> {
    let Some(contact) = state.current() else {
        return Text::raw("No contact selected");
    };

    let mut lines: Vec<Line> = Vec::new();
    lines.push(Line::from(Span::styled(
        contact.full_name(),
        Style::default().add_modifier(Modifier::BOLD),
    )));
    if !contact.job_title.is_empty() || !contact.company.is_empty() {
        lines.push(Line::from(format!("{} at {}", contact.job_title, contact.company)));
    }
    lines.push(Line::from(Span::styled(
        format!("Status: {}", contact.status),
        status_style(&contact.status),
    )));
    lines.push(Line::from(""));

    let fields = [
        ("Email", &contact.email),
        ("LinkedIn", &contact.linkedin_url),
        ("College", &contact.college),
        ("Location", &contact.location),
        ("First contact", &contact.first_contact_date),
        ("Last contact", &contact.last_contact_date),
    ];
    for (label, value) in fields {
        if !value.is_empty() {
            lines.push(Line::from(format!("{}: {}", label, value)));
        }
    }

    if let Some(subject) = &contact.email_subject {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!("Subject: {}", subject),
            Style::default().add_modifier(Modifier::BOLD),
        )));
    }
    if let Some(body) = &contact.email_body {
        lines.push(Line::from(""));
        for line in textwrap::fill(body, 70).lines() {
            lines.push(Line::from(format!("  {}", line)));
        }
    }

    Text::from(lines)
}
