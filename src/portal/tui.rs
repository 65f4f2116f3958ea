use std::io;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event as TermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::prelude::Frame;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, BorderType, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table,
    TableState, Wrap,
};
use ratatui::Terminal;

use super::runtime::PortalRuntime;
use super::state::{step_interval, Event, Mode, PortalState};
use crate::arm::AppInsightsComponent;
use crate::logs::{approximate_entry_duration_ms, DetailRow, InvocationRow};
use crate::ui::truncate;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const PAGE_SCROLL: u16 = 10;
const MESSAGE_PREVIEW_CHARS: usize = 160;
const HIGHLIGHT: Color = Color::Rgb(42, 47, 56);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Tenants,
    Subscriptions,
    Apps,
    Invocations,
    Details,
}

impl Focus {
    const ORDER: [Focus; 5] = [
        Focus::Tenants,
        Focus::Subscriptions,
        Focus::Apps,
        Focus::Invocations,
        Focus::Details,
    ];

    fn index(self) -> usize {
        Self::ORDER.iter().position(|f| *f == self).unwrap_or(0)
    }

    fn next(self) -> Self {
        Self::ORDER[(self.index() + 1) % Self::ORDER.len()]
    }

    fn prev(self) -> Self {
        Self::ORDER[(self.index() + Self::ORDER.len() - 1) % Self::ORDER.len()]
    }
}

/// Terminal-only state: focus, cursors, the search editor and the message
/// viewer. Everything that affects fetching lives in [`PortalState`].
pub struct PortalView {
    focus: Focus,
    cursors: [usize; 5],
    followed: [Option<String>; 3],
    search_editing: bool,
    viewer: Option<usize>,
    viewer_scroll: u16,
    status: String,
    status_is_error: bool,
    tick: usize,
    account: String,
}

impl PortalView {
    pub fn new(account: String) -> Self {
        Self {
            focus: Focus::Tenants,
            cursors: [0; 5],
            followed: [None, None, None],
            search_editing: false,
            viewer: None,
            viewer_scroll: 0,
            status: "Tab: focus  Enter: select  /: search  r: refresh  q: quit".into(),
            status_is_error: false,
            tick: 0,
            account,
        }
    }

    fn set_status<S: Into<String>>(&mut self, status: S) {
        self.status = status.into();
        self.status_is_error = false;
    }

    fn cursor(&self, focus: Focus) -> usize {
        self.cursors[focus.index()]
    }

    fn cursor_mut(&mut self, focus: Focus) -> &mut usize {
        &mut self.cursors[focus.index()]
    }

    /// Moves list cursors onto selections made by the state (restored
    /// preferences, defaults) and keeps every cursor in range.
    fn sync(&mut self, state: &PortalState) {
        let selections = [
            (
                Focus::Tenants,
                state.tenant_id.as_deref(),
                state
                    .tenants
                    .iter()
                    .position(|t| Some(t.tenant_id.as_str()) == state.tenant_id.as_deref()),
            ),
            (
                Focus::Subscriptions,
                state.subscription_id.as_deref(),
                state.subscriptions.iter().position(|s| {
                    Some(s.subscription_id.as_str()) == state.subscription_id.as_deref()
                }),
            ),
            (
                Focus::Apps,
                state.app_resource_id.as_deref(),
                state
                    .apps
                    .iter()
                    .position(|a| Some(a.id.as_str()) == state.app_resource_id.as_deref()),
            ),
        ];
        for (slot, (focus, selected, position)) in selections.into_iter().enumerate() {
            if self.followed[slot].as_deref() == selected {
                continue;
            }
            match position {
                Some(position) => {
                    self.followed[slot] = selected.map(str::to_string);
                    *self.cursor_mut(focus) = position;
                }
                // a restored id waits for its list to load
                None if selected.is_some() => {}
                None => self.followed[slot] = None,
            }
        }

        let lens = list_lengths(state);
        for focus in Focus::ORDER {
            let len = lens[focus.index()];
            let cursor = self.cursor_mut(focus);
            *cursor = (*cursor).min(len.saturating_sub(1));
        }
        if self.viewer.is_some_and(|idx| idx >= state.details.len()) {
            self.viewer = None;
            self.viewer_scroll = 0;
        }
    }
}

fn list_lengths(state: &PortalState) -> [usize; 5] {
    [
        state.tenants.len(),
        state.subscriptions.len(),
        state.apps.len(),
        state.invocations.len(),
        state.details.len(),
    ]
}

pub fn run_blocking(mut runtime: PortalRuntime, account: String) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut view = PortalView::new(account);
    runtime.dispatch(Event::Start);
    let result = run_app(&mut terminal, &mut view, &mut runtime);

    disable_raw_mode().ok();
    terminal.backend_mut().execute(LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    result
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    view: &mut PortalView,
    runtime: &mut PortalRuntime,
) -> Result<()> {
    loop {
        runtime.poll();
        view.sync(&runtime.state);
        view.tick = view.tick.wrapping_add(1);
        let armed = runtime.auto_refresh_armed();
        terminal.draw(|frame| draw_ui(frame, view, &runtime.state, armed))?;

        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        if let TermEvent::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            let mut events = Vec::new();
            let quit = handle_key(view, &runtime.state, key, &mut events);
            for event in events {
                runtime.dispatch(event);
            }
            if quit {
                return Ok(());
            }
        }
    }
}

/// Translates a key press into state events. Returns true to quit.
fn handle_key(
    view: &mut PortalView,
    state: &PortalState,
    key: KeyEvent,
    events: &mut Vec<Event>,
) -> bool {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }

    if view.search_editing {
        handle_search_key(view, state, key, events);
        return false;
    }

    if view.viewer.is_some() {
        return handle_viewer_key(view, key);
    }

    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Tab => view.focus = view.focus.next(),
        KeyCode::BackTab => view.focus = view.focus.prev(),
        KeyCode::Up | KeyCode::Char('k') => {
            let cursor = view.cursor_mut(view.focus);
            *cursor = cursor.saturating_sub(1);
        }
        KeyCode::Down | KeyCode::Char('j') => {
            let len = list_lengths(state)[view.focus.index()];
            let cursor = view.cursor_mut(view.focus);
            if *cursor + 1 < len {
                *cursor += 1;
            }
        }
        KeyCode::Home => *view.cursor_mut(view.focus) = 0,
        KeyCode::End => {
            let len = list_lengths(state)[view.focus.index()];
            *view.cursor_mut(view.focus) = len.saturating_sub(1);
        }
        KeyCode::Enter => activate(view, state, events),
        KeyCode::Char('/') => {
            view.search_editing = true;
            view.set_status("Type a keyword. Enter: search  Esc: cancel  Ctrl+u: clear");
        }
        KeyCode::Char('x') => {
            events.push(Event::ResetSearch);
            view.set_status("Search cleared");
        }
        KeyCode::Char('r') => {
            let (event, label) = match view.focus {
                Focus::Tenants => (Event::RefreshTenants, "directories"),
                Focus::Subscriptions => (Event::RefreshSubscriptions, "subscriptions"),
                Focus::Apps => (Event::RefreshApps, "apps"),
                Focus::Invocations => (Event::RefreshInvocations, "invocations"),
                Focus::Details => (Event::RefreshDetails, "details"),
            };
            events.push(event);
            view.set_status(format!("Refreshing {label}..."));
        }
        KeyCode::Char('m') => {
            if state.can_load_more() {
                events.push(Event::LoadMore);
                view.set_status("Loading more invocations...");
            } else if state.mode == Mode::Search {
                view.set_status("Search results are not paged");
            }
        }
        KeyCode::Char('t') => {
            let next = state.time_range.next();
            events.push(Event::SetTimeRange(next));
            view.set_status(format!("Time range: {}", next.label()));
        }
        KeyCode::Char('a') => {
            let enabled = !state.auto_refresh;
            events.push(Event::SetAutoRefresh(enabled));
            view.set_status(if enabled {
                format!("Auto-refresh every {}s", state.auto_refresh_seconds)
            } else {
                "Auto-refresh off".to_string()
            });
        }
        KeyCode::Char('+') | KeyCode::Char('=') | KeyCode::Char('-') => {
            let forward = key.code != KeyCode::Char('-');
            let seconds = step_interval(state.auto_refresh_seconds, forward);
            events.push(Event::SetAutoRefreshSeconds(seconds));
            view.set_status(format!("Auto-refresh interval: {seconds}s"));
        }
        _ => {}
    }
    false
}

fn activate(view: &mut PortalView, state: &PortalState, events: &mut Vec<Event>) {
    let cursor = view.cursor(view.focus);
    match view.focus {
        Focus::Tenants => {
            if let Some(tenant) = state.tenants.get(cursor) {
                events.push(Event::SelectTenant(tenant.tenant_id.clone()));
                view.focus = Focus::Subscriptions;
            }
        }
        Focus::Subscriptions => {
            if let Some(subscription) = state.subscriptions.get(cursor) {
                events.push(Event::SelectSubscription(
                    subscription.subscription_id.clone(),
                ));
                view.focus = Focus::Apps;
            }
        }
        Focus::Apps => {
            if let Some(app) = state.apps.get(cursor) {
                if app.query_app_id().is_none() {
                    view.status = format!("{} has no application id to query", app.name);
                    view.status_is_error = true;
                }
                events.push(Event::SelectApp(app.id.clone()));
                view.focus = Focus::Invocations;
            }
        }
        Focus::Invocations => {
            if let Some(row) = state.invocations.get(cursor) {
                events.push(Event::SelectInvocation {
                    key: row.key(),
                    operation_id: row.operation_id.clone(),
                });
                *view.cursor_mut(Focus::Details) = 0;
                view.focus = Focus::Details;
                view.set_status(format!("Loading details for {}", row.operation_id));
            }
        }
        Focus::Details => {
            if cursor < state.details.len() {
                view.viewer = Some(cursor);
                view.viewer_scroll = 0;
                view.set_status("Up/Down: scroll  PgUp/PgDn: page  Esc: close");
            }
        }
    }
}

fn handle_search_key(
    view: &mut PortalView,
    state: &PortalState,
    key: KeyEvent,
    events: &mut Vec<Event>,
) {
    match key.code {
        KeyCode::Esc => {
            view.search_editing = false;
            events.push(Event::SetSearchInput(state.search_keyword.clone()));
            view.set_status("Search canceled");
        }
        KeyCode::Enter => {
            view.search_editing = false;
            events.push(Event::ConfirmSearch);
            *view.cursor_mut(Focus::Invocations) = 0;
            view.focus = Focus::Invocations;
            let keyword = state.search_input.trim();
            if keyword.is_empty() {
                view.set_status("Showing recent invocations");
            } else {
                view.set_status(format!("Searching for '{keyword}'..."));
            }
        }
        KeyCode::Backspace => {
            let mut input = state.search_input.clone();
            input.pop();
            events.push(Event::SetSearchInput(input));
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            events.push(Event::SetSearchInput(String::new()));
        }
        KeyCode::Char(c) if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT => {
            let mut input = state.search_input.clone();
            input.push(c);
            events.push(Event::SetSearchInput(input));
        }
        _ => {}
    }
}

fn handle_viewer_key(view: &mut PortalView, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Esc | KeyCode::Enter => {
            view.viewer = None;
            view.viewer_scroll = 0;
            view.set_status("Enter: inspect entry  Tab: focus  r: refresh");
        }
        KeyCode::Up | KeyCode::Char('k') => view.viewer_scroll = view.viewer_scroll.saturating_sub(1),
        KeyCode::Down | KeyCode::Char('j') => view.viewer_scroll = view.viewer_scroll.saturating_add(1),
        KeyCode::PageUp => view.viewer_scroll = view.viewer_scroll.saturating_sub(PAGE_SCROLL),
        KeyCode::PageDown => view.viewer_scroll = view.viewer_scroll.saturating_add(PAGE_SCROLL),
        KeyCode::Home => view.viewer_scroll = 0,
        _ => {}
    }
    false
}

fn draw_ui(frame: &mut Frame<'_>, view: &PortalView, state: &PortalState, armed: bool) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(10),
            Constraint::Length(3),
        ])
        .split(frame.area());

    draw_header(frame, chunks[0], view, state);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
        .split(chunks[1]);
    draw_left_column(frame, columns[0], view, state, armed);
    draw_right_column(frame, columns[1], view, state);

    let status_style = if view.status_is_error {
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    };
    let status = Paragraph::new(Line::from(Span::styled(view.status.as_str(), status_style)))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded),
        );
    frame.render_widget(status, chunks[2]);
}

fn draw_header(frame: &mut Frame<'_>, area: Rect, view: &PortalView, state: &PortalState) {
    let app_label = state
        .active_app()
        .map(app_label)
        .unwrap_or_else(|| "no app selected".to_string());
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "Application Insights",
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::styled("    ", Style::default().fg(Color::DarkGray)),
        Span::styled(app_label, Style::default().fg(Color::Gray)),
        Span::styled("    ", Style::default().fg(Color::DarkGray)),
        Span::styled(state.time_range.label(), Style::default().fg(Color::Gray)),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .title(format!("aiv  {}", view.account)),
    );
    frame.render_widget(header, area);
}

fn app_label(app: &AppInsightsComponent) -> String {
    match &app.resource_group {
        Some(group) => format!("{} ({group})", app.name),
        None => app.name.clone(),
    }
}

fn panel_block<'a>(title: String, focused: bool) -> Block<'a> {
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(if focused {
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        })
}

fn panel_title(name: &str, count: usize, loading: bool, tick: usize) -> String {
    if loading {
        format!("{name} [loading {}]", spinner_char(tick))
    } else {
        format!("{name} ({count})")
    }
}

fn draw_left_column(
    frame: &mut Frame<'_>,
    area: Rect,
    view: &PortalView,
    state: &PortalState,
    armed: bool,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(25),
            Constraint::Percentage(25),
            Constraint::Percentage(50),
            Constraint::Length(5),
            Constraint::Length(4),
        ])
        .split(area);

    let tenants: Vec<(String, bool)> = state
        .tenants
        .iter()
        .map(|t| (t.label(), state.tenant_id.as_deref() == Some(t.tenant_id.as_str())))
        .collect();
    draw_selector(
        frame,
        chunks[0],
        view,
        Focus::Tenants,
        panel_title("Directories", tenants.len(), state.loading.tenants, view.tick),
        tenants,
    );

    let subscriptions: Vec<(String, bool)> = state
        .subscriptions
        .iter()
        .map(|s| {
            (
                s.display_name.clone(),
                state.subscription_id.as_deref() == Some(s.subscription_id.as_str()),
            )
        })
        .collect();
    draw_selector(
        frame,
        chunks[1],
        view,
        Focus::Subscriptions,
        panel_title(
            "Subscriptions",
            subscriptions.len(),
            state.loading.subscriptions,
            view.tick,
        ),
        subscriptions,
    );

    let apps: Vec<(String, bool)> = state
        .apps
        .iter()
        .map(|a| {
            (
                app_label(a),
                state.app_resource_id.as_deref() == Some(a.id.as_str()),
            )
        })
        .collect();
    draw_selector(
        frame,
        chunks[2],
        view,
        Focus::Apps,
        panel_title("Apps", apps.len(), state.loading.apps, view.tick),
        apps,
    );

    let auto = if state.auto_refresh {
        format!(
            "on, every {}s{}",
            state.auto_refresh_seconds,
            if armed { "" } else { " (idle)" }
        )
    } else {
        "off".to_string()
    };
    let options = Paragraph::new(vec![
        Line::from(vec![
            Span::styled("Time range    ", Style::default().fg(Color::DarkGray)),
            Span::raw(state.time_range.label()),
        ]),
        Line::from(vec![
            Span::styled("Auto-refresh  ", Style::default().fg(Color::DarkGray)),
            Span::raw(auto),
        ]),
    ])
    .block(
        Block::default()
            .title("Options")
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .title_bottom("t range  a auto  +/- interval"),
    );
    frame.render_widget(options, chunks[3]);

    let error = match &state.error {
        Some(message) => Paragraph::new(Span::styled(
            sanitize_terminal_text(message),
            Style::default().fg(Color::Red),
        ))
        .wrap(Wrap { trim: true }),
        None => Paragraph::new(Span::styled(
            "No errors",
            Style::default().fg(Color::DarkGray),
        )),
    };
    frame.render_widget(
        error.block(
            Block::default()
                .title("Error")
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded),
        ),
        chunks[4],
    );
}

fn draw_selector(
    frame: &mut Frame<'_>,
    area: Rect,
    view: &PortalView,
    focus: Focus,
    title: String,
    entries: Vec<(String, bool)>,
) {
    let focused = view.focus == focus;
    let is_empty = entries.is_empty();
    let items: Vec<ListItem<'_>> = entries
        .into_iter()
        .map(|(label, selected)| {
            let marker = if selected { "● " } else { "  " };
            let style = if selected {
                Style::default().fg(Color::Cyan)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(vec![
                Span::styled(marker, style),
                Span::styled(label, style),
            ]))
        })
        .collect();
    let list = List::new(items)
        .block(panel_block(title, focused))
        .highlight_style(
            Style::default()
                .bg(HIGHLIGHT)
                .add_modifier(Modifier::BOLD),
        );

    let mut list_state = ListState::default();
    if focused && !is_empty {
        list_state.select(Some(view.cursor(focus)));
    }
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn draw_right_column(frame: &mut Frame<'_>, area: Rect, view: &PortalView, state: &PortalState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Percentage(40),
        ])
        .split(area);

    let counts = Paragraph::new(Line::from(vec![
        Span::styled("Invocations ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            state.invocations.len().to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::styled("    Succeeded ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            state.success_count().to_string(),
            Style::default().fg(Color::Green),
        ),
        Span::styled("    Failed ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            state.error_count().to_string(),
            Style::default().fg(Color::Red),
        ),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded),
    );
    frame.render_widget(counts, chunks[0]);

    draw_search(frame, chunks[1], view, state);
    draw_invocations(frame, chunks[2], view, state);
    draw_details(frame, chunks[3], view, state);

    if let Some(idx) = view.viewer {
        if let Some(row) = state.details.get(idx) {
            draw_message_viewer(frame, area, view, state, idx, row);
        }
    }
}

fn draw_search(frame: &mut Frame<'_>, area: Rect, view: &PortalView, state: &PortalState) {
    let text = if view.search_editing {
        state.search_input.as_str()
    } else {
        state.search_keyword.as_str()
    };
    let line = if text.is_empty() && !view.search_editing {
        Line::from(Span::styled(
            "Press / to search trace and exception messages",
            Style::default().fg(Color::DarkGray),
        ))
    } else if view.search_editing {
        Line::from(Span::raw(format!("{text}_")))
    } else {
        Line::from(Span::raw(text))
    };
    let block = Block::default()
        .title(if view.search_editing {
            "Search [active]"
        } else if state.mode == Mode::Search {
            "Search [applied]"
        } else {
            "Search"
        })
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(if view.search_editing {
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        })
        .title_bottom(if view.search_editing {
            "Enter apply  Esc cancel  Ctrl+u clear"
        } else {
            "/ search  x reset"
        });
    frame.render_widget(Paragraph::new(line).block(block), area);
}

fn draw_invocations(frame: &mut Frame<'_>, area: Rect, view: &PortalView, state: &PortalState) {
    let search = state.mode == Mode::Search;
    let mut header_cells = vec!["Started", "Name", "Result", "Duration", "Operation"];
    if search {
        header_cells.push("Matches");
    }
    let header = Row::new(header_cells).style(
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    );

    let rows: Vec<Row<'_>> = state
        .invocations
        .iter()
        .map(|row| {
            let selected = state.selected_invocation_key.as_deref() == Some(row.key().as_str());
            let mut cells = vec![
                Cell::from(format_started(row)),
                Cell::from(row.name.clone()),
                result_cell(row),
                Cell::from(format_duration_ms(row.duration_ms)),
                Cell::from(row.operation_id.clone()),
            ];
            if search {
                cells.push(Cell::from(
                    row.match_count.map(|n| n.to_string()).unwrap_or_default(),
                ));
            }
            let row_style = if selected {
                Style::default().fg(Color::Cyan)
            } else {
                Style::default()
            };
            Row::new(cells).style(row_style)
        })
        .collect();

    let mut widths = vec![
        Constraint::Length(20),
        Constraint::Min(16),
        Constraint::Length(8),
        Constraint::Length(10),
        Constraint::Length(34),
    ];
    if search {
        widths.push(Constraint::Length(8));
    }

    let title = panel_title(
        if search { "Matching invocations" } else { "Invocations" },
        state.invocations.len(),
        state.loading.invocations,
        view.tick,
    );
    let hint = if state.can_load_more() {
        "Enter details  m more  r refresh"
    } else {
        "Enter details  r refresh"
    };
    let table = Table::new(rows, widths)
        .header(header)
        .block(panel_block(title, view.focus == Focus::Invocations).title_bottom(hint))
        .row_highlight_style(
            Style::default()
                .bg(HIGHLIGHT)
                .add_modifier(Modifier::BOLD),
        );

    let mut table_state = TableState::default();
    if !state.invocations.is_empty() {
        table_state.select(Some(view.cursor(Focus::Invocations)));
    }
    frame.render_stateful_widget(table, area, &mut table_state);
}

fn result_cell(row: &InvocationRow) -> Cell<'static> {
    let code = if row.result_code.is_empty() {
        "-".to_string()
    } else {
        row.result_code.clone()
    };
    if row.success {
        Cell::from(format!("✓ {code}")).style(Style::default().fg(Color::Green))
    } else {
        Cell::from(format!("✗ {code}")).style(Style::default().fg(Color::Red))
    }
}

fn draw_details(frame: &mut Frame<'_>, area: Rect, view: &PortalView, state: &PortalState) {
    let header = Row::new(vec!["Time", "Type", "Level", "Message"]).style(
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    );
    let rows: Vec<Row<'_>> = state
        .details
        .iter()
        .map(|row| {
            let preview = sanitize_terminal_text(row.message.lines().next().unwrap_or_default());
            Row::new(vec![
                Cell::from(format_time(&row.timestamp, row.at())),
                Cell::from(row.item_type.clone()),
                Cell::from(row.log_level.clone()).style(level_style(row)),
                Cell::from(truncate(&preview, MESSAGE_PREVIEW_CHARS)),
            ])
        })
        .collect();

    let name = match &state.selected_operation_id {
        Some(op) => format!("Details {op}"),
        None => "Details".to_string(),
    };
    let title = panel_title(&name, state.details.len(), state.loading.details, view.tick);
    let table = Table::new(
        rows,
        [
            Constraint::Length(20),
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Min(20),
        ],
    )
    .header(header)
    .block(
        panel_block(title, view.focus == Focus::Details)
            .title_bottom("Enter inspect entry  r refresh"),
    )
    .row_highlight_style(
        Style::default()
            .bg(HIGHLIGHT)
            .add_modifier(Modifier::BOLD),
    );

    let mut table_state = TableState::default();
    if !state.details.is_empty() {
        table_state.select(Some(view.cursor(Focus::Details)));
    }
    frame.render_stateful_widget(table, area, &mut table_state);
}

fn level_style(row: &DetailRow) -> Style {
    let level = row.log_level.to_ascii_lowercase();
    if row.item_type == "exception" || level == "error" || level == "critical" {
        Style::default().fg(Color::Red)
    } else if level == "warning" {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::Gray)
    }
}

fn draw_message_viewer(
    frame: &mut Frame<'_>,
    area: Rect,
    view: &PortalView,
    state: &PortalState,
    idx: usize,
    row: &DetailRow,
) {
    let popup = centered_rect(area, 90, 80);
    let approx = approximate_entry_duration_ms(&state.details, idx, state.selected_invocation());
    let text = render_entry_text(row, approx);
    let panel = Paragraph::new(text)
        .block(
            Block::default()
                .title(format!("Entry {} of {}", idx + 1, state.details.len()))
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(Style::default().fg(Color::Cyan))
                .title_bottom("Up/Down: scroll  PgUp/PgDn: page  Esc: close"),
        )
        .scroll((view.viewer_scroll, 0))
        .wrap(Wrap { trim: false });
    frame.render_widget(Clear, popup);
    frame.render_widget(panel, popup);
}

fn render_entry_text(row: &DetailRow, approx_ms: Option<f64>) -> String {
    let mut out = String::new();
    out.push_str(&format!("Time: {}\n", row.timestamp));
    out.push_str(&format!("Type: {}", row.item_type));
    if !row.log_level.is_empty() {
        out.push_str(&format!("  Level: {}", row.log_level));
    }
    out.push('\n');
    if let Some(ms) = approx_ms {
        out.push_str(&format!("Approx. duration: {}\n", format_duration_ms(ms)));
    }
    if let Some(ms) = row.duration_ms {
        out.push_str(&format!("Reported duration: {}\n", format_duration_ms(ms)));
    }
    if !row.result_code.is_empty() || row.success.is_some() {
        let outcome = match row.success {
            Some(true) => " (succeeded)",
            Some(false) => " (failed)",
            None => "",
        };
        out.push_str(&format!("Result: {}{outcome}\n", row.result_code));
    }
    if !row.kind.is_empty() {
        out.push_str(&format!("Dependency type: {}\n", row.kind));
    }
    if !row.role_name.is_empty() {
        out.push_str(&format!("Role: {}\n", row.role_name));
    }

    out.push_str("\nMessage\n-------\n");
    let message = sanitize_terminal_text(&row.message);
    if message.trim().is_empty() {
        out.push_str("(empty)\n");
    } else {
        out.push_str(message.trim_end());
        out.push('\n');
    }
    out
}

fn centered_rect(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

fn format_started(row: &InvocationRow) -> String {
    format_time(&row.timestamp, row.started_at())
}

fn format_time(raw: &str, parsed: Option<chrono::DateTime<chrono::Utc>>) -> String {
    parsed
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| raw.to_string())
}

fn format_duration_ms(ms: f64) -> String {
    if ms >= 1000.0 {
        format!("{:.2} s", ms / 1000.0)
    } else {
        format!("{ms:.0} ms")
    }
}

fn spinner_char(tick: usize) -> char {
    match tick % 4 {
        0 => '|',
        1 => '/',
        2 => '-',
        _ => '\\',
    }
}

fn sanitize_terminal_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\n' | '\t' => out.push(ch),
            '\r' | '\x1b' => {}
            c if c.is_control() => out.push(' '),
            c => out.push(c),
        }
    }
    out
}
