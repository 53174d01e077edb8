use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use family_ledger::app::{App, Dispatch, Screen};
use family_ledger::client::{EntryStatus, LedgerApi, LedgerEntry, ReviewDecision};
use family_ledger::router::Page;
use family_ledger::session::{format_stamp, mask_token, Role};
use family_ledger::views::kid::KidField;
use family_ledger::views::setup::SetupField;
use family_ledger::views::{format_amount, Effect, KidView, ParentView, Reply, SetupView};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Terminal shell around the app: owns the reply channel and a notice line
/// for shell-level failures (storage errors while mounting a page).
struct Shell<'a> {
    app: &'a mut App,
    runtime: &'a Runtime,
    api: Arc<dyn LedgerApi>,
    replies_tx: Sender<(u64, Reply)>,
    notice: String,
}

impl Shell<'_> {
    fn spawn(&self, dispatches: Vec<Dispatch>) {
        for dispatch in dispatches {
            let api = Arc::clone(&self.api);
            let tx = self.replies_tx.clone();
            self.runtime.spawn(async move {
                let outcome = api.execute(&dispatch.call.request).await;
                let reply = dispatch.call.complete(outcome);
                // The receiver is gone once the UI has exited
                let _ = tx.send((dispatch.mount_id, reply));
            });
        }
    }

    fn settle(&mut self, result: family_ledger::Result<Vec<Dispatch>>) {
        match result {
            Ok(dispatches) => self.spawn(dispatches),
            Err(e) => {
                warn!(error = %e, "page action failed");
                self.notice = format!("Error: {}", e);
            }
        }
    }
}

pub fn run_ui(
    app: &mut App,
    runtime: &Runtime,
    api: Arc<dyn LedgerApi>,
    initial: Vec<Dispatch>,
) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let (replies_tx, replies_rx) = mpsc::channel();
    let mut shell = Shell {
        app,
        runtime,
        api,
        replies_tx,
        notice: String::new(),
    };
    shell.spawn(initial);

    let res = run_app(&mut terminal, &mut shell, &replies_rx);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    shell: &mut Shell<'_>,
    replies: &Receiver<(u64, Reply)>,
) -> Result<()> {
    let mut table_state = TableState::default();

    loop {
        while let Ok((mount_id, reply)) = replies.try_recv() {
            let result = shell.app.deliver(mount_id, reply);
            shell.settle(result);
        }
        shell.app.tick(Instant::now());

        terminal.draw(|f| ui(f, shell, &mut table_state))?;

        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(key) = event::read()? {
                handle_key(shell, key);
            }
        }

        if shell.app.should_quit {
            return Ok(());
        }
    }
}

// ============================================================================
// Keys
// ============================================================================

fn handle_key(shell: &mut Shell<'_>, key: KeyEvent) {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        shell.app.should_quit = true;
        return;
    }
    shell.notice.clear();

    let outcome = match &mut shell.app.screen {
        Screen::Setup(view) => setup_key(view, key),
        Screen::Kid(view) => kid_key(view, key),
        Screen::Parent(view) => parent_key(view, key),
    };
    let result = match outcome {
        KeyOutcome::Effect(effect) => shell.app.apply(effect),
        KeyOutcome::Open(path) => shell.app.navigate(path),
        KeyOutcome::Back => shell.app.back(),
        KeyOutcome::Quit => {
            shell.app.should_quit = true;
            return;
        }
    };
    shell.settle(result);
}

enum KeyOutcome {
    Effect(Option<Effect>),
    Open(&'static str),
    Back,
    Quit,
}

fn setup_key(view: &mut SetupView, key: KeyEvent) -> KeyOutcome {
    let effect = match key.code {
        KeyCode::Esc => return KeyOutcome::Quit,
        KeyCode::F(4) => return KeyOutcome::Back,
        KeyCode::F(3) if view.is_setup_complete() => return KeyOutcome::Open("/"),
        KeyCode::Tab => {
            view.focus = view.focus.next(view.role);
            None
        }
        KeyCode::BackTab => {
            view.focus = view.focus.previous(view.role);
            None
        }
        KeyCode::Left | KeyCode::Right => {
            match view.focus {
                SetupField::Role => view.set_role(view.role.toggle()),
                SetupField::Kid => view.cycle_kid(key.code == KeyCode::Right),
                SetupField::ValidateOnSave => view.toggle_validate_before_save(),
                SetupField::Token => {}
            }
            None
        }
        KeyCode::Char(' ') if view.focus == SetupField::ValidateOnSave => {
            view.toggle_validate_before_save();
            None
        }
        KeyCode::Char(c) if view.focus == SetupField::Token => {
            view.push_token_char(c);
            None
        }
        KeyCode::Backspace if view.focus == SetupField::Token => {
            view.pop_token_char();
            None
        }
        KeyCode::F(5) => view.validate(),
        KeyCode::F(8) => view.clear(),
        KeyCode::Enter => view.save(),
        _ => None,
    };
    KeyOutcome::Effect(effect)
}

fn kid_key(view: &mut KidView, key: KeyEvent) -> KeyOutcome {
    let effect = match key.code {
        KeyCode::Esc => return KeyOutcome::Quit,
        KeyCode::F(4) => return KeyOutcome::Back,
        KeyCode::Tab | KeyCode::BackTab => {
            view.focus = view.focus.toggle();
            None
        }
        KeyCode::Enter => view.submit(),
        KeyCode::F(5) => view.refresh(),
        KeyCode::F(2) => view.logout(),
        KeyCode::Backspace if !view.busy => {
            view.focused_input().pop();
            None
        }
        KeyCode::Char(c) if !view.busy => {
            view.focused_input().push(c);
            None
        }
        _ => None,
    };
    KeyOutcome::Effect(effect)
}

fn parent_key(view: &mut ParentView, key: KeyEvent) -> KeyOutcome {
    let effect = match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return KeyOutcome::Quit,
        KeyCode::F(4) | KeyCode::Backspace => return KeyOutcome::Back,
        KeyCode::Down | KeyCode::Char('j') => {
            view.select_next();
            None
        }
        KeyCode::Up | KeyCode::Char('k') => {
            view.select_previous();
            None
        }
        KeyCode::Char('a') => view.review_selected(ReviewDecision::Approved),
        KeyCode::Char('d') => view.review_selected(ReviewDecision::Denied),
        KeyCode::Char('r') | KeyCode::F(5) => view.refresh(),
        KeyCode::Char('s') => view.logout(),
        _ => None,
    };
    KeyOutcome::Effect(effect)
}

// ============================================================================
// Layout
// ============================================================================

fn ui(f: &mut Frame, shell: &Shell<'_>, table_state: &mut TableState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with page title
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], shell.app);

    match &shell.app.screen {
        Screen::Setup(view) => render_setup(f, chunks[1], view),
        Screen::Kid(view) => render_kid(f, chunks[1], view),
        Screen::Parent(view) => render_parent(f, chunks[1], view, table_state),
    }

    render_status_bar(f, chunks[2], shell);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let pages = [Page::Setup, Page::Kid, Page::Parent];

    let mut tab_spans = vec![Span::styled(
        "Family Ledger",
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )];
    tab_spans.push(Span::raw("  |  "));
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.page() {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title(), style));
    }
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(app.current_path().to_string(), Style::default().fg(Color::White)));

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

/// Error, success and status lines shared by every page.
fn message_lines(error: &str, success: &str, status: &str, retry_hint: Option<&str>) -> Vec<Line<'static>> {
    let mut lines = vec![];
    if !error.is_empty() {
        let mut spans = vec![Span::styled(error.to_string(), Style::default().fg(Color::Red))];
        if let Some(hint) = retry_hint {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(hint.to_string(), Style::default().fg(Color::Yellow)));
        }
        lines.push(Line::from(spans));
    }
    if !success.is_empty() {
        lines.push(Line::from(Span::styled(success.to_string(), Style::default().fg(Color::Green))));
    }
    if !status.is_empty() {
        lines.push(Line::from(Span::styled(status.to_string(), Style::default().fg(Color::Cyan))));
    }
    lines
}

fn field_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    }
}

fn label(text: &str, focused: bool) -> Span<'static> {
    let marker = if focused { "→ " } else { "  " };
    Span::styled(format!("{}{:<18}", marker, text), field_style(focused))
}

// ============================================================================
// Setup
// ============================================================================

fn render_setup(f: &mut Frame, area: Rect, view: &SetupView) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(area);

    let mut lines = vec![
        Line::from(vec![
            label("Role", view.focus == SetupField::Role),
            Span::raw(format!("‹ {} ›", view.role.title())),
        ]),
    ];
    if view.role == Role::Kid {
        let name = family_ledger::config::KidProfile::name_for(view.kid_options(), &view.kid_id);
        lines.push(Line::from(vec![
            label("Kid", view.focus == SetupField::Kid),
            Span::raw(format!("‹ {} ({}) ›", name, view.kid_id)),
        ]));
    }
    lines.push(Line::from(vec![
        label("Token", view.focus == SetupField::Token),
        Span::raw(mask_token(view.current_token())),
    ]));
    lines.push(Line::from(vec![
        label("Validate on save", view.focus == SetupField::ValidateOnSave),
        Span::raw(if view.validate_before_save { "[x]" } else { "[ ]" }),
    ]));
    lines.push(Line::from(""));
    if view.has_unsaved_changes() {
        lines.push(Line::from(Span::styled("Unsaved changes", Style::default().fg(Color::Yellow))));
    }
    lines.extend(message_lines(&view.error, &view.success, &view.status, None));

    let form = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(" Setup "),
        );
    f.render_widget(form, chunks[0]);

    let stored = view.stored();
    let (badge, badge_color) = if view.is_setup_complete() {
        ("Ready", Color::Green)
    } else {
        ("Incomplete", Color::Red)
    };
    let role = stored.role.map(|r| r.title()).unwrap_or("—");
    let kid = if stored.kid_id.is_empty() {
        "—".to_string()
    } else {
        family_ledger::config::KidProfile::name_for(view.kid_options(), &stored.kid_id).to_string()
    };
    let token = if stored.token.is_empty() {
        "—".to_string()
    } else {
        mask_token(&stored.token)
    };

    let summary = vec![
        Line::from(Span::styled(badge, Style::default().fg(badge_color).add_modifier(Modifier::BOLD))),
        Line::from(""),
        Line::from(format!("Role:        {}", role)),
        Line::from(format!("Kid:         {}", kid)),
        Line::from(format!("Token:       {}", token)),
        Line::from(format!("Last saved:  {}", format_stamp(stored.setup_updated_at.as_deref()))),
    ];
    let panel = Paragraph::new(summary).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(" Stored setup "),
    );
    f.render_widget(panel, chunks[1]);
}

// ============================================================================
// Kid
// ============================================================================

fn status_color(status: EntryStatus) -> Color {
    match status {
        EntryStatus::Approved => Color::Green,
        EntryStatus::Denied => Color::Red,
        EntryStatus::Pending => Color::Yellow,
        EntryStatus::Unknown => Color::DarkGray,
    }
}

fn entry_row(entry: &LedgerEntry, who: Option<&str>) -> Row<'static> {
    let color = status_color(entry.status);
    let mut cells = vec![Cell::from(truncate(&entry.created_at, 19))];
    if let Some(who) = who {
        cells.push(Cell::from(who.to_string()));
    }
    cells.push(Cell::from(format_amount(entry.amount)).style(Style::default().fg(color)));
    cells.push(Cell::from(truncate(&entry.description, 40)));
    cells.push(Cell::from(entry.status.as_str()).style(Style::default().fg(color)));
    Row::new(cells).height(1)
}

fn render_kid(f: &mut Frame, area: Rect, view: &KidView) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(9), Constraint::Min(0)])
        .split(area);

    let mut lines = vec![
        Line::from(vec![
            Span::styled(format!("{}  ", view.kid_name), Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("Balance: "),
            Span::styled(view.balance_display(), Style::default().fg(Color::Green)),
            Span::raw(format!("   Last updated: {}", format_stamp(view.last_updated_at.as_deref()))),
        ]),
        Line::from(vec![
            label("Amount", view.focus == KidField::Amount),
            Span::raw(view.amount.clone()),
        ]),
        Line::from(vec![
            label("Description", view.focus == KidField::Description),
            Span::raw(view.description.clone()),
        ]),
        Line::from(Span::styled(
            format!("[Enter] {}", view.submit_label()),
            if view.busy {
                Style::default().fg(Color::DarkGray)
            } else {
                Style::default().fg(Color::Yellow)
            },
        )),
    ];
    lines.extend(message_lines(&view.error, &view.success, &view.status, Some("[F5] Retry")));

    let form = Paragraph::new(lines).wrap(Wrap { trim: true }).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Submit an entry "),
    );
    f.render_widget(form, chunks[0]);

    let header = header_row(&["Created", "Amount", "Description", "Status"]);
    let rows = view.visible_recent().iter().map(|e| entry_row(e, None));
    let table = Table::new(
        rows,
        [
            Constraint::Length(21),
            Constraint::Length(10),
            Constraint::Length(42),
            Constraint::Length(10),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(if view.loading { " Recent (loading…) " } else { " Recent " }),
    );
    f.render_widget(table, chunks[1]);
}

// ============================================================================
// Parent
// ============================================================================

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    });
    Row::new(cells.collect::<Vec<_>>())
        .style(Style::default().bg(Color::DarkGray))
        .height(1)
}

fn render_parent(f: &mut Frame, area: Rect, view: &ParentView, table_state: &mut TableState) {
    let top = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(8), Constraint::Min(0)])
        .split(area);
    let upper = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(top[0]);
    let lower = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(top[1]);

    // Balances
    let mut balance_lines: Vec<Line> = view
        .balance_rows()
        .into_iter()
        .map(|(name, amount)| {
            Line::from(vec![
                Span::raw(format!("{:<12}", name)),
                Span::styled(amount, Style::default().fg(Color::Green)),
            ])
        })
        .collect();
    balance_lines.push(Line::from(Span::styled(
        format!("Updated {}", format_stamp(view.last_updated_at.as_deref())),
        Style::default().fg(Color::DarkGray),
    )));
    let balances = Paragraph::new(balance_lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(" Balances "),
    );
    f.render_widget(balances, upper[0]);

    let messages = Paragraph::new(message_lines(&view.error, &view.success, &view.status, Some("[r] Retry")))
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title(" Activity "));
    f.render_widget(messages, upper[1]);

    // Pending queue
    let pending = view.pending();
    let rows = pending.iter().map(|entry| {
        let action = match view.entry_action(&entry.request_id) {
            Some(ReviewDecision::Approved) => "Approving…",
            Some(ReviewDecision::Denied) => "Denying…",
            None if view.can_review(&entry.request_id) => "[a]/[d]",
            None => "",
        };
        Row::new(vec![
            Cell::from(truncate(&entry.created_at, 19)),
            Cell::from(view.kid_name(&entry.kid_id).to_string()),
            Cell::from(format_amount(entry.amount)),
            Cell::from(truncate(&entry.description, 36)),
            Cell::from(action).style(Style::default().fg(Color::Yellow)),
        ])
        .height(1)
    });
    let title = format!(" Pending ({}) ", pending.len());
    let table = Table::new(
        rows,
        [
            Constraint::Length(21),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(38),
            Constraint::Length(12),
        ],
    )
    .header(header_row(&["Created", "Kid", "Amount", "Description", "Action"]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(title),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");
    table_state.select(if pending.is_empty() { None } else { Some(view.selected) });
    f.render_stateful_widget(table, lower[0], table_state);

    // Recent
    let rows = view
        .visible_recent()
        .iter()
        .map(|e| entry_row(e, Some(view.kid_name(&e.kid_id))));
    let recent = Table::new(
        rows,
        [
            Constraint::Length(21),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(42),
            Constraint::Length(10),
        ],
    )
    .header(header_row(&["Created", "Kid", "Amount", "Description", "Status"]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Recent "),
    );
    f.render_widget(recent, lower[1]);
}

// ============================================================================
// Status bar
// ============================================================================

fn key_hint(spans: &mut Vec<Span<'static>>, key: &'static str, what: &'static str) {
    spans.push(Span::styled(key, Style::default().fg(Color::Yellow)));
    spans.push(Span::raw(format!(" {} | ", what)));
}

fn render_status_bar(f: &mut Frame, area: Rect, shell: &Shell<'_>) {
    let mut status_spans = vec![Span::raw(" ")];

    if !shell.notice.is_empty() {
        status_spans.push(Span::styled(shell.notice.clone(), Style::default().fg(Color::Red)));
        status_spans.push(Span::raw(" | "));
    }

    match &shell.app.screen {
        Screen::Setup(view) => {
            key_hint(&mut status_spans, "Tab", "Field");
            key_hint(&mut status_spans, "←/→", "Change");
            key_hint(&mut status_spans, "F5", "Validate");
            key_hint(&mut status_spans, "Enter", "Save");
            key_hint(&mut status_spans, "F8", "Clear");
            if view.is_setup_complete() {
                key_hint(&mut status_spans, "F3", "Dashboard");
            }
        }
        Screen::Kid(_) => {
            key_hint(&mut status_spans, "Tab", "Field");
            key_hint(&mut status_spans, "Enter", "Submit");
            key_hint(&mut status_spans, "F5", "Refresh");
            key_hint(&mut status_spans, "F2", "Change setup");
        }
        Screen::Parent(_) => {
            key_hint(&mut status_spans, "↑/↓", "Select");
            key_hint(&mut status_spans, "a", "Approve");
            key_hint(&mut status_spans, "d", "Deny");
            key_hint(&mut status_spans, "r", "Refresh");
            key_hint(&mut status_spans, "s", "Change setup");
        }
    }
    key_hint(&mut status_spans, "F4", "Back");
    status_spans.push(Span::styled("Esc", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
