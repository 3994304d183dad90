use crate::error::{QuoteError, SubmitError};
use crate::form::{self, Field, FormState, SearchRequest, SubmitRequest, ValidationRequest};
use crate::market::{IndexBoard, IndexSnapshot, MarketClock, MarketStatus};
use crate::portfolio::{PortfolioStore, Summary};
use crate::position::{Position, ProfitClass};
use crate::quote::{QuoteSource, RelayClient, Suggestion};
use crate::refresh::{self, NetworkStatus, RefreshKind, RefreshReport};
use crate::Config;
use chrono::{DateTime, Local};
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{debug, info};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table},
    Frame, Terminal,
};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tui_big_text::{BigText, PixelSize};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_SUGGESTIONS_SHOWN: usize = 8;

fn format_with_commas(value: f64) -> String {
    let formatted = format!("{:.2}", value.abs());
    let (integer_part, decimal_part) = formatted.split_once('.').unwrap_or((&formatted, "00"));

    let formatted_integer = integer_part
        .chars()
        .rev()
        .collect::<Vec<_>>()
        .chunks(3)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(",")
        .chars()
        .rev()
        .collect::<String>();

    let sign = if value < 0.0 && formatted != "0.00" {
        "-"
    } else {
        ""
    };
    format!("{sign}{formatted_integer}.{decimal_part}")
}

fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{amount:.0}")
    } else if amount >= 1.0 {
        format!("{amount:.2}")
    } else if amount >= 0.01 {
        format!("{amount:.4}")
    } else {
        format!("{amount:.8}")
    }
}

fn format_percent(value: f64) -> String {
    format!("{value:+.2}%")
}

fn profit_color(class: ProfitClass) -> Color {
    match class {
        ProfitClass::Profit => Color::Green,
        ProfitClass::Loss => Color::Red,
        ProfitClass::Neutral => Color::Gray,
    }
}

/// Results of background requests, delivered back to the view loop.
#[derive(Debug)]
pub enum AppEvent {
    Suggestions {
        generation: u64,
        result: Result<Vec<Suggestion>, QuoteError>,
    },
    Validation {
        tag: u64,
        symbol: String,
        result: Result<Vec<Suggestion>, QuoteError>,
    },
    Submitted(Result<Position, SubmitError>),
}

pub struct App {
    pub store: PortfolioStore,
    pub indices: IndexBoard,
    pub form: FormState,
    pub should_quit: bool,
    pub network_status: NetworkStatus,
    pub last_update: Option<DateTime<Local>>,
    pub flash_state: bool,
    source: Arc<dyn QuoteSource>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    event_receiver: mpsc::UnboundedReceiver<AppEvent>,
    refresh_receiver: Option<mpsc::UnboundedReceiver<RefreshReport>>,
}

impl App {
    pub fn new(
        source: Arc<dyn QuoteSource>,
        store: PortfolioStore,
        indices: IndexBoard,
        debounce: Duration,
    ) -> App {
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        App {
            store,
            indices,
            form: FormState::new(debounce),
            should_quit: false,
            network_status: NetworkStatus::Connected,
            last_update: None,
            flash_state: false,
            source,
            event_sender,
            event_receiver,
            refresh_receiver: None,
        }
    }

    pub fn set_refresh_receiver(&mut self, receiver: mpsc::UnboundedReceiver<RefreshReport>) {
        self.refresh_receiver = Some(receiver);
    }

    pub fn handle_key(&mut self, key: KeyEvent, now: Instant) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }

        match key.code {
            KeyCode::Esc => {
                if self.form.suggestions.is_empty() {
                    self.should_quit = true;
                } else {
                    self.form.clear_suggestions();
                }
            }
            KeyCode::Tab => {
                if let Some(request) = self.form.focus_next() {
                    self.dispatch_validation(request);
                }
            }
            KeyCode::BackTab => {
                if let Some(request) = self.form.focus_previous() {
                    self.dispatch_validation(request);
                }
            }
            KeyCode::Down => {
                if self.form.focus == Field::Symbol {
                    self.form.highlight_next();
                }
            }
            KeyCode::Up => {
                if self.form.focus == Field::Symbol {
                    self.form.highlight_previous();
                }
            }
            KeyCode::Enter => {
                if self.form.focus == Field::Symbol && self.form.accept_highlighted() {
                    return;
                }
                if let Some(request) = self.form.begin_submit() {
                    self.dispatch_submit(request);
                }
            }
            KeyCode::Backspace => self.form.backspace(now),
            KeyCode::Char(c) => self.form.input_char(c, now),
            _ => {}
        }
    }

    /// Issues the autocomplete query whose quiet period has elapsed, if any.
    pub fn tick(&mut self, now: Instant) {
        if let Some(request) = self.form.take_due_search(now) {
            self.dispatch_search(request);
        }
    }

    /// How long the view loop may block waiting for input.
    pub fn poll_timeout(&self, now: Instant) -> Duration {
        match self.form.search_deadline() {
            Some(due) => due.saturating_duration_since(now).min(POLL_INTERVAL),
            None => POLL_INTERVAL,
        }
    }

    fn dispatch_search(&self, request: SearchRequest) {
        debug!(
            "autocomplete #{} for '{}'",
            request.generation, request.query
        );
        let source = Arc::clone(&self.source);
        let sender = self.event_sender.clone();
        tokio::spawn(async move {
            let result = source.search(&request.query).await;
            let _ = sender.send(AppEvent::Suggestions {
                generation: request.generation,
                result,
            });
        });
    }

    fn dispatch_validation(&self, request: ValidationRequest) {
        let source = Arc::clone(&self.source);
        let sender = self.event_sender.clone();
        tokio::spawn(async move {
            let result = source.search(&request.symbol).await;
            let _ = sender.send(AppEvent::Validation {
                tag: request.tag,
                symbol: request.symbol,
                result,
            });
        });
    }

    fn dispatch_submit(&self, request: SubmitRequest) {
        let source = Arc::clone(&self.source);
        let sender = self.event_sender.clone();
        tokio::spawn(async move {
            let result = form::submit(source.as_ref(), &request).await;
            let _ = sender.send(AppEvent::Submitted(result));
        });
    }

    /// Applies every background result that has arrived since the last call.
    pub fn drain_events(&mut self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.event_receiver.try_recv() {
            changed = true;
            match event {
                AppEvent::Suggestions { generation, result } => {
                    self.form.apply_suggestions(generation, result);
                }
                AppEvent::Validation {
                    tag,
                    symbol,
                    result,
                } => {
                    self.form.apply_validation(tag, &symbol, result);
                }
                AppEvent::Submitted(result) => {
                    self.form.finish_submit(result, &self.store);
                }
            }
        }

        let mut reports = Vec::new();
        if let Some(receiver) = &mut self.refresh_receiver {
            while let Ok(report) = receiver.try_recv() {
                reports.push(report);
            }
        }
        for report in reports {
            changed = true;
            if report.kind == RefreshKind::Prices {
                self.network_status = report.network_status();
            }
            self.mark_refreshed();
        }
        changed
    }

    pub fn mark_refreshed(&mut self) {
        self.last_update = Some(Local::now());
        self.flash_state = !self.flash_state; // Toggle flash state for animation
    }
}

pub async fn run_tui(cfg: &Config) -> eyre::Result<()> {
    let source: Arc<dyn QuoteSource> = Arc::new(RelayClient::new(cfg)?);
    let store = PortfolioStore::new();
    let indices = IndexBoard::new();

    let mut app = App::new(
        Arc::clone(&source),
        store.clone(),
        indices.clone(),
        Duration::from_millis(cfg.debounce_ms),
    );

    // Background refresh loops report over one channel
    let (refresh_sender, refresh_receiver) = mpsc::unbounded_channel();
    app.set_refresh_receiver(refresh_receiver);
    let price_task = refresh::spawn_price_refresh(
        store,
        Arc::clone(&source),
        Duration::from_secs(cfg.price_refresh_secs),
        refresh_sender.clone(),
    );
    let index_task = refresh::spawn_index_refresh(
        indices,
        source,
        Duration::from_secs(cfg.index_refresh_secs),
        refresh_sender,
    );
    info!(
        "dashboard started (prices every {}s, indices every {}s)",
        cfg.price_refresh_secs, cfg.index_refresh_secs
    );

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app).await;

    price_task.abort();
    index_task.abort();

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    res?;
    info!("dashboard closed");
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> eyre::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        // Pick up results from background tasks (non-blocking)
        app.drain_events();

        let timeout = app.poll_timeout(Instant::now());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key, Instant::now());
                }
            }
        }
        app.tick(Instant::now());

        if app.should_quit {
            break;
        }
        // Let spawned requests make progress on this worker
        tokio::task::yield_now().await;
    }
    Ok(())
}

pub(crate) fn ui(f: &mut Frame, app: &App) {
    let positions = app.store.snapshot();
    let show_market = !positions.is_empty();

    let mut constraints = vec![
        Constraint::Length(3), // Title
        Constraint::Length(4), // Indices
        Constraint::Length(3), // Form
        Constraint::Length(3), // Status
        Constraint::Min(8),    // Positions and summary
    ];
    if show_market {
        constraints.push(Constraint::Length(5));
    }
    constraints.push(Constraint::Length(3)); // Help

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(f.area());

    render_title(f, chunks[0], app);
    render_indices(f, chunks[1], &app.indices.snapshot());
    let symbol_area = render_form(f, chunks[2], app);
    render_status(f, chunks[3], app);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(chunks[4]);
    render_positions(f, body[0], &positions);
    render_summary(f, body[1], &Summary::from_positions(&positions));

    let mut next = 5;
    if show_market {
        render_market_info(f, chunks[next], &MarketClock::now());
        next += 1;
    }
    render_help(f, chunks[next]);

    if app.form.focus == Field::Symbol && !app.form.suggestions.is_empty() {
        render_suggestions(f, symbol_area, app);
    }
}

fn render_title(f: &mut Frame, area: Rect, app: &App) {
    let refresh_indicator = if app.flash_state { "↻" } else { "·" };
    let network_indicator = match app.network_status {
        NetworkStatus::Connected => Span::styled("● online", Style::default().fg(Color::Green)),
        NetworkStatus::Partial => Span::styled("● partial", Style::default().fg(Color::Yellow)),
        NetworkStatus::Disconnected => {
            Span::styled("● offline", Style::default().fg(Color::Red))
        }
    };
    let updated = app
        .last_update
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());

    let line = Line::from(vec![
        network_indicator,
        Span::raw(format!("  last refresh {updated} {refresh_indicator}")),
    ]);
    let title = Paragraph::new(line)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Finance Dashboard ")
                .title_alignment(Alignment::Center),
        )
        .alignment(Alignment::Center);
    f.render_widget(title, area);
}

fn render_indices(f: &mut Frame, area: Rect, snapshots: &[IndexSnapshot]) {
    let constraints = vec![Constraint::Ratio(1, snapshots.len().max(1) as u32); snapshots.len()];
    let cells = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(constraints)
        .split(area);

    for (snapshot, cell) in snapshots.iter().zip(cells.iter()) {
        let change_color = if snapshot.change_percent > 0.0 {
            Color::Green
        } else if snapshot.change_percent < 0.0 {
            Color::Red
        } else {
            Color::Gray
        };
        let text = vec![
            Line::from(Span::styled(
                format_with_commas(snapshot.value),
                Style::default()
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(
                format_percent(snapshot.change_percent),
                Style::default().fg(change_color),
            )),
        ];
        let widget = Paragraph::new(text)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!(" {} ", snapshot.name)),
            )
            .alignment(Alignment::Center);
        f.render_widget(widget, *cell);
    }
}

/// Draws the three inputs and returns the symbol field's area.
fn render_form(f: &mut Frame, area: Rect, app: &App) -> Rect {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(30),
            Constraint::Percentage(20),
            Constraint::Percentage(20),
            Constraint::Percentage(30),
        ])
        .split(area);

    let fields = [
        (Field::Symbol, &app.form.symbol, "E.g. AAPL"),
        (Field::Quantity, &app.form.quantity, "Quantity"),
        (Field::Cost, &app.form.cost, "Value"),
    ];

    for ((field, value, placeholder), field_area) in fields.iter().zip(chunks.iter()) {
        let focused = app.form.focus == *field;
        let border_style = if focused {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::Gray)
        };
        let content = if value.is_empty() {
            Span::styled(*placeholder, Style::default().fg(Color::DarkGray))
        } else {
            Span::styled(value.as_str(), Style::default().fg(Color::White))
        };
        let input = Paragraph::new(Line::from(content)).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border_style)
                .title(format!(" {} ", field.label())),
        );
        f.render_widget(input, *field_area);

        if focused {
            let x = field_area.x + 1 + value.chars().count() as u16;
            let max_x = field_area.x + field_area.width.saturating_sub(2);
            f.set_cursor_position((x.min(max_x), field_area.y + 1));
        }
    }

    let (label, style) = if app.form.submitting {
        ("Adding...", Style::default().fg(Color::Yellow))
    } else {
        (
            "Enter: Add Stock",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
    };
    let button = Paragraph::new(label)
        .style(style)
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Center);
    f.render_widget(button, chunks[3]);

    chunks[0]
}

fn render_status(f: &mut Frame, area: Rect, app: &App) {
    let status = Paragraph::new(app.form.status.as_str())
        .block(Block::default().borders(Borders::ALL).title(" Status "))
        .style(Style::default().fg(Color::White));
    f.render_widget(status, area);
}

fn render_positions(f: &mut Frame, area: Rect, positions: &[Position]) {
    let header_cells = ["Symbol", "Qty", "Cost", "Last Done", "Market", "Value", "P/L"]
        .iter()
        .map(|h| {
            Cell::from(*h).style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
        });
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let rows = positions.iter().map(|position| {
        let color = profit_color(position.profit_class());
        Row::new(vec![
            Cell::from(position.symbol().to_string()),
            Cell::from(format_amount(position.quantity())),
            Cell::from(format!("{:.2}", position.cost())),
            Cell::from(format!("{:.2}", position.live_price())),
            Cell::from(position.market_state().to_string()),
            Cell::from(format_with_commas(position.market_value())),
            Cell::from(format_with_commas(position.net())).style(Style::default().fg(color)),
        ])
        .height(1)
    });

    let widths = [
        Constraint::Percentage(13),
        Constraint::Percentage(10),
        Constraint::Percentage(14),
        Constraint::Percentage(15),
        Constraint::Percentage(13),
        Constraint::Percentage(18),
        Constraint::Percentage(17),
    ];

    let title = format!(" Stock List ({}) ", positions.len());
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .style(Style::default().fg(Color::White));

    f.render_widget(table, area);
}

fn render_summary(f: &mut Frame, area: Rect, summary: &Summary) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(6), Constraint::Min(0)])
        .split(area);

    let net_color = profit_color(ProfitClass::of(summary.total_net));
    let big_text_value = format_with_commas(summary.total_value);
    let big_text = BigText::builder()
        .pixel_size(PixelSize::Quadrant)
        .style(Style::default().fg(net_color).add_modifier(Modifier::BOLD))
        .lines(vec![big_text_value.into()])
        .build();

    let big_text_block = Block::default()
        .borders(Borders::ALL)
        .title(" Current Value ")
        .title_alignment(Alignment::Center);
    let inner = big_text_block.inner(chunks[0]);
    f.render_widget(big_text_block, chunks[0]);
    f.render_widget(big_text, inner);

    let label = |s: &'static str| Span::styled(format!("{s:<14}"), Style::default().fg(Color::Gray));
    let lines = vec![
        Line::from(vec![
            label("Invested"),
            Span::raw(format_with_commas(summary.total_invested)),
        ]),
        Line::from(vec![
            label("Net P/L"),
            Span::styled(
                format_with_commas(summary.total_net),
                Style::default().fg(net_color),
            ),
        ]),
        Line::from(vec![
            label("Return"),
            Span::styled(
                format_percent(summary.percent_return()),
                Style::default().fg(net_color),
            ),
        ]),
        Line::from(vec![
            label("Total Gains"),
            Span::styled(
                format_with_commas(summary.total_gains),
                Style::default().fg(Color::Green),
            ),
        ]),
        Line::from(vec![
            label("Total Losses"),
            Span::styled(
                format_with_commas(summary.total_losses),
                Style::default().fg(Color::Red),
            ),
        ]),
        Line::from(vec![
            label("Win Rate"),
            Span::raw(format!(
                "{}% ({}/{})",
                summary.win_rate_rounded(),
                summary.winners,
                summary.count
            )),
        ]),
    ];

    let stats = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(" Summary "));
    f.render_widget(stats, chunks[1]);
}

fn render_market_info(f: &mut Frame, area: Rect, clock: &MarketClock) {
    let status_color = match clock.status {
        MarketStatus::Open => Color::Green,
        MarketStatus::Closed => Color::Red,
    };
    let lines = vec![
        Line::from(vec![
            Span::raw("Market Status: "),
            Span::styled(clock.status_line(), Style::default().fg(status_color)),
        ]),
        Line::from(format!("US Local Time: {} hrs", clock.us_hhmm())),
        Line::from(format!("SG Local Time: {} hrs", clock.sg_hhmm())),
    ];
    let info = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(" Market "));
    f.render_widget(info, area);
}

fn render_help(f: &mut Frame, area: Rect) {
    let help_text = Paragraph::new(
        "Tab/Shift-Tab (next/prev field) | ↑/↓ (suggestions) | Enter (select / add stock) | Esc (close / quit)",
    )
    .block(Block::default().borders(Borders::ALL).title("Help"))
    .style(Style::default().fg(Color::Gray))
    .alignment(Alignment::Center);

    f.render_widget(help_text, area);
}

fn render_suggestions(f: &mut Frame, anchor: Rect, app: &App) {
    let screen = f.area();
    let shown = app.form.suggestions.len().min(MAX_SUGGESTIONS_SHOWN) as u16;
    let y = anchor.y + anchor.height;
    if y >= screen.height {
        return;
    }
    let popup_area = Rect {
        x: anchor.x,
        y,
        width: anchor.width.max(40).min(screen.width.saturating_sub(anchor.x)),
        height: (shown + 2).min(screen.height - y),
    };
    f.render_widget(Clear, popup_area);

    let items: Vec<ListItem> = app
        .form
        .suggestions
        .iter()
        .map(|s| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{:<10}", s.symbol),
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::raw(s.name.clone()),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan))
                .title(" Suggestions "),
        )
        .highlight_style(Style::default().bg(Color::DarkGray))
        .highlight_symbol("> ");

    let mut state = ListState::default();
    state.select(app.form.highlighted);
    f.render_stateful_widget(list, popup_area, &mut state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::mock::MockQuotes;
    use crate::quote::{LiveQuote, MarketState};
    use ratatui::backend::TestBackend;

    fn app_with(quotes: MockQuotes) -> App {
        App::new(
            Arc::new(quotes),
            PortfolioStore::new(),
            IndexBoard::new(),
            Duration::from_millis(300),
        )
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_keys(app: &mut App, s: &str, now: Instant) {
        for c in s.chars() {
            app.handle_key(key(KeyCode::Char(c)), now);
        }
    }

    fn screen_text(app: &App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 40)).unwrap();
        terminal.draw(|f| ui(f, app)).unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    async fn wait_for_events(app: &mut App) {
        for _ in 0..50 {
            if app.drain_events() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no background result arrived");
    }

    #[test]
    fn test_format_with_commas() {
        assert_eq!(format_with_commas(0.0), "0.00");
        assert_eq!(format_with_commas(123.456), "123.46");
        assert_eq!(format_with_commas(1234567.891), "1,234,567.89");
        assert_eq!(format_with_commas(-123.0), "-123.00");
        assert_eq!(format_with_commas(-1234.5), "-1,234.50");
        assert_eq!(format_with_commas(-0.001), "0.00");
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(2.0), "2");
        assert_eq!(format_amount(1.5), "1.50");
        assert_eq!(format_amount(0.25), "0.2500");
    }

    #[test]
    fn test_escape_closes_suggestions_before_quitting() {
        let mut app = app_with(MockQuotes::new());
        app.form.suggestions.push(Suggestion {
            symbol: "AAPL".to_string(),
            name: "Apple Inc.".to_string(),
        });
        app.handle_key(key(KeyCode::Esc), Instant::now());
        assert!(!app.should_quit);
        assert!(app.form.suggestions.is_empty());
        app.handle_key(key(KeyCode::Esc), Instant::now());
        assert!(app.should_quit);
    }

    #[test]
    fn test_ctrl_c_quits() {
        let mut app = app_with(MockQuotes::new());
        app.handle_key(
            KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL),
            Instant::now(),
        );
        assert!(app.should_quit);
        assert!(app.form.symbol.is_empty());
    }

    #[tokio::test]
    async fn test_debounced_autocomplete_fills_suggestions() {
        let quotes = MockQuotes::new()
            .with_symbol("AAPL", "Apple Inc.", 155.0)
            .with_symbol("AAP", "Advance Auto Parts", 60.0);
        let mut app = app_with(quotes);
        let t0 = Instant::now();
        type_keys(&mut app, "aapl", t0);

        app.tick(t0 + Duration::from_millis(100));
        assert!(app.form.suggestions.is_empty());

        app.tick(t0 + Duration::from_millis(300));
        wait_for_events(&mut app).await;
        assert_eq!(app.form.suggestions.len(), 1);
        assert_eq!(app.form.suggestions[0].symbol, "AAPL");

        app.handle_key(key(KeyCode::Down), Instant::now());
        app.handle_key(key(KeyCode::Enter), Instant::now());
        assert_eq!(app.form.symbol, "AAPL");
        assert_eq!(app.form.status, "Selected AAPL - Apple Inc.");
        assert!(app.store.is_empty());
    }

    #[tokio::test]
    async fn test_blur_validation_reports_invalid_ticker() {
        let mut app = app_with(MockQuotes::new().with_symbol("AAPL", "Apple Inc.", 155.0));
        type_keys(&mut app, "zzzz", Instant::now());
        app.handle_key(key(KeyCode::Tab), Instant::now());
        assert_eq!(app.form.focus, Field::Quantity);

        wait_for_events(&mut app).await;
        assert_eq!(
            app.form.status,
            "Invalid ticker symbol. Please check the code."
        );
    }

    #[tokio::test]
    async fn test_full_submission_through_keys() {
        let mut app = app_with(MockQuotes::new().with_symbol("AAPL", "Apple Inc.", 155.0));
        let now = Instant::now();
        type_keys(&mut app, "aapl", now);
        app.handle_key(key(KeyCode::Tab), now);
        type_keys(&mut app, "2", now);
        app.handle_key(key(KeyCode::Tab), now);
        type_keys(&mut app, "150", now);
        app.handle_key(key(KeyCode::Enter), now);
        assert!(app.form.submitting);
        assert_eq!(app.form.cost, "150.00");

        // Blur validation and submission both report back
        for _ in 0..50 {
            app.drain_events();
            if !app.form.submitting {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let positions = app.store.snapshot();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].net(), 10.0);
        assert_eq!(positions[0].profit_class(), ProfitClass::Profit);
        assert!(app.form.symbol.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_report_updates_network_status() {
        let mut app = app_with(MockQuotes::new());
        let (sender, receiver) = mpsc::unbounded_channel();
        app.set_refresh_receiver(receiver);
        sender
            .send(RefreshReport {
                kind: RefreshKind::Prices,
                cycle: 1,
                updated: 0,
                failed: vec!["AAPL".to_string()],
            })
            .unwrap();
        sender
            .send(RefreshReport {
                kind: RefreshKind::Indices,
                cycle: 1,
                updated: 4,
                failed: Vec::new(),
            })
            .unwrap();
        assert!(app.drain_events());
        assert_eq!(app.network_status, NetworkStatus::Disconnected);
        assert!(app.last_update.is_some());
        assert!(!app.flash_state, "flash toggles once per report");
        assert!(!app.drain_events());
    }

    #[tokio::test]
    async fn test_render_dashboard() {
        let app = app_with(MockQuotes::new());
        let text = screen_text(&app);
        assert!(text.contains("Finance Dashboard"));
        assert!(text.contains("No stocks added yet"));
        assert!(text.contains("S&P 500"));
        assert!(!text.contains("Market Status"));

        let quote =
            LiveQuote::resolve("AAPL", Some(155.0), Some(150.0), MarketState::Regular).unwrap();
        app.store.append(Position::new("AAPL", 2.0, 150.0, &quote));
        let text = screen_text(&app);
        assert!(text.contains("AAPL"));
        assert!(text.contains("10.00"));
        assert!(text.contains("Market Status"));
        assert!(text.contains("Stock List (1)"));
        assert!(text.contains("REGULAR"));
    }
}
