use crate::error::AppError;
use crate::scanner::{LogScanner, ScanOutcome};
use crate::snapshot::{evaluate, Snapshot, WindowStatus};
use crate::ui::app::{AppState, LiveSettings, LoopState};
use chrono::{DateTime, Local, Utc};
use crossterm::cursor::Show;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Terminal;
use std::future::Future;
use std::io::{self, IsTerminal};
use std::time::{Duration as StdDuration, Instant};
use tracing::{debug, info};

const COLOR_OK: Color = Color::Green;
const COLOR_WARN: Color = Color::Red;
const COLOR_MUTED: Color = Color::DarkGray;
const COLOR_HEADER: Color = Color::White;

const BAR_FILLED: char = '█';
const BAR_EMPTY: char = '░';
const BAR_UNAVAILABLE: char = '·';
const MIN_BAR_WIDTH: usize = 5;
const MAX_BAR_WIDTH: usize = 50;
const LABEL_WIDTH: usize = 14;
const VALUE_WIDTH: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Quit,
    Refresh,
    Ignore,
}

/// One rendered gauge: label, fill fraction (`None` = unavailable), value text.
#[derive(Debug, Clone, PartialEq)]
struct GaugeRow {
    label: String,
    fraction: Option<f64>,
    value: String,
    warn: bool,
    colored: bool,
}

/// Raw mode plus alternate screen, undone on drop so every exit path
/// (errors and panics included) restores the terminal.
struct TerminalGuard {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

impl TerminalGuard {
    fn enter() -> Result<Self, AppError> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(err) = stdout.execute(EnterAlternateScreen) {
            restore_terminal();
            return Err(err.into());
        }
        match Terminal::new(CrosstermBackend::new(stdout)) {
            Ok(terminal) => Ok(Self { terminal }),
            Err(err) => {
                restore_terminal();
                Err(err.into())
            }
        }
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        restore_terminal();
    }
}

fn restore_terminal() {
    let _ = disable_raw_mode();
    let mut stdout = io::stdout();
    let _ = stdout.execute(LeaveAlternateScreen);
    let _ = stdout.execute(Show);
}

/// Where the loop reads terminal events from. `next_event` waits at most
/// `timeout` and returns `None` when nothing arrived.
pub(crate) trait InputSource {
    fn next_event(&mut self, timeout: StdDuration) -> io::Result<Option<Event>>;
}

struct CrosstermInput;

impl InputSource for CrosstermInput {
    fn next_event(&mut self, timeout: StdDuration) -> io::Result<Option<Event>> {
        if event::poll(timeout)? {
            Ok(Some(event::read()?))
        } else {
            Ok(None)
        }
    }
}

pub async fn run_live(scanner: LogScanner, settings: LiveSettings) -> Result<(), AppError> {
    if !io::stdin().is_terminal() || !io::stdout().is_terminal() {
        return Err(AppError::NotInteractive);
    }

    // Root-level failures surface here, before the terminal changes mode.
    let first = scan_blocking(&scanner).await?;

    let mut state = AppState::new(settings);
    state.finish_refresh(Ok(first), Local::now());
    info!(
        root = %scanner.root().display(),
        lookback_days = scanner.lookback_days(),
        "live dashboard started"
    );

    let mut guard = TerminalGuard::enter()?;
    let scanner = &scanner;
    let result = run_loop(
        &mut guard.terminal,
        &mut CrosstermInput,
        move || scan_blocking(scanner),
        &mut state,
    )
    .await;
    drop(guard);

    info!("live dashboard stopped");
    result
}

async fn run_loop<B, I, S, F>(
    terminal: &mut Terminal<B>,
    input: &mut I,
    mut scan: S,
    state: &mut AppState,
) -> Result<(), AppError>
where
    B: Backend,
    I: InputSource,
    S: FnMut() -> F,
    F: Future<Output = Result<ScanOutcome, AppError>>,
{
    let tick_rate = state.settings.refresh_interval;
    let poll_rate = state.settings.poll_interval;
    let mut last_tick = Instant::now();

    while state.is_running() {
        terminal.draw(|f| render(f, state, Utc::now()))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or(StdDuration::ZERO)
            .min(poll_rate);

        let mut refresh_now = false;
        match input.next_event(timeout)? {
            Some(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                match key_action(key.code, key.modifiers) {
                    KeyAction::Quit => state.stop(),
                    KeyAction::Refresh => refresh_now = true,
                    KeyAction::Ignore => {}
                }
            }
            Some(Event::Resize(width, height)) => {
                debug!(width, height, "terminal resized");
                terminal.autoresize()?;
            }
            _ => {}
        }

        if state.is_running() && (refresh_now || last_tick.elapsed() >= tick_rate) {
            state.begin_refresh();
            terminal.draw(|f| render(f, state, Utc::now()))?;
            // Awaited inline: ticks that elapse during a scan are collapsed
            // into the next one instead of starting a second scan.
            let result = scan().await;
            state.finish_refresh(result, Local::now());
            last_tick = Instant::now();
        }
    }

    Ok(())
}

async fn scan_blocking(scanner: &LogScanner) -> Result<ScanOutcome, AppError> {
    let scanner = scanner.clone();
    tokio::task::spawn_blocking(move || scanner.scan())
        .await
        .map_err(|err| AppError::Io(io::Error::other(err)))?
}

fn key_action(code: KeyCode, modifiers: KeyModifiers) -> KeyAction {
    match code {
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => KeyAction::Quit,
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => KeyAction::Quit,
        KeyCode::Char('r') | KeyCode::Char('R') => KeyAction::Refresh,
        _ => KeyAction::Ignore,
    }
}

/// Proportional ramp of exactly `width` characters.
fn bar(fraction: Option<f64>, width: usize) -> String {
    match fraction {
        Some(f) => {
            let f = if f.is_nan() { 0.0 } else { f.clamp(0.0, 1.0) };
            let filled = ((f * width as f64).round() as usize).min(width);
            let mut out = String::with_capacity(width * 3);
            out.extend(std::iter::repeat(BAR_FILLED).take(filled));
            out.extend(std::iter::repeat(BAR_EMPTY).take(width - filled));
            out
        }
        None => std::iter::repeat(BAR_UNAVAILABLE).take(width).collect(),
    }
}

fn bar_width(area_width: u16) -> usize {
    // borders + two separating spaces
    let reserved = LABEL_WIDTH + VALUE_WIDTH + 4;
    (area_width as usize)
        .saturating_sub(reserved)
        .clamp(MIN_BAR_WIDTH, MAX_BAR_WIDTH)
}

fn format_remaining(status: &WindowStatus, now: DateTime<Utc>) -> String {
    let secs = (status.reset_at - now).num_seconds().max(0);
    let (days, hours, minutes) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60);
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

fn gauge_rows(
    snapshot: Option<&Snapshot>,
    now: DateTime<Utc>,
    warn_threshold: f64,
    colored: bool,
) -> Vec<GaugeRow> {
    let windows = [
        ("5h", snapshot.and_then(|s| s.primary.as_ref())),
        ("weekly", snapshot.and_then(|s| s.secondary.as_ref())),
    ];

    let mut rows = Vec::with_capacity(4);
    for (fallback, status) in windows {
        let label = status.map_or_else(|| fallback.to_string(), |s| s.label.clone());

        let (time_fraction, time_value) = match status {
            Some(s) if s.outdated => (Some(1.0), "reset (stale data)".to_string()),
            Some(s) => (
                Some(s.elapsed_fraction),
                format!(
                    "{:>5.1}%  resets in {}",
                    s.elapsed_fraction * 100.0,
                    format_remaining(s, now)
                ),
            ),
            None => (None, "N/A".to_string()),
        };
        rows.push(GaugeRow {
            label: format!("{label} time"),
            fraction: time_fraction,
            value: time_value,
            warn: false,
            colored: false,
        });

        let current = status.filter(|s| s.usage_fraction.is_some());
        rows.push(GaugeRow {
            label: format!("{label} usage"),
            fraction: current.and_then(|s| s.usage_fraction),
            value: current.map_or_else(
                || "N/A".to_string(),
                |s| format!("{:>5.1}%", s.used_percent),
            ),
            warn: current.is_some_and(|s| s.used_percent >= warn_threshold),
            colored,
        });
    }
    rows
}

fn gauge_line(row: &GaugeRow, bar_len: usize) -> Line<'static> {
    let fill_style = match (row.colored, row.fraction, row.warn) {
        (false, _, _) | (_, None, _) => Style::default(),
        (true, Some(_), true) => Style::default().fg(COLOR_WARN).add_modifier(Modifier::BOLD),
        (true, Some(_), false) => Style::default().fg(COLOR_OK),
    };
    Line::from(vec![
        Span::raw(format!("{:<width$} ", row.label, width = LABEL_WIDTH)),
        Span::styled(bar(row.fraction, bar_len), fill_style),
        Span::raw(format!(" {}", row.value)),
    ])
}

fn render(f: &mut ratatui::Frame, state: &AppState, now: DateTime<Utc>) {
    let size = f.area();
    let colored = state.settings.color;
    let styled = |color: Color| {
        if colored {
            Style::default().fg(color)
        } else {
            Style::default()
        }
    };

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(6),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(size);

    let last_refresh = state
        .view
        .last_refresh
        .map_or_else(|| "never".to_string(), |t| t.format("%H:%M:%S").to_string());
    let source = state.view.latest.as_ref().map_or_else(
        || format!("none under {}", state.settings.sessions_dir.display()),
        |(_, path)| path.display().to_string(),
    );
    let status = match state.loop_state {
        LoopState::Refreshing => "refreshing...",
        _ => state.status.as_str(),
    };

    let header = Paragraph::new(vec![
        Line::from(format!(
            "last refresh {}  ·  every {}s  ·  {}",
            last_refresh,
            state.settings.refresh_interval.as_secs(),
            status
        )),
        Line::from(Span::styled(format!("source {source}"), styled(COLOR_MUTED))),
    ])
    .block(Block::default().borders(Borders::ALL).title(" codex-meter "))
    .style(styled(COLOR_HEADER));
    f.render_widget(header, root[0]);

    let snapshot = state
        .view
        .latest
        .as_ref()
        .map(|(record, _)| evaluate(record, now));
    let width = bar_width(root[1].width);
    let lines: Vec<Line> = gauge_rows(snapshot.as_ref(), now, state.settings.warn_threshold, colored)
        .iter()
        .map(|row| gauge_line(row, width))
        .collect();
    let gauges =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(" Limits "));
    f.render_widget(gauges, root[1]);

    if let Some(record) = snapshot.as_ref().map(|s| &s.record) {
        let tokens = Paragraph::new(vec![
            Line::from(format!(
                "total  {:>12}   last  {:>10}   context {}",
                record.total.total(),
                record.last.total(),
                record
                    .context_window
                    .map_or_else(|| "N/A".to_string(), |w| w.to_string())
            )),
            Line::from(format!(
                "input  {:>12}   cached {:>9}   output {:>9}   reasoning {:>9}",
                record.total.input_tokens,
                record.total.cached_input_tokens,
                record.total.output_tokens,
                record.total.reasoning_output_tokens
            )),
        ])
        .block(Block::default().borders(Borders::ALL).title(" Tokens "));
        f.render_widget(tokens, root[2]);
    }

    let footer = Paragraph::new("r refresh | q/Esc quit").style(styled(COLOR_MUTED));
    f.render_widget(footer, root[3]);
}
